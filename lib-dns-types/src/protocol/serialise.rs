//! Encoding DNS messages to wire octets, including label compression.

use std::collections::HashMap;
use std::fmt;

use super::types::*;

/// Pointer labels use the top two bits of the length octet; the remaining
/// 14 bits are the offset into the message.
const POINTER_MASK: u8 = 0b1100_0000;
const POINTER_MAX_OFFSET: usize = 0x3FFF;

pub struct WritableBuffer {
    pub octets: Vec<u8>,
    /// Maps a suffix of labels (root-most first truncation point) to the
    /// offset at which that suffix was first written, so later names
    /// sharing the suffix can emit a pointer instead of repeating labels.
    compressions: HashMap<Vec<Vec<u8>>, u16>,
}

impl Default for WritableBuffer {
    fn default() -> Self {
        WritableBuffer {
            octets: Vec::new(),
            compressions: HashMap::new(),
        }
    }
}

impl WritableBuffer {
    pub fn index(&self) -> usize {
        self.octets.len()
    }

    pub fn write_u8(&mut self, v: u8) {
        self.octets.push(v);
    }

    pub fn write_u16(&mut self, v: u16) {
        self.octets.extend_from_slice(&v.to_be_bytes());
    }

    pub fn write_u32(&mut self, v: u32) {
        self.octets.extend_from_slice(&v.to_be_bytes());
    }

    pub fn write_octets(&mut self, octets: &[u8]) {
        self.octets.extend_from_slice(octets);
    }

    /// Writes a domain name, compressing against any previously-written
    /// suffix that is still within the 14-bit pointer range.
    pub fn write_domain_name(&mut self, name: &DomainName) {
        for i in 0..=name.labels.len() {
            let suffix = &name.labels[i..];
            if let Some(&offset) = self.compressions.get(suffix) {
                self.write_u16(POINTER_MASK as u16 * 0x100 | offset);
                return;
            }
            if i < name.labels.len() {
                let offset = self.index();
                if offset <= POINTER_MAX_OFFSET {
                    self.compressions.insert(suffix.to_vec(), offset as u16);
                }
                let label = &name.labels[i];
                self.write_u8(label.len() as u8);
                self.write_octets(label);
            }
        }
        self.write_u8(0);
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Error {
    CounterTooLarge { counter_name: &'static str, value: usize },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::CounterTooLarge { counter_name, value } => {
                write!(f, "{counter_name} count {value} does not fit in a u16")
            }
        }
    }
}

impl std::error::Error for Error {}

fn usize_to_u16(counter_name: &'static str, value: usize) -> Result<u16, Error> {
    u16::try_from(value).map_err(|_| Error::CounterTooLarge { counter_name, value })
}

impl Message {
    pub fn to_octets(&self) -> Result<Vec<u8>, Error> {
        let mut buffer = WritableBuffer::default();
        self.serialise(&mut buffer)?;
        Ok(buffer.octets)
    }

    pub fn serialise(&self, buffer: &mut WritableBuffer) -> Result<(), Error> {
        buffer.write_u16(self.id);

        let mut octet1 = self.opcode.to_wire() << 3;
        if self.action == Action::Response {
            octet1 |= 0b1000_0000;
        }
        if self.flags.authoritative {
            octet1 |= 0b0000_0100;
        }
        if self.flags.truncated {
            octet1 |= 0b0000_0010;
        }
        if self.flags.recursion_desired {
            octet1 |= 0b0000_0001;
        }
        buffer.write_u8(octet1);

        let mut octet2 = self.result.to_wire();
        if self.flags.recursion_available {
            octet2 |= 0b1000_0000;
        }
        buffer.write_u8(octet2);

        buffer.write_u16(usize_to_u16("question", self.questions.len())?);
        buffer.write_u16(usize_to_u16("answer", self.answers.len())?);
        buffer.write_u16(usize_to_u16("authority", self.authority.len())?);
        buffer.write_u16(usize_to_u16("additional", self.additional.len())?);

        for question in &self.questions {
            question.serialise(buffer);
        }
        for rr in &self.answers {
            rr.serialise(buffer);
        }
        for rr in &self.authority {
            rr.serialise(buffer);
        }
        for rr in &self.additional {
            rr.serialise(buffer);
        }

        Ok(())
    }
}

impl Question {
    pub fn serialise(&self, buffer: &mut WritableBuffer) {
        buffer.write_domain_name(&self.name);
        buffer.write_u16(self.rtype.to_wire());
        buffer.write_u16(self.rclass.to_wire());
    }
}

impl ResourceRecord {
    pub fn serialise(&self, buffer: &mut WritableBuffer) {
        buffer.write_domain_name(&self.name);
        buffer.write_u16(self.rtype().to_wire());
        buffer.write_u16(self.rclass.to_wire());
        buffer.write_u32(self.ttl);

        let rdlength_index = buffer.index();
        buffer.write_u16(0);
        let rdata_start = buffer.index();

        match &self.data {
            RecordData::A { address } => buffer.write_octets(&address.octets()),
            RecordData::AAAA { address } => buffer.write_octets(&address.octets()),
            RecordData::NS { nsdname } => buffer.write_domain_name(nsdname),
            RecordData::CNAME { cname } => buffer.write_domain_name(cname),
            RecordData::PTR { ptrdname } => buffer.write_domain_name(ptrdname),
            RecordData::MX { preference, exchange } => {
                buffer.write_u16(*preference);
                buffer.write_domain_name(exchange);
            }
            RecordData::SOA {
                mname,
                rname,
                serial,
                refresh,
                retry,
                expire,
                minimum,
            } => {
                buffer.write_domain_name(mname);
                buffer.write_domain_name(rname);
                buffer.write_u32(*serial);
                buffer.write_u32(*refresh);
                buffer.write_u32(*retry);
                buffer.write_u32(*expire);
                buffer.write_u32(*minimum);
            }
            RecordData::TXT { octets } => buffer.write_octets(octets),
            RecordData::HINFO { cpu, os } => {
                buffer.write_u8(cpu.len() as u8);
                buffer.write_octets(cpu);
                buffer.write_u8(os.len() as u8);
                buffer.write_octets(os);
            }
            RecordData::SRV {
                priority,
                weight,
                port,
                target,
            } => {
                buffer.write_u16(*priority);
                buffer.write_u16(*weight);
                buffer.write_u16(*port);
                buffer.write_domain_name(target);
            }
        }

        let rdlength = (buffer.index() - rdata_start) as u16;
        buffer.octets[rdlength_index..rdlength_index + 2].copy_from_slice(&rdlength.to_be_bytes());
    }
}
