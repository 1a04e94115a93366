//! Decoding DNS messages from wire octets, including pointer-compressed
//! domain names.

use std::fmt;

use super::types::*;

const POINTER_FLAG: u8 = 0b1100_0000;

pub struct ConsumableBuffer<'a> {
    octets: &'a [u8],
    position: usize,
}

impl<'a> ConsumableBuffer<'a> {
    pub fn new(octets: &'a [u8]) -> Self {
        ConsumableBuffer { octets, position: 0 }
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn remaining(&self) -> usize {
        self.octets.len().saturating_sub(self.position)
    }

    pub fn next_u8(&mut self) -> Result<u8, Error> {
        let v = *self.octets.get(self.position).ok_or(Error::UnexpectedEof)?;
        self.position += 1;
        Ok(v)
    }

    pub fn next_u16(&mut self) -> Result<u16, Error> {
        let hi = self.next_u8()?;
        let lo = self.next_u8()?;
        Ok(u16::from_be_bytes([hi, lo]))
    }

    pub fn next_u32(&mut self) -> Result<u32, Error> {
        let a = self.next_u8()?;
        let b = self.next_u8()?;
        let c = self.next_u8()?;
        let d = self.next_u8()?;
        Ok(u32::from_be_bytes([a, b, c, d]))
    }

    pub fn take(&mut self, n: usize) -> Result<&'a [u8], Error> {
        if self.remaining() < n {
            return Err(Error::UnexpectedEof);
        }
        let slice = &self.octets[self.position..self.position + n];
        self.position += n;
        Ok(slice)
    }

    /// A fresh cursor over the whole message at `offset`, used to follow
    /// compression pointers without disturbing the caller's own position.
    pub fn at_offset(&self, offset: usize) -> ConsumableBuffer<'a> {
        ConsumableBuffer {
            octets: self.octets,
            position: offset,
        }
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Error {
    UnexpectedEof,
    /// A compression pointer referenced an offset at or after its own
    /// position - forward and self-referential pointers are rejected so
    /// decoding can't loop.
    PointerNotBackward,
    LabelTooLong,
    NameTooLong,
    UnknownRecordType(u16),
    UnknownRecordClass(u16),
    RdlengthMismatch,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::UnexpectedEof => write!(f, "unexpected end of message"),
            Error::PointerNotBackward => write!(f, "compression pointer does not point backward"),
            Error::LabelTooLong => write!(f, "label exceeds {LABEL_MAX_LEN} octets"),
            Error::NameTooLong => write!(f, "domain name exceeds {DOMAINNAME_MAX_LEN} octets"),
            Error::UnknownRecordType(v) => write!(f, "unknown record type {v}"),
            Error::UnknownRecordClass(v) => write!(f, "unknown record class {v}"),
            Error::RdlengthMismatch => write!(f, "rdata did not consume exactly rdlength octets"),
        }
    }
}

impl std::error::Error for Error {}

impl DomainName {
    pub fn deserialise(buffer: &mut ConsumableBuffer) -> Result<Self, Error> {
        let start = buffer.position();
        let mut labels = Vec::new();
        let mut total_len = 0usize;
        let mut jumped = false;
        let mut cursor = buffer.at_offset(start);

        loop {
            let here = cursor.position();
            let len = cursor.next_u8()?;

            if len & POINTER_FLAG == POINTER_FLAG {
                let lo = cursor.next_u8()?;
                let ptr = (((len & !POINTER_FLAG) as usize) << 8) | lo as usize;
                if ptr >= here {
                    return Err(Error::PointerNotBackward);
                }
                if !jumped {
                    // the outer buffer only advances past the two pointer
                    // octets; the labels themselves come from elsewhere.
                    buffer.position = cursor.position();
                }
                jumped = true;
                cursor = cursor.at_offset(ptr);
                continue;
            }

            if len == 0 {
                if !jumped {
                    buffer.position = cursor.position();
                }
                break;
            }

            if len as usize > LABEL_MAX_LEN {
                return Err(Error::LabelTooLong);
            }
            let label = cursor.take(len as usize)?.to_vec();
            total_len += label.len() + 1;
            if total_len + 1 > DOMAINNAME_MAX_LEN {
                return Err(Error::NameTooLong);
            }
            labels.push(label.to_ascii_lowercase());
            if !jumped {
                buffer.position = cursor.position();
            }
        }

        Ok(DomainName { labels })
    }
}

impl RecordType {
    pub fn deserialise(buffer: &mut ConsumableBuffer) -> Result<Self, Error> {
        let v = buffer.next_u16()?;
        RecordType::from_wire(v).ok_or(Error::UnknownRecordType(v))
    }
}

impl RecordClass {
    pub fn deserialise(buffer: &mut ConsumableBuffer) -> Result<Self, Error> {
        let v = buffer.next_u16()?;
        RecordClass::from_wire(v).ok_or(Error::UnknownRecordClass(v))
    }
}

impl Question {
    pub fn deserialise(buffer: &mut ConsumableBuffer) -> Result<Self, Error> {
        let name = DomainName::deserialise(buffer)?;
        let rtype = RecordType::deserialise(buffer)?;
        let rclass = RecordClass::deserialise(buffer)?;
        Ok(Question { name, rtype, rclass })
    }
}

impl ResourceRecord {
    /// Returns `Ok(None)` rather than an error for a record whose rdata we
    /// cannot interpret (an `rtype` with no payload variant): the rdlength
    /// is still honoured so the rest of the message stays parseable.
    pub fn deserialise(buffer: &mut ConsumableBuffer) -> Result<Option<Self>, Error> {
        let name = DomainName::deserialise(buffer)?;
        let rtype = RecordType::deserialise(buffer)?;
        let rclass = RecordClass::deserialise(buffer)?;
        let ttl = buffer.next_u32()?;
        let rdlength = buffer.next_u16()? as usize;
        let rdata_start = buffer.position();

        let data = match rtype {
            RecordType::A => {
                let octets = buffer.take(4)?;
                Some(RecordData::A {
                    address: std::net::Ipv4Addr::new(octets[0], octets[1], octets[2], octets[3]),
                })
            }
            RecordType::AAAA => {
                let octets = buffer.take(16)?;
                let mut arr = [0u8; 16];
                arr.copy_from_slice(octets);
                Some(RecordData::AAAA {
                    address: std::net::Ipv6Addr::from(arr),
                })
            }
            RecordType::NS => Some(RecordData::NS {
                nsdname: DomainName::deserialise(buffer)?,
            }),
            RecordType::CNAME => Some(RecordData::CNAME {
                cname: DomainName::deserialise(buffer)?,
            }),
            RecordType::PTR => Some(RecordData::PTR {
                ptrdname: DomainName::deserialise(buffer)?,
            }),
            RecordType::MX => {
                let preference = buffer.next_u16()?;
                let exchange = DomainName::deserialise(buffer)?;
                Some(RecordData::MX { preference, exchange })
            }
            RecordType::SOA => {
                let mname = DomainName::deserialise(buffer)?;
                let rname = DomainName::deserialise(buffer)?;
                let serial = buffer.next_u32()?;
                let refresh = buffer.next_u32()?;
                let retry = buffer.next_u32()?;
                let expire = buffer.next_u32()?;
                let minimum = buffer.next_u32()?;
                Some(RecordData::SOA {
                    mname,
                    rname,
                    serial,
                    refresh,
                    retry,
                    expire,
                    minimum,
                })
            }
            RecordType::TXT => {
                let octets = buffer.take(rdlength)?.to_vec();
                Some(RecordData::TXT { octets })
            }
            RecordType::HINFO => {
                let cpu_len = buffer.next_u8()? as usize;
                let cpu = buffer.take(cpu_len)?.to_vec();
                let os_len = buffer.next_u8()? as usize;
                let os = buffer.take(os_len)?.to_vec();
                Some(RecordData::HINFO { cpu, os })
            }
            RecordType::SRV => {
                let priority = buffer.next_u16()?;
                let weight = buffer.next_u16()?;
                let port = buffer.next_u16()?;
                let target = DomainName::deserialise(buffer)?;
                Some(RecordData::SRV {
                    priority,
                    weight,
                    port,
                    target,
                })
            }
            RecordType::AXFR | RecordType::ALL | RecordType::NONE => {
                // legal only in questions; skip the rdata so the rest of
                // the message stays parseable.
                buffer.take(rdlength)?;
                None
            }
        };

        let consumed = buffer.position() - rdata_start;
        if data.is_some() && consumed != rdlength {
            return Err(Error::RdlengthMismatch);
        }

        Ok(data.map(|data| ResourceRecord { name, rclass, ttl, data }))
    }
}

impl Message {
    pub fn from_octets(octets: &[u8]) -> Result<Self, Error> {
        let mut buffer = ConsumableBuffer::new(octets);
        Message::deserialise(&mut buffer)
    }

    pub fn deserialise(buffer: &mut ConsumableBuffer) -> Result<Self, Error> {
        let id = buffer.next_u16()?;
        let octet1 = buffer.next_u8()?;
        let octet2 = buffer.next_u8()?;

        let action = if octet1 & 0b1000_0000 != 0 {
            Action::Response
        } else {
            Action::Query
        };
        let opcode = Opcode::from_wire((octet1 >> 3) & 0b0000_1111);
        let flags = MessageFlags {
            authoritative: octet1 & 0b0000_0100 != 0,
            truncated: octet1 & 0b0000_0010 != 0,
            recursion_desired: octet1 & 0b0000_0001 != 0,
            recursion_available: octet2 & 0b1000_0000 != 0,
        };
        let result = MessageResult::from_wire(octet2 & 0b0000_1111);

        let qdcount = buffer.next_u16()?;
        let ancount = buffer.next_u16()?;
        let nscount = buffer.next_u16()?;
        let arcount = buffer.next_u16()?;

        let mut questions = Vec::with_capacity(qdcount as usize);
        for _ in 0..qdcount {
            questions.push(Question::deserialise(buffer)?);
        }

        let mut answers = Vec::with_capacity(ancount as usize);
        for _ in 0..ancount {
            if let Some(rr) = ResourceRecord::deserialise(buffer)? {
                answers.push(rr);
            }
        }

        let mut authority = Vec::with_capacity(nscount as usize);
        for _ in 0..nscount {
            if let Some(rr) = ResourceRecord::deserialise(buffer)? {
                authority.push(rr);
            }
        }

        let mut additional = Vec::with_capacity(arcount as usize);
        for _ in 0..arcount {
            if let Some(rr) = ResourceRecord::deserialise(buffer)? {
                additional.push(rr);
            }
        }

        Ok(Message {
            id,
            opcode,
            action,
            result,
            flags,
            questions,
            answers,
            authority,
            additional,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn scenario_2_decode_a_answer() {
        let mut message = Message::from_question(
            1,
            Question {
                name: DomainName::from_dotted_string("example.com.").unwrap(),
                rtype: RecordType::A,
                rclass: RecordClass::IN,
            },
        );
        message.action = Action::Response;
        message.result = MessageResult::NoError;
        message.answers.push(ResourceRecord {
            name: DomainName::from_dotted_string("example.com.").unwrap(),
            rclass: RecordClass::IN,
            ttl: 3600,
            data: RecordData::A {
                address: Ipv4Addr::new(93, 184, 216, 34),
            },
        });

        let octets = message.clone().to_octets().unwrap();
        let decoded = Message::from_octets(&octets).unwrap();

        assert_eq!(decoded.result, MessageResult::NoError);
        assert_eq!(decoded.answers.len(), 1);
        assert_eq!(decoded.answers[0].ttl, 3600);
        assert!(matches!(
            decoded.answers[0].data,
            RecordData::A { address } if address == Ipv4Addr::new(93, 184, 216, 34)
        ));
    }

    #[test]
    fn rejects_forward_pointer() {
        // a name whose first label is a pointer to an offset after itself
        let mut octets = vec![0u8; 12]; // fake header
        let ptr_pos = octets.len();
        octets.push(POINTER_FLAG | 0);
        octets.push((ptr_pos + 10) as u8); // points forward, past itself
        let mut buffer = ConsumableBuffer::new(&octets);
        buffer.position = ptr_pos;
        assert_eq!(DomainName::deserialise(&mut buffer), Err(Error::PointerNotBackward));
    }

    #[test]
    fn compression_roundtrip() {
        let mut message = Message::from_question(
            2,
            Question {
                name: DomainName::from_dotted_string("www.example.com.").unwrap(),
                rtype: RecordType::A,
                rclass: RecordClass::IN,
            },
        );
        message.action = Action::Response;
        message.answers.push(ResourceRecord {
            name: DomainName::from_dotted_string("www.example.com.").unwrap(),
            rclass: RecordClass::IN,
            ttl: 60,
            data: RecordData::A {
                address: Ipv4Addr::new(1, 2, 3, 4),
            },
        });

        let octets = message.clone().to_octets().unwrap();
        let decoded = Message::from_octets(&octets).unwrap();
        assert_eq!(decoded, message);
    }
}
