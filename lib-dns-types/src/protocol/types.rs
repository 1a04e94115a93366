//! In-memory representation of DNS messages, questions and resource records.
//!
//! This module owns the record-type taxonomy. Serialisation lives in
//! `serialise` and `deserialise`; this module only knows how to hold and
//! compare values, plus a handful of constructors used throughout the
//! resolver.

use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};

pub const LABEL_MAX_LEN: usize = 63;
pub const DOMAINNAME_MAX_LEN: usize = 255;

/// A domain name, stored both as the dot-split labels and as the raw
/// (uncompressed) wire octets so serialisation doesn't need to re-derive
/// lengths.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct DomainName {
    pub labels: Vec<Vec<u8>>,
}

impl DomainName {
    pub fn root() -> Self {
        DomainName { labels: Vec::new() }
    }

    pub fn is_root(&self) -> bool {
        self.labels.is_empty()
    }

    /// Builds a domain name from a dotted string, appending a trailing dot
    /// (i.e. a root label) if the caller didn't already terminate it -
    /// this is the FQDN canonicalisation the data model requires of
    /// `Question::new`.
    pub fn from_dotted_string(s: &str) -> Result<Self, DomainNameError> {
        let trimmed = s.strip_suffix('.').unwrap_or(s);
        if trimmed.is_empty() {
            return Ok(DomainName::root());
        }
        let mut labels = Vec::new();
        for part in trimmed.split('.') {
            if part.is_empty() {
                return Err(DomainNameError::EmptyLabel);
            }
            if part.len() > LABEL_MAX_LEN {
                return Err(DomainNameError::LabelTooLong);
            }
            labels.push(part.as_bytes().to_ascii_lowercase());
        }
        let name = DomainName { labels };
        if name.wire_len() > DOMAINNAME_MAX_LEN {
            return Err(DomainNameError::NameTooLong);
        }
        Ok(name)
    }

    pub fn to_dotted_string(&self) -> String {
        if self.is_root() {
            return ".".to_string();
        }
        let mut s = String::new();
        for label in &self.labels {
            s.push_str(&String::from_utf8_lossy(label));
            s.push('.');
        }
        s
    }

    /// Length this name would occupy on the wire, uncompressed: each label
    /// is a length octet plus its bytes, terminated by a zero octet.
    pub fn wire_len(&self) -> usize {
        self.labels.iter().map(|l| l.len() + 1).sum::<usize>() + 1
    }
}

impl fmt::Debug for DomainName {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.to_dotted_string())
    }
}

impl fmt::Display for DomainName {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.to_dotted_string())
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum DomainNameError {
    EmptyLabel,
    LabelTooLong,
    NameTooLong,
}

impl fmt::Display for DomainNameError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            DomainNameError::EmptyLabel => write!(f, "domain name has an empty label"),
            DomainNameError::LabelTooLong => write!(f, "label exceeds {LABEL_MAX_LEN} octets"),
            DomainNameError::NameTooLong => write!(f, "domain name exceeds {DOMAINNAME_MAX_LEN} octets"),
        }
    }
}

impl std::error::Error for DomainNameError {}

#[cfg(any(feature = "test-util", test))]
impl<'a> arbitrary::Arbitrary<'a> for DomainName {
    fn arbitrary(u: &mut arbitrary::Unstructured<'a>) -> arbitrary::Result<Self> {
        let num_labels = u.int_in_range::<usize>(0..=10)?;
        let mut labels = Vec::with_capacity(num_labels);
        for _ in 0..num_labels {
            let label_len = u.int_in_range::<u8>(1..=20)?;
            let bytes = u.bytes(label_len.into())?;
            let label = bytes
                .iter()
                .map(|b| {
                    let ascii = if b.is_ascii() { *b } else { b % 128 };
                    ascii.to_ascii_lowercase()
                })
                .collect::<Vec<u8>>();
            labels.push(label);
        }
        Ok(DomainName { labels })
    }
}

/// The closed record-type taxonomy: `AXFR`, `ALL` and `NONE` are legal in
/// questions but never carry a payload.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
#[cfg_attr(any(feature = "test-util", test), derive(arbitrary::Arbitrary))]
pub enum RecordType {
    A,
    NS,
    CNAME,
    SOA,
    PTR,
    HINFO,
    MX,
    TXT,
    AAAA,
    SRV,
    AXFR,
    ALL,
    NONE,
}

impl RecordType {
    pub fn to_wire(self) -> u16 {
        match self {
            RecordType::A => 1,
            RecordType::NS => 2,
            RecordType::CNAME => 5,
            RecordType::SOA => 6,
            RecordType::PTR => 12,
            RecordType::HINFO => 13,
            RecordType::MX => 15,
            RecordType::TXT => 16,
            RecordType::AAAA => 28,
            RecordType::SRV => 33,
            RecordType::AXFR => 252,
            RecordType::ALL => 255,
            RecordType::NONE => 0,
        }
    }

    pub fn from_wire(value: u16) -> Option<Self> {
        match value {
            1 => Some(RecordType::A),
            2 => Some(RecordType::NS),
            5 => Some(RecordType::CNAME),
            6 => Some(RecordType::SOA),
            12 => Some(RecordType::PTR),
            13 => Some(RecordType::HINFO),
            15 => Some(RecordType::MX),
            16 => Some(RecordType::TXT),
            28 => Some(RecordType::AAAA),
            33 => Some(RecordType::SRV),
            252 => Some(RecordType::AXFR),
            255 => Some(RecordType::ALL),
            0 => Some(RecordType::NONE),
            _ => None,
        }
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
#[cfg_attr(any(feature = "test-util", test), derive(arbitrary::Arbitrary))]
pub enum RecordClass {
    IN,
    CSNET,
    CHAOS,
    HESIOD,
    ALL,
    NONE,
}

impl RecordClass {
    pub fn to_wire(self) -> u16 {
        match self {
            RecordClass::IN => 1,
            RecordClass::CSNET => 2,
            RecordClass::CHAOS => 3,
            RecordClass::HESIOD => 4,
            RecordClass::NONE => 254,
            RecordClass::ALL => 255,
        }
    }

    pub fn from_wire(value: u16) -> Option<Self> {
        match value {
            1 => Some(RecordClass::IN),
            2 => Some(RecordClass::CSNET),
            3 => Some(RecordClass::CHAOS),
            4 => Some(RecordClass::HESIOD),
            254 => Some(RecordClass::NONE),
            255 => Some(RecordClass::ALL),
            _ => None,
        }
    }
}

impl fmt::Display for RecordClass {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Tuple carried in a query message and used as the cache's lookup key.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
#[cfg_attr(any(feature = "test-util", test), derive(arbitrary::Arbitrary))]
pub struct Question {
    pub name: DomainName,
    pub rtype: RecordType,
    pub rclass: RecordClass,
}

impl Question {
    /// Canonicalises `domain` to an FQDN (trailing dot) and defaults
    /// `rclass` to IN, per the data model.
    pub fn new(domain: &str, rtype: RecordType) -> Result<Self, DomainNameError> {
        Ok(Question {
            name: DomainName::from_dotted_string(domain)?,
            rtype,
            rclass: RecordClass::IN,
        })
    }
}

impl fmt::Display for Question {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} {} {}", self.name, self.rclass, self.rtype)
    }
}

/// The typed payload of a resource record. Only the ten variants the
/// specification lists carry data; `AXFR`/`ALL`/`NONE` never appear here.
#[derive(Debug, Clone, PartialEq, Hash)]
#[cfg_attr(any(feature = "test-util", test), derive(arbitrary::Arbitrary))]
pub enum RecordData {
    A { address: Ipv4Addr },
    AAAA { address: Ipv6Addr },
    NS { nsdname: DomainName },
    CNAME { cname: DomainName },
    PTR { ptrdname: DomainName },
    MX { preference: u16, exchange: DomainName },
    SOA {
        mname: DomainName,
        rname: DomainName,
        serial: u32,
        refresh: u32,
        retry: u32,
        expire: u32,
        minimum: u32,
    },
    TXT { octets: Vec<u8> },
    HINFO { cpu: Vec<u8>, os: Vec<u8> },
    SRV {
        priority: u16,
        weight: u16,
        port: u16,
        target: DomainName,
    },
}

impl RecordData {
    pub fn rtype(&self) -> RecordType {
        match self {
            RecordData::A { .. } => RecordType::A,
            RecordData::AAAA { .. } => RecordType::AAAA,
            RecordData::NS { .. } => RecordType::NS,
            RecordData::CNAME { .. } => RecordType::CNAME,
            RecordData::PTR { .. } => RecordType::PTR,
            RecordData::MX { .. } => RecordType::MX,
            RecordData::SOA { .. } => RecordType::SOA,
            RecordData::TXT { .. } => RecordType::TXT,
            RecordData::HINFO { .. } => RecordType::HINFO,
            RecordData::SRV { .. } => RecordType::SRV,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(any(feature = "test-util", test), derive(arbitrary::Arbitrary))]
pub struct ResourceRecord {
    pub name: DomainName,
    pub rclass: RecordClass,
    pub ttl: u32,
    pub data: RecordData,
}

impl ResourceRecord {
    pub fn rtype(&self) -> RecordType {
        self.data.rtype()
    }

    pub fn matches(&self, question: &Question) -> bool {
        self.name == question.name
            && self.rtype() == question.rtype
            && self.rclass == question.rclass
    }
}

impl fmt::Display for ResourceRecord {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}\t{}\t{}\t{}", self.name, self.ttl, self.rclass, self.rtype())
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum Opcode {
    Squery,
    Iquery,
    Status,
    NoOpcode,
}

impl Opcode {
    pub fn to_wire(self) -> u8 {
        match self {
            Opcode::Squery => 0,
            Opcode::Iquery => 1,
            Opcode::Status => 2,
            Opcode::NoOpcode => 15,
        }
    }

    pub fn from_wire(value: u8) -> Self {
        match value {
            0 => Opcode::Squery,
            1 => Opcode::Iquery,
            2 => Opcode::Status,
            _ => Opcode::NoOpcode,
        }
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum Action {
    Query,
    Response,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum MessageResult {
    NoError,
    FormatError,
    ServerError,
    NameError,
    NotImplemented,
    Refused,
    NoResult,
}

impl MessageResult {
    pub fn to_wire(self) -> u8 {
        match self {
            MessageResult::NoError => 0,
            MessageResult::FormatError => 1,
            MessageResult::ServerError => 2,
            MessageResult::NameError => 3,
            MessageResult::NotImplemented => 4,
            MessageResult::Refused => 5,
            MessageResult::NoResult => 15,
        }
    }

    pub fn from_wire(value: u8) -> Self {
        match value {
            0 => MessageResult::NoError,
            1 => MessageResult::FormatError,
            2 => MessageResult::ServerError,
            3 => MessageResult::NameError,
            4 => MessageResult::NotImplemented,
            5 => MessageResult::Refused,
            _ => MessageResult::NoResult,
        }
    }
}

impl fmt::Display for MessageResult {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Default)]
pub struct MessageFlags {
    pub authoritative: bool,
    pub truncated: bool,
    pub recursion_desired: bool,
    pub recursion_available: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub id: u16,
    pub opcode: Opcode,
    pub action: Action,
    pub result: MessageResult,
    pub flags: MessageFlags,
    pub questions: Vec<Question>,
    pub answers: Vec<ResourceRecord>,
    pub authority: Vec<ResourceRecord>,
    pub additional: Vec<ResourceRecord>,
}

impl Message {
    /// Builds a single-question query message with the defaults the
    /// external interface table specifies: RD=1, opcode=SQUERY,
    /// action=QUERY.
    pub fn from_question(id: u16, question: Question) -> Self {
        Message {
            id,
            opcode: Opcode::Squery,
            action: Action::Query,
            result: MessageResult::NoResult,
            flags: MessageFlags {
                authoritative: false,
                truncated: false,
                recursion_desired: true,
                recursion_available: false,
            },
            questions: vec![question],
            answers: Vec::new(),
            authority: Vec::new(),
            additional: Vec::new(),
        }
    }
}

#[cfg(any(test, feature = "test-util"))]
pub mod test_util {
    use super::*;

    pub fn domain(s: &str) -> DomainName {
        DomainName::from_dotted_string(s).expect("valid test domain")
    }

    pub fn a_record(name: &str, address: Ipv4Addr) -> ResourceRecord {
        ResourceRecord {
            name: domain(name),
            rclass: RecordClass::IN,
            ttl: 300,
            data: RecordData::A { address },
        }
    }

    pub fn aaaa_record(name: &str, address: Ipv6Addr) -> ResourceRecord {
        ResourceRecord {
            name: domain(name),
            rclass: RecordClass::IN,
            ttl: 300,
            data: RecordData::AAAA { address },
        }
    }

    pub fn cname_record(name: &str, target: &str) -> ResourceRecord {
        ResourceRecord {
            name: domain(name),
            rclass: RecordClass::IN,
            ttl: 300,
            data: RecordData::CNAME { cname: domain(target) },
        }
    }

    pub fn ns_record(name: &str, nsdname: &str) -> ResourceRecord {
        ResourceRecord {
            name: domain(name),
            rclass: RecordClass::IN,
            ttl: 300,
            data: RecordData::NS { nsdname: domain(nsdname) },
        }
    }

    /// A randomly-generated record, for cache/eviction tests that don't
    /// care about any particular payload shape. Feeds random bytes
    /// through the derived `Arbitrary` impl rather than hand-rolling a
    /// generator per variant.
    pub fn arbitrary_resource_record() -> ResourceRecord {
        use arbitrary::{Arbitrary, Unstructured};
        use rand::RngCore;

        for size in [128, 256, 512, 1024, 2048, 4096] {
            let mut buf = vec![0u8; size];
            rand::thread_rng().fill_bytes(&mut buf);
            if let Ok(rr) = ResourceRecord::arbitrary(&mut Unstructured::new(&buf)) {
                return rr;
            }
        }
        panic!("failed to generate an arbitrary resource record");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_name_canonicalises_trailing_dot() {
        let with_dot = DomainName::from_dotted_string("example.com.").unwrap();
        let without_dot = DomainName::from_dotted_string("example.com").unwrap();
        assert_eq!(with_dot, without_dot);
        assert_eq!(with_dot.to_dotted_string(), "example.com.");
    }

    #[test]
    fn domain_name_rejects_long_label() {
        let label = "a".repeat(LABEL_MAX_LEN + 1);
        assert!(DomainName::from_dotted_string(&format!("{label}.com.")).is_err());
    }

    #[test]
    fn record_type_wire_roundtrip() {
        for rtype in [
            RecordType::A,
            RecordType::NS,
            RecordType::CNAME,
            RecordType::SOA,
            RecordType::PTR,
            RecordType::HINFO,
            RecordType::MX,
            RecordType::TXT,
            RecordType::AAAA,
            RecordType::SRV,
            RecordType::AXFR,
            RecordType::ALL,
            RecordType::NONE,
        ] {
            assert_eq!(RecordType::from_wire(rtype.to_wire()), Some(rtype));
        }
    }

    #[test]
    fn question_new_canonicalises_and_defaults_class() {
        let q = Question::new("example.com", RecordType::A).unwrap();
        assert_eq!(q.rclass, RecordClass::IN);
        assert_eq!(q.name.to_dotted_string(), "example.com.");
    }
}
