use fake::{Fake, Faker};

use dns_types::protocol::types::*;

#[test]
fn roundtrip_message() {
    for _ in 0..100 {
        let original = arbitrary_message();
        let octets = original.to_octets().unwrap();
        let deserialised = Message::from_octets(&octets);

        assert_eq!(Ok(original), deserialised);
    }
}

#[test]
fn roundtrip_question() {
    for _ in 0..100 {
        let original = arbitrary_question();

        let mut buffer = dns_types::protocol::serialise::WritableBuffer::default();
        original.serialise(&mut buffer);
        let deserialised =
            Question::deserialise(&mut dns_types::protocol::deserialise::ConsumableBuffer::new(
                &buffer.octets,
            ));

        assert_eq!(Ok(original), deserialised);
    }
}

#[test]
fn roundtrip_resourcerecord() {
    for _ in 0..100 {
        let original = arbitrary_resourcerecord();

        let mut buffer = dns_types::protocol::serialise::WritableBuffer::default();
        original.serialise(&mut buffer);
        let deserialised =
            ResourceRecord::deserialise(&mut dns_types::protocol::deserialise::ConsumableBuffer::new(
                &buffer.octets,
            ));

        assert_eq!(Ok(Some(original)), deserialised);
    }
}

#[test]
fn roundtrip_domainname() {
    for _ in 0..100 {
        let original = arbitrary_domainname();

        let mut buffer = dns_types::protocol::serialise::WritableBuffer::default();
        buffer.write_domain_name(&original);
        let deserialised = DomainName::deserialise(
            &mut dns_types::protocol::deserialise::ConsumableBuffer::new(&buffer.octets),
        );

        assert_eq!(Ok(original), deserialised);
    }
}

fn arbitrary_message() -> Message {
    let qdcount = (0..4).fake::<usize>();
    let ancount = (0..10).fake::<usize>();
    let nscount = (0..10).fake::<usize>();
    let arcount = (0..10).fake::<usize>();

    let mut questions = Vec::with_capacity(qdcount);
    let mut answers = Vec::with_capacity(ancount);
    let mut authority = Vec::with_capacity(nscount);
    let mut additional = Vec::with_capacity(arcount);

    for _ in 0..qdcount {
        questions.push(arbitrary_question());
    }
    for _ in 0..ancount {
        answers.push(arbitrary_resourcerecord());
    }
    for _ in 0..nscount {
        authority.push(arbitrary_resourcerecord());
    }
    for _ in 0..arcount {
        additional.push(arbitrary_resourcerecord());
    }

    Message {
        id: Faker.fake(),
        opcode: arbitrary_opcode(),
        action: if Faker.fake() { Action::Response } else { Action::Query },
        result: arbitrary_message_result(),
        flags: MessageFlags {
            authoritative: Faker.fake(),
            truncated: Faker.fake(),
            recursion_desired: Faker.fake(),
            recursion_available: Faker.fake(),
        },
        questions,
        answers,
        authority,
        additional,
    }
}

fn arbitrary_question() -> Question {
    Question {
        name: arbitrary_domainname(),
        rtype: arbitrary_recordtype(),
        rclass: arbitrary_recordclass(),
    }
}

fn arbitrary_resourcerecord() -> ResourceRecord {
    ResourceRecord {
        name: arbitrary_domainname(),
        rclass: arbitrary_recordclass(),
        ttl: Faker.fake(),
        data: arbitrary_recorddata(),
    }
}

fn arbitrary_recorddata() -> RecordData {
    // only the ten rtypes which carry a payload: AXFR/ALL/NONE never
    // reach this function, they have nothing to round-trip here.
    match (0..10).fake::<u8>() {
        0 => RecordData::A {
            address: std::net::Ipv4Addr::from(Faker.fake::<u32>()),
        },
        1 => RecordData::AAAA {
            address: std::net::Ipv6Addr::from(Faker.fake::<u128>()),
        },
        2 => RecordData::NS {
            nsdname: arbitrary_domainname(),
        },
        3 => RecordData::CNAME {
            cname: arbitrary_domainname(),
        },
        4 => RecordData::PTR {
            ptrdname: arbitrary_domainname(),
        },
        5 => RecordData::MX {
            preference: Faker.fake(),
            exchange: arbitrary_domainname(),
        },
        6 => RecordData::SOA {
            mname: arbitrary_domainname(),
            rname: arbitrary_domainname(),
            serial: Faker.fake(),
            refresh: Faker.fake(),
            retry: Faker.fake(),
            expire: Faker.fake(),
            minimum: Faker.fake(),
        },
        7 => RecordData::TXT {
            octets: arbitrary_octets((0..64).fake()),
        },
        8 => RecordData::HINFO {
            cpu: arbitrary_octets((0..20).fake()),
            os: arbitrary_octets((0..20).fake()),
        },
        _ => RecordData::SRV {
            priority: Faker.fake(),
            weight: Faker.fake(),
            port: Faker.fake(),
            target: arbitrary_domainname(),
        },
    }
}

fn arbitrary_domainname() -> DomainName {
    let num_labels = (0..5).fake::<usize>();
    let mut labels = Vec::with_capacity(num_labels);

    for _ in 0..num_labels {
        let label_len = (1..20).fake::<usize>();
        let mut label = Vec::with_capacity(label_len);
        for _ in 0..label_len {
            let mut chr = (32..126).fake::<u8>();
            if chr == b'.' || (chr as char).is_whitespace() {
                chr = b'x';
            }
            label.push(chr.to_ascii_lowercase());
        }
        labels.push(label);
    }

    DomainName { labels }
}

fn arbitrary_opcode() -> Opcode {
    Opcode::from_wire((Faker.fake::<u8>()) & 0b0000_1111)
}

fn arbitrary_message_result() -> MessageResult {
    MessageResult::from_wire((Faker.fake::<u8>()) & 0b0000_1111)
}

fn arbitrary_recordtype() -> RecordType {
    const TYPES: [RecordType; 13] = [
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
    ];
    TYPES[(0..TYPES.len()).fake::<usize>()]
}

fn arbitrary_recordclass() -> RecordClass {
    const CLASSES: [RecordClass; 6] = [
        RecordClass::IN,
        RecordClass::CSNET,
        RecordClass::CHAOS,
        RecordClass::HESIOD,
        RecordClass::ALL,
        RecordClass::NONE,
    ];
    CLASSES[(0..CLASSES.len()).fake::<usize>()]
}

fn arbitrary_octets(len: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(len);
    for _ in 0..len {
        out.push(Faker.fake());
    }
    out
}
