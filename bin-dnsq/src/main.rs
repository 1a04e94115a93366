use clap::Parser;
use std::net::IpAddr;
use std::process;

use dns_resolver::{Resolver, SharedCache};
use dns_types::protocol::types::{RecordType, ResourceRecord};

fn print_section(heading: &str, rrs: &[std::sync::Arc<ResourceRecord>]) {
    if rrs.is_empty() {
        return;
    }

    println!("\n;; {heading}");
    for rr in rrs {
        println!("{}\t{}\t{}\t{}\t{}", rr.name, rr.ttl, rr.rclass, rr.rtype(), describe(rr));
    }
}

fn describe(rr: &ResourceRecord) -> String {
    use dns_types::protocol::types::RecordData;
    match &rr.data {
        RecordData::A { address } => address.to_string(),
        RecordData::AAAA { address } => address.to_string(),
        RecordData::NS { nsdname } => nsdname.to_string(),
        RecordData::CNAME { cname } => cname.to_string(),
        RecordData::PTR { ptrdname } => ptrdname.to_string(),
        RecordData::MX { preference, exchange } => format!("{preference} {exchange}"),
        RecordData::SOA { mname, rname, serial, refresh, retry, expire, minimum } => {
            format!("{mname} {rname} {serial} {refresh} {retry} {expire} {minimum}")
        }
        RecordData::TXT { octets } => String::from_utf8_lossy(octets).into_owned(),
        RecordData::HINFO { cpu, os } => {
            format!("{} {}", String::from_utf8_lossy(cpu), String::from_utf8_lossy(os))
        }
        RecordData::SRV { priority, weight, port, target } => format!("{priority} {weight} {port} {target}"),
    }
}

fn parse_record_type(s: &str) -> Result<RecordType, String> {
    match s.to_ascii_uppercase().as_str() {
        "A" => Ok(RecordType::A),
        "NS" => Ok(RecordType::NS),
        "CNAME" => Ok(RecordType::CNAME),
        "SOA" => Ok(RecordType::SOA),
        "PTR" => Ok(RecordType::PTR),
        "HINFO" => Ok(RecordType::HINFO),
        "MX" => Ok(RecordType::MX),
        "TXT" => Ok(RecordType::TXT),
        "AAAA" => Ok(RecordType::AAAA),
        "SRV" => Ok(RecordType::SRV),
        other => Err(format!("unrecognised record type {other:?}")),
    }
}

// the doc comments for this struct turn into the CLI help text
#[derive(Parser)]
/// Stub DNS lookup utility
///
/// Sends a single question to every configured nameserver over UDP
/// and prints whichever answer comes back first. It does not follow
/// CNAMEs, perform recursive resolution, or fall back to TCP.
struct Args {
    /// Domain name to resolve
    domain: String,

    /// Query type to resolve
    #[clap(default_value = "A", value_parser = parse_record_type)]
    qtype: RecordType,

    /// Nameserver address to query, can be specified more than once
    #[clap(short, long = "nameserver", value_parser, required = true)]
    nameservers: Vec<IpAddr>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let resolver = Resolver::new(SharedCache::new());
    for nameserver in &args.nameservers {
        resolver.add_nameserver(*nameserver);
    }

    let question = match dns_types::protocol::types::Question::new(&args.domain, args.qtype) {
        Ok(question) => question,
        Err(error) => {
            eprintln!("invalid domain name: {error}");
            process::exit(1);
        }
    };

    println!(";; QUESTION");
    println!("{}\t{}\t{}", question.name, question.rclass, question.rtype);

    let (records, error) = resolver.resolve_reporting_error(question);
    print_section("ANSWER", &records);

    if let Some(error) = error {
        println!("\n;; ERROR");
        println!("; {error}");
        process::exit(1);
    }
}
