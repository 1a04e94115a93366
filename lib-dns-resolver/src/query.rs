//! The multiplexed query engine: fan-out, retransmit, and reply demux
//! for queries in flight over a single shared UDP socket.
//!
//! One [`EngineHandle`] drives a background task that owns the socket
//! and the in-flight table. Every [`Issue`]d question gets a fresh
//! transaction id, is sent to every configured nameserver endpoint
//! (fan-out), and is retried on a fixed interval until either a
//! matching reply arrives or the overall deadline passes. Replies are
//! demultiplexed first by transaction id and then, because ids are
//! only 16 bits and can collide across a UDP socket shared by many
//! outstanding queries, re-checked against the question section that
//! was actually sent - a reply whose question doesn't match the
//! in-flight entry's is ignored rather than accepted.
//!
//! [`run_single`] reuses the same send/receive/resend/timeout logic
//! for exactly one question, on a private socket, for the synchronous
//! bridge in [`crate::resolver`].

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::time::{self, MissedTickBehavior};

use dns_types::protocol::types::{Message, MessageResult, Question, ResourceRecord};

use crate::cache::SharedCache;
use crate::error::ResolveError;

/// Called once per answer record with `ResolveError::Ok`, or exactly
/// once with a non-`Ok` error when the query ends without any (more)
/// answers. No further calls follow a non-`Ok` invocation.
pub type Handler = Box<dyn FnMut(Option<Arc<ResourceRecord>>, ResolveError) + Send + 'static>;

/// Maximum UDP payload size before the truncation (TC) bit is set and
/// the datagram is cut down, matching the historical DNS-over-UDP
/// limit.
const MAX_DATAGRAM: usize = 512;
const RECV_BUFFER: usize = 16 * 1024;

#[derive(Debug, Clone, Copy)]
pub struct EngineConfig {
    pub overall_deadline: Duration,
    pub resend_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            overall_deadline: Duration::from_secs(30),
            resend_interval: Duration::from_secs(2),
        }
    }
}

pub struct Issue {
    pub question: Question,
    pub nameservers: Vec<SocketAddr>,
    pub handler: Handler,
}

enum Command {
    Issue(Issue),
    Shutdown,
}

/// A lightweight, cloneable handle to a running engine task.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::UnboundedSender<Command>,
}

impl EngineHandle {
    /// Spawns the background engine task on the current tokio runtime.
    /// Must be called from within a runtime context.
    pub fn spawn(cache: SharedCache, config: EngineConfig) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_engine(rx, cache, config));
        EngineHandle { tx }
    }

    /// Hands a question off to the engine. If the engine task has
    /// already ended (e.g. its runtime is shutting down), the handler
    /// is invoked in-place with `OperationAborted` so the caller still
    /// sees a terminal call.
    pub fn issue(&self, issue: Issue) {
        if let Err(mpsc::error::SendError(Command::Issue(mut issue))) = self.tx.send(Command::Issue(issue)) {
            (issue.handler)(None, ResolveError::OperationAborted);
        }
    }

    /// Aborts every in-flight query and releases the shared socket.
    pub fn shutdown(&self) {
        let _ = self.tx.send(Command::Shutdown);
    }
}

struct Endpoint {
    addr: SocketAddr,
    wire: Vec<u8>,
}

struct PendingQuery {
    question: Question,
    handler: Handler,
    endpoints: Vec<Endpoint>,
    deadline: Instant,
}

async fn run_engine(mut rx: mpsc::UnboundedReceiver<Command>, cache: SharedCache, config: EngineConfig) {
    let mut socket: Option<UdpSocket> = None;
    let mut in_flight: HashMap<u16, PendingQuery> = HashMap::new();
    let mut resend = time::interval(config.resend_interval);
    resend.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut buf = vec![0u8; RECV_BUFFER];

    loop {
        tokio::select! {
            cmd = rx.recv() => {
                match cmd {
                    None => break,
                    Some(Command::Shutdown) => {
                        abort_all(&mut in_flight, ResolveError::OperationAborted);
                        socket = None;
                    }
                    Some(Command::Issue(issue)) => {
                        handle_issue(issue, &mut socket, &mut in_flight, config).await;
                    }
                }
            }
            result = recv_from(&mut socket, &mut buf), if socket.is_some() => {
                match result {
                    Ok((n, from)) => handle_reply(&buf[..n], from, &mut in_flight, &cache),
                    Err(error) => {
                        tracing::warn!(%error, "udp socket error, resetting");
                        abort_all(&mut in_flight, ResolveError::Transport(error.to_string()));
                        socket = None;
                    }
                }
            }
            _ = resend.tick(), if !in_flight.is_empty() => {
                tick(&mut socket, &mut in_flight).await;
            }
        }
    }

    abort_all(&mut in_flight, ResolveError::OperationAborted);
}

/// Drives exactly one question to completion on a private socket, for
/// the synchronous bridge. Reuses the same send/demux/resend logic as
/// the persistent engine so the two never drift apart.
pub async fn run_single(
    question: Question,
    nameservers: Vec<SocketAddr>,
    cache: SharedCache,
    config: EngineConfig,
) -> (Vec<Arc<ResourceRecord>>, ResolveError) {
    if nameservers.is_empty() {
        return (Vec::new(), ResolveError::NoNameservers);
    }

    let records = Arc::new(StdMutex::new(Vec::new()));
    let terminal = Arc::new(StdMutex::new(ResolveError::Ok));
    let records2 = records.clone();
    let terminal2 = terminal.clone();

    let handler: Handler = Box::new(move |record, error| {
        if let Some(record) = record {
            records2.lock().expect("poisoned").push(record);
        }
        if !error.is_ok() {
            *terminal2.lock().expect("poisoned") = error;
        }
    });

    let mut socket = None;
    let mut in_flight = HashMap::new();
    handle_issue(
        Issue { question, nameservers, handler },
        &mut socket,
        &mut in_flight,
        config,
    )
    .await;

    let mut resend = time::interval(config.resend_interval);
    resend.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut buf = vec![0u8; RECV_BUFFER];

    while !in_flight.is_empty() {
        tokio::select! {
            result = recv_from(&mut socket, &mut buf), if socket.is_some() => {
                match result {
                    Ok((n, from)) => handle_reply(&buf[..n], from, &mut in_flight, &cache),
                    Err(error) => {
                        abort_all(&mut in_flight, ResolveError::Transport(error.to_string()));
                        socket = None;
                    }
                }
            }
            _ = resend.tick() => {
                tick(&mut socket, &mut in_flight).await;
            }
        }
    }

    let records = std::mem::take(&mut *records.lock().expect("poisoned"));
    let terminal = terminal.lock().expect("poisoned").clone();
    (records, terminal)
}

async fn recv_from(socket: &mut Option<UdpSocket>, buf: &mut [u8]) -> std::io::Result<(usize, SocketAddr)> {
    match socket {
        Some(sock) => sock.recv_from(buf).await,
        None => std::future::pending().await,
    }
}

async fn handle_issue(
    issue: Issue,
    socket: &mut Option<UdpSocket>,
    in_flight: &mut HashMap<u16, PendingQuery>,
    config: EngineConfig,
) {
    let Issue { question, nameservers, mut handler } = issue;
    if nameservers.is_empty() {
        handler(None, ResolveError::NoNameservers);
        return;
    }

    if socket.is_none() {
        match UdpSocket::bind("0.0.0.0:0").await {
            Ok(bound) => *socket = Some(bound),
            Err(error) => {
                handler(None, ResolveError::Transport(error.to_string()));
                return;
            }
        }
    }

    let mut id = rand::random::<u16>();
    while in_flight.contains_key(&id) {
        id = rand::random::<u16>();
    }

    let message = Message::from_question(id, question.clone());
    let wire = match message.to_octets() {
        Ok(wire) => truncate_to_wire_limit(wire),
        Err(error) => {
            handler(None, ResolveError::Transport(error.to_string()));
            return;
        }
    };

    let sock = socket.as_ref().expect("socket opened above");
    let mut endpoints = Vec::with_capacity(nameservers.len());
    for addr in nameservers {
        if let Err(error) = sock.send_to(&wire, addr).await {
            tracing::debug!(%error, %addr, "failed to send query");
        }
        endpoints.push(Endpoint { addr, wire: wire.clone() });
    }

    tracing::trace!(%id, question = %question, endpoints = endpoints.len(), "query issued");
    in_flight.insert(
        id,
        PendingQuery {
            question,
            handler,
            endpoints,
            deadline: Instant::now() + config.overall_deadline,
        },
    );
}

fn handle_reply(bytes: &[u8], from: SocketAddr, in_flight: &mut HashMap<u16, PendingQuery>, cache: &SharedCache) {
    if bytes.len() < 2 {
        return;
    }
    let id = u16::from_be_bytes([bytes[0], bytes[1]]);

    let from_known_endpoint = in_flight
        .get(&id)
        .is_some_and(|pending| pending.endpoints.iter().any(|endpoint| endpoint.addr == from));
    if !from_known_endpoint {
        tracing::trace!(%id, %from, "reply from unexpected source, ignoring");
        return;
    }

    let message = match Message::from_octets(bytes) {
        Ok(message) => message,
        Err(error) => {
            tracing::debug!(%id, %error, "failed to decode reply, ignoring");
            return;
        }
    };

    let question_matches = in_flight
        .get(&id)
        .is_some_and(|pending| message.questions.len() == 1 && message.questions[0] == pending.question);
    if !question_matches {
        tracing::trace!(%id, "reply question section does not match in-flight query, ignoring");
        return;
    }

    let mut pending = in_flight.remove(&id).expect("checked above");

    let records: Vec<&ResourceRecord> = message
        .answers
        .iter()
        .chain(message.authority.iter())
        .chain(message.additional.iter())
        .collect();
    if !records.is_empty() {
        cache.reserve(records.len(), &pending.question);
        for record in records {
            cache.add(record.clone(), false);
        }
    }

    if message.result != MessageResult::NoError {
        tracing::debug!(%id, result = ?message.result, "nameserver reported an error result");
        (pending.handler)(None, ResolveError::NotFound);
        return;
    }

    if message.answers.is_empty() {
        (pending.handler)(None, ResolveError::NotFound);
        return;
    }

    for record in message.answers {
        (pending.handler)(Some(Arc::new(record)), ResolveError::Ok);
    }
}

async fn tick(socket: &mut Option<UdpSocket>, in_flight: &mut HashMap<u16, PendingQuery>) {
    let now = Instant::now();

    let timed_out: Vec<u16> = in_flight
        .iter()
        .filter(|(_, pending)| now >= pending.deadline)
        .map(|(id, _)| *id)
        .collect();
    for id in timed_out {
        if let Some(mut pending) = in_flight.remove(&id) {
            tracing::debug!(%id, "query timed out");
            (pending.handler)(None, ResolveError::TimedOut);
        }
    }

    // the resend cadence is the tick interval itself: every endpoint
    // still outstanding when a tick fires gets resent to.
    if let Some(sock) = socket.as_ref() {
        for pending in in_flight.values() {
            for endpoint in &pending.endpoints {
                if let Err(error) = sock.send_to(&endpoint.wire, endpoint.addr).await {
                    tracing::debug!(%error, addr = %endpoint.addr, "failed to resend query");
                }
            }
        }
    }

    if in_flight.is_empty() {
        *socket = None;
    }
}

fn abort_all(in_flight: &mut HashMap<u16, PendingQuery>, error: ResolveError) {
    for (_, mut pending) in in_flight.drain() {
        (pending.handler)(None, error.clone());
    }
}

fn truncate_to_wire_limit(mut wire: Vec<u8>) -> Vec<u8> {
    if wire.len() > MAX_DATAGRAM {
        wire[2] |= 0b0000_0010;
        wire.truncate(MAX_DATAGRAM);
    }
    wire
}

#[cfg(test)]
mod tests {
    use super::*;
    use dns_types::protocol::types::test_util::a_record;
    use dns_types::protocol::types::{Action, MessageFlags, RecordClass, RecordType};
    use std::net::Ipv4Addr;
    use tokio::net::UdpSocket as TokioUdpSocket;

    fn fast_config() -> EngineConfig {
        EngineConfig {
            overall_deadline: Duration::from_millis(300),
            resend_interval: Duration::from_millis(40),
        }
    }

    fn test_question() -> Question {
        Question {
            name: dns_types::protocol::types::test_util::domain("example.com."),
            rtype: RecordType::A,
            rclass: RecordClass::IN,
        }
    }

    #[tokio::test]
    async fn truncation_sets_tc_bit_over_512_octets() {
        let oversized = vec![0u8; 600];
        let truncated = truncate_to_wire_limit(oversized);
        assert_eq!(truncated.len(), MAX_DATAGRAM);
        assert_eq!(truncated[2] & 0b0000_0010, 0b0000_0010);
    }

    #[tokio::test]
    async fn small_message_is_not_truncated() {
        let small = vec![0u8; 64];
        let untouched = truncate_to_wire_limit(small.clone());
        assert_eq!(untouched, small);
    }

    #[tokio::test]
    async fn run_single_returns_answer_from_a_fake_nameserver() {
        let nameserver = TokioUdpSocket::bind("127.0.0.1:0").await.unwrap();
        let ns_addr = nameserver.local_addr().unwrap();

        let question = test_question();
        let question_for_server = question.clone();
        tokio::spawn(async move {
            let mut buf = vec![0u8; 2048];
            let (n, from) = nameserver.recv_from(&mut buf).await.unwrap();
            let id = u16::from_be_bytes([buf[0], buf[1]]);
            let _ = n;

            let mut message = Message::from_question(id, question_for_server);
            message.action = Action::Response;
            message.result = MessageResult::NoError;
            message.flags = MessageFlags {
                authoritative: false,
                truncated: false,
                recursion_desired: true,
                recursion_available: true,
            };
            message.answers = vec![a_record("example.com.", Ipv4Addr::new(93, 184, 216, 34))];

            let wire = message.to_octets().unwrap();
            nameserver.send_to(&wire, from).await.unwrap();
        });

        let cache = SharedCache::new();
        let (records, error) = run_single(question, vec![ns_addr], cache, fast_config()).await;

        assert!(error.is_ok());
        assert_eq!(records.len(), 1);
    }

    #[tokio::test]
    async fn run_single_times_out_with_no_responder() {
        // an address nothing is listening on; the deadline fires with
        // no reply ever arriving.
        let dead_addr: SocketAddr = "127.0.0.1:1".parse().unwrap();
        let cache = SharedCache::new();
        let (records, error) = run_single(test_question(), vec![dead_addr], cache, fast_config()).await;

        assert!(records.is_empty());
        assert_eq!(error, ResolveError::TimedOut);
    }

    #[tokio::test]
    async fn run_single_reports_no_nameservers() {
        let cache = SharedCache::new();
        let (records, error) = run_single(test_question(), Vec::new(), cache, fast_config()).await;
        assert!(records.is_empty());
        assert_eq!(error, ResolveError::NoNameservers);
    }
}
