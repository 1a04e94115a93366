//! The public resolver facade: configured nameservers, a shared cache,
//! and both an async (callback-driven) and a synchronous interface
//! onto the same query engine.

use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Mutex as StdMutex};

use dns_types::protocol::types::{DomainNameError, Question, RecordType, ResourceRecord};

use crate::cache::SharedCache;
use crate::error::ResolveError;
use crate::query::{EngineConfig, EngineHandle, Handler, Issue};

const DEFAULT_DNS_PORT: u16 = 53;

/// A stub resolver: holds a set of configured nameservers and a handle
/// to the query engine driving lookups against them.
///
/// `Resolver::new` spawns the engine's background task on the current
/// tokio runtime, so it must be constructed from within one.
#[derive(Clone)]
pub struct Resolver {
    nameservers: Arc<StdMutex<Vec<SocketAddr>>>,
    cache: SharedCache,
    engine: EngineHandle,
}

impl Resolver {
    pub fn new(cache: SharedCache) -> Self {
        let engine = EngineHandle::spawn(cache.clone(), EngineConfig::default());
        Resolver {
            nameservers: Arc::new(StdMutex::new(Vec::new())),
            cache,
            engine,
        }
    }

    /// Adds a nameserver to query, at the standard DNS port.
    pub fn add_nameserver(&self, ip: IpAddr) {
        self.nameservers
            .lock()
            .expect("poisoned")
            .push(SocketAddr::new(ip, DEFAULT_DNS_PORT));
    }

    fn nameservers_snapshot(&self) -> Vec<SocketAddr> {
        self.nameservers.lock().expect("poisoned").clone()
    }

    /// Resolves `question` asynchronously. `handler` is invoked once
    /// per answer record with `ResolveError::Ok`, or exactly once with
    /// a terminal error. A cache hit is served without touching the
    /// network at all.
    pub fn async_resolve(&self, question: Question, mut handler: Handler) {
        let cached = self.cache.get(&question);
        if !cached.is_empty() {
            for record in cached {
                handler(Some(record), ResolveError::Ok);
            }
            return;
        }

        let nameservers = self.nameservers_snapshot();
        self.engine.issue(Issue { question, nameservers, handler });
    }

    /// Convenience wrapper over `async_resolve` building the question
    /// from a dotted domain name and record type.
    pub fn async_resolve_domain(
        &self,
        domain: &str,
        rtype: RecordType,
        handler: Handler,
    ) -> Result<(), DomainNameError> {
        let question = Question::new(domain, rtype)?;
        self.async_resolve(question, handler);
        Ok(())
    }

    /// Synchronous resolve: blocks the calling thread (not the caller's
    /// own async runtime, if any) until the query completes, and
    /// returns just the answer records.
    pub fn resolve(&self, question: Question) -> Vec<Arc<ResourceRecord>> {
        self.resolve_reporting_error(question).0
    }

    pub fn resolve_domain(
        &self,
        domain: &str,
        rtype: RecordType,
    ) -> Result<Vec<Arc<ResourceRecord>>, DomainNameError> {
        let question = Question::new(domain, rtype)?;
        Ok(self.resolve(question))
    }

    /// Synchronous resolve reporting the terminal error too (`None` on
    /// outright success). Runs the query on a private worker thread
    /// with its own single-threaded runtime and its own private
    /// engine instance - the shared cache is the only thing that
    /// crosses between it and the caller's own reactor.
    pub fn resolve_reporting_error(&self, question: Question) -> (Vec<Arc<ResourceRecord>>, Option<ResolveError>) {
        let cached = self.cache.get(&question);
        if !cached.is_empty() {
            return (cached, None);
        }

        let nameservers = self.nameservers_snapshot();
        let cache = self.cache.clone();

        let (records, error) = std::thread::spawn(move || {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .expect("failed to build private resolver runtime");
            runtime.block_on(crate::query::run_single(
                question,
                nameservers,
                cache,
                EngineConfig::default(),
            ))
        })
        .join()
        .expect("private resolver thread panicked");

        if error.is_ok() {
            (records, None)
        } else {
            (records, Some(error))
        }
    }
}
