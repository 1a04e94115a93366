//! TTL- and popularity-aware cache of `ResourceRecord`s.
//!
//! Entries are keyed by three derived hashes: `dHash` (domain only),
//! `qHash` (domain, type, class - the lookup key for `get`), and `rHash`
//! (the full record identity, used to reject duplicate inserts). Two
//! ordered indices sit alongside the hash indices: one by hit count
//! (ascending, for the low-hit eviction sweep) and one by expiry
//! instant (ascending, for the expired sweep).

use std::cmp::Reverse;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use priority_queue::PriorityQueue;

use dns_types::protocol::types::{DomainName, Question, ResourceRecord};

/// Default maximum number of entries, per the external interface table.
pub const DEFAULT_MAX_ENTRIES: usize = 16;

/// How many slots `add` tries to free up when it finds the cache
/// already at or over its maximum, before considering the new record.
const SELF_RESERVE_BATCH: usize = 4;

type RHash = u64;

fn q_hash(question: &Question) -> u64 {
    let mut hasher = DefaultHasher::new();
    question.hash(&mut hasher);
    hasher.finish()
}

fn d_hash(name: &DomainName) -> u64 {
    let mut hasher = DefaultHasher::new();
    name.hash(&mut hasher);
    hasher.finish()
}

/// Hashes everything but the TTL, so two records differing only in TTL
/// (e.g. a refreshed answer) collide and the second is rejected as a
/// duplicate rather than creating a second entry.
fn r_hash(record: &ResourceRecord) -> u64 {
    let mut hasher = DefaultHasher::new();
    record.name.hash(&mut hasher);
    record.rclass.hash(&mut hasher);
    record.rtype().hash(&mut hasher);
    record.data.hash(&mut hasher);
    hasher.finish()
}

#[derive(Debug, Clone)]
struct CacheEntry {
    record: Arc<ResourceRecord>,
    expires_at: Instant,
    hits: u64,
    permanent: bool,
}

impl CacheEntry {
    fn expired(&self, now: Instant) -> bool {
        !self.permanent && now >= self.expires_at
    }

    /// Priority used in the hits index: permanent entries sort as
    /// having infinite hits, so the low-hit sweep only reaches them
    /// once every other entry protecting no current question is gone.
    fn hit_priority(&self) -> u64 {
        if self.permanent {
            u64::MAX
        } else {
            self.hits
        }
    }
}

/// Caching for `ResourceRecord`s. You probably want `SharedCache`.
#[derive(Debug)]
struct Cache {
    entries: HashMap<RHash, CacheEntry>,
    by_question: HashMap<u64, Vec<RHash>>,
    by_domain: HashMap<u64, Vec<RHash>>,
    hits_priority: PriorityQueue<RHash, Reverse<u64>>,
    expiry_priority: PriorityQueue<RHash, Reverse<Instant>>,
    max_entries: usize,
}

impl Cache {
    fn new(max_entries: usize) -> Self {
        Cache {
            entries: HashMap::new(),
            by_question: HashMap::new(),
            by_domain: HashMap::new(),
            hits_priority: PriorityQueue::new(),
            expiry_priority: PriorityQueue::new(),
            max_entries,
        }
    }

    fn exists(&self, question: &Question) -> bool {
        let now = Instant::now();
        self.by_question
            .get(&q_hash(question))
            .is_some_and(|rhs| rhs.iter().any(|rh| !self.entries[rh].expired(now)))
    }

    /// Returns every record matching `question`'s qHash, bumping each
    /// returned entry's hit counter by one.
    fn get(&mut self, question: &Question) -> Vec<Arc<ResourceRecord>> {
        let now = Instant::now();
        let Some(rhashes) = self.by_question.get(&q_hash(question)).cloned() else {
            return Vec::new();
        };

        let mut out = Vec::with_capacity(rhashes.len());
        for rh in rhashes {
            if let Some(entry) = self.entries.get_mut(&rh) {
                if entry.expired(now) {
                    continue;
                }
                entry.hits = entry.hits.saturating_add(1);
                if !entry.permanent {
                    self.hits_priority.change_priority(&rh, Reverse(entry.hit_priority()));
                }
                out.push(entry.record.clone());
            }
        }
        out
    }

    /// Inserts `record`. Duplicate `rHash` inserts are silently
    /// skipped. If the cache is already at or over `max_entries`, a
    /// small reserve pass runs first, protecting the new record's own
    /// domain.
    fn add(&mut self, record: ResourceRecord, permanent: bool) {
        if self.entries.len() >= self.max_entries {
            self.reserve_protecting(SELF_RESERVE_BATCH, d_hash(&record.name));
        }

        let rh = r_hash(&record);
        if self.entries.contains_key(&rh) {
            return;
        }

        let question = Question {
            name: record.name.clone(),
            rtype: record.rtype(),
            rclass: record.rclass,
        };
        let qh = q_hash(&question);
        let dh = d_hash(&record.name);
        let now = Instant::now();
        let expires_at = now + Duration::from_secs(u64::from(record.ttl));

        let entry = CacheEntry {
            record: Arc::new(record),
            expires_at,
            hits: 0,
            permanent,
        };

        self.hits_priority.push(rh, Reverse(entry.hit_priority()));
        if !permanent {
            self.expiry_priority.push(rh, Reverse(expires_at));
        }
        self.by_question.entry(qh).or_default().push(rh);
        self.by_domain.entry(dh).or_default().push(rh);
        self.entries.insert(rh, entry);
    }

    /// Ensures at least `n` slots are free, never evicting an entry
    /// whose domain equals `current_question`'s.
    fn reserve(&mut self, n: usize, current_question: &Question) {
        self.reserve_protecting(n, d_hash(&current_question.name));
    }

    fn reserve_protecting(&mut self, n: usize, protected_dhash: u64) {
        let mut removed = 0;
        let now = Instant::now();

        // 1. expired sweep: walk the expiry-ordered index, oldest
        // first, skipping (not evicting) anything in the protected
        // domain.
        let mut skipped = Vec::new();
        while removed < n {
            match self.expiry_priority.peek() {
                Some((&rh, &Reverse(expires_at))) if expires_at <= now => {
                    self.expiry_priority.pop();
                    if self.by_domain_hash(rh) == protected_dhash {
                        skipped.push((rh, Reverse(expires_at)));
                        continue;
                    }
                    self.remove_entry(rh);
                    removed += 1;
                }
                _ => break,
            }
        }
        for (rh, priority) in skipped {
            self.expiry_priority.push(rh, priority);
        }

        if removed >= n {
            return;
        }

        // 2. low-hit sweep: walk the hits-ordered index starting at
        // hit-count zero. Permanent entries carry `u64::MAX` priority
        // so popping one means nothing evictable is left.
        let mut skipped = Vec::new();
        while removed < n {
            match self.hits_priority.pop() {
                Some((rh, Reverse(hits))) if hits < u64::MAX => {
                    if self.by_domain_hash(rh) == protected_dhash {
                        skipped.push((rh, Reverse(hits)));
                        continue;
                    }
                    self.remove_entry(rh);
                    removed += 1;
                }
                Some((rh, priority)) => {
                    // permanent: nothing left to evict, put it back.
                    self.hits_priority.push(rh, priority);
                    break;
                }
                None => break,
            }
        }
        for (rh, priority) in skipped {
            self.hits_priority.push(rh, priority);
        }
    }

    fn by_domain_hash(&self, rh: RHash) -> u64 {
        self.entries
            .get(&rh)
            .map_or(0, |entry| d_hash(&entry.record.name))
    }

    fn remove_entry(&mut self, rh: RHash) {
        if let Some(entry) = self.entries.remove(&rh) {
            let question = Question {
                name: entry.record.name.clone(),
                rtype: entry.record.rtype(),
                rclass: entry.record.rclass,
            };
            let qh = q_hash(&question);
            let dh = d_hash(&entry.record.name);
            remove_from_index(&mut self.by_question, qh, rh);
            remove_from_index(&mut self.by_domain, dh, rh);
            self.expiry_priority.remove(&rh);
            self.hits_priority.remove(&rh);
        }
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn show_cache(&self) -> Vec<(DomainName, Vec<Arc<ResourceRecord>>)> {
        let mut by_name: HashMap<DomainName, Vec<Arc<ResourceRecord>>> = HashMap::new();
        for entry in self.entries.values() {
            by_name
                .entry(entry.record.name.clone())
                .or_default()
                .push(entry.record.clone());
        }
        let mut out: Vec<_> = by_name.into_iter().collect();
        out.sort_by(|(a, _), (b, _)| a.to_dotted_string().cmp(&b.to_dotted_string()));
        out
    }
}

fn remove_from_index(index: &mut HashMap<u64, Vec<RHash>>, key: u64, rh: RHash) {
    if let Some(rhashes) = index.get_mut(&key) {
        rhashes.retain(|x| *x != rh);
        if rhashes.is_empty() {
            index.remove(&key);
        }
    }
}

/// A convenience wrapper around a `Cache` which lets it be shared
/// between threads. Cloning gives a new handle to the same underlying
/// cache - this is the "global cache singleton" of the design notes,
/// modelled as an explicit handle rather than a `static` so tests can
/// use a fresh instance.
#[derive(Debug, Clone)]
pub struct SharedCache {
    cache: Arc<Mutex<Cache>>,
}

const MUTEX_POISON_MESSAGE: &str = "[INTERNAL ERROR] cache mutex poisoned, cannot recover";

impl SharedCache {
    pub fn new() -> Self {
        Self::with_max_entries(DEFAULT_MAX_ENTRIES)
    }

    pub fn with_max_entries(max_entries: usize) -> Self {
        SharedCache {
            cache: Arc::new(Mutex::new(Cache::new(max_entries))),
        }
    }

    pub fn exists(&self, question: &Question) -> bool {
        self.cache.lock().expect(MUTEX_POISON_MESSAGE).exists(question)
    }

    pub fn get(&self, question: &Question) -> Vec<Arc<ResourceRecord>> {
        self.cache.lock().expect(MUTEX_POISON_MESSAGE).get(question)
    }

    pub fn add(&self, record: ResourceRecord, permanent: bool) {
        self.cache.lock().expect(MUTEX_POISON_MESSAGE).add(record, permanent);
    }

    pub fn reserve(&self, n: usize, current_question: &Question) {
        self.cache
            .lock()
            .expect(MUTEX_POISON_MESSAGE)
            .reserve(n, current_question);
    }

    pub fn len(&self) -> usize {
        self.cache.lock().expect(MUTEX_POISON_MESSAGE).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn show_cache(&self) -> Vec<(DomainName, Vec<Arc<ResourceRecord>>)> {
        self.cache.lock().expect(MUTEX_POISON_MESSAGE).show_cache()
    }
}

impl Default for SharedCache {
    fn default() -> Self {
        Self::new()
    }
}
