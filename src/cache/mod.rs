//! Session-lifetime memoization of lookups with in-flight coalescing.
//!
//! Each key maps to a slot holding a `tokio::sync::OnceCell`. The first caller
//! to miss runs the fetcher inside the cell; concurrent callers for the same key
//! await the same cell, so one upstream call serves all of them.
//!
//! Slot lifecycle: empty -> pending -> settled. Successes and terminal failures
//! stay settled for the session. Other failures are served from cache for a
//! cooldown that doubles with every failed retry, then the slot is replaced.
//! A cancelled fetch never settles a slot.

use crate::{
    error::{AggregationError, Result},
    model::{AttributeKind, EntityKind, EntityName},
};
use dashmap::{mapref::entry::Entry, DashMap};
use log::{debug, info};
use std::{
    fmt,
    future::Future,
    hash::Hash,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;

/// `(name, kind)`: the identity cache key. The kind keeps a city and a
/// landmark that share a name apart.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EntityKey {
    pub name: EntityName,
    pub kind: EntityKind,
}

impl EntityKey {
    pub fn new(name: EntityName, kind: EntityKind) -> Self {
        Self { name, kind }
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.name)
    }
}

/// `(name, kind, attribute)`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AttributeKey {
    pub entity: EntityKey,
    pub attribute: AttributeKind,
}

impl AttributeKey {
    pub fn new(name: EntityName, kind: EntityKind, attribute: AttributeKind) -> Self {
        Self {
            entity: EntityKey::new(name, kind),
            attribute,
        }
    }
}

impl fmt::Display for AttributeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.entity, self.attribute)
    }
}

#[derive(Debug)]
struct Settled<V> {
    outcome: Result<V>,
    settled_at: Instant,
}

type Cell<V> = Arc<OnceCell<Settled<V>>>;

struct Slot<V> {
    cell: Cell<V>,
    /// Set while some caller is running the fetcher for `cell`
    fetching: Arc<AtomicBool>,
    /// Failed fetches already retried for this key
    retries: u32,
}

impl<V> Slot<V> {
    fn fresh(retries: u32) -> Self {
        Self {
            cell: Arc::new(OnceCell::new()),
            fetching: Arc::new(AtomicBool::new(true)),
            retries,
        }
    }
}

/// Clears the slot's fetching flag when the fetch finishes or is dropped.
struct InFlight(Arc<AtomicBool>);

impl InFlight {
    fn start(flag: &Arc<AtomicBool>) -> Self {
        flag.store(true, Ordering::Release);
        Self(flag.clone())
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lookup {
    Hit,
    Miss,
    Joined,
}

/// Snapshot of cache activity.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub coalesced: u64,
    pub failures: u64,
    pub entries: usize,
}

impl CacheStats {
    /// Fraction of lookups answered without starting a fetch.
    pub fn hit_rate(&self) -> f64 {
        let served = self.hits + self.coalesced;
        let total = served + self.misses;
        if total == 0 {
            0.0
        } else {
            served as f64 / total as f64
        }
    }

    pub fn summary(&self) -> String {
        format!(
            "{} entries, {} hits, {} misses, {} coalesced, {} failures cached, hit rate {:.1}%",
            self.entries,
            self.hits,
            self.misses,
            self.coalesced,
            self.failures,
            self.hit_rate() * 100.0
        )
    }

    pub fn merge(&self, other: &CacheStats) -> CacheStats {
        CacheStats {
            hits: self.hits + other.hits,
            misses: self.misses + other.misses,
            coalesced: self.coalesced + other.coalesced,
            failures: self.failures + other.failures,
            entries: self.entries + other.entries,
        }
    }
}

pub struct AggregationCache<K, V> {
    name: &'static str,
    slots: DashMap<K, Slot<V>>,
    failure_cooldown: Duration,
    max_failure_cooldown: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
    coalesced: AtomicU64,
    failures: AtomicU64,
}

impl<K, V> AggregationCache<K, V>
where
    K: Eq + Hash + Clone + fmt::Display,
    V: Clone,
{
    pub fn new(name: &'static str, failure_cooldown: Duration, max_failure_cooldown: Duration) -> Self {
        Self {
            name,
            slots: DashMap::new(),
            failure_cooldown,
            max_failure_cooldown: max_failure_cooldown.max(failure_cooldown),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            coalesced: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        }
    }

    /// Return the cached outcome for `key`, or run `fetcher` to produce it.
    ///
    /// `fetcher` runs at most once per slot; callers that arrive while it is
    /// pending share its outcome. If the caller holding the fetch is cancelled,
    /// the next waiter starts its own fetch. `fetcher` is only invoked again
    /// for a key after a non-terminal failure has cooled down.
    pub async fn get_or_fetch<F, Fut>(
        &self,
        key: &K,
        fetcher: F,
        cancel: &CancellationToken,
    ) -> Result<V>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<V>>,
    {
        loop {
            if cancel.is_cancelled() {
                return Err(AggregationError::Cancelled);
            }

            let (cell, fetching, lookup) = self.slot_for(key);
            match lookup {
                Lookup::Hit => {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    debug!("[{}] hit {}", self.name, key);
                }
                Lookup::Joined => {
                    self.coalesced.fetch_add(1, Ordering::Relaxed);
                    debug!("[{}] joined in-flight fetch for {}", self.name, key);
                }
                Lookup::Miss => {
                    self.misses.fetch_add(1, Ordering::Relaxed);
                    debug!("[{}] miss {}", self.name, key);
                }
            }

            let settled = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(AggregationError::Cancelled),
                settled = cell.get_or_init(|| self.settle(key, &fetcher, &fetching)) => settled,
            };

            match &settled.outcome {
                // A fetch that observed its own initiator's cancellation must not
                // answer for anyone else: drop the slot and go again.
                Err(AggregationError::Cancelled) => {
                    self.slots
                        .remove_if(key, |_, slot| Arc::ptr_eq(&slot.cell, &cell));
                    if cancel.is_cancelled() {
                        return Err(AggregationError::Cancelled);
                    }
                    debug!("[{}] discarded cancelled fetch for {}", self.name, key);
                }
                outcome => return outcome.clone(),
            }
        }
    }

    async fn settle<F, Fut>(&self, key: &K, fetcher: &F, fetching: &Arc<AtomicBool>) -> Settled<V>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<V>>,
    {
        let _in_flight = InFlight::start(fetching);
        let outcome = fetcher().await;
        if let Err(e) = &outcome {
            if *e != AggregationError::Cancelled {
                self.failures.fetch_add(1, Ordering::Relaxed);
                debug!("[{}] caching failure for {}: {}", self.name, key, e);
            }
        }
        Settled {
            outcome,
            settled_at: Instant::now(),
        }
    }

    fn slot_for(&self, key: &K) -> (Cell<V>, Arc<AtomicBool>, Lookup) {
        match self.slots.entry(key.clone()) {
            Entry::Vacant(vacant) => {
                let slot = Slot::fresh(0);
                let handles = (slot.cell.clone(), slot.fetching.clone());
                vacant.insert(slot);
                (handles.0, handles.1, Lookup::Miss)
            }
            Entry::Occupied(mut occupied) => {
                let slot = occupied.get();
                let expired_retries = match slot.cell.get() {
                    // An empty cell nobody is filling was abandoned by a
                    // cancelled caller; this caller runs the fetch itself.
                    None => {
                        let lookup = if slot.fetching.swap(true, Ordering::AcqRel) {
                            Lookup::Joined
                        } else {
                            Lookup::Miss
                        };
                        return (slot.cell.clone(), slot.fetching.clone(), lookup);
                    }
                    Some(settled) => match &settled.outcome {
                        Ok(_) => None,
                        Err(e) if e.is_terminal() => None,
                        Err(AggregationError::Cancelled) => Some(slot.retries),
                        Err(_) if settled.settled_at.elapsed() < self.cooldown(slot.retries) => None,
                        Err(_) => Some(slot.retries + 1),
                    },
                };

                match expired_retries {
                    None => (slot.cell.clone(), slot.fetching.clone(), Lookup::Hit),
                    Some(retries) => {
                        let slot = Slot::fresh(retries);
                        let handles = (slot.cell.clone(), slot.fetching.clone());
                        occupied.insert(slot);
                        debug!("[{}] retrying {} (attempt {})", self.name, key, retries + 1);
                        (handles.0, handles.1, Lookup::Miss)
                    }
                }
            }
        }
    }

    /// How long a failure is served from cache after `retries` earlier retries.
    pub fn cooldown(&self, retries: u32) -> Duration {
        let factor = 2u32.saturating_pow(retries.min(16));
        self.failure_cooldown
            .saturating_mul(factor)
            .min(self.max_failure_cooldown)
    }

    /// Settled successful value for `key`, without fetching.
    pub fn peek(&self, key: &K) -> Option<V> {
        self.slots
            .get(key)
            .and_then(|slot| slot.cell.get().and_then(|settled| settled.outcome.clone().ok()))
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            coalesced: self.coalesced.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            entries: self.slots.len(),
        }
    }

    pub fn log_stats(&self) {
        info!("[{}] {}", self.name, self.stats().summary());
    }
}
