//! Single-flight TTL cache.
//!
//! Concurrent lookups of a missing key share one in-flight fetch. A
//! successful result is kept until its freshness deadline; failures are
//! handed to every waiter and never cached.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use tokio::time::Instant;

use crate::error::GitHubResult;

/// A fetch result with how long it stays fresh.
pub type Fetched<V> = GitHubResult<(V, Duration)>;

type SharedFetch<V> = Shared<BoxFuture<'static, Fetched<V>>>;

enum Slot<V> {
    Ready { value: V, fresh_until: Instant },
    Pending { id: u64, fetch: SharedFetch<V> },
}

/// How a lookup was served.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookup {
    Hit,
    /// Joined a fetch started by another caller.
    Coalesced,
    Miss,
}

impl Lookup {
    /// Metric label: only a fresh fetch counts as a miss.
    pub fn as_label(&self) -> &'static str {
        match self {
            Lookup::Hit | Lookup::Coalesced => "hit",
            Lookup::Miss => "miss",
        }
    }
}

pub struct SingleFlight<K, V> {
    slots: Mutex<HashMap<K, Slot<V>>>,
    next_id: AtomicU64,
}

impl<K, V> Default for SingleFlight<K, V> {
    fn default() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(0),
        }
    }
}

impl<K, V> SingleFlight<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached value for `key`, joining or starting a fetch.
    pub async fn get_or_fetch<F>(&self, key: K, fetch: F) -> (GitHubResult<V>, Lookup)
    where
        F: FnOnce() -> BoxFuture<'static, Fetched<V>>,
    {
        let (shared, id, lookup) = {
            let mut slots = self.lock();
            match slots.get(&key) {
                Some(Slot::Ready { value, fresh_until }) if Instant::now() < *fresh_until => {
                    return (Ok(value.clone()), Lookup::Hit);
                }
                Some(Slot::Pending { id, fetch: pending }) => {
                    (pending.clone(), *id, Lookup::Coalesced)
                }
                _ => {
                    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                    let shared = fetch().shared();
                    slots.insert(
                        key.clone(),
                        Slot::Pending {
                            id,
                            fetch: shared.clone(),
                        },
                    );
                    (shared, id, Lookup::Miss)
                }
            }
        };

        let result = shared.await;

        // Whoever finishes first settles the slot, unless it was replaced.
        {
            let mut slots = self.lock();
            let still_pending =
                matches!(slots.get(&key), Some(Slot::Pending { id: pending, .. }) if *pending == id);
            if still_pending {
                match &result {
                    Ok((value, ttl)) => {
                        slots.insert(
                            key,
                            Slot::Ready {
                                value: value.clone(),
                                fresh_until: Instant::now() + *ttl,
                            },
                        );
                    }
                    Err(_) => {
                        slots.remove(&key);
                    }
                }
            }
        }

        (result.map(|(value, _)| value), lookup)
    }

    /// Drop a cached value so the next lookup fetches again.
    pub fn invalidate(&self, key: &K) {
        let mut slots = self.lock();
        if matches!(slots.get(key), Some(Slot::Ready { .. })) {
            slots.remove(key);
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<K, Slot<V>>> {
        self.slots.lock().unwrap_or_else(|e| e.into_inner())
    }
}
