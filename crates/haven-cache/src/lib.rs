//! Bounded LRU cache with per-entry TTL and per-key single-flight.
//!
//! Every cache instance in the relay (response, retrieval, classifier,
//! geocode, audio) is one of these with its own TTL and capacity. The
//! single-flight guarantee: concurrent `get_or_compute` callers for the
//! same missing key share one loader — the first caller runs it, the rest
//! await the same future and receive its value or its error. Loader errors
//! are never cached; the next caller retries.

use std::future::Future;
use std::num::NonZeroUsize;
use std::pin::Pin;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use futures_util::future::{FutureExt, Shared};
use lru::LruCache;
use tracing::{debug, trace};

use haven_core::Result;

type SharedLoad<V> = Shared<Pin<Box<dyn Future<Output = Result<V>> + Send>>>;

struct Entry<V> {
    value: V,
    inserted_at: Instant,
}

/// A named, bounded, TTL'd LRU map from string keys to cloneable values.
pub struct TtlCache<V: Clone + Send + Sync + 'static> {
    name: &'static str,
    ttl: Duration,
    store: Mutex<LruCache<String, Entry<V>>>,
    /// In-flight loaders, keyed like the store. An entry here means a loader
    /// is running for that key; joiners clone and await the shared future.
    inflight: DashMap<String, SharedLoad<V>>,
}

impl<V: Clone + Send + Sync + 'static> TtlCache<V> {
    pub fn new(name: &'static str, ttl: Duration, max_entries: usize) -> Self {
        let cap = NonZeroUsize::new(max_entries.max(1)).unwrap();
        Self {
            name,
            ttl,
            store: Mutex::new(LruCache::new(cap)),
            inflight: DashMap::new(),
        }
    }

    pub fn from_config(name: &'static str, cfg: &haven_core::config::CacheConfig) -> Self {
        Self::new(name, Duration::from_millis(cfg.ttl_ms), cfg.max)
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Live entry count (expired-but-unswept entries included).
    pub fn len(&self) -> usize {
        self.store.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the live value for `key` and marks it most-recently-used.
    /// Expired entries are dropped on sight.
    pub fn get(&self, key: &str) -> Option<V> {
        let mut store = self.store.lock().unwrap();
        match store.get(key) {
            Some(entry) if entry.inserted_at.elapsed() < self.ttl => {
                trace!(cache = self.name, key, "cache hit");
                Some(entry.value.clone())
            }
            Some(_) => {
                store.pop(key);
                trace!(cache = self.name, key, "cache entry expired");
                None
            }
            None => None,
        }
    }

    /// Inserts `value`, evicting the least-recently-used entry at capacity.
    pub fn put(&self, key: impl Into<String>, value: V) {
        let mut store = self.store.lock().unwrap();
        store.put(
            key.into(),
            Entry {
                value,
                inserted_at: Instant::now(),
            },
        );
    }

    pub fn remove(&self, key: &str) -> Option<V> {
        self.store.lock().unwrap().pop(key).map(|e| e.value)
    }

    /// Single-flight lookup: on a miss, at most one loader runs per key and
    /// every concurrent caller receives its outcome. Successful values are
    /// cached; errors are returned to all waiters and not cached.
    pub async fn get_or_compute<F, Fut>(&self, key: &str, loader: F) -> Result<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V>> + Send + 'static,
    {
        if let Some(value) = self.get(key) {
            return Ok(value);
        }

        use dashmap::mapref::entry::Entry as MapEntry;
        let (flight, guard) = match self.inflight.entry(key.to_string()) {
            MapEntry::Occupied(occupied) => (occupied.get().clone(), None),
            MapEntry::Vacant(vacant) => {
                let fut: SharedLoad<V> =
                    (Box::pin(loader()) as Pin<Box<dyn Future<Output = Result<V>> + Send>>)
                        .shared();
                vacant.insert(fut.clone());
                // the guard clears the in-flight slot even if this task is
                // cancelled mid-await, so the key can load again later
                let guard = FlightGuard {
                    inflight: &self.inflight,
                    key,
                };
                (fut, Some(guard))
            }
        };

        let outcome = flight.await;

        if let Some(guard) = guard {
            drop(guard);
            match &outcome {
                Ok(value) => self.put(key, value.clone()),
                Err(e) => debug!(cache = self.name, key, err = %e, "loader failed, not cached"),
            }
        }

        outcome
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        let mut store = self.store.lock().unwrap();
        let expired: Vec<String> = store
            .iter()
            .filter(|(_, entry)| entry.inserted_at.elapsed() >= self.ttl)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            store.pop(key);
        }
        if !expired.is_empty() {
            debug!(cache = self.name, removed = expired.len(), "sweep");
        }
        expired.len()
    }

    /// Background sweep loop at TTL/4 cadence. The task runs until the
    /// cache's Arc is dropped everywhere else.
    pub fn spawn_sweeper(self: &std::sync::Arc<Self>) -> tokio::task::JoinHandle<()> {
        let cache = std::sync::Arc::downgrade(self);
        let interval = self.ttl / 4;
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(interval.max(Duration::from_secs(1)));
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tick.tick().await;
                match cache.upgrade() {
                    Some(cache) => {
                        cache.sweep();
                    }
                    None => break,
                }
            }
        })
    }
}

/// Clears a key's in-flight slot on drop, covering both normal completion
/// and cancellation of the leading task.
struct FlightGuard<'a, V: Clone + Send + Sync + 'static> {
    inflight: &'a DashMap<String, SharedLoad<V>>,
    key: &'a str,
}

impl<V: Clone + Send + Sync + 'static> Drop for FlightGuard<'_, V> {
    fn drop(&mut self) {
        self.inflight.remove(self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use haven_core::HavenError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn cache(ttl_ms: u64, max: usize) -> TtlCache<String> {
        TtlCache::new("test", Duration::from_millis(ttl_ms), max)
    }

    #[test]
    fn put_get_round_trip() {
        let c = cache(60_000, 10);
        c.put("k", "v".to_string());
        assert_eq!(c.get("k"), Some("v".to_string()));
        assert_eq!(c.get("missing"), None);
    }

    #[test]
    fn lru_evicts_least_recently_used() {
        let c = cache(60_000, 2);
        c.put("a", "1".to_string());
        c.put("b", "2".to_string());
        // touch "a" so "b" is the LRU victim
        assert!(c.get("a").is_some());
        c.put("c", "3".to_string());
        assert!(c.get("a").is_some());
        assert!(c.get("b").is_none());
        assert!(c.get("c").is_some());
    }

    #[tokio::test]
    async fn expired_entries_read_as_absent() {
        let c = cache(20, 10);
        c.put("k", "v".to_string());
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(c.get("k"), None);
    }

    #[tokio::test]
    async fn sweep_removes_only_expired() {
        let c = cache(30, 10);
        c.put("old", "1".to_string());
        tokio::time::sleep(Duration::from_millis(50)).await;
        c.put("fresh", "2".to_string());
        let removed = c.sweep();
        assert_eq!(removed, 1);
        assert_eq!(c.get("fresh"), Some("2".to_string()));
    }

    #[tokio::test]
    async fn single_flight_runs_loader_once() {
        let c = Arc::new(cache(60_000, 10));
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let c = c.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                c.get_or_compute("k", move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(30)).await;
                    Ok("loaded".to_string())
                })
                .await
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), "loaded");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn loader_errors_are_not_cached() {
        let c = Arc::new(cache(60_000, 10));
        let calls = Arc::new(AtomicUsize::new(0));

        let calls_first = calls.clone();
        let first = c
            .get_or_compute("k", move || async move {
                calls_first.fetch_add(1, Ordering::SeqCst);
                Err::<String, _>(HavenError::Timeout { ms: 10 })
            })
            .await;
        assert!(first.is_err());

        let calls_second = calls.clone();
        let second = c
            .get_or_compute("k", move || async move {
                calls_second.fetch_add(1, Ordering::SeqCst);
                Ok("recovered".to_string())
            })
            .await;
        assert_eq!(second.unwrap(), "recovered");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn waiters_receive_the_leaders_error() {
        let c = Arc::new(cache(60_000, 10));

        let c1 = c.clone();
        let leader = tokio::spawn(async move {
            c1.get_or_compute("k", || async {
                tokio::time::sleep(Duration::from_millis(40)).await;
                Err::<String, _>(HavenError::Network("down".to_string()))
            })
            .await
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        let joiner = c
            .get_or_compute("k", || async { Ok("should not run".to_string()) })
            .await;

        assert!(leader.await.unwrap().is_err());
        assert!(joiner.is_err());
    }
}
