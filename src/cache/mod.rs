//! Response cache
//!
//! Maps request fingerprints to responses with a fixed TTL and a capacity
//! bound. Expired entries are dropped when looked up, and all of them are
//! purged before a store would otherwise have to evict a live entry. When
//! the cache is still full, the oldest-inserted entry goes.

pub mod fingerprint;

pub use fingerprint::Fingerprint;

use crate::http::{Request, Response};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Cache counters and occupancy
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CacheStats {
    pub size: usize,
    pub hits: u64,
    pub misses: u64,
    /// hits / (hits + misses), 0 before the first lookup
    pub hit_ratio: f64,
}

struct CacheEntry {
    inserted_at: Instant,
    response: Response,
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<Fingerprint, CacheEntry>,
    hits: u64,
    misses: u64,
}

/// Thread-safe TTL response cache
pub struct ResponseCache {
    ttl: Duration,
    max_entries: usize,
    state: Mutex<CacheState>,
}

impl ResponseCache {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        ResponseCache {
            ttl,
            max_entries,
            state: Mutex::new(CacheState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Look up the response cached for `request`
    ///
    /// A request that cannot be fingerprinted counts as a miss.
    pub fn lookup(&self, request: &Request) -> Option<Response> {
        match Fingerprint::of(request) {
            Ok(fingerprint) => self.lookup_fingerprint(&fingerprint),
            Err(e) => {
                warn!(
                    url = request.url(),
                    error = %e,
                    "cannot fingerprint request, cache bypassed"
                );
                self.lock().misses += 1;
                None
            }
        }
    }

    /// Look up by a precomputed fingerprint
    pub fn lookup_fingerprint(&self, fingerprint: &Fingerprint) -> Option<Response> {
        let mut state = self.lock();

        // Outer None: absent. Inner None: present but expired.
        let found = state.entries.get(fingerprint).map(|entry| {
            (entry.inserted_at.elapsed() < self.ttl).then(|| entry.response.clone())
        });

        match found {
            Some(Some(response)) => {
                state.hits += 1;
                debug!(%fingerprint, "cache hit");
                Some(response)
            }
            Some(None) => {
                state.entries.remove(fingerprint);
                state.misses += 1;
                debug!(%fingerprint, "cache entry expired");
                None
            }
            None => {
                state.misses += 1;
                None
            }
        }
    }

    /// Cache `response` for `request`
    ///
    /// A request that cannot be fingerprinted is not stored.
    pub fn store(&self, request: &Request, response: &Response) {
        match Fingerprint::of(request) {
            Ok(fingerprint) => self.store_fingerprint(fingerprint, response.clone()),
            Err(e) => {
                warn!(
                    url = request.url(),
                    error = %e,
                    "cannot fingerprint request, response not cached"
                );
            }
        }
    }

    /// Store under a precomputed fingerprint
    pub fn store_fingerprint(&self, fingerprint: Fingerprint, response: Response) {
        let mut state = self.lock();

        if !state.entries.contains_key(&fingerprint) && state.entries.len() >= self.max_entries {
            let ttl = self.ttl;
            state
                .entries
                .retain(|_, entry| entry.inserted_at.elapsed() < ttl);

            if state.entries.len() >= self.max_entries {
                let oldest = state
                    .entries
                    .iter()
                    .min_by_key(|(_, entry)| entry.inserted_at)
                    .map(|(key, _)| key.clone());
                if let Some(oldest) = oldest {
                    debug!(fingerprint = %oldest, "evicting oldest cache entry");
                    state.entries.remove(&oldest);
                }
            }
        }

        state.entries.insert(
            fingerprint,
            CacheEntry {
                inserted_at: Instant::now(),
                response,
            },
        );
    }

    /// Drop every entry; counters are kept
    pub fn clear(&self) {
        self.lock().entries.clear();
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.lock();
        let lookups = state.hits + state.misses;
        CacheStats {
            size: state.entries.len(),
            hits: state.hits,
            misses: state.misses,
            hit_ratio: if lookups == 0 {
                0.0
            } else {
                state.hits as f64 / lookups as f64
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::{Method, Status};
    use std::thread;

    fn get(path: &str) -> Request {
        Request::builder(Method::Get, format!("http://example.com{}", path)).build()
    }

    fn ok(body: &'static str) -> Response {
        Response::builder().status(Status::OK).body(body).build()
    }

    #[test]
    fn test_hit_and_miss_counters() {
        let cache = ResponseCache::new(Duration::from_secs(60), 10);

        assert!(cache.lookup(&get("/a")).is_none());
        cache.store(&get("/a"), &ok("cached"));

        let hit = cache.lookup(&get("/a")).unwrap();
        assert_eq!(hit.text(), "cached");

        let stats = cache.stats();
        assert_eq!(stats.size, 1);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert!((stats.hit_ratio - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_empty_stats() {
        let cache = ResponseCache::new(Duration::from_secs(60), 10);
        assert_eq!(cache.stats(), CacheStats::default());
    }

    #[test]
    fn test_expired_entry_is_removed_on_lookup() {
        let cache = ResponseCache::new(Duration::from_millis(30), 10);
        cache.store(&get("/a"), &ok("old"));
        assert_eq!(cache.stats().size, 1);

        thread::sleep(Duration::from_millis(60));

        assert!(cache.lookup(&get("/a")).is_none());
        assert_eq!(cache.stats().size, 0);
    }

    #[test]
    fn test_evicts_oldest_when_full() {
        let cache = ResponseCache::new(Duration::from_secs(60), 2);
        cache.store(&get("/1"), &ok("1"));
        thread::sleep(Duration::from_millis(2));
        cache.store(&get("/2"), &ok("2"));
        thread::sleep(Duration::from_millis(2));
        cache.store(&get("/3"), &ok("3"));

        assert_eq!(cache.len(), 2);
        assert!(cache.lookup(&get("/1")).is_none());
        assert!(cache.lookup(&get("/2")).is_some());
        assert!(cache.lookup(&get("/3")).is_some());
    }

    #[test]
    fn test_full_cache_purges_expired_before_evicting() {
        let cache = ResponseCache::new(Duration::from_millis(40), 2);
        cache.store(&get("/old"), &ok("old"));
        thread::sleep(Duration::from_millis(60));
        cache.store(&get("/live"), &ok("live"));

        cache.store(&get("/new"), &ok("new"));
        assert_eq!(cache.len(), 2);
        assert!(cache.lookup(&get("/live")).is_some());
        assert!(cache.lookup(&get("/new")).is_some());
    }

    #[test]
    fn test_overwrite_does_not_evict() {
        let cache = ResponseCache::new(Duration::from_secs(60), 2);
        cache.store(&get("/1"), &ok("1"));
        cache.store(&get("/2"), &ok("2"));
        cache.store(&get("/2"), &ok("2b"));

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.lookup(&get("/2")).unwrap().text(), "2b");
    }

    #[test]
    fn test_clear_keeps_counters() {
        let cache = ResponseCache::new(Duration::from_secs(60), 10);
        cache.store(&get("/a"), &ok("a"));
        cache.lookup(&get("/a"));
        cache.clear();

        let stats = cache.stats();
        assert_eq!(stats.size, 0);
        assert_eq!(stats.hits, 1);
    }
}
