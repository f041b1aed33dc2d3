//! # Cache Store
//!
//! TTL + LRU response store with single-flight fills.
//!
//! The entry map and the in-flight map live behind one mutex, so "is there a
//! fresh entry, is someone already fetching, otherwise register my fetch" is a
//! single atomic step. The fetch itself runs in a spawned task and publishes its
//! outcome through a `watch` channel: every waiter (the caller that started it
//! and all callers that joined) observes the same result, and a caller that is
//! cancelled mid-wait does not cancel the fetch for the others.

use bytes::Bytes;
use http::HeaderMap;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::cache::fingerprint::Fingerprint;
use crate::error::{CacheError, UpstreamError};

/// An upstream answer as it is kept and replayed.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl CachedResponse {
    pub fn new(status: u16, headers: HeaderMap, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers,
            body: body.into(),
        }
    }
}

/// Result of a plain lookup. `age` is the time since the entry was stored.
#[derive(Debug, Clone)]
pub enum CacheLookup {
    Fresh(Arc<CachedResponse>, Duration),
    Stale(Arc<CachedResponse>, Duration),
    Miss,
}

type FillOutcome = Result<Arc<CachedResponse>, CacheError>;

struct Entry {
    response: Arc<CachedResponse>,
    stored_at: Instant,
    ttl: Duration,
    last_used: u64,
}

impl Entry {
    fn is_fresh(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.stored_at) < self.ttl
    }
}

struct InFlight {
    id: u64,
    outcome: watch::Receiver<Option<FillOutcome>>,
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<Fingerprint, Entry>,
    in_flight: HashMap<Fingerprint, InFlight>,
    tick: u64,
}

impl CacheState {
    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }
}

/// Counters exposed on the gateway health endpoint.
#[derive(Debug, Default)]
pub struct CacheStats {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub joins: AtomicU64,
    pub fill_failures: AtomicU64,
    pub evictions: AtomicU64,
}

struct Inner {
    state: Mutex<CacheState>,
    capacity: Option<usize>,
    fetch_timeout: Duration,
    shutdown: CancellationToken,
    stats: CacheStats,
}

/// # Cache Store
///
/// Cheap to clone; all clones share the same entries.
#[derive(Clone)]
pub struct CacheStore {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for CacheStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheStore")
            .field("capacity", &self.inner.capacity)
            .field("fetch_timeout", &self.inner.fetch_timeout)
            .field("entries", &self.len())
            .finish()
    }
}

impl CacheStore {
    /// `capacity` of `None` means unbounded (TTL expiry only).
    pub fn new(capacity: Option<usize>, fetch_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(CacheState::default()),
                capacity,
                fetch_timeout,
                shutdown: CancellationToken::new(),
                stats: CacheStats::default(),
            }),
        }
    }

    pub fn stats(&self) -> &CacheStats {
        &self.inner.stats
    }

    pub fn len(&self) -> usize {
        self.inner.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn in_flight(&self) -> usize {
        self.inner.state.lock().in_flight.len()
    }

    /// Looks an entry up without triggering a fetch.
    pub fn get(&self, fingerprint: &Fingerprint) -> CacheLookup {
        let now = Instant::now();
        let mut state = self.inner.state.lock();
        let tick = state.next_tick();
        match state.entries.get_mut(fingerprint) {
            None => CacheLookup::Miss,
            Some(entry) => {
                let age = now.saturating_duration_since(entry.stored_at);
                if entry.is_fresh(now) {
                    entry.last_used = tick;
                    self.inner.stats.hits.fetch_add(1, Ordering::Relaxed);
                    CacheLookup::Fresh(Arc::clone(&entry.response), age)
                } else {
                    CacheLookup::Stale(Arc::clone(&entry.response), age)
                }
            }
        }
    }

    /// # Fetch Or Join
    ///
    /// Returns the fresh entry if there is one. Otherwise joins the fetch
    /// already in flight for `fingerprint`, or starts one with `fetch`. A
    /// successful fetch is stored with `ttl`; a failed one is handed to every
    /// waiter and nothing is stored, so the next request tries again.
    pub async fn fetch_or_join<F, Fut>(
        &self,
        fingerprint: Fingerprint,
        ttl: Duration,
        fetch: F,
    ) -> Result<Arc<CachedResponse>, CacheError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<CachedResponse, UpstreamError>> + Send + 'static,
    {
        if self.inner.shutdown.is_cancelled() {
            return Err(CacheError::Cancelled);
        }

        let mut outcome = {
            let now = Instant::now();
            let mut state = self.inner.state.lock();
            let tick = state.next_tick();

            if let Some(entry) = state.entries.get_mut(&fingerprint) {
                if entry.is_fresh(now) {
                    entry.last_used = tick;
                    self.inner.stats.hits.fetch_add(1, Ordering::Relaxed);
                    return Ok(Arc::clone(&entry.response));
                }
            }

            if let Some(in_flight) = state.in_flight.get(&fingerprint) {
                self.inner.stats.joins.fetch_add(1, Ordering::Relaxed);
                debug!(key = %fingerprint, "joining in-flight fetch");
                in_flight.outcome.clone()
            } else {
                self.inner.stats.misses.fetch_add(1, Ordering::Relaxed);
                let (tx, rx) = watch::channel(None);
                state.in_flight.insert(
                    fingerprint.clone(),
                    InFlight {
                        id: tick,
                        outcome: rx.clone(),
                    },
                );
                drop(state);
                self.spawn_fill(fingerprint, tick, ttl, fetch(), tx);
                rx
            }
        };

        let result = match outcome.wait_for(Option::is_some).await {
            Ok(published) => published.clone(),
            Err(_) => None,
        };
        result.unwrap_or(Err(CacheError::Cancelled))
    }

    fn spawn_fill<Fut>(
        &self,
        fingerprint: Fingerprint,
        id: u64,
        ttl: Duration,
        fetch: Fut,
        publish: watch::Sender<Option<FillOutcome>>,
    ) where
        Fut: Future<Output = Result<CachedResponse, UpstreamError>> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let mut guard = InFlightGuard {
                inner: &inner,
                fingerprint: &fingerprint,
                id,
                armed: true,
            };

            let timeout = inner.fetch_timeout;
            let outcome: FillOutcome = tokio::select! {
                _ = inner.shutdown.cancelled() => Err(CacheError::Cancelled),
                result = tokio::time::timeout(timeout, fetch) => match result {
                    Ok(Ok(response)) => Ok(Arc::new(response)),
                    Ok(Err(e)) => Err(CacheError::Upstream(e)),
                    Err(_) => Err(CacheError::Upstream(UpstreamError::Timeout(timeout))),
                },
            };

            {
                let mut state = inner.state.lock();
                remove_in_flight(&mut state, &fingerprint, id);
                match &outcome {
                    Ok(response) => {
                        let tick = state.next_tick();
                        state.entries.insert(
                            fingerprint.clone(),
                            Entry {
                                response: Arc::clone(response),
                                stored_at: Instant::now(),
                                ttl,
                                last_used: tick,
                            },
                        );
                        let evicted = enforce_capacity(&mut state, inner.capacity);
                        if evicted > 0 {
                            inner.stats.evictions.fetch_add(evicted as u64, Ordering::Relaxed);
                        }
                    }
                    Err(e) => {
                        inner.stats.fill_failures.fetch_add(1, Ordering::Relaxed);
                        warn!(key = %fingerprint, error = %e, "cache fill failed");
                    }
                }
            }
            guard.armed = false;

            let _ = publish.send(Some(outcome));
        });
    }

    /// Drops every expired entry. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut state = self.inner.state.lock();
        let before = state.entries.len();
        state.entries.retain(|_, entry| entry.is_fresh(now));
        before - state.entries.len()
    }

    /// Periodically purges expired entries until shutdown.
    pub fn spawn_janitor(&self, every: Duration) -> JoinHandle<()> {
        let store = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = store.inner.shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let purged = store.purge_expired();
                        if purged > 0 {
                            debug!(purged, remaining = store.len(), "cache janitor sweep");
                        }
                    }
                }
            }
        })
    }

    /// Cancels every in-flight fetch (their waiters get `CacheError::Cancelled`)
    /// and refuses new ones.
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
    }
}

/// Clears the in-flight slot if the fill task dies before publishing.
struct InFlightGuard<'a> {
    inner: &'a Inner,
    fingerprint: &'a Fingerprint,
    id: u64,
    armed: bool,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            let mut state = self.inner.state.lock();
            remove_in_flight(&mut state, self.fingerprint, self.id);
        }
    }
}

fn remove_in_flight(state: &mut CacheState, fingerprint: &Fingerprint, id: u64) {
    if state.in_flight.get(fingerprint).is_some_and(|f| f.id == id) {
        state.in_flight.remove(fingerprint);
    }
}

/// Purges expired entries, then evicts least recently used ones until the
/// store fits. Entries with a fetch in flight are never evicted.
fn enforce_capacity(state: &mut CacheState, capacity: Option<usize>) -> usize {
    let Some(capacity) = capacity else {
        return 0;
    };
    if state.entries.len() <= capacity {
        return 0;
    }

    let before = state.entries.len();
    let now = Instant::now();
    let in_flight = &state.in_flight;
    state
        .entries
        .retain(|key, entry| entry.is_fresh(now) || in_flight.contains_key(key));

    while state.entries.len() > capacity {
        let victim = state
            .entries
            .iter()
            .filter(|(key, _)| !state.in_flight.contains_key(*key))
            .min_by_key(|(_, entry)| entry.last_used)
            .map(|(key, _)| key.clone());
        match victim {
            Some(key) => {
                state.entries.remove(&key);
            }
            None => break,
        }
    }

    before - state.entries.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::future::join_all;
    use std::sync::atomic::AtomicUsize;

    fn ok(body: &'static str) -> Result<CachedResponse, UpstreamError> {
        Ok(CachedResponse::new(200, HeaderMap::new(), body))
    }

    fn counting_fetch(
        calls: &Arc<AtomicUsize>,
        delay: Duration,
        body: &'static str,
    ) -> impl FnOnce() -> std::pin::Pin<
        Box<dyn Future<Output = Result<CachedResponse, UpstreamError>> + Send>,
    > {
        let calls = Arc::clone(calls);
        move || {
            Box::pin(async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(delay).await;
                ok(body)
            })
        }
    }

    fn key() -> Fingerprint {
        Fingerprint::from_parts("/transactions", Some("from=2024-01-01"))
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_misses_share_one_fetch() {
        let store = CacheStore::new(None, Duration::from_secs(10));
        let calls = Arc::new(AtomicUsize::new(0));

        let waiters = (0..10).map(|_| {
            let store = store.clone();
            let fetch = counting_fetch(&calls, Duration::from_millis(50), "[1]");
            async move { store.fetch_or_join(key(), Duration::from_secs(30), fetch).await }
        });
        let results = join_all(waiters).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        for result in results {
            assert_eq!(&result.unwrap().body[..], b"[1]");
        }
        assert_eq!(store.in_flight(), 0);
        assert_eq!(store.stats().joins.load(Ordering::Relaxed), 9);
    }

    #[tokio::test(start_paused = true)]
    async fn entry_is_served_until_ttl_then_refreshed_once() {
        let store = CacheStore::new(None, Duration::from_secs(10));
        let calls = Arc::new(AtomicUsize::new(0));
        let ttl = Duration::from_secs(30);

        store
            .fetch_or_join(key(), ttl, counting_fetch(&calls, Duration::ZERO, "a"))
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(matches!(store.get(&key()), CacheLookup::Fresh(_, age) if age == Duration::from_secs(10)));
        store
            .fetch_or_join(key(), ttl, counting_fetch(&calls, Duration::ZERO, "b"))
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(matches!(store.get(&key()), CacheLookup::Stale(_, _)));
        let refreshed = join_all((0..3).map(|_| {
            store.fetch_or_join(key(), ttl, counting_fetch(&calls, Duration::from_millis(5), "c"))
        }))
        .await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(refreshed.iter().all(|r| r.as_ref().unwrap().body == "c"));
    }

    #[tokio::test(start_paused = true)]
    async fn failures_reach_every_waiter_and_are_not_cached() {
        let store = CacheStore::new(None, Duration::from_secs(10));
        let calls = Arc::new(AtomicUsize::new(0));

        let failing = |calls: &Arc<AtomicUsize>| {
            let calls = Arc::clone(calls);
            move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                Err::<CachedResponse, _>(UpstreamError::NotFound)
            }
        };

        let (a, b) = tokio::join!(
            store.fetch_or_join(key(), Duration::from_secs(30), failing(&calls)),
            store.fetch_or_join(key(), Duration::from_secs(30), failing(&calls)),
        );
        assert_eq!(a.unwrap_err(), CacheError::Upstream(UpstreamError::NotFound));
        assert_eq!(b.unwrap_err(), CacheError::Upstream(UpstreamError::NotFound));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(store.get(&key()), CacheLookup::Miss));

        let _ = store
            .fetch_or_join(key(), Duration::from_secs(30), failing(&calls))
            .await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_fetch_times_out() {
        let store = CacheStore::new(None, Duration::from_secs(2));
        let calls = Arc::new(AtomicUsize::new(0));

        let err = store
            .fetch_or_join(key(), Duration::from_secs(30), counting_fetch(&calls, Duration::from_secs(5), "x"))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            CacheError::Upstream(UpstreamError::Timeout(Duration::from_secs(2)))
        );
        assert!(store.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_caller_does_not_cancel_the_fetch() {
        let store = CacheStore::new(None, Duration::from_secs(10));
        let calls = Arc::new(AtomicUsize::new(0));

        let leader = {
            let store = store.clone();
            let fetch = counting_fetch(&calls, Duration::from_millis(100), "kept");
            tokio::spawn(async move { store.fetch_or_join(key(), Duration::from_secs(30), fetch).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        leader.abort();

        let joined = store
            .fetch_or_join(key(), Duration::from_secs(30), counting_fetch(&calls, Duration::ZERO, "new"))
            .await
            .unwrap();
        assert_eq!(joined.body, "kept");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_cancels_waiters() {
        let store = CacheStore::new(None, Duration::from_secs(60));
        let pending = || std::future::pending::<Result<CachedResponse, UpstreamError>>();

        let waiter = {
            let store = store.clone();
            tokio::spawn(async move { store.fetch_or_join(key(), Duration::from_secs(30), pending).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        store.shutdown();

        assert_eq!(waiter.await.unwrap().unwrap_err(), CacheError::Cancelled);
        assert_eq!(
            store
                .fetch_or_join(key(), Duration::from_secs(30), pending)
                .await
                .unwrap_err(),
            CacheError::Cancelled
        );
    }

    #[tokio::test(start_paused = true)]
    async fn least_recently_used_entry_is_evicted() {
        let store = CacheStore::new(Some(2), Duration::from_secs(10));
        let calls = Arc::new(AtomicUsize::new(0));
        let ttl = Duration::from_secs(300);
        let fp = |id: &str| Fingerprint::from_parts(&format!("/transactions/{}", id), None);

        for id in ["a", "b"] {
            store
                .fetch_or_join(fp(id), ttl, counting_fetch(&calls, Duration::ZERO, "v"))
                .await
                .unwrap();
        }
        assert!(matches!(store.get(&fp("a")), CacheLookup::Fresh(_, _)));

        store
            .fetch_or_join(fp("c"), ttl, counting_fetch(&calls, Duration::ZERO, "v"))
            .await
            .unwrap();

        assert_eq!(store.len(), 2);
        assert!(matches!(store.get(&fp("b")), CacheLookup::Miss));
        assert!(matches!(store.get(&fp("a")), CacheLookup::Fresh(_, _)));
        assert_eq!(store.stats().evictions.load(Ordering::Relaxed), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn purge_drops_expired_entries() {
        let store = CacheStore::new(None, Duration::from_secs(10));
        let calls = Arc::new(AtomicUsize::new(0));
        store
            .fetch_or_join(key(), Duration::from_secs(5), counting_fetch(&calls, Duration::ZERO, "v"))
            .await
            .unwrap();

        assert_eq!(store.purge_expired(), 0);
        tokio::time::advance(Duration::from_secs(6)).await;
        assert_eq!(store.purge_expired(), 1);
        assert!(store.is_empty());
    }
}
