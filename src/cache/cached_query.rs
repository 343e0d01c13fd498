//! TTL-bounded memoization of one async producer, keyed by caller-chosen strings.

use crate::error::OrmResult;
use futures_util::future::BoxFuture;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;

/// Producer invoked on a cache miss with the arguments passed to `get`/`fetch`.
pub type Producer<A, V> = Arc<dyn Fn(A) -> BoxFuture<'static, OrmResult<V>> + Send + Sync>;

#[derive(Clone, Debug)]
struct CacheEntry<V> {
    value: V,
    /// `None` never expires.
    expires_at: Option<Instant>,
}

impl<V> CacheEntry<V> {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| now < at)
    }
}

struct CacheState<V> {
    entries: HashMap<String, CacheEntry<V>>,
    /// Bumped by every full invalidation. A producer that started in an older
    /// epoch does not store its result.
    epoch: u64,
    /// Per-key counterpart of `epoch`, bumped by `invalidate_key`. Reset with
    /// the epoch, which already fences older producers.
    generations: HashMap<String, u64>,
}

impl<V> CacheState<V> {
    fn stamp(&self, key: &str) -> (u64, u64) {
        (self.epoch, self.generations.get(key).copied().unwrap_or(0))
    }
}

/// Memoizes the result of `producer` per key for `ttl` (forever when `None`).
///
/// Concurrent `get`s for the same missing key are not deduplicated: each runs
/// the producer and the last one to finish is stored. The entry map is never
/// locked across the producer's await.
pub struct CachedQuery<A, V> {
    producer: Producer<A, V>,
    ttl: Option<Duration>,
    state: Mutex<CacheState<V>>,
}

impl<A, V> CachedQuery<A, V>
where
    V: Clone,
{
    pub fn new<F>(ttl: Option<Duration>, producer: F) -> Self
    where
        F: Fn(A) -> BoxFuture<'static, OrmResult<V>> + Send + Sync + 'static,
    {
        Self {
            producer: Arc::new(producer),
            ttl,
            state: Mutex::new(CacheState {
                entries: HashMap::new(),
                epoch: 0,
                generations: HashMap::new(),
            }),
        }
    }

    pub fn ttl(&self) -> Option<Duration> {
        self.ttl
    }

    fn lock(&self) -> MutexGuard<'_, CacheState<V>> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Cached value for `key` if still live, otherwise the producer's result for `args`.
    pub async fn get(&self, key: &str, args: A) -> OrmResult<V> {
        let stamp = {
            let state = self.lock();
            if let Some(entry) = state.entries.get(key) {
                if entry.is_live(Instant::now()) {
                    return Ok(entry.value.clone());
                }
            }
            state.stamp(key)
        };
        self.produce(key, args, stamp).await
    }

    /// Recompute `key` and overwrite its entry whatever its current state.
    pub async fn fetch(&self, key: &str, args: A) -> OrmResult<V> {
        let stamp = self.lock().stamp(key);
        self.produce(key, args, stamp).await
    }

    async fn produce(&self, key: &str, args: A, stamp: (u64, u64)) -> OrmResult<V> {
        let value = (self.producer)(args).await?;
        let mut state = self.lock();
        if state.stamp(key) == stamp {
            let expires_at = self.ttl.map(|ttl| Instant::now() + ttl);
            state.entries.insert(
                key.to_string(),
                CacheEntry {
                    value: value.clone(),
                    expires_at,
                },
            );
        } else {
            tracing::debug!(key = %key, "cache invalidated while producing; result not stored");
        }
        Ok(value)
    }

    /// Drop every entry.
    pub fn invalidate(&self) {
        let mut state = self.lock();
        state.entries.clear();
        state.generations.clear();
        state.epoch += 1;
    }

    /// Drop the entry for `key`. A producer for `key` already running will not
    /// store its result.
    pub fn invalidate_key(&self, key: &str) {
        let mut state = self.lock();
        state.entries.remove(key);
        *state.generations.entry(key.to_string()).or_insert(0) += 1;
    }

    pub fn contains(&self, key: &str) -> bool {
        let now = Instant::now();
        self.lock()
            .entries
            .get(key)
            .map_or(false, |e| e.is_live(now))
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.lock().entries.values().filter(|e| e.is_live(now)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::OrmError;
    use futures_util::FutureExt;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting(ttl: Option<Duration>) -> (CachedQuery<u32, u32>, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        let cache = CachedQuery::new(ttl, move |n: u32| {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Ok(n * 10)
            }
            .boxed()
        });
        (cache, calls)
    }

    #[tokio::test(start_paused = true)]
    async fn live_entries_skip_the_producer_until_ttl_elapses() {
        let (cache, calls) = counting(Some(Duration::from_millis(100)));
        assert_eq!(cache.get("k", 1).await.unwrap(), 10);
        tokio::time::advance(Duration::from_millis(50)).await;
        assert_eq!(cache.get("k", 2).await.unwrap(), 10);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        tokio::time::advance(Duration::from_millis(60)).await;
        assert!(!cache.contains("k"));
        assert_eq!(cache.get("k", 2).await.unwrap(), 20);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(cache.get("k", 3).await.unwrap(), 20);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn infinite_ttl_never_expires() {
        let (cache, calls) = counting(None);
        cache.get("k", 1).await.unwrap();
        tokio::time::advance(Duration::from_secs(60 * 60 * 24 * 365)).await;
        assert_eq!(cache.get("k", 9).await.unwrap(), 10);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn invalidate_key_only_drops_that_entry() {
        let (cache, calls) = counting(None);
        cache.get("a", 1).await.unwrap();
        cache.get("b", 2).await.unwrap();
        cache.invalidate_key("a");
        cache.invalidate_key("missing");

        assert_eq!(cache.get("a", 3).await.unwrap(), 30);
        assert_eq!(cache.get("b", 4).await.unwrap(), 20);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn invalidate_clears_everything() {
        let (cache, calls) = counting(None);
        cache.get("a", 1).await.unwrap();
        cache.get("b", 2).await.unwrap();
        assert_eq!(cache.len(), 2);
        cache.invalidate();
        assert!(cache.is_empty());

        cache.get("a", 1).await.unwrap();
        cache.get("b", 2).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn fetch_overwrites_a_live_entry() {
        let (cache, calls) = counting(None);
        cache.get("k", 1).await.unwrap();
        assert_eq!(cache.fetch("k", 5).await.unwrap(), 50);
        assert_eq!(cache.get("k", 7).await.unwrap(), 50);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn producer_errors_propagate_and_store_nothing() {
        let cache: CachedQuery<bool, u32> = CachedQuery::new(None, |fail: bool| {
            async move {
                if fail {
                    Err(OrmError::Backend("boom".into()))
                } else {
                    Ok(1)
                }
            }
            .boxed()
        });
        let err = cache.get("k", true).await.unwrap_err();
        assert!(matches!(err, OrmError::Backend(ref m) if m == "boom"));
        assert!(!cache.contains("k"));
        assert_eq!(cache.get("k", false).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn result_from_an_older_epoch_is_not_stored() {
        let gate = Arc::new(tokio::sync::Notify::new());
        let g = gate.clone();
        let cache = Arc::new(CachedQuery::new(None, move |n: u32| {
            let g = g.clone();
            async move {
                g.notified().await;
                Ok(n)
            }
            .boxed()
        }));

        let c = cache.clone();
        let pending = tokio::spawn(async move { c.get("k", 1).await });
        for _ in 0..3 {
            tokio::task::yield_now().await;
        }
        cache.invalidate();
        gate.notify_one();

        assert_eq!(pending.await.unwrap().unwrap(), 1);
        assert!(!cache.contains("k"));
    }

    #[tokio::test]
    async fn invalidate_key_fences_a_running_producer() {
        let gate = Arc::new(tokio::sync::Notify::new());
        let g = gate.clone();
        let cache = Arc::new(CachedQuery::new(None, move |n: u32| {
            let g = g.clone();
            async move {
                if n == 1 {
                    g.notified().await;
                }
                Ok(n)
            }
            .boxed()
        }));

        let c = cache.clone();
        let pending = tokio::spawn(async move { c.get("k", 1).await });
        for _ in 0..3 {
            tokio::task::yield_now().await;
        }
        cache.get("other", 2).await.unwrap();
        cache.invalidate_key("k");
        gate.notify_one();

        assert_eq!(pending.await.unwrap().unwrap(), 1);
        assert!(!cache.contains("k"));
        assert!(cache.contains("other"));
        assert_eq!(cache.get("k", 3).await.unwrap(), 3);
        assert!(cache.contains("k"));
    }

    #[tokio::test]
    async fn concurrent_gets_each_run_the_producer() {
        let barrier = Arc::new(tokio::sync::Barrier::new(2));
        let calls = Arc::new(AtomicUsize::new(0));
        let (b, c) = (barrier.clone(), calls.clone());
        let cache = CachedQuery::new(None, move |n: u32| {
            let (b, c) = (b.clone(), c.clone());
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                b.wait().await;
                Ok(n)
            }
            .boxed()
        });

        let (first, second) = tokio::join!(cache.get("k", 1), cache.get("k", 2));
        assert_eq!(first.unwrap(), 1);
        assert_eq!(second.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(cache.len(), 1);
    }
}
