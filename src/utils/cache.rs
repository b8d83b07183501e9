use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use log::{debug, warn};
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::error::{Error, Result};
use crate::metrics::{LookupOutcome, Metrics};

/// Freshness policy for a single lookup.
///
/// `stale_while_revalidate` is measured from the fetch time, like `ttl`, so
/// an entry is stale once `ttl <= age < stale_while_revalidate`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchOptions {
    pub ttl: Duration,
    pub stale_while_revalidate: Duration,
    pub background: bool,
}

impl FetchOptions {
    pub fn new(ttl: Duration, stale_while_revalidate: Duration) -> Self {
        Self {
            ttl,
            stale_while_revalidate,
            background: true,
        }
    }

    pub fn background(mut self, background: bool) -> Self {
        self.background = background;
        self
    }

    pub fn classify(&self, age: Duration) -> Freshness {
        if age < self.ttl {
            Freshness::Fresh
        } else if age < self.stale_while_revalidate {
            Freshness::Stale
        } else {
            Freshness::Expired
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    Fresh,
    Stale,
    Expired,
    Missing,
}

#[derive(Debug, Clone)]
pub struct CacheEntry<T> {
    pub data: T,
    pub fetched_at: Instant,
    pub ttl: Duration,
}

impl<T> CacheEntry<T> {
    pub fn age(&self) -> Duration {
        self.fetched_at.elapsed()
    }
}

type PendingFetch<T> = Shared<BoxFuture<'static, Result<T>>>;

struct CacheState<T> {
    entries: HashMap<String, CacheEntry<T>>,
    pending: HashMap<String, PendingFetch<T>>,
}

/// Keyed stale-while-revalidate cache with per-key request deduplication.
///
/// Clones share the same entries and in-flight requests.
pub struct Cache<T> {
    state: Arc<Mutex<CacheState<T>>>,
    metrics: Option<Metrics>,
}

impl<T> Clone for Cache<T> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            metrics: self.metrics.clone(),
        }
    }
}

impl<T> Default for Cache<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Cache<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(CacheState {
                entries: HashMap::new(),
                pending: HashMap::new(),
            })),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Resolve `key` according to `options`.
    ///
    /// Fresh entries are returned as-is. Stale entries are returned
    /// immediately and, when `options.background` is set, refreshed by a
    /// detached task whose failure leaves the entry untouched. Missing or
    /// expired entries block on `fetcher`; concurrent callers for the same
    /// key share one fetch and all observe its outcome.
    pub async fn get_data<F, Fut>(&self, key: &str, fetcher: F, options: FetchOptions) -> Result<T>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let pending = {
            let mut state = self.state.lock().await;
            let cached = state
                .entries
                .get(key)
                .map(|entry| (options.classify(entry.age()), entry.data.clone()));

            match cached {
                Some((Freshness::Fresh, data)) => {
                    self.record(LookupOutcome::Fresh);
                    return Ok(data);
                }
                Some((Freshness::Stale, data)) => {
                    self.record(LookupOutcome::Stale);
                    if options.background {
                        let (pending, started) = self.join_or_start(&mut state, key, fetcher, options.ttl);
                        if started {
                            self.spawn_revalidation(key, pending);
                        }
                    }
                    return Ok(data);
                }
                _ => {
                    self.record(LookupOutcome::Miss);
                    self.join_or_start(&mut state, key, fetcher, options.ttl).0
                }
            }
        };

        pending.await
    }

    /// Fetch `key` now whatever its freshness, joining a fetch already in
    /// flight. Failures leave the current entry in place.
    pub async fn refresh<F, Fut>(&self, key: &str, fetcher: F, ttl: Duration) -> Result<T>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let pending = {
            let mut state = self.state.lock().await;
            self.join_or_start(&mut state, key, fetcher, ttl).0
        };
        pending.await
    }

    /// Current value for `key` without fetching, regardless of age.
    pub async fn peek(&self, key: &str) -> Option<T> {
        self.state.lock().await.entries.get(key).map(|entry| entry.data.clone())
    }

    pub async fn entry(&self, key: &str) -> Option<CacheEntry<T>> {
        self.state.lock().await.entries.get(key).cloned()
    }

    pub async fn freshness(&self, key: &str, options: &FetchOptions) -> Freshness {
        match self.state.lock().await.entries.get(key) {
            Some(entry) => options.classify(entry.age()),
            None => Freshness::Missing,
        }
    }

    /// Store `data` as if it had just been fetched.
    pub async fn set(&self, key: &str, data: T, ttl: Duration) {
        let mut state = self.state.lock().await;
        state.entries.insert(
            key.to_string(),
            CacheEntry {
                data,
                fetched_at: Instant::now(),
                ttl,
            },
        );
    }

    /// Drop every entry. In-flight fetches still complete and repopulate.
    pub async fn clear(&self) {
        self.state.lock().await.entries.clear();
    }

    pub async fn clear_key(&self, key: &str) -> bool {
        self.state.lock().await.entries.remove(key).is_some()
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.lock().await.entries.is_empty()
    }

    pub async fn pending_count(&self) -> usize {
        self.state.lock().await.pending.len()
    }

    fn record(&self, outcome: LookupOutcome) {
        if let Some(metrics) = &self.metrics {
            metrics.record_lookup(outcome);
        }
    }

    // Must be called with the state lock held so the check and the insert
    // are one step. Returns the shared fetch and whether it was created here.
    // A fetch that is started runs to completion even if nobody awaits it.
    fn join_or_start<F, Fut>(
        &self,
        state: &mut CacheState<T>,
        key: &str,
        fetcher: F,
        ttl: Duration,
    ) -> (PendingFetch<T>, bool)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        if let Some(pending) = state.pending.get(key) {
            debug!("Joining in-flight fetch for {}", key);
            return (pending.clone(), false);
        }

        let weak: Weak<Mutex<CacheState<T>>> = Arc::downgrade(&self.state);
        let metrics = self.metrics.clone();
        let owned_key = key.to_string();

        let fetch = async move {
            let result = fetcher().await;

            if let Some(state) = weak.upgrade() {
                let mut state = state.lock().await;
                state.pending.remove(&owned_key);
                match &result {
                    Ok(data) => {
                        state.entries.insert(
                            owned_key,
                            CacheEntry {
                                data: data.clone(),
                                fetched_at: Instant::now(),
                                ttl,
                            },
                        );
                    }
                    Err(e) => {
                        debug!("Fetch for {} failed: {}", owned_key, e);
                        if let Some(metrics) = &metrics {
                            metrics.record_fetch_error();
                        }
                    }
                }
            }

            result
        };

        // Driven by its own task so an abandoned caller cannot strand the
        // pending slot.
        let fetch = tokio::spawn(fetch)
            .map(|joined| joined.unwrap_or_else(|e| Err(Error::from(e))))
            .boxed()
            .shared();

        state.pending.insert(key.to_string(), fetch.clone());
        (fetch, true)
    }

    fn spawn_revalidation(&self, key: &str, pending: PendingFetch<T>) {
        let key = key.to_string();
        let metrics = self.metrics.clone();
        tokio::spawn(async move {
            match pending.await {
                Ok(_) => debug!("Background refresh for {} completed", key),
                Err(e) => {
                    warn!("Background refresh for {} failed, keeping stale entry: {}", key, e);
                    if let Some(metrics) = &metrics {
                        metrics.record_background_failure();
                    }
                }
            }
        });
    }
}
