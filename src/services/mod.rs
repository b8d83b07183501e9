use log::{debug, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;

use crate::api::{BonkApi, PriceSnapshot, PriceStream, SentimentSnapshot};
use crate::config::CacheConfig;
use crate::error::Result;
use crate::metrics::Metrics;
use crate::models::BonkData;
use crate::utils::cache::{Cache, FetchOptions};

pub const PRICE_KEY: &str = "bonk:price";
pub const SENTIMENT_KEY: &str = "bonk:sentiment";

/// BONK price and sentiment behind stale-while-revalidate caches.
///
/// Cheap to clone; clones share caches and the backend client.
#[derive(Clone)]
pub struct BonkDataService {
    api: Arc<dyn BonkApi>,
    prices: Cache<PriceSnapshot>,
    sentiments: Cache<SentimentSnapshot>,
    price_policy: FetchOptions,
    sentiment_policy: FetchOptions,
}

impl BonkDataService {
    pub fn new(api: Arc<dyn BonkApi>) -> Self {
        Self::with_policies(api, &CacheConfig::default())
    }

    pub fn with_policies(api: Arc<dyn BonkApi>, config: &CacheConfig) -> Self {
        Self {
            api,
            prices: Cache::new(),
            sentiments: Cache::new(),
            price_policy: config.price.fetch_options(),
            sentiment_policy: config.sentiment.fetch_options(),
        }
    }

    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.prices = self.prices.with_metrics(metrics.clone());
        self.sentiments = self.sentiments.with_metrics(metrics);
        self
    }

    pub fn price_policy(&self) -> FetchOptions {
        self.price_policy
    }

    pub fn sentiment_policy(&self) -> FetchOptions {
        self.sentiment_policy
    }

    pub async fn get_price(&self) -> Result<PriceSnapshot> {
        let api = Arc::clone(&self.api);
        self.prices
            .get_data(PRICE_KEY, move || async move { api.get_price().await }, self.price_policy)
            .await
    }

    pub async fn get_sentiment(&self) -> Result<SentimentSnapshot> {
        let api = Arc::clone(&self.api);
        self.sentiments
            .get_data(
                SENTIMENT_KEY,
                move || async move { api.get_sentiment().await },
                self.sentiment_policy,
            )
            .await
    }

    /// Fetch the price now, bypassing freshness. Used by the polling feed.
    pub async fn refresh_price(&self) -> Result<PriceSnapshot> {
        let api = Arc::clone(&self.api);
        self.prices
            .refresh(PRICE_KEY, move || async move { api.get_price().await }, self.price_policy.ttl)
            .await
    }

    /// Record a price that arrived out of band (stream events).
    pub async fn store_price(&self, price: PriceSnapshot) {
        self.prices.set(PRICE_KEY, price, self.price_policy.ttl).await;
    }

    pub async fn cached_price(&self) -> Option<PriceSnapshot> {
        self.prices.peek(PRICE_KEY).await
    }

    pub async fn cached_sentiment(&self) -> Option<SentimentSnapshot> {
        self.sentiments.peek(SENTIMENT_KEY).await
    }

    /// Warm both caches without waiting. Failures are logged, never returned.
    ///
    /// The fetches run on the current tokio runtime; called outside one, the
    /// prefetch is skipped with a warning.
    pub fn prefetch_all(&self) {
        let handle = match Handle::try_current() {
            Ok(handle) => handle,
            Err(e) => {
                warn!("Skipping prefetch, no tokio runtime: {}", e);
                return;
            }
        };

        let service = self.clone();
        handle.spawn(async move {
            match service.get_price().await {
                Ok(_) => debug!("Prefetched BONK price"),
                Err(e) => warn!("Price prefetch failed: {}", e),
            }
        });

        let service = self.clone();
        handle.spawn(async move {
            match service.get_sentiment().await {
                Ok(_) => debug!("Prefetched BONK sentiment"),
                Err(e) => warn!("Sentiment prefetch failed: {}", e),
            }
        });
    }

    /// Price and sentiment composed into the dashboard view-model. A
    /// sentiment failure falls back to the last cached sentiment, if any.
    pub async fn get_snapshot(&self) -> Result<BonkData> {
        let (price, sentiment) = tokio::join!(self.get_price(), self.get_sentiment());
        let price = price?;
        let sentiment = self.sentiment_or_cached(sentiment).await;
        Ok(BonkData::compose(&price, sentiment.as_ref()))
    }

    pub async fn sentiment_or_cached(
        &self,
        sentiment: Result<SentimentSnapshot>,
    ) -> Option<SentimentSnapshot> {
        match sentiment {
            Ok(sentiment) => Some(sentiment),
            Err(e) => {
                warn!("Sentiment unavailable, using last known value: {}", e);
                self.cached_sentiment().await
            }
        }
    }

    pub async fn open_price_stream(&self, interval: Duration) -> Result<PriceStream> {
        self.api.price_stream(interval).await
    }

    pub async fn clear_cache(&self) {
        self.prices.clear().await;
        self.sentiments.clear().await;
    }
}
