use prometheus::{Encoder, Gauge, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};

use crate::error::{Error, Result};
use crate::models::BonkData;

/// Outcome of a cache lookup, used as the `outcome` label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupOutcome {
    Fresh,
    Stale,
    Miss,
}

impl LookupOutcome {
    fn as_label(self) -> &'static str {
        match self {
            LookupOutcome::Fresh => "fresh",
            LookupOutcome::Stale => "stale",
            LookupOutcome::Miss => "miss",
        }
    }
}

#[derive(Clone)]
pub struct Metrics {
    cache_lookups: IntCounterVec,
    fetch_errors: IntCounter,
    background_failures: IntCounter,
    feed_updates: IntCounter,
    feed_errors: IntCounter,
    last_price: Gauge,
    last_sentiment: Gauge,
}

impl Metrics {
    pub fn new(registry: &Registry) -> Result<Self> {
        let metrics = Self {
            cache_lookups: IntCounterVec::new(
                Opts::new("bonkai_cache_lookups_total", "Cache lookups by freshness outcome"),
                &["outcome"],
            )?,
            fetch_errors: IntCounter::new(
                "bonkai_fetch_errors_total",
                "Failed cache fetches, blocking or background",
            )?,
            background_failures: IntCounter::new(
                "bonkai_background_refresh_failures_total",
                "Failed background revalidations",
            )?,
            feed_updates: IntCounter::new("bonkai_feed_updates_total", "Live feed updates published")?,
            feed_errors: IntCounter::new("bonkai_feed_errors_total", "Live feed errors recorded")?,
            last_price: Gauge::new("bonkai_price_usd", "Last published BONK price in USD")?,
            last_sentiment: Gauge::new("bonkai_sentiment_score", "Last published sentiment score")?,
        };

        registry.register(Box::new(metrics.cache_lookups.clone()))?;
        registry.register(Box::new(metrics.fetch_errors.clone()))?;
        registry.register(Box::new(metrics.background_failures.clone()))?;
        registry.register(Box::new(metrics.feed_updates.clone()))?;
        registry.register(Box::new(metrics.feed_errors.clone()))?;
        registry.register(Box::new(metrics.last_price.clone()))?;
        registry.register(Box::new(metrics.last_sentiment.clone()))?;

        Ok(metrics)
    }

    pub fn record_lookup(&self, outcome: LookupOutcome) {
        self.cache_lookups.with_label_values(&[outcome.as_label()]).inc();
    }

    pub fn record_fetch_error(&self) {
        self.fetch_errors.inc();
    }

    pub fn record_background_failure(&self) {
        self.background_failures.inc();
    }

    pub fn record_feed_update(&self, data: &BonkData) {
        self.feed_updates.inc();
        self.last_price.set(data.price);
        if let Some(score) = data.sentiment_score {
            self.last_sentiment.set(score);
        }
    }

    pub fn record_feed_error(&self) {
        self.feed_errors.inc();
    }

    pub fn lookups(&self, outcome: LookupOutcome) -> u64 {
        self.cache_lookups.with_label_values(&[outcome.as_label()]).get()
    }

    pub fn fetch_errors(&self) -> u64 {
        self.fetch_errors.get()
    }

    pub fn background_failures(&self) -> u64 {
        self.background_failures.get()
    }

    pub fn feed_updates(&self) -> u64 {
        self.feed_updates.get()
    }

    pub fn feed_errors(&self) -> u64 {
        self.feed_errors.get()
    }
}

/// Render every metric in the registry in the Prometheus text format.
pub fn encode(registry: &Registry) -> Result<String> {
    let mut buffer = Vec::new();
    TextEncoder::new().encode(&registry.gather(), &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| Error::MetricsError(e.to_string()))
}
