use async_trait::async_trait;
use futures::{stream, StreamExt};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use bonkai_data::api::{BonkApi, PriceSnapshot, PriceStream, SentimentSnapshot, StreamEvent};
use bonkai_data::error::{Error, Result};

pub fn price(value: f64) -> PriceSnapshot {
    PriceSnapshot {
        price: value,
        market_cap: 1_500_000_000.0,
        volume_24h: 180_000_000.0,
        change_24h: -1.2,
        updated_at: None,
        provider: "test".to_string(),
    }
}

pub fn sentiment(score: f64) -> SentimentSnapshot {
    SentimentSnapshot {
        score,
        change_24h: 0.5,
        mentions_24h: 1_000,
        last_updated: None,
        source: "test".to_string(),
    }
}

/// Backend stub that counts calls and answers after a fixed latency.
pub struct CountingApi {
    pub price_calls: AtomicUsize,
    pub sentiment_calls: AtomicUsize,
    pub fail: AtomicBool,
    latency: Duration,
}

impl CountingApi {
    pub fn new(latency: Duration) -> Self {
        Self {
            price_calls: AtomicUsize::new(0),
            sentiment_calls: AtomicUsize::new(0),
            fail: AtomicBool::new(false),
            latency,
        }
    }

    pub fn price_calls(&self) -> usize {
        self.price_calls.load(Ordering::SeqCst)
    }

    pub fn sentiment_calls(&self) -> usize {
        self.sentiment_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BonkApi for CountingApi {
    async fn get_price(&self) -> Result<PriceSnapshot> {
        let n = self.price_calls.fetch_add(1, Ordering::SeqCst) + 1;
        tokio::time::sleep(self.latency).await;
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::NetworkError("connection reset".into()));
        }
        Ok(price(n as f64))
    }

    async fn get_sentiment(&self) -> Result<SentimentSnapshot> {
        self.sentiment_calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.latency).await;
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::ApiError("sentiment unavailable".into()));
        }
        Ok(sentiment(64.0))
    }

    async fn price_stream(&self, _interval: Duration) -> Result<PriceStream> {
        let events: Vec<Result<StreamEvent>> =
            vec![Ok(StreamEvent::Price(price(1.0))), Ok(StreamEvent::Price(price(2.0)))];
        Ok(stream::iter(events).chain(stream::pending()).boxed())
    }
}
