#![cfg(test)]
// Shared fixtures for unit tests across modules.

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use futures::channel::mpsc::{unbounded, UnboundedSender};
use futures::StreamExt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::api::{BonkApi, PriceSnapshot, PriceStream, SentimentSnapshot, StreamEvent};
use crate::error::{Error, Result};

pub fn sample_price(price: f64) -> PriceSnapshot {
    PriceSnapshot {
        price,
        market_cap: 1_600_000_000.0,
        volume_24h: 210_000_000.0,
        change_24h: 2.5,
        updated_at: Some(Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()),
        provider: "coingecko".to_string(),
    }
}

pub fn sample_sentiment() -> SentimentSnapshot {
    SentimentSnapshot {
        score: 71.0,
        change_24h: 3.0,
        mentions_24h: 8_200,
        last_updated: None,
        source: "lunarcrush".to_string(),
    }
}

/// Let spawned tasks run on the current-thread test runtime.
pub async fn settle() {
    for _ in 0..32 {
        tokio::task::yield_now().await;
    }
}

// Decrements the live-stream counter when the stream it rides in is dropped.
struct StreamGuard(Arc<AtomicUsize>);

impl Drop for StreamGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// In-memory backend with call counters and switchable failures.
pub struct FakeApi {
    pub price_calls: AtomicUsize,
    pub sentiment_calls: AtomicUsize,
    pub stream_opens: AtomicUsize,
    pub active_streams: Arc<AtomicUsize>,
    pub fail_price: AtomicBool,
    pub fail_sentiment: AtomicBool,
    pub fail_stream: AtomicBool,
    delay: Duration,
    price: Mutex<f64>,
    senders: Mutex<Vec<UnboundedSender<Result<StreamEvent>>>>,
}

impl FakeApi {
    pub const START_PRICE: f64 = 0.000024;

    pub fn new() -> Self {
        Self {
            price_calls: AtomicUsize::new(0),
            sentiment_calls: AtomicUsize::new(0),
            stream_opens: AtomicUsize::new(0),
            active_streams: Arc::new(AtomicUsize::new(0)),
            fail_price: AtomicBool::new(false),
            fail_sentiment: AtomicBool::new(false),
            fail_stream: AtomicBool::new(false),
            delay: Duration::ZERO,
            price: Mutex::new(Self::START_PRICE),
            senders: Mutex::new(Vec::new()),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn set_price(&self, price: f64) {
        *self.price.lock().unwrap() = price;
    }

    /// Send a price to the most recently opened stream. False when no
    /// stream is open.
    pub fn push_stream_price(&self, price: f64) -> bool {
        let senders = self.senders.lock().unwrap();
        match senders.last() {
            Some(tx) => tx.unbounded_send(Ok(StreamEvent::Price(sample_price(price)))).is_ok(),
            None => false,
        }
    }

    pub fn push_stream_event(&self, event: Result<StreamEvent>) -> bool {
        let senders = self.senders.lock().unwrap();
        match senders.last() {
            Some(tx) => tx.unbounded_send(event).is_ok(),
            None => false,
        }
    }

    /// End every open stream from the server side.
    pub fn close_streams(&self) {
        self.senders.lock().unwrap().clear();
    }

    async fn pause(&self) {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
    }
}

#[async_trait]
impl BonkApi for FakeApi {
    async fn get_price(&self) -> Result<PriceSnapshot> {
        self.price_calls.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        if self.fail_price.load(Ordering::SeqCst) {
            return Err(Error::NetworkError("price backend down".into()));
        }
        let price = *self.price.lock().unwrap();
        Ok(sample_price(price))
    }

    async fn get_sentiment(&self) -> Result<SentimentSnapshot> {
        self.sentiment_calls.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        if self.fail_sentiment.load(Ordering::SeqCst) {
            return Err(Error::ApiError("sentiment backend down".into()));
        }
        Ok(sample_sentiment())
    }

    async fn price_stream(&self, _interval: Duration) -> Result<PriceStream> {
        self.stream_opens.fetch_add(1, Ordering::SeqCst);
        if self.fail_stream.load(Ordering::SeqCst) {
            return Err(Error::StreamError("stream refused".into()));
        }

        let (tx, rx) = unbounded();
        self.senders.lock().unwrap().push(tx);
        self.active_streams.fetch_add(1, Ordering::SeqCst);
        let guard = StreamGuard(Arc::clone(&self.active_streams));

        Ok(rx
            .map(move |event| {
                let _held = &guard;
                event
            })
            .boxed())
    }
}
