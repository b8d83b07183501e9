//! Live BONK price/sentiment feed.
//!
//! A `LiveFeed` owns one background task, either polling the backend on a
//! fixed interval or consuming the server-sent price stream, and publishes
//! the latest `FeedState` to any number of subscribers. Changing the mode or
//! interval tears the task down and starts a new one.

use chrono::{DateTime, Utc};
use futures::StreamExt;
use log::{debug, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::api::StreamEvent;
use crate::config::{FeedMode, FeedSettings, RetryConfig};
use crate::error::{Error, Result};
use crate::metrics::Metrics;
use crate::models::BonkData;
use crate::services::BonkDataService;
use crate::utils::retry::Backoff;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeedConfig {
    pub mode: FeedMode,
    pub interval: Duration,
}

impl FeedConfig {
    pub fn polling(interval: Duration) -> Self {
        Self {
            mode: FeedMode::Polling,
            interval,
        }
    }

    pub fn streaming(interval: Duration) -> Self {
        Self {
            mode: FeedMode::Streaming,
            interval,
        }
    }

    pub fn from_settings(settings: &FeedSettings) -> Self {
        Self {
            mode: settings.mode,
            interval: Duration::from_millis(settings.interval_ms),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedStatus {
    Initializing,
    Ready,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FeedState {
    pub status: FeedStatus,
    pub data: Option<BonkData>,
    /// Most recent failure. Cleared by the next successful update.
    pub error: Option<Error>,
    pub last_updated: Option<DateTime<Utc>>,
    /// Incremented every time the feed task is (re)started.
    pub generation: u64,
}

impl FeedState {
    fn initial() -> Self {
        Self {
            status: FeedStatus::Initializing,
            data: None,
            error: None,
            last_updated: None,
            generation: 0,
        }
    }

    pub fn is_loading(&self) -> bool {
        self.status == FeedStatus::Initializing
    }

    pub fn is_ready(&self) -> bool {
        self.status == FeedStatus::Ready
    }
}

pub struct LiveFeed {
    service: BonkDataService,
    config: FeedConfig,
    backoff: Backoff,
    stream_reconnect: Duration,
    metrics: Option<Metrics>,
    state_tx: Arc<watch::Sender<FeedState>>,
    task: Option<JoinHandle<()>>,
    generation: u64,
}

impl LiveFeed {
    /// Create a stopped feed. Call `start` to begin publishing.
    pub fn new(service: BonkDataService, config: FeedConfig) -> Self {
        let retry = RetryConfig::default();
        let (state_tx, _) = watch::channel(FeedState::initial());
        Self {
            service,
            config,
            backoff: Backoff::from_config(&retry),
            stream_reconnect: Duration::from_millis(retry.stream_reconnect_ms),
            metrics: None,
            state_tx: Arc::new(state_tx),
            task: None,
            generation: 0,
        }
    }

    pub fn with_retry(mut self, retry: &RetryConfig) -> Self {
        self.backoff = Backoff::from_config(retry);
        self.stream_reconnect = Duration::from_millis(retry.stream_reconnect_ms);
        self
    }

    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn config(&self) -> FeedConfig {
        self.config
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().map_or(false, |task| !task.is_finished())
    }

    pub fn subscribe(&self) -> watch::Receiver<FeedState> {
        self.state_tx.subscribe()
    }

    pub fn state(&self) -> FeedState {
        self.state_tx.borrow().clone()
    }

    /// Spawn the feed task for the current config. No-op when running.
    pub fn start(&mut self) {
        if self.task.is_some() {
            return;
        }

        self.generation += 1;
        let generation = self.generation;
        self.state_tx.send_modify(|state| state.generation = generation);

        let worker = FeedWorker {
            service: self.service.clone(),
            config: self.config,
            backoff: self.backoff,
            stream_reconnect: self.stream_reconnect,
            metrics: self.metrics.clone(),
            state_tx: Arc::clone(&self.state_tx),
        };
        info!(
            "Starting {:?} feed (interval {}ms, generation {})",
            self.config.mode,
            self.config.interval.as_millis(),
            generation
        );
        self.task = Some(tokio::spawn(worker.run()));
    }

    /// Switch to `config`, restarting the task if anything changed.
    /// Returns whether a restart happened.
    pub async fn reconfigure(&mut self, config: FeedConfig) -> bool {
        if config == self.config {
            debug!("Feed config unchanged, keeping current task");
            return false;
        }

        let was_running = self.task.is_some();
        self.teardown().await;
        self.config = config;
        if was_running {
            self.start();
        }
        true
    }

    /// Stop the feed task. Subscribers keep the last published state.
    pub async fn shutdown(&mut self) {
        self.teardown().await;
    }

    async fn teardown(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            match task.await {
                Err(e) if e.is_cancelled() => debug!("Feed task generation {} stopped", self.generation),
                Err(e) => warn!("Feed task generation {} ended abnormally: {}", self.generation, e),
                Ok(()) => debug!("Feed task generation {} had already finished", self.generation),
            }
        }
    }
}

impl Drop for LiveFeed {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

struct FeedWorker {
    service: BonkDataService,
    config: FeedConfig,
    backoff: Backoff,
    stream_reconnect: Duration,
    metrics: Option<Metrics>,
    state_tx: Arc<watch::Sender<FeedState>>,
}

impl FeedWorker {
    async fn run(self) {
        match self.config.mode {
            FeedMode::Polling => self.poll().await,
            FeedMode::Streaming => self.stream().await,
        }
    }

    async fn poll(&self) {
        let mut failures: u32 = 0;
        loop {
            match self.refresh().await {
                Ok(data) => {
                    failures = 0;
                    self.publish(data);
                }
                Err(e) => {
                    failures = failures.saturating_add(1);
                    self.record_error(e);
                }
            }

            let wait = self.config.interval + self.backoff.delay(failures);
            tokio::time::sleep(wait).await;
        }
    }

    async fn refresh(&self) -> Result<BonkData> {
        let (price, sentiment) =
            tokio::join!(self.service.refresh_price(), self.service.get_sentiment());
        let price = price?;
        let sentiment = self.service.sentiment_or_cached(sentiment).await;
        Ok(BonkData::compose(&price, sentiment.as_ref()))
    }

    async fn stream(&self) {
        let mut failures: u32 = 0;
        let mut reconnect = self.stream_reconnect;

        loop {
            match self.service.open_price_stream(self.config.interval).await {
                Ok(mut events) => {
                    info!("Price stream connected");
                    while let Some(event) = events.next().await {
                        match event {
                            Ok(StreamEvent::Price(price)) => {
                                failures = 0;
                                self.service.store_price(price.clone()).await;
                                let sentiment = self
                                    .service
                                    .sentiment_or_cached(self.service.get_sentiment().await)
                                    .await;
                                self.publish(BonkData::compose(&price, sentiment.as_ref()));
                            }
                            Ok(StreamEvent::Reconnect(delay)) => {
                                debug!("Server requested {}ms reconnect delay", delay.as_millis());
                                reconnect = delay;
                            }
                            Err(e) => self.record_error(e),
                        }
                    }
                    self.record_error(Error::StreamError("Price stream closed".into()));
                }
                Err(e) => self.record_error(e),
            }

            failures = failures.saturating_add(1);
            let wait = reconnect.max(self.backoff.delay(failures));
            info!("Reconnecting price stream in {}ms", wait.as_millis());
            tokio::time::sleep(wait).await;
        }
    }

    fn publish(&self, data: BonkData) {
        if let Some(metrics) = &self.metrics {
            metrics.record_feed_update(&data);
        }
        debug!("Feed update: price {} ({})", data.price, data.provider);
        self.state_tx.send_modify(|state| {
            state.status = FeedStatus::Ready;
            state.data = Some(data);
            state.error = None;
            state.last_updated = Some(Utc::now());
        });
    }

    fn record_error(&self, error: Error) {
        if let Some(metrics) = &self.metrics {
            metrics.record_feed_error();
        }
        warn!("Feed error: {}", error);
        self.state_tx.send_modify(|state| state.error = Some(error));
    }
}
