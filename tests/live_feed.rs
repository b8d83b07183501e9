mod common;

use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

use bonkai_data::config::{FeedMode, FeedSettings};
use bonkai_data::feed::{FeedConfig, LiveFeed};
use bonkai_data::services::BonkDataService;
use common::CountingApi;

#[tokio::test(start_paused = true)]
async fn test_streaming_feed_tracks_latest_event() {
    let api = Arc::new(CountingApi::new(Duration::ZERO));
    let service = BonkDataService::new(api.clone());
    let settings = FeedSettings {
        mode: FeedMode::Streaming,
        interval_ms: 1_000,
    };
    let mut feed = LiveFeed::new(service.clone(), FeedConfig::from_settings(&settings));
    let mut rx = feed.subscribe();
    feed.start();

    let state = timeout(Duration::from_secs(30), async {
        loop {
            {
                let state = rx.borrow_and_update();
                if state.data.as_ref().map(|d| d.price) == Some(2.0) {
                    return state.clone();
                }
            }
            rx.changed().await.expect("feed alive");
        }
    })
    .await
    .expect("stream events published");

    assert!(state.is_ready());
    assert_eq!(state.data.and_then(|d| d.sentiment_score), Some(64.0));
    // Streamed prices land in the price cache too
    assert_eq!(service.cached_price().await.map(|p| p.price), Some(2.0));
    assert_eq!(api.price_calls(), 0);

    feed.shutdown().await;
    assert!(!feed.is_running());
}

#[tokio::test(start_paused = true)]
async fn test_polling_feed_switches_interval() {
    let api = Arc::new(CountingApi::new(Duration::ZERO));
    let service = BonkDataService::new(api.clone());
    let mut feed = LiveFeed::new(service, FeedConfig::polling(Duration::from_secs(1)));
    let mut rx = feed.subscribe();
    feed.start();

    timeout(Duration::from_secs(30), rx.changed())
        .await
        .expect("first update")
        .expect("feed alive");
    tokio::time::sleep(Duration::from_millis(3_500)).await;
    let fast_polls = api.price_calls();
    assert!(fast_polls >= 4, "expected at least 4 polls, saw {}", fast_polls);

    assert!(feed.reconfigure(FeedConfig::polling(Duration::from_secs(60))).await);
    tokio::time::sleep(Duration::from_secs(30)).await;
    // One immediate poll from the restarted task, then nothing for a minute
    assert_eq!(api.price_calls(), fast_polls + 1);
}
