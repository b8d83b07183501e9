use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use log::{debug, error, info};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;

use crate::config::ApiConfig;
use crate::error::{Error, Result};

pub mod sse;
pub mod types;

pub use sse::{SseDecoder, SseEvent};
pub use types::{PriceSnapshot, SentimentSnapshot};

const PRICE_ENDPOINT: &str = "api/bonk/price";
const SENTIMENT_ENDPOINT: &str = "api/bonk/sentiment";
const STREAM_ENDPOINT: &str = "api/bonk/stream";

/// Item produced by the live price stream.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Price(PriceSnapshot),
    /// The server asked clients to wait this long before reconnecting.
    Reconnect(Duration),
}

pub type PriceStream = BoxStream<'static, Result<StreamEvent>>;

/// The dashboard backend as seen by the data layer.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BonkApi: Send + Sync {
    async fn get_price(&self) -> Result<PriceSnapshot>;
    async fn get_sentiment(&self) -> Result<SentimentSnapshot>;
    async fn price_stream(&self, interval: Duration) -> Result<PriceStream>;
}

#[derive(Debug, Clone)]
pub struct BonkApiClient {
    client: Client,
    base_url: String,
    timeout: Duration,
}

impl BonkApiClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        // Only the connect phase is bounded on the client; streams stay open.
        let client = Client::builder().connect_timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout,
        })
    }

    pub fn from_config(config: &ApiConfig) -> Result<Self> {
        Self::new(config.base_url.clone(), Duration::from_millis(config.timeout_ms))
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}/{}", self.base_url, endpoint)
    }

    async fn get_json<T: DeserializeOwned>(&self, endpoint: &str) -> Result<T> {
        let url = self.url(endpoint);
        debug!("GET {}", url);

        let response = self.client.get(&url).timeout(self.timeout).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(status_error(status, endpoint));
        }

        response.json::<T>().await.map_err(|e| {
            error!("Failed to parse response from {}: {}", endpoint, e);
            Error::ApiInvalidFormat(format!("Failed to parse response from {}: {}", endpoint, e))
        })
    }
}

#[async_trait]
impl BonkApi for BonkApiClient {
    async fn get_price(&self) -> Result<PriceSnapshot> {
        let price: PriceSnapshot = self.get_json(PRICE_ENDPOINT).await?;
        price.validate()?;
        Ok(price)
    }

    async fn get_sentiment(&self) -> Result<SentimentSnapshot> {
        let sentiment: SentimentSnapshot = self.get_json(SENTIMENT_ENDPOINT).await?;
        sentiment.validate()?;
        Ok(sentiment)
    }

    async fn price_stream(&self, interval: Duration) -> Result<PriceStream> {
        let url = self.url(STREAM_ENDPOINT);
        let interval_ms = interval.as_millis().to_string();
        info!("Opening price stream {} (interval {}ms)", url, interval_ms);

        let response = self
            .client
            .get(&url)
            .query(&[("interval", interval_ms.as_str())])
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .header(reqwest::header::CACHE_CONTROL, "no-cache")
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(status_error(status, STREAM_ENDPOINT));
        }

        let mut decoder = SseDecoder::new();
        let events = response
            .bytes_stream()
            .map(move |chunk| match chunk {
                Ok(bytes) => {
                    let mut items: Vec<Result<StreamEvent>> = decoder
                        .push(&bytes)
                        .iter()
                        .filter_map(decode_stream_event)
                        .collect();
                    if decoder.take_overflow() {
                        items.push(Err(Error::StreamError(format!(
                            "Discarded event line longer than {} bytes",
                            sse::MAX_LINE_BYTES
                        ))));
                    }
                    if let Some(retry) = decoder.take_retry() {
                        items.push(Ok(StreamEvent::Reconnect(retry)));
                    }
                    items
                }
                Err(e) => vec![Err(Error::StreamError(e.to_string()))],
            })
            .flat_map(stream::iter)
            .boxed();

        Ok(events)
    }
}

/// Turn one server-sent event into a price update. Non-message events are
/// skipped.
pub fn decode_stream_event(event: &SseEvent) -> Option<Result<StreamEvent>> {
    if !event.is_message() {
        return None;
    }
    let parsed = serde_json::from_str::<PriceSnapshot>(&event.data)
        .map_err(Error::from)
        .and_then(|price| price.validate().map(|_| StreamEvent::Price(price)));
    Some(parsed)
}

pub fn status_error(status: StatusCode, endpoint: &str) -> Error {
    match status {
        StatusCode::TOO_MANY_REQUESTS => {
            Error::RateLimitExceeded(format!("{} rate limited", endpoint))
        }
        StatusCode::UNAUTHORIZED => Error::ApiAuthFailed(format!("{} rejected credentials", endpoint)),
        StatusCode::FORBIDDEN => Error::ApiQuotaExceeded(format!("{} quota exceeded", endpoint)),
        StatusCode::SERVICE_UNAVAILABLE => {
            Error::ApiMaintenance(format!("{} is under maintenance", endpoint))
        }
        _ => {
            let error_msg = format!("{} failed with status: {}", endpoint, status);
            error!("{}", error_msg);
            Error::ApiError(error_msg)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert!(matches!(
            status_error(StatusCode::TOO_MANY_REQUESTS, PRICE_ENDPOINT),
            Error::RateLimitExceeded(_)
        ));
        assert!(matches!(status_error(StatusCode::UNAUTHORIZED, PRICE_ENDPOINT), Error::ApiAuthFailed(_)));
        assert!(matches!(status_error(StatusCode::FORBIDDEN, PRICE_ENDPOINT), Error::ApiQuotaExceeded(_)));
        assert!(matches!(
            status_error(StatusCode::SERVICE_UNAVAILABLE, PRICE_ENDPOINT),
            Error::ApiMaintenance(_)
        ));
        assert!(matches!(
            status_error(StatusCode::INTERNAL_SERVER_ERROR, PRICE_ENDPOINT),
            Error::ApiError(_)
        ));
    }

    #[test]
    fn test_decode_stream_event() {
        let event = SseEvent {
            event: None,
            data: r#"{"price":0.00002,"provider":"stream"}"#.to_string(),
            id: None,
        };
        match decode_stream_event(&event) {
            Some(Ok(StreamEvent::Price(price))) => {
                assert_eq!(price.price, 0.00002);
                assert_eq!(price.provider, "stream");
            }
            other => panic!("unexpected decode result: {:?}", other),
        }

        let heartbeat = SseEvent {
            event: Some("ping".to_string()),
            data: "{}".to_string(),
            id: None,
        };
        assert!(decode_stream_event(&heartbeat).is_none());

        let garbage = SseEvent {
            event: None,
            data: "not json".to_string(),
            id: None,
        };
        assert!(matches!(decode_stream_event(&garbage), Some(Err(Error::ApiInvalidFormat(_)))));

        let negative = SseEvent {
            event: None,
            data: r#"{"price":-1}"#.to_string(),
            id: None,
        };
        assert!(matches!(decode_stream_event(&negative), Some(Err(Error::ApiInvalidData(_)))));
    }

    #[test]
    fn test_client_trims_base_url() -> Result<()> {
        let client = BonkApiClient::new("http://localhost:3000/", Duration::from_secs(5))?;
        assert_eq!(client.base_url(), "http://localhost:3000");
        assert_eq!(client.url(PRICE_ENDPOINT), "http://localhost:3000/api/bonk/price");
        Ok(())
    }

    #[tokio::test]
    async fn test_unreachable_backend_is_network_error() -> Result<()> {
        // Port 9 (discard) is not expected to serve HTTP
        let client = BonkApiClient::new("http://127.0.0.1:9", Duration::from_millis(500))?;
        let err = client.get_price().await.unwrap_err();
        assert!(err.is_transient(), "unexpected error: {:?}", err);
        Ok(())
    }
}
