use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::api::types::{PriceSnapshot, SentimentSnapshot};

/// Aggregate view-model handed to dashboard consumers.
///
/// Derived on demand from the latest snapshots, never stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BonkData {
    pub price: f64,
    pub market_cap: f64,
    #[serde(rename = "volume24h")]
    pub volume_24h: f64,
    #[serde(rename = "priceChange24h")]
    pub price_change_24h: f64,
    pub sentiment_score: Option<f64>,
    #[serde(rename = "sentimentChange24h")]
    pub sentiment_change_24h: Option<f64>,
    #[serde(rename = "mentions24h")]
    pub mentions_24h: u64,
    pub social_volume: u64,
    pub mindshare_rank: Option<u32>,
    pub provider: String,
    pub updated_at: DateTime<Utc>,
}

impl BonkData {
    /// Combine the price feed with optional sentiment. Fields neither feed
    /// supplies fall back to defaults: social volume tracks mentions, and
    /// mindshare rank stays unknown.
    pub fn compose(price: &PriceSnapshot, sentiment: Option<&SentimentSnapshot>) -> Self {
        let mentions_24h = sentiment.map(|s| s.mentions_24h).unwrap_or(0);
        Self {
            price: price.price,
            market_cap: price.market_cap,
            volume_24h: price.volume_24h,
            price_change_24h: price.change_24h,
            sentiment_score: sentiment.map(|s| s.score),
            sentiment_change_24h: sentiment.map(|s| s.change_24h),
            mentions_24h,
            social_volume: mentions_24h,
            mindshare_rank: None,
            provider: price.provider.clone(),
            updated_at: price.updated_at.unwrap_or_else(Utc::now),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn price() -> PriceSnapshot {
        PriceSnapshot {
            price: 0.000025,
            market_cap: 1.6e9,
            volume_24h: 2.0e8,
            change_24h: 4.2,
            updated_at: Some(Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()),
            provider: "coingecko".to_string(),
        }
    }

    #[test]
    fn test_compose_with_sentiment() {
        let sentiment = SentimentSnapshot {
            score: 68.0,
            change_24h: -1.5,
            mentions_24h: 12_400,
            last_updated: None,
            source: "lunarcrush".to_string(),
        };
        let data = BonkData::compose(&price(), Some(&sentiment));

        assert_eq!(data.price, 0.000025);
        assert_eq!(data.sentiment_score, Some(68.0));
        assert_eq!(data.sentiment_change_24h, Some(-1.5));
        assert_eq!(data.social_volume, 12_400);
        assert_eq!(data.mindshare_rank, None);
        assert_eq!(data.updated_at, Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap());
    }

    #[test]
    fn test_compose_defaults_without_sentiment() {
        let mut snapshot = price();
        snapshot.updated_at = None;
        let before = Utc::now();
        let data = BonkData::compose(&snapshot, None);

        assert_eq!(data.sentiment_score, None);
        assert_eq!(data.mentions_24h, 0);
        assert_eq!(data.social_volume, 0);
        assert!(data.updated_at >= before);
    }

    #[test]
    fn test_serializes_camel_case() {
        let json = serde_json::to_value(BonkData::compose(&price(), None)).unwrap();
        assert!(json.get("marketCap").is_some());
        assert!(json.get("volume24h").is_some());
        assert!(json.get("priceChange24h").is_some());
        assert!(json.get("mindshareRank").is_some());
    }
}
