use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{Error, Result};

/// Body of `GET /api/bonk/price` and of every stream event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceSnapshot {
    pub price: f64,
    #[serde(default)]
    pub market_cap: f64,
    #[serde(default, rename = "volume24h")]
    pub volume_24h: f64,
    #[serde(default, rename = "change24h")]
    pub change_24h: f64,
    #[serde(default, deserialize_with = "flexible_timestamp")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default = "unknown_source")]
    pub provider: String,
}

/// Body of `GET /api/bonk/sentiment`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SentimentSnapshot {
    pub score: f64,
    #[serde(default, rename = "change24h")]
    pub change_24h: f64,
    #[serde(default, rename = "mentions24h")]
    pub mentions_24h: u64,
    #[serde(default, deserialize_with = "flexible_timestamp")]
    pub last_updated: Option<DateTime<Utc>>,
    #[serde(default = "unknown_source")]
    pub source: String,
}

fn unknown_source() -> String {
    "unknown".to_string()
}

// The backend has sent both ISO-8601 strings and epoch milliseconds.
fn flexible_timestamp<'de, D>(deserializer: D) -> std::result::Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Millis(i64),
        Text(String),
    }

    match Option::<Raw>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Raw::Millis(ms)) => Ok(Utc.timestamp_millis_opt(ms).single()),
        Some(Raw::Text(text)) => DateTime::parse_from_rfc3339(&text)
            .map(|dt| Some(dt.with_timezone(&Utc)))
            .map_err(serde::de::Error::custom),
    }
}

fn check_amount(name: &str, value: f64) -> Result<()> {
    if !value.is_finite() {
        return Err(Error::ApiInvalidData(format!("Non-finite {}: {}", name, value)));
    }
    if value < 0.0 {
        return Err(Error::ApiInvalidData(format!("Negative {}: {}", name, value)));
    }
    Ok(())
}

impl PriceSnapshot {
    pub fn validate(&self) -> Result<()> {
        check_amount("price", self.price)?;
        check_amount("market cap", self.market_cap)?;
        check_amount("24h volume", self.volume_24h)?;
        if !self.change_24h.is_finite() {
            return Err(Error::ApiInvalidData(format!("Non-finite 24h change: {}", self.change_24h)));
        }
        Ok(())
    }
}

impl SentimentSnapshot {
    pub fn validate(&self) -> Result<()> {
        if !self.score.is_finite() {
            return Err(Error::ApiInvalidData(format!("Non-finite sentiment score: {}", self.score)));
        }
        if !self.change_24h.is_finite() {
            return Err(Error::ApiInvalidData(format!(
                "Non-finite sentiment change: {}",
                self.change_24h
            )));
        }
        Ok(())
    }
}
