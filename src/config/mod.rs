use serde::{Deserialize, Deserializer, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::utils::cache::FetchOptions;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub api: ApiConfig,
    pub cache: CacheConfig,
    pub feed: FeedSettings,
    pub retry: RetryConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct ApiConfig {
    pub base_url: String,
    pub timeout_ms: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000".to_string(),
            timeout_ms: 10_000,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub struct CachePolicyConfig {
    pub ttl_ms: u64,
    pub stale_while_revalidate_ms: u64,
    #[serde(default = "default_background")]
    pub background: bool,
}

fn default_background() -> bool {
    true
}

impl CachePolicyConfig {
    pub fn fetch_options(&self) -> FetchOptions {
        FetchOptions::new(
            Duration::from_millis(self.ttl_ms),
            Duration::from_millis(self.stale_while_revalidate_ms),
        )
        .background(self.background)
    }
}

#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct CacheConfig {
    pub price: CachePolicyConfig,
    pub sentiment: CachePolicyConfig,
}

// Fields left out of a `[cache.*]` table keep that resource's default.
#[derive(Deserialize, Default)]
#[serde(default)]
struct PolicyOverrides {
    ttl_ms: Option<u64>,
    stale_while_revalidate_ms: Option<u64>,
    background: Option<bool>,
}

impl PolicyOverrides {
    fn over(self, base: CachePolicyConfig) -> CachePolicyConfig {
        CachePolicyConfig {
            ttl_ms: self.ttl_ms.unwrap_or(base.ttl_ms),
            stale_while_revalidate_ms: self
                .stale_while_revalidate_ms
                .unwrap_or(base.stale_while_revalidate_ms),
            background: self.background.unwrap_or(base.background),
        }
    }
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct CacheOverrides {
    price: PolicyOverrides,
    sentiment: PolicyOverrides,
}

impl<'de> Deserialize<'de> for CacheConfig {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let overrides = CacheOverrides::deserialize(deserializer)?;
        let defaults = CacheConfig::default();
        Ok(Self {
            price: overrides.price.over(defaults.price),
            sentiment: overrides.sentiment.over(defaults.sentiment),
        })
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            price: CachePolicyConfig {
                ttl_ms: 30_000,
                stale_while_revalidate_ms: 60_000,
                background: true,
            },
            sentiment: CachePolicyConfig {
                ttl_ms: 60_000,
                stale_while_revalidate_ms: 120_000,
                background: true,
            },
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FeedMode {
    Polling,
    Streaming,
}

impl std::str::FromStr for FeedMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "polling" | "poll" => Ok(FeedMode::Polling),
            "streaming" | "stream" | "sse" => Ok(FeedMode::Streaming),
            other => Err(Error::ConfigError(format!("Unknown feed mode: {}", other))),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct FeedSettings {
    pub mode: FeedMode,
    pub interval_ms: u64,
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            mode: FeedMode::Polling,
            interval_ms: 30_000,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct RetryConfig {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Reconnect delay used for streams until the server sends `retry:`.
    pub stream_reconnect_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 500,
            max_delay_ms: 30_000,
            stream_reconnect_ms: 3_000,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let config_str = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&config_str)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let config_str = toml::to_string_pretty(self)?;
        fs::write(path, config_str)?;
        Ok(())
    }

    /// Apply `BONKAI_*` environment overrides, reading `.env` first.
    pub fn apply_env(&mut self) -> Result<()> {
        dotenv::dotenv().ok();

        if let Ok(url) = env::var("BONKAI_API_BASE_URL") {
            self.api.base_url = url;
        }
        if let Ok(mode) = env::var("BONKAI_FEED_MODE") {
            self.feed.mode = mode.parse()?;
        }
        if let Ok(interval) = env::var("BONKAI_FEED_INTERVAL_MS") {
            self.feed.interval_ms = interval.trim().parse().map_err(|_| {
                Error::ConfigError(format!("Invalid BONKAI_FEED_INTERVAL_MS: {}", interval))
            })?;
        }

        self.validate()
    }

    pub fn validate(&self) -> Result<()> {
        if self.api.base_url.trim().is_empty() {
            return Err(Error::ConfigError("api.base_url must not be empty".into()));
        }
        if self.api.timeout_ms == 0 {
            return Err(Error::ConfigError("api.timeout_ms must be positive".into()));
        }
        if self.feed.interval_ms == 0 {
            return Err(Error::ConfigError("feed.interval_ms must be positive".into()));
        }
        for (name, policy) in [("price", &self.cache.price), ("sentiment", &self.cache.sentiment)] {
            if policy.ttl_ms > policy.stale_while_revalidate_ms {
                return Err(Error::ConfigError(format!(
                    "cache.{}: ttl_ms ({}) exceeds stale_while_revalidate_ms ({})",
                    name, policy.ttl_ms, policy.stale_while_revalidate_ms
                )));
            }
        }
        if self.retry.max_delay_ms < self.retry.base_delay_ms {
            return Err(Error::ConfigError("retry.max_delay_ms is below base_delay_ms".into()));
        }
        Ok(())
    }
}
