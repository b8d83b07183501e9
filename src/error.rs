use std::io;
use std::result::Result as StdResult;
use thiserror::Error;

// Errors are Clone so a single failed fetch can be handed to every caller
// awaiting the same in-flight request. Foreign errors are kept as strings.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum Error {
    #[error("API error: {0}")]
    ApiError(String),
    #[error("API invalid data: {0}")]
    ApiInvalidData(String),
    #[error("API invalid format: {0}")]
    ApiInvalidFormat(String),
    #[error("API authentication failed: {0}")]
    ApiAuthFailed(String),
    #[error("API quota exceeded: {0}")]
    ApiQuotaExceeded(String),
    #[error("API maintenance: {0}")]
    ApiMaintenance(String),
    #[error("Rate limit exceeded: {0}")]
    RateLimitExceeded(String),
    #[error("Network error: {0}")]
    NetworkError(String),
    #[error("Timeout: {0}")]
    Timeout(String),
    #[error("Stream error: {0}")]
    StreamError(String),
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("Metrics error: {0}")]
    MetricsError(String),
    #[error("Internal error: {0}")]
    InternalError(String),
    #[error("IO error: {0}")]
    IoError(String),
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Error::Timeout(err.to_string())
        } else if err.is_decode() {
            Error::ApiInvalidFormat(err.to_string())
        } else {
            Error::NetworkError(err.to_string())
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::ApiInvalidFormat(err.to_string())
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::IoError(err.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::ConfigError(err.to_string())
    }
}

impl From<toml::ser::Error> for Error {
    fn from(err: toml::ser::Error) -> Self {
        Error::ConfigError(err.to_string())
    }
}

impl From<prometheus::Error> for Error {
    fn from(err: prometheus::Error) -> Self {
        Error::MetricsError(err.to_string())
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(err: tokio::task::JoinError) -> Self {
        Error::InternalError(err.to_string())
    }
}

impl Error {
    /// Whether a later attempt at the same request might succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::NetworkError(_)
                | Error::Timeout(_)
                | Error::RateLimitExceeded(_)
                | Error::ApiMaintenance(_)
                | Error::StreamError(_)
                | Error::ApiError(_)
        )
    }
}

pub type Result<T> = StdResult<T, Error>;
