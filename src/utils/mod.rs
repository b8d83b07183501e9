pub mod cache;
pub mod retry;

pub use cache::{Cache, CacheEntry, FetchOptions, Freshness};
pub use retry::Backoff;
