pub mod api;
pub mod cli;
pub mod config;
pub mod error;
pub mod feed;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod services;
pub mod utils;

pub use error::{Error, Result};

// Declare tests module only when testing
#[cfg(test)]
pub mod tests;
