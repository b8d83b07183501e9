use anyhow::{Context, Result};
use clap::Parser;
use log::{error, info};
use prometheus::Registry;
use std::sync::Arc;
use std::time::Duration;

use bonkai_data::api::BonkApiClient;
use bonkai_data::cli::Cli;
use bonkai_data::config::Config;
use bonkai_data::feed::{FeedConfig, LiveFeed};
use bonkai_data::logging;
use bonkai_data::metrics::{encode as encode_metrics, Metrics};
use bonkai_data::services::BonkDataService;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("Failed to load configuration from {:?}", path))?,
        None => Config::default(),
    };
    config.apply_env().context("Invalid environment override")?;
    if let Some(mode) = cli.mode {
        config.feed.mode = mode;
    }
    if let Some(interval_ms) = cli.interval_ms {
        config.feed.interval_ms = interval_ms;
    }
    config.validate()?;

    logging::init_from_config(&config.logging, cli.debug)?;
    info!("Configuration loaded, backend at {}", config.api.base_url);

    let registry = Registry::new();
    let metrics = Metrics::new(&registry)?;

    let api = Arc::new(BonkApiClient::from_config(&config.api)?);
    let service = BonkDataService::with_policies(api, &config.cache).with_metrics(metrics.clone());

    if cli.once {
        let snapshot = service.get_snapshot().await?;
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
        return Ok(());
    }

    service.prefetch_all();

    let mut feed = LiveFeed::new(service, FeedConfig::from_settings(&config.feed))
        .with_retry(&config.retry)
        .with_metrics(metrics);
    let mut updates = feed.subscribe();
    feed.start();

    info!("Live feed running, press Ctrl-C to stop");
    loop {
        tokio::select! {
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = updates.borrow_and_update().clone();
                match (&state.data, &state.error) {
                    (_, Some(e)) => error!("Feed error: {}", e),
                    (Some(data), None) => info!(
                        "BONK ${:.8} ({:+.2}% 24h) | mcap ${:.0} | sentiment {}",
                        data.price,
                        data.price_change_24h,
                        data.market_cap,
                        data.sentiment_score.map_or("n/a".to_string(), |s| format!("{:.1}", s)),
                    ),
                    (None, None) => {}
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down live feed");
                break;
            }
        }
    }

    feed.shutdown().await;
    // Give detached cache refreshes a moment to settle before exit
    tokio::time::sleep(Duration::from_millis(50)).await;
    info!("Final metrics:\n{}", encode_metrics(&registry)?);
    Ok(())
}
