use clap::Parser;
use std::path::PathBuf;

use crate::config::FeedMode;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to the configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Feed mode override: polling or streaming
    #[arg(short, long, value_parser = parse_mode)]
    pub mode: Option<FeedMode>,

    /// Poll or stream interval override in milliseconds
    #[arg(short, long)]
    pub interval_ms: Option<u64>,

    /// Print one snapshot as JSON and exit
    #[arg(long)]
    pub once: bool,

    /// Enable debug logging
    #[arg(short, long)]
    pub debug: bool,
}

fn parse_mode(value: &str) -> Result<FeedMode, String> {
    value.parse::<FeedMode>().map_err(|e| e.to_string())
}
