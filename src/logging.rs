use chrono::Local;
use env_logger::{Builder, Env, Target};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

use crate::config::LoggingConfig;
use crate::error::{Error, Result};

/// Install the global logger.
///
/// `RUST_LOG` wins over `level`. When `log_file` is set, records are
/// appended there instead of stderr.
pub fn init(level: &str, log_file: Option<&Path>) -> Result<()> {
    let mut builder = Builder::from_env(Env::default().default_filter_or(level));
    builder.format(|buf, record| {
        writeln!(
            buf,
            "{} [{}] {}: {}",
            Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
            record.level(),
            record.target(),
            record.args()
        )
    });

    if let Some(path) = log_file {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        builder.target(Target::Pipe(Box::new(file)));
    }

    builder
        .try_init()
        .map_err(|e| Error::InternalError(format!("Logger already initialized: {}", e)))
}

pub fn init_from_config(config: &LoggingConfig, debug: bool) -> Result<()> {
    let level = if debug { "debug" } else { config.level.as_str() };
    init(level, config.file.as_deref())
}
