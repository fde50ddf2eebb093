pub mod board;
pub mod config;
pub mod control;
mod ctl;
pub mod smbus;

use std::path::Path;

use config::Config;
pub use ctl::main as ctl_main;
use tracing::level_filters::LevelFilter;

fn tracing_level(level: log::LevelFilter) -> LevelFilter {
    match level {
        log::LevelFilter::Off => LevelFilter::OFF,
        log::LevelFilter::Error => LevelFilter::ERROR,
        log::LevelFilter::Warn => LevelFilter::WARN,
        log::LevelFilter::Info => LevelFilter::INFO,
        log::LevelFilter::Debug => LevelFilter::DEBUG,
        log::LevelFilter::Trace => LevelFilter::TRACE,
    }
}

/// Route `log` records into a `tracing` subscriber printing to stdout.
pub fn setup_logger(
    level: log::LevelFilter,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_log::LogTracer::init_with_filter(level)?;
    tracing_subscriber::fmt()
        .with_max_level(tracing_level(level))
        .try_init()
}

/// Read the config at `path` and set up logging at the configured level,
/// or at `level` when given. Exits the process when either fails.
pub async fn initialize_logging_parse_config(
    path: &Path,
    level: Option<log::LevelFilter>,
) -> Config {
    let config = match Config::from_file(path).await {
        Ok(config) => config,
        Err(e) => {
            // logging is not set up yet
            eprintln!("Unable to load configuration {}: {e}", path.display());
            std::process::exit(1);
        }
    };

    if let Err(e) = setup_logger(level.unwrap_or(config.loglevel)) {
        eprintln!("Could not setup logging: {e}");
        std::process::exit(1);
    }

    config
}
