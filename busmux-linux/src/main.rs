use std::{path::PathBuf, sync::Arc};

use busmux_linux::{board::Board, control, initialize_logging_parse_config};
use clap::Parser;

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// Configuration file to use
    #[clap(long = "config", short = 'c', default_value = "/etc/busmux/busmux.toml")]
    config: PathBuf,

    /// Override the log level from the configuration file
    #[clap(long)]
    log_level: Option<log::LevelFilter>,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let config = initialize_logging_parse_config(&args.config, args.log_level).await;
    if !config.check() {
        log::error!("Refusing to start with an inconsistent configuration");
        std::process::exit(1);
    }

    let board = match Board::assemble(&config) {
        Ok(board) => Arc::new(board),
        Err(e) => {
            log::error!("Could not set up the board: {e}");
            std::process::exit(1);
        }
    };
    log::info!("serving devices {:?}", board.devices());

    let control = control::spawn(&config.observability, board.clone()).await;

    if let Err(e) = tokio::signal::ctrl_c().await {
        log::error!("Unable to wait for shutdown signal: {e}");
    }
    log::info!("shutting down");

    control.abort();
    // the aborted task drops its clone of the board
    let _ = control.await;
    match Arc::try_unwrap(board) {
        Ok(board) => board.shutdown(),
        Err(_) => log::warn!("board still in use, leaving teardown to process exit"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arguments() {
        let args = Args::try_parse_from(["busmux"]).unwrap();
        assert_eq!(args.config, PathBuf::from("/etc/busmux/busmux.toml"));
        assert_eq!(args.log_level, None);

        let args =
            Args::try_parse_from(["busmux", "-c", "busmux.toml", "--log-level", "debug"]).unwrap();
        assert_eq!(args.config, PathBuf::from("busmux.toml"));
        assert_eq!(args.log_level, Some(log::LevelFilter::Debug));
    }
}
