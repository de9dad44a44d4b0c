use std::env;
use std::path::PathBuf;
use std::time::Duration;
use clap::{Parser, Subcommand};
use log::info;

use crate::config::io::ConfigIO;
use crate::console::application::{run_console, run_scan};
use crate::error::AppRunError;

pub mod config;
pub mod console;
pub mod device;
pub mod error;

/// Scan for BLE peripherals, toggle their LEDs and count their notifications.
#[derive(Debug, Parser)]
#[command(version, about)]
pub struct Cli {
    /// Path to the config file (defaults to smart-device.json next to the executable, or the
    /// user config directory)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Log debug messages
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<CliCommand>,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Interactive console (default)
    Console,

    /// Scan once and print the peripherals that were found
    Scan {
        /// How long to scan, e.g. "5s" (defaults to the configured scan duration)
        #[arg(long, value_parser = humantime::parse_duration)]
        duration: Option<Duration>,
    },
}

pub fn init_logging(verbose: bool) {
    let level = if verbose { log::LevelFilter::Debug } else { log::LevelFilter::Info };

    let mut dispatch = fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{} {} {}] {}",
                humantime::format_rfc3339(std::time::SystemTime::now()),
                record.level(),
                record.target(),
                message
            ))
        })
        .level(level)
        .chain(std::io::stderr());

    if let Ok(log_file) = env::var("LOG_FILE") {
        dispatch = dispatch.chain(
            fern::log_file(log_file).expect("Failed to open LOG_FILE")
        );
    }

    dispatch.apply().expect("Failed to initialize logger");
}

async fn run_async(cli: Cli) -> Result<(), AppRunError> {
    let config_io = ConfigIO::new_sync(cli.config)?;
    // held until exit so that a second instance does not drive the same adapter
    let mut locker = config_io.locker()?;
    let _guard = locker.lock()?;

    let config = config_io.read().await?;
    info!("Loaded config {:?}", config);

    match cli.command.unwrap_or(CliCommand::Console) {
        CliCommand::Console => run_console(config).await,
        CliCommand::Scan { duration } => run_scan(duration.unwrap_or(config.scan_duration())).await,
    }
}

pub fn run(cli: Cli) -> Result<(), AppRunError> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(run_async(cli))
}
