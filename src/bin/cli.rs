//! pinbackup CLI
//!
//! One binary for every process of the backup pipeline.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use pinbackup::{
    broker::RedisBroker,
    config,
    error::Result,
    pipeline,
};
use tokio_util::sync::CancellationToken;

/// pinbackup - Image Board Backup
#[derive(Parser, Debug)]
#[command(
    name = "pinbackup",
    version,
    about = "Backs up image boards through a scrape/download pipeline"
)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, env = "PINBACKUP_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Accept board URLs over HTTP and queue them for scraping
    #[command(alias = "intake-server")]
    Server {
        /// Port to listen on (overrides server.port)
        #[arg(long)]
        port: Option<u16>,
    },

    /// Pull boards from the queue and publish their pictures
    #[command(alias = "scrape-worker")]
    Scraper,

    /// Pull pictures from the queue and store them
    #[command(alias = "download-worker")]
    Downloader,

    /// Import an existing download directory into the index
    Import {
        /// Directory laid out as user/board/file (overrides importer.import_dir)
        #[arg(long)]
        dir: Option<PathBuf>,
    },

    /// Print the version
    Version,
}

/// Initialize logging based on verbosity flag.
fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_secs()
        .init();
}

/// Main entry point for the CLI application.
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Command::Version = cli.command {
        println!("pinbackup v{}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let mut config = config::load_config(cli.config.as_deref())?;
    match &cli.command {
        Command::Server { port: Some(port) } => config.server.port = *port,
        Command::Import { dir: Some(dir) } => {
            config.importer.import_dir = dir.to_string_lossy().into_owned();
        }
        _ => {}
    }

    if let Err(e) = config.validate() {
        log::error!("Config validation failed: {}", e);
        return Err(e);
    }

    let broker = Arc::new(RedisBroker::connect(&config.redis)?);
    if let Err(e) = broker.ping().await {
        log::error!("Redis at {} is unreachable: {}", config.redis.url(), e);
        broker.close();
        return Err(e);
    }
    let cancel = CancellationToken::new();
    pipeline::cancel_on_signal(cancel.clone());

    let result = match cli.command {
        #[cfg(feature = "server")]
        Command::Server { .. } => {
            log::info!("Starting intake server...");
            pipeline::run_server(&config, broker.clone(), broker.clone(), cancel).await
        }

        #[cfg(not(feature = "server"))]
        Command::Server { .. } => Err(pinbackup::error::AppError::config(
            "server requires the `server` feature",
        )),

        Command::Scraper => {
            log::info!("Starting scrape worker...");
            pipeline::run_scraper(&config, broker.clone(), cancel).await
        }

        Command::Downloader => {
            log::info!("Starting download worker...");
            pipeline::run_downloader(&config, broker.clone(), cancel).await
        }

        Command::Import { .. } => {
            log::info!("Importing {}...", config.importer.import_dir);
            pipeline::run_import(&config, broker.clone(), cancel)
                .await
                .map(|summary| {
                    log::info!(
                        "Import complete: {} users, {} boards, {} files",
                        summary.users,
                        summary.boards,
                        summary.files
                    );
                })
        }

        Command::Version => Ok(()),
    };

    broker.close();
    if let Err(e) = &result {
        log::error!("{}", e);
    }
    result
}
