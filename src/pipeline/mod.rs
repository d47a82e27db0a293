//! Pipeline entry points for the backup processes.
//!
//! - `run_server`: Accept board URLs and publish them (feature `server`)
//! - `run_scraper`: Turn board messages into picture messages
//! - `run_downloader`: Store pictures from picture messages
//! - `run_import`: Backfill the index from an existing archive

pub mod download;
pub mod import;
pub mod scrape;
#[cfg(feature = "server")]
pub mod serve;
pub mod shutdown;
pub mod worker_pool;

pub use download::{process_downloads, run_downloader};
pub use import::run_import;
pub use scrape::{process_boards, run_scraper};
#[cfg(feature = "server")]
pub use serve::run_server;
pub use shutdown::cancel_on_signal;
pub use worker_pool::{MessageHandler, WorkerPool};
