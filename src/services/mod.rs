//! Service layer for the backup pipeline.
//!
//! This module contains the business logic for:
//! - Board intake and index queries (`IntakeService`)
//! - Picture downloads (`Downloader`)
//! - Board scraping through a remote browser (`ScrapeEngine`)
//! - Archive import into the index (`Importer`)

pub mod browser;
#[cfg(feature = "chrome")]
pub mod chrome;
pub mod downloader;
pub mod importer;
pub mod intake;
pub mod scraper;
pub mod termination;

pub use browser::{BrowserDriver, BrowserLauncher, Cookie};
#[cfg(feature = "chrome")]
pub use chrome::ChromeLauncher;
pub use downloader::{DownloadOutcome, Downloader, HttpPictureSource, PictureSource};
pub use importer::{ImportSummary, Importer};
pub use intake::IntakeService;
pub use scraper::{ScrapeEngine, ScrapeReport};
pub use termination::{BatchProgress, ConvergencePolicy, PinCountPolicy, TerminationPolicy};
