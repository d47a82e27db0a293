//! Scrape worker entry point.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::broker::Broker;
use crate::error::Result;
use crate::models::Config;
use crate::pipeline::worker_pool::{MessageHandler, WorkerPool};
use crate::services::ScrapeEngine;

#[async_trait]
impl MessageHandler for ScrapeEngine {
    async fn process(&self, payload: &[u8]) -> Result<()> {
        self.handle_payload(payload).await.map(|_| ())
    }
}

/// Run the scrape worker against the configured Chrome instance.
#[cfg(feature = "chrome")]
pub async fn run_scraper(
    config: &Config,
    broker: Arc<dyn Broker>,
    cancel: CancellationToken,
) -> Result<()> {
    use crate::services::ChromeLauncher;

    config.validate_scraper()?;
    let launcher = ChromeLauncher::new(&config.scraper)?;
    let engine = ScrapeEngine::new(
        &config.scraper,
        &config.queues.download,
        Arc::new(launcher),
        broker.clone(),
    );
    process_boards(
        engine,
        broker.as_ref(),
        &config.queues.boards,
        config.scraper.workers,
        cancel,
    )
    .await
}

#[cfg(not(feature = "chrome"))]
pub async fn run_scraper(
    _config: &Config,
    _broker: Arc<dyn Broker>,
    _cancel: CancellationToken,
) -> Result<()> {
    Err(crate::error::AppError::config(
        "scraper requires the `chrome` feature",
    ))
}

/// Subscribe to `channel` and scrape every board message with `engine`.
pub async fn process_boards(
    engine: ScrapeEngine,
    broker: &dyn Broker,
    channel: &str,
    workers: usize,
    cancel: CancellationToken,
) -> Result<()> {
    let subscription = broker.subscribe(channel).await?;
    WorkerPool::new(channel, workers)
        .run(subscription, Arc::new(engine), cancel)
        .await
}
