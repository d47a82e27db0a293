//! Download worker entry point.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::broker::Broker;
use crate::error::Result;
use crate::models::Config;
use crate::pipeline::worker_pool::{MessageHandler, WorkerPool};
use crate::services::{DownloadOutcome, Downloader, HttpPictureSource};
use crate::storage::LocalPictureStore;

#[async_trait]
impl MessageHandler for Downloader {
    async fn process(&self, payload: &[u8]) -> Result<()> {
        match self.handle_payload(payload).await? {
            DownloadOutcome::Downloaded { .. } | DownloadOutcome::AlreadyStored => {}
            DownloadOutcome::InFlight => log::debug!("Picture is already being downloaded"),
        }
        Ok(())
    }
}

/// Run the download worker until cancelled or the subscription fails.
pub async fn run_downloader(
    config: &Config,
    broker: Arc<dyn Broker>,
    cancel: CancellationToken,
) -> Result<()> {
    let source = HttpPictureSource::from_config(&config.downloader)?;
    // A live download writes or finishes within the request timeout.
    let stale_after = Duration::from_secs(config.downloader.timeout_secs.saturating_mul(2));
    let store = LocalPictureStore::new(&config.storage.download_path).with_stale_after(stale_after);
    log::info!("Storing pictures below {}", store.root_dir().display());

    let downloader = Downloader::new(store, Arc::new(source));
    process_downloads(
        downloader,
        broker.as_ref(),
        &config.queues.download,
        config.downloader.workers,
        cancel,
    )
    .await
}

/// Subscribe to `channel` and hand every picture message to `downloader`.
pub async fn process_downloads(
    downloader: Downloader,
    broker: &dyn Broker,
    channel: &str,
    workers: usize,
    cancel: CancellationToken,
) -> Result<()> {
    let subscription = broker.subscribe(channel).await?;
    WorkerPool::new(channel, workers)
        .run(subscription, Arc::new(downloader), cancel)
        .await
}
