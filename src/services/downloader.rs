//! Picture download service.
//!
//! Turns `Picture` messages into files below the storage root. A picture is
//! fetched at most once: nothing is requested when the file is already stored
//! or another task currently holds its reservation.

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;

use crate::error::{AppError, Result};
use crate::models::{DownloaderConfig, Picture};
use crate::storage::{ByteStream, LocalPictureStore, PictureKey};
use crate::utils::http::create_async_client;

/// Where picture bytes come from.
#[async_trait]
pub trait PictureSource: Send + Sync {
    /// Start fetching `url` and return its body.
    async fn fetch(&self, url: &str) -> Result<ByteStream>;
}

/// Fetches pictures over HTTP(S).
#[derive(Debug, Clone)]
pub struct HttpPictureSource {
    client: Client,
}

impl HttpPictureSource {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Build a source with the configured timeout and user agent.
    pub fn from_config(config: &DownloaderConfig) -> Result<Self> {
        Ok(Self::new(create_async_client(config)?))
    }
}

#[async_trait]
impl PictureSource for HttpPictureSource {
    async fn fetch(&self, url: &str) -> Result<ByteStream> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| AppError::fetch(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::fetch(url, format!("HTTP {status}")));
        }

        let owned_url = url.to_string();
        let body = response
            .bytes_stream()
            .map(move |chunk| chunk.map_err(|e| AppError::fetch(owned_url.clone(), e)));
        Ok(body.boxed())
    }
}

/// Result of handling one picture message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadOutcome {
    /// Picture was fetched and written
    Downloaded { bytes: u64 },
    /// File already present; nothing fetched
    AlreadyStored,
    /// Another task is writing the same file
    InFlight,
}

/// Download worker logic for a single message.
#[derive(Clone)]
pub struct Downloader {
    store: LocalPictureStore,
    source: Arc<dyn PictureSource>,
}

impl Downloader {
    pub fn new(store: LocalPictureStore, source: Arc<dyn PictureSource>) -> Self {
        Self { store, source }
    }

    pub fn store(&self) -> &LocalPictureStore {
        &self.store
    }

    /// Store `picture` at `{root}/{user}/{path}/{filename}`.
    pub async fn handle(&self, picture: &Picture) -> Result<DownloadOutcome> {
        let key = PictureKey::from_picture(picture)?;

        if self.store.exists(&key).await? {
            log::debug!(
                "{} already exists. Skipping...",
                self.store.destination_file(&key).display()
            );
            return Ok(DownloadOutcome::AlreadyStored);
        }

        let Some(pending) = self.store.reserve(&key, &picture.url).await? else {
            return Ok(if self.store.exists(&key).await? {
                DownloadOutcome::AlreadyStored
            } else {
                DownloadOutcome::InFlight
            });
        };

        log::debug!("Downloading {}", picture.url);
        let body = match self.source.fetch(&picture.url).await {
            Ok(body) => body,
            Err(e) => {
                pending.discard().await;
                return Err(e);
            }
        };

        let destination = pending.final_path().clone();
        let bytes = pending.write_stream(body).await?;
        log::info!("Saved {} ({} bytes)", destination.display(), bytes);

        Ok(DownloadOutcome::Downloaded { bytes })
    }

    /// Decode a raw broker payload and handle it.
    pub async fn handle_payload(&self, payload: &[u8]) -> Result<DownloadOutcome> {
        let picture: Picture = serde_json::from_slice(payload)?;
        self.handle(&picture).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use bytes::Bytes;
    use futures::stream;
    use tempfile::TempDir;

    /// Serves a fixed body and counts requests.
    struct FakeSource {
        body: &'static [u8],
        fetches: AtomicUsize,
        delay: Duration,
        fail: bool,
    }

    impl FakeSource {
        fn new(body: &'static [u8]) -> Self {
            Self {
                body,
                fetches: AtomicUsize::new(0),
                delay: Duration::ZERO,
                fail: false,
            }
        }

        fn fetches(&self) -> usize {
            self.fetches.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl PictureSource for FakeSource {
        async fn fetch(&self, url: &str) -> Result<ByteStream> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            if self.fail {
                return Err(AppError::fetch(url, "HTTP 404 Not Found"));
            }
            let chunk: Result<Bytes> = Ok(Bytes::from_static(self.body));
            Ok(stream::iter(vec![chunk]).boxed())
        }
    }

    const MESSAGE: &str = r#"{"url":"https://img.example.com/originals/ab/cd/ab12.jpg","user":"alice","path":"travel"}"#;

    #[tokio::test]
    async fn test_download_writes_expected_path() {
        let tmp = TempDir::new().unwrap();
        let source = Arc::new(FakeSource::new(b"jpeg"));
        let downloader = Downloader::new(LocalPictureStore::new(tmp.path()), source.clone());

        let outcome = downloader.handle_payload(MESSAGE.as_bytes()).await.unwrap();

        assert_eq!(outcome, DownloadOutcome::Downloaded { bytes: 4 });
        let file = tmp.path().join("alice/travel/ab12.jpg");
        assert_eq!(std::fs::read(file).unwrap(), b"jpeg");
    }

    #[tokio::test]
    async fn test_second_message_does_not_fetch() {
        let tmp = TempDir::new().unwrap();
        let source = Arc::new(FakeSource::new(b"jpeg"));
        let downloader = Downloader::new(LocalPictureStore::new(tmp.path()), source.clone());

        downloader.handle_payload(MESSAGE.as_bytes()).await.unwrap();
        let second = downloader.handle_payload(MESSAGE.as_bytes()).await.unwrap();

        assert_eq!(second, DownloadOutcome::AlreadyStored);
        assert_eq!(source.fetches(), 1);
        let entries = std::fs::read_dir(tmp.path().join("alice/travel")).unwrap().count();
        assert_eq!(entries, 1);
    }

    #[tokio::test]
    async fn test_concurrent_same_picture_fetches_once() {
        let tmp = TempDir::new().unwrap();
        let mut source = FakeSource::new(b"jpeg");
        source.delay = Duration::from_millis(50);
        let source = Arc::new(source);
        let downloader = Downloader::new(LocalPictureStore::new(tmp.path()), source.clone());

        let picture: Picture = serde_json::from_str(MESSAGE).unwrap();
        let (a, b) = tokio::join!(downloader.handle(&picture), downloader.handle(&picture));

        let mut outcomes = vec![a.unwrap(), b.unwrap()];
        outcomes.sort_by_key(|o| matches!(o, DownloadOutcome::Downloaded { .. }));
        assert_ne!(outcomes[0], DownloadOutcome::Downloaded { bytes: 4 });
        assert_eq!(outcomes[1], DownloadOutcome::Downloaded { bytes: 4 });
        assert_eq!(source.fetches(), 1);
    }

    #[tokio::test]
    async fn test_abandoned_part_file_does_not_block_download() {
        let tmp = TempDir::new().unwrap();
        let part = tmp.path().join("alice/travel/ab12.jpg.part");
        std::fs::create_dir_all(part.parent().unwrap()).unwrap();
        std::fs::write(&part, b"jp").unwrap();
        let file = std::fs::File::options().write(true).open(&part).unwrap();
        file.set_modified(std::time::SystemTime::now() - Duration::from_secs(3600))
            .unwrap();
        drop(file);

        let source = Arc::new(FakeSource::new(b"jpeg"));
        let store = LocalPictureStore::new(tmp.path()).with_stale_after(Duration::from_secs(120));
        let downloader = Downloader::new(store, source.clone());

        let first = downloader.handle_payload(MESSAGE.as_bytes()).await.unwrap();
        let second = downloader.handle_payload(MESSAGE.as_bytes()).await.unwrap();

        assert_eq!(first, DownloadOutcome::Downloaded { bytes: 4 });
        assert_eq!(second, DownloadOutcome::AlreadyStored);
        assert_eq!(source.fetches(), 1);
        assert_eq!(std::fs::read(tmp.path().join("alice/travel/ab12.jpg")).unwrap(), b"jpeg");
        assert!(!part.exists());
    }

    #[tokio::test]
    async fn test_fetch_failure_releases_reservation() {
        let tmp = TempDir::new().unwrap();
        let mut source = FakeSource::new(b"");
        source.fail = true;
        let downloader = Downloader::new(LocalPictureStore::new(tmp.path()), Arc::new(source));

        let err = downloader.handle_payload(MESSAGE.as_bytes()).await.unwrap_err();

        assert!(matches!(err, AppError::FetchFailed { .. }));
        assert!(!tmp.path().join("alice/travel/ab12.jpg.part").exists());
        assert!(!tmp.path().join("alice/travel/ab12.jpg").exists());
    }

    #[tokio::test]
    async fn test_url_without_filename_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let source = Arc::new(FakeSource::new(b"jpeg"));
        let downloader = Downloader::new(LocalPictureStore::new(tmp.path()), source.clone());

        let payload = br#"{"url":"https://img.example.com/","user":"alice","path":"travel"}"#;
        let err = downloader.handle_payload(payload).await.unwrap_err();

        assert!(matches!(err, AppError::InvalidUrl { .. }));
        assert_eq!(source.fetches(), 0);
    }

    #[tokio::test]
    async fn test_malformed_payload() {
        let tmp = TempDir::new().unwrap();
        let downloader = Downloader::new(
            LocalPictureStore::new(tmp.path()),
            Arc::new(FakeSource::new(b"")),
        );
        assert!(matches!(
            downloader.handle_payload(b"not json").await,
            Err(AppError::Json(_))
        ));
    }
}
