//! Board intake through scraping to stored pictures, over the in-memory broker.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{StreamExt, stream};
use pinbackup::broker::MemoryBroker;
use pinbackup::error::Result;
use pinbackup::models::ScraperConfig;
use pinbackup::pipeline::{process_boards, process_downloads};
use pinbackup::services::{
    BrowserDriver, BrowserLauncher, Cookie, Downloader, IntakeService, PictureSource,
    ScrapeEngine,
};
use pinbackup::storage::{ByteStream, LocalPictureStore};
use serde_json::{Value, json};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

/// Serves the same scroll batches to every session.
struct ScriptedBrowser {
    batches: Vec<Value>,
}

struct ScriptedSession {
    batches: VecDeque<Value>,
}

#[async_trait]
impl BrowserLauncher for ScriptedBrowser {
    async fn launch(&self) -> Result<Box<dyn BrowserDriver>> {
        Ok(Box::new(ScriptedSession {
            batches: self.batches.clone().into(),
        }))
    }
}

#[async_trait]
impl BrowserDriver for ScriptedSession {
    async fn navigate(&mut self, _url: &str) -> Result<()> {
        Ok(())
    }

    async fn wait_visible(&mut self, _selector: &str) -> Result<()> {
        Ok(())
    }

    async fn send_keys(&mut self, _selector: &str, _text: &str) -> Result<()> {
        Ok(())
    }

    async fn click(&mut self, _selector: &str) -> Result<()> {
        Ok(())
    }

    async fn evaluate(&mut self, _script: &str) -> Result<Value> {
        Ok(self.batches.pop_front().unwrap_or_else(|| json!([])))
    }

    async fn text(&mut self, _selector: &str) -> Result<String> {
        Ok(String::new())
    }

    async fn get_cookies(&mut self) -> Result<Vec<Cookie>> {
        Ok(vec![Cookie {
            name: "_auth".into(),
            value: "token".into(),
        }])
    }

    async fn sleep(&mut self, _duration: Duration) -> Result<()> {
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Answers every URL with its own text and remembers what was requested.
#[derive(Default)]
struct EchoSource {
    requested: Mutex<Vec<String>>,
}

#[async_trait]
impl PictureSource for EchoSource {
    async fn fetch(&self, url: &str) -> Result<ByteStream> {
        self.requested.lock().unwrap().push(url.to_string());
        let chunk: Result<Bytes> = Ok(Bytes::from(url.to_string()));
        Ok(stream::iter(vec![chunk]).boxed())
    }
}

fn srcset(id: &str) -> String {
    format!("https://i.example.com/236x/{id}.jpg 1x, https://i.example.com/originals/ab/cd/{id}.jpg 4x")
}

async fn wait_for(what: &str, mut done: impl FnMut() -> bool) {
    for _ in 0..200 {
        if done() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("timed out waiting for {what}");
}

fn stored(root: &Path) -> Vec<String> {
    let dir = root.join("alice/travel");
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .map(|e| e.file_name().to_string_lossy().into_owned())
                .filter(|name| !name.ends_with(".part"))
                .collect()
        })
        .unwrap_or_default();
    names.sort();
    names
}

#[tokio::test]
async fn board_url_ends_up_as_files() {
    let tmp = TempDir::new().unwrap();
    let broker = Arc::new(MemoryBroker::new());
    let cancel = CancellationToken::new();

    let config = ScraperConfig {
        selector_preview_pins: "div.pin img".into(),
        ..Default::default()
    };
    let browser = ScriptedBrowser {
        batches: vec![
            json!([srcset("ab12"), srcset("cd34")]),
            json!([srcset("ab12"), srcset("cd34"), srcset("ef56")]),
            json!([srcset("ab12"), srcset("cd34"), srcset("ef56")]),
        ],
    };
    let engine = ScrapeEngine::new(&config, "download", Arc::new(browser), broker.clone());

    let source = Arc::new(EchoSource::default());
    let downloader = Downloader::new(LocalPictureStore::new(tmp.path()), source.clone());

    let scraper = tokio::spawn({
        let broker = broker.clone();
        let cancel = cancel.clone();
        async move { process_boards(engine, broker.as_ref(), "boards", 1, cancel).await }
    });
    let download = tokio::spawn({
        let broker = broker.clone();
        let cancel = cancel.clone();
        async move { process_downloads(downloader, broker.as_ref(), "download", 2, cancel).await }
    });

    wait_for("subscriptions", || {
        broker.subscriber_count("boards") == 1 && broker.subscriber_count("download") == 1
    })
    .await;

    let intake = IntakeService::new(broker.clone(), broker.clone(), "boards");
    let board = intake.enqueue("https://example.com/alice/travel/").await.unwrap();
    assert_eq!(board.user, "alice");
    assert_eq!(board.path, "travel");

    wait_for("stored pictures", || stored(tmp.path()).len() == 3).await;
    assert_eq!(stored(tmp.path()), vec!["ab12.jpg", "cd34.jpg", "ef56.jpg"]);
    assert_eq!(
        std::fs::read_to_string(tmp.path().join("alice/travel/ab12.jpg")).unwrap(),
        "https://i.example.com/originals/ab/cd/ab12.jpg"
    );

    // The same board again: every picture is already stored.
    intake.enqueue("https://example.com/alice/travel/").await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(source.requested.lock().unwrap().len(), 3);

    cancel.cancel();
    assert!(scraper.await.unwrap().is_ok());
    assert!(download.await.unwrap().is_ok());
    assert_eq!(broker.subscriber_count("boards"), 0);
}
