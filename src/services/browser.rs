//! Browser automation seam used by the scrape engine.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;

/// A cookie of the current browser session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cookie {
    pub name: String,
    pub value: String,
}

/// One remote browser session.
///
/// Every method may fail with `AppError::Driver`; the scrape engine treats
/// such failures as fatal for the current board only.
#[async_trait]
pub trait BrowserDriver: Send {
    /// Load `url` in the session's page.
    async fn navigate(&mut self, url: &str) -> Result<()>;

    /// Wait until an element matching `selector` is visible.
    async fn wait_visible(&mut self, selector: &str) -> Result<()>;

    /// Type `text` into the element matching `selector`.
    async fn send_keys(&mut self, selector: &str, text: &str) -> Result<()>;

    /// Click the element matching `selector`.
    async fn click(&mut self, selector: &str) -> Result<()>;

    /// Run `script` in the page and return its JSON result.
    async fn evaluate(&mut self, script: &str) -> Result<Value>;

    /// Text content of the first element matching `selector`.
    async fn text(&mut self, selector: &str) -> Result<String>;

    async fn get_cookies(&mut self) -> Result<Vec<Cookie>>;

    /// Pause the session, e.g. to let lazy content settle.
    async fn sleep(&mut self, duration: Duration) -> Result<()> {
        tokio::time::sleep(duration).await;
        Ok(())
    }

    /// Tear the session down.
    async fn close(&mut self) -> Result<()>;
}

/// Opens a fresh browser session per board.
#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    async fn launch(&self) -> Result<Box<dyn BrowserDriver>>;
}
