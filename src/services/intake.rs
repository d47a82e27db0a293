// src/services/intake.rs

//! Board intake.
//!
//! Validates board URLs, publishes accepted boards to the scrape queue and
//! answers index queries for the intake API.

use std::sync::Arc;

use crate::broker::{BoardIndex, Broker, publish_json};
use crate::error::Result;
use crate::models::Board;
use crate::utils::{index_key, namespaced};

/// Entry point for every scrape request.
#[derive(Clone)]
pub struct IntakeService {
    broker: Arc<dyn Broker>,
    index: Arc<dyn BoardIndex>,
    boards_queue: String,
    namespace: String,
}

impl IntakeService {
    pub fn new(
        broker: Arc<dyn Broker>,
        index: Arc<dyn BoardIndex>,
        boards_queue: impl Into<String>,
    ) -> Self {
        Self {
            broker,
            index,
            boards_queue: boards_queue.into(),
            namespace: String::new(),
        }
    }

    /// Prefix index lookups with `namespace`.
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Parse `raw_url` into a board and publish it for scraping.
    ///
    /// Invalid URLs are rejected before anything is published.
    pub async fn enqueue(&self, raw_url: &str) -> Result<Board> {
        log::info!("Incoming board request: {}", raw_url);
        let board = Board::from_raw_url(raw_url)?;

        publish_json(self.broker.as_ref(), &self.boards_queue, &board).await?;
        log::debug!("Enqueued board {} ({}/{})", board.id, board.user, board.path);

        Ok(board)
    }

    /// Whether pictures of the board at `path` (`/user/board/`) are indexed.
    pub async fn exists(&self, path: &str) -> Result<bool> {
        let key = namespaced(&self.namespace, index_key(path)?);
        self.index.exists(&key).await
    }

    /// Number of indexed pictures of the board at `path`.
    pub async fn count(&self, path: &str) -> Result<usize> {
        let key = namespaced(&self.namespace, index_key(path)?);
        self.index.count(&key).await
    }
}
