//! In-process broker.
//!
//! Mirrors the Redis semantics closely enough for tests and single-process
//! setups: channels are broadcast (no backlog for late subscribers) and the
//! index is a map of string sets.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream;
use tokio::sync::broadcast;

use crate::broker::{BoardIndex, Broker, Subscription};
use crate::error::{AppError, Result};

/// Messages buffered per subscriber before it starts lagging.
const CHANNEL_CAPACITY: usize = 1024;

/// Broker and index backed by process memory.
#[derive(Debug)]
pub struct MemoryBroker {
    channels: Mutex<HashMap<String, broadcast::Sender<Vec<u8>>>>,
    sets: Mutex<HashMap<String, HashSet<String>>>,
    closed: AtomicBool,
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
            sets: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Close all channels. Open subscriptions end and later calls fail.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        if let Ok(mut channels) = self.channels.lock() {
            channels.clear();
        }
    }

    /// Number of subscribers currently attached to `channel`.
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.channels
            .lock()
            .ok()
            .and_then(|channels| channels.get(channel).map(|tx| tx.receiver_count()))
            .unwrap_or(0)
    }

    /// Members stored under `key`, sorted.
    pub fn members(&self, key: &str) -> Vec<String> {
        let mut members: Vec<String> = self
            .sets
            .lock()
            .ok()
            .and_then(|sets| sets.get(key).map(|s| s.iter().cloned().collect()))
            .unwrap_or_default();
        members.sort();
        members
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(AppError::NotInitialized);
        }
        Ok(())
    }

    fn sender(&self, channel: &str) -> Result<broadcast::Sender<Vec<u8>>> {
        let mut channels = self
            .channels
            .lock()
            .map_err(|_| AppError::BrokerUnavailable("channel registry poisoned".into()))?;
        Ok(channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .clone())
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn publish(&self, channel: &str, payload: &[u8]) -> Result<()> {
        self.ensure_open()?;
        // No receivers is not an error: nobody was listening.
        let _ = self.sender(channel)?.send(payload.to_vec());
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<Subscription> {
        self.ensure_open()?;
        let receiver = self.sender(channel)?.subscribe();
        let channel = channel.to_string();

        let stream = stream::unfold(receiver, move |mut rx| {
            let channel = channel.clone();
            async move {
                loop {
                    match rx.recv().await {
                        Ok(payload) => return Some((payload, rx)),
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            log::warn!("Subscriber on {} dropped {} messages", channel, skipped);
                        }
                        Err(broadcast::error::RecvError::Closed) => return None,
                    }
                }
            }
        });
        Ok(stream.boxed())
    }
}

#[async_trait]
impl BoardIndex for MemoryBroker {
    async fn exists(&self, key: &str) -> Result<bool> {
        self.ensure_open()?;
        let sets = self
            .sets
            .lock()
            .map_err(|_| AppError::StoreUnavailable("index poisoned".into()))?;
        Ok(sets.get(key).is_some_and(|s| !s.is_empty()))
    }

    async fn count(&self, key: &str) -> Result<usize> {
        self.ensure_open()?;
        let sets = self
            .sets
            .lock()
            .map_err(|_| AppError::StoreUnavailable("index poisoned".into()))?;
        Ok(sets.get(key).map_or(0, HashSet::len))
    }

    async fn add_member(&self, key: &str, member: &str) -> Result<()> {
        self.ensure_open()?;
        let mut sets = self
            .sets
            .lock()
            .map_err(|_| AppError::StoreUnavailable("index poisoned".into()))?;
        sets.entry(key.to_string())
            .or_default()
            .insert(member.to_string());
        Ok(())
    }
}
