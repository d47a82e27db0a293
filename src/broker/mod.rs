//! Broker and index abstractions.
//!
//! All cross-component traffic goes through one shared service offering:
//! - Pub/sub channels for work messages (`Broker`)
//! - Set-backed membership records keyed `user:board` (`BoardIndex`)
//!
//! Delivery is at-most-once: a subscriber only sees messages published while
//! it is connected, and a new subscription starts without backlog.

pub mod memory;
pub mod redis;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::Serialize;

use crate::error::Result;

pub use self::memory::MemoryBroker;
pub use self::redis::RedisBroker;

/// Inbound payloads of one channel subscription.
///
/// The stream ends when the underlying connection is lost or closed.
pub type Subscription = BoxStream<'static, Vec<u8>>;

/// Publish/subscribe side of the broker.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Deliver `payload` to every current subscriber of `channel`.
    async fn publish(&self, channel: &str, payload: &[u8]) -> Result<()>;

    /// Start receiving messages published to `channel` from now on.
    async fn subscribe(&self, channel: &str) -> Result<Subscription>;
}

/// Durable set index of pictures per board.
#[async_trait]
pub trait BoardIndex: Send + Sync {
    /// Whether any member is recorded under `key`.
    async fn exists(&self, key: &str) -> Result<bool>;

    /// Number of distinct members under `key`.
    async fn count(&self, key: &str) -> Result<usize>;

    /// Add `member` to the set under `key`. Re-adding is a no-op.
    async fn add_member(&self, key: &str, member: &str) -> Result<()>;
}

/// Serialize `value` as JSON and publish it.
pub async fn publish_json<T>(broker: &dyn Broker, channel: &str, value: &T) -> Result<()>
where
    T: Serialize + ?Sized + Sync,
{
    let payload = serde_json::to_vec(value)?;
    log::debug!(
        "Publish to channel {}: {}",
        channel,
        String::from_utf8_lossy(&payload)
    );
    broker.publish(channel, &payload).await
}
