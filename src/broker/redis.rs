//! Redis-backed broker and index.
//!
//! Commands borrow a connection from a bounded `deadpool-redis` pool; the
//! borrowed object goes back to the pool when it is dropped, on every exit
//! path. Subscriptions use a dedicated pub/sub connection that is closed when
//! the returned stream is dropped.

use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::redis::{self, AsyncCommands};
use deadpool_redis::{Connection, Pool, PoolConfig, PoolError, Runtime};
use futures::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::broker::{BoardIndex, Broker, Subscription};
use crate::error::{AppError, Result};
use crate::models::RedisConfig;

/// Broker and index on a shared Redis server.
pub struct RedisBroker {
    pool: Pool,
    client: redis::Client,
    reaper: CancellationToken,
}

impl RedisBroker {
    /// Build the connection pool and start the idle reaper.
    ///
    /// No connection is opened until the first command.
    pub fn connect(config: &RedisConfig) -> Result<Self> {
        let url = config.url();
        log::debug!("Initializing Redis pool for {}", url);

        let mut pool_config = PoolConfig::new(config.max_active);
        pool_config.timeouts.wait = Some(Duration::from_secs(config.wait_timeout_secs));
        pool_config.timeouts.create = Some(Duration::from_secs(config.wait_timeout_secs));

        let mut settings = deadpool_redis::Config::from_url(url.clone());
        settings.pool = Some(pool_config);
        let pool = settings
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| AppError::config(format!("Redis pool: {e}")))?;

        let client = redis::Client::open(url)?;
        let reaper = CancellationToken::new();
        spawn_idle_reaper(
            pool.clone(),
            config.max_idle,
            Duration::from_secs(config.idle_timeout_secs),
            reaper.clone(),
        );

        Ok(Self {
            pool,
            client,
            reaper,
        })
    }

    /// Check connectivity with `PING`.
    pub async fn ping(&self) -> Result<()> {
        let mut conn = self.connection().await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }

    /// Close the pool. Every later operation fails with `NotInitialized`.
    pub fn close(&self) {
        log::debug!("Closing Redis pool");
        self.reaper.cancel();
        self.pool.close();
    }

    async fn connection(&self) -> Result<Connection> {
        log::trace!("Borrow Redis connection from pool");
        self.pool.get().await.map_err(pool_error)
    }
}

impl Drop for RedisBroker {
    fn drop(&mut self) {
        self.reaper.cancel();
    }
}

fn pool_error(e: PoolError) -> AppError {
    match e {
        PoolError::Closed => AppError::NotInitialized,
        other => AppError::BrokerUnavailable(other.to_string()),
    }
}

/// Trim idle connections: at most `max_idle` are kept, none older than
/// `idle_timeout`.
fn spawn_idle_reaper(
    pool: Pool,
    max_idle: usize,
    idle_timeout: Duration,
    cancel: CancellationToken,
) {
    let period = (idle_timeout / 4).max(Duration::from_secs(1));
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    let mut kept = 0usize;
                    let _ = pool.retain(|_, metrics| {
                        let keep = metrics.last_used() < idle_timeout && kept < max_idle;
                        if keep {
                            kept += 1;
                        }
                        keep
                    });
                }
            }
        }
        log::trace!("Redis idle reaper stopped");
    });
}

#[async_trait]
impl Broker for RedisBroker {
    async fn publish(&self, channel: &str, payload: &[u8]) -> Result<()> {
        let mut conn = self.connection().await?;
        let _: i64 = conn
            .publish(channel, payload)
            .await
            .map_err(|e| AppError::publish(channel, payload, e))?;
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<Subscription> {
        if self.pool.is_closed() {
            return Err(AppError::NotInitialized);
        }
        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await
            .map_err(|e| AppError::BrokerUnavailable(e.to_string()))?;
        pubsub.subscribe(channel).await?;
        log::debug!("Subscribed to channel {}", channel);

        let stream = pubsub
            .into_on_message()
            .map(|msg| msg.get_payload_bytes().to_vec());
        Ok(stream.boxed())
    }
}

#[async_trait]
impl BoardIndex for RedisBroker {
    async fn exists(&self, key: &str) -> Result<bool> {
        let mut conn = self.connection().await?;
        conn.exists(key)
            .await
            .map_err(|e| AppError::StoreUnavailable(e.to_string()))
    }

    async fn count(&self, key: &str) -> Result<usize> {
        let mut conn = self.connection().await?;
        conn.scard(key)
            .await
            .map_err(|e| AppError::StoreUnavailable(e.to_string()))
    }

    async fn add_member(&self, key: &str, member: &str) -> Result<()> {
        let mut conn = self.connection().await?;
        let _: i64 = conn
            .sadd(key, member)
            .await
            .map_err(|e| AppError::StoreUnavailable(e.to_string()))?;
        Ok(())
    }
}
