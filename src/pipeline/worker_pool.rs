//! Bounded worker pool fed by a broker subscription.
//!
//! A fixed number of long-lived workers pull payloads from an internal queue
//! whose capacity equals the number of workers. When every worker is busy
//! and the queue is full, the receive loop blocks, so backpressure reaches
//! the subscription itself.
//!
//! A fatal handler error (see `AppError::is_fatal`) stops every worker and
//! the receive loop; `run` returns that error.

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::broker::Subscription;
use crate::error::{AppError, Result};

/// Processes one payload received from the broker.
///
/// Errors are logged by the pool; only fatal ones stop it.
#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    async fn process(&self, payload: &[u8]) -> Result<()>;
}

/// First fatal error raised by a worker.
struct Failure {
    error: std::sync::Mutex<Option<AppError>>,
    raised: CancellationToken,
}

impl Failure {
    fn new() -> Self {
        Self {
            error: std::sync::Mutex::new(None),
            raised: CancellationToken::new(),
        }
    }

    fn raise(&self, error: AppError) {
        if let Ok(mut slot) = self.error.lock() {
            if slot.is_none() {
                *slot = Some(error);
            }
        }
        self.raised.cancel();
    }

    fn take(&self) -> Option<AppError> {
        self.error.lock().ok().and_then(|mut slot| slot.take())
    }
}

/// Long-lived workers consuming one channel.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    channel: String,
    workers: usize,
}

impl WorkerPool {
    /// `workers` is clamped to at least one.
    pub fn new(channel: impl Into<String>, workers: usize) -> Self {
        Self {
            channel: channel.into(),
            workers: workers.max(1),
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Feed `subscription` into the workers until it ends or `cancel` fires.
    ///
    /// On cancellation the subscription is dropped, queued payloads are
    /// finished and `Ok(())` is returned. If the subscription ends on its own
    /// the result is `SubscriptionClosed`. A fatal handler error stops the
    /// pool and is returned as is.
    pub async fn run(
        &self,
        mut subscription: Subscription,
        handler: Arc<dyn MessageHandler>,
        cancel: CancellationToken,
    ) -> Result<()> {
        log::info!(
            "Processing channel {} with {} workers",
            self.channel,
            self.workers
        );

        let (tx, rx) = mpsc::channel::<Vec<u8>>(self.workers);
        let rx = Arc::new(Mutex::new(rx));
        let failure = Arc::new(Failure::new());
        let mut workers = JoinSet::new();
        for id in 0..self.workers {
            workers.spawn(work(
                id,
                self.channel.clone(),
                rx.clone(),
                handler.clone(),
                failure.clone(),
            ));
        }
        drop(rx);

        let outcome = loop {
            let payload = tokio::select! {
                biased;
                _ = cancel.cancelled() => break Ok(()),
                _ = failure.raised.cancelled() => break Ok(()),
                next = subscription.next() => match next {
                    Some(payload) => payload,
                    None => break Err(AppError::SubscriptionClosed(self.channel.clone())),
                },
            };

            // Blocks while all workers are busy and the queue is full.
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break Ok(()),
                _ = failure.raised.cancelled() => break Ok(()),
                sent = tx.send(payload) => {
                    if sent.is_err() {
                        break Err(AppError::WorkersStopped(self.channel.clone()));
                    }
                }
            }
        };

        drop(subscription);
        drop(tx);
        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                log::error!("Worker on {} failed: {}", self.channel, e);
            }
        }

        let outcome = match failure.take() {
            Some(e) => Err(e),
            None => outcome,
        };

        match &outcome {
            Ok(()) => log::info!("Stopped processing channel {}", self.channel),
            Err(e) => log::error!("Processing channel {} ended: {}", self.channel, e),
        }
        outcome
    }
}

async fn work(
    id: usize,
    channel: String,
    queue: Arc<Mutex<mpsc::Receiver<Vec<u8>>>>,
    handler: Arc<dyn MessageHandler>,
    failure: Arc<Failure>,
) {
    loop {
        let next = tokio::select! {
            biased;
            _ = failure.raised.cancelled() => None,
            next = async { queue.lock().await.recv().await } => next,
        };
        let Some(payload) = next else {
            break;
        };
        match handler.process(&payload).await {
            Ok(()) => {}
            Err(e) if e.is_fatal() => {
                log::error!("[{} #{}] {}. Stopping workers", channel, id, e);
                failure.raise(e);
                break;
            }
            Err(e) => log::warn!("[{} #{}] {}", channel, id, e),
        }
    }
    log::trace!("Worker {} on {} stopped", id, channel);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use futures::stream;

    use crate::broker::{Broker, MemoryBroker};

    /// Records payloads and the peak number of concurrent calls.
    #[derive(Default)]
    struct Recorder {
        seen: std::sync::Mutex<Vec<Vec<u8>>>,
        active: AtomicUsize,
        peak: AtomicUsize,
        delay: Duration,
    }

    #[async_trait]
    impl MessageHandler for Recorder {
        async fn process(&self, payload: &[u8]) -> Result<()> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.active.fetch_sub(1, Ordering::SeqCst);

            self.seen.lock().unwrap().push(payload.to_vec());
            if payload == b"bad" {
                return Err(AppError::validation("bad payload"));
            }
            Ok(())
        }
    }

    fn payloads(items: &[&'static [u8]]) -> Subscription {
        let items: Vec<Vec<u8>> = items.iter().map(|p| p.to_vec()).collect();
        stream::iter(items).boxed()
    }

    #[tokio::test]
    async fn processes_all_then_reports_closed_subscription() {
        let handler = Arc::new(Recorder::default());
        let pool = WorkerPool::new("download", 3);

        let result = pool
            .run(
                payloads(&[b"a", b"bad", b"c"]),
                handler.clone(),
                CancellationToken::new(),
            )
            .await;

        assert!(matches!(result, Err(AppError::SubscriptionClosed(c)) if c == "download"));
        let mut seen = handler.seen.lock().unwrap().clone();
        seen.sort();
        assert_eq!(seen, vec![b"a".to_vec(), b"bad".to_vec(), b"c".to_vec()]);
    }

    /// Fails every payload as if the broker pool had been closed.
    #[derive(Default)]
    struct ClosedBroker {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl MessageHandler for ClosedBroker {
        async fn process(&self, _payload: &[u8]) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(AppError::NotInitialized)
        }
    }

    #[tokio::test]
    async fn fatal_handler_error_stops_the_pool() {
        let handler = Arc::new(ClosedBroker::default());
        let pool = WorkerPool::new("download", 1);

        let result = pool
            .run(
                payloads(&[b"1", b"2", b"3", b"4", b"5"]),
                handler.clone(),
                CancellationToken::new(),
            )
            .await;

        assert!(matches!(result, Err(AppError::NotInitialized)));
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn fatal_error_ends_a_live_subscription() {
        let broker = Arc::new(MemoryBroker::new());
        let subscription = broker.subscribe("boards").await.unwrap();
        let handler = Arc::new(ClosedBroker::default());

        let pool = WorkerPool::new("boards", 2);
        let run = tokio::spawn({
            let handler = handler.clone();
            async move { pool.run(subscription, handler, CancellationToken::new()).await }
        });

        broker.publish("boards", b"one").await.unwrap();
        let result = tokio::time::timeout(Duration::from_secs(5), run)
            .await
            .unwrap()
            .unwrap();

        assert!(matches!(result, Err(AppError::NotInitialized)));
        assert_eq!(broker.subscriber_count("boards"), 0);
    }

    #[tokio::test]
    async fn concurrency_is_bounded_by_pool_size() {
        let handler = Arc::new(Recorder {
            delay: Duration::from_millis(20),
            ..Default::default()
        });
        let items: Vec<&'static [u8]> = vec![&b"x"[..]; 10];
        let pool = WorkerPool::new("download", 2);

        let _ = pool
            .run(payloads(&items), handler.clone(), CancellationToken::new())
            .await;

        assert_eq!(handler.seen.lock().unwrap().len(), 10);
        assert!(handler.peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn cancellation_stops_receiving_and_unsubscribes() {
        let broker = Arc::new(MemoryBroker::new());
        let subscription = broker.subscribe("boards").await.unwrap();
        let handler = Arc::new(Recorder::default());
        let cancel = CancellationToken::new();

        let pool = WorkerPool::new("boards", 1);
        let run = tokio::spawn({
            let handler = handler.clone();
            let cancel = cancel.clone();
            async move { pool.run(subscription, handler, cancel).await }
        });

        broker.publish("boards", b"one").await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();

        assert!(run.await.unwrap().is_ok());
        assert_eq!(handler.seen.lock().unwrap().len(), 1);
        assert_eq!(broker.subscriber_count("boards"), 0);
    }

    #[test]
    fn pool_size_is_at_least_one() {
        assert_eq!(WorkerPool::new("boards", 0).workers(), 1);
    }
}
