//! Intake server entry point.

use std::future::IntoFuture;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::broker::{BoardIndex, Broker};
use crate::error::Result;
use crate::models::Config;
use crate::server;
use crate::services::IntakeService;

/// Serve the intake API until `cancel` fires.
///
/// In-flight requests get `server.shutdown_grace_secs` to finish.
pub async fn run_server(
    config: &Config,
    broker: Arc<dyn Broker>,
    index: Arc<dyn BoardIndex>,
    cancel: CancellationToken,
) -> Result<()> {
    let intake = IntakeService::new(broker, index, &config.queues.boards)
        .with_namespace(&config.redis.namespace);
    let app = server::router(intake);

    let addr = format!("{}:{}", config.server.bind, config.server.port);
    let listener = TcpListener::bind(&addr).await?;
    log::info!("Intake API listening on {}", listener.local_addr()?);

    let grace = Duration::from_secs(config.server.shutdown_grace_secs);
    let shutdown = cancel.clone();
    let serve = axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .into_future();

    tokio::pin!(serve);
    tokio::select! {
        result = &mut serve => result?,
        _ = async {
            cancel.cancelled().await;
            tokio::time::sleep(grace).await;
        } => {
            log::warn!("Shutdown grace period of {:?} elapsed", grace);
        }
    }

    log::info!("Intake API stopped");
    Ok(())
}
