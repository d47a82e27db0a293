//! Import entry point.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::broker::BoardIndex;
use crate::error::Result;
use crate::models::Config;
use crate::services::{ImportSummary, Importer};

/// Import `importer.import_dir` into `index`.
pub async fn run_import(
    config: &Config,
    index: Arc<dyn BoardIndex>,
    cancel: CancellationToken,
) -> Result<ImportSummary> {
    Importer::new(&config.importer.import_dir, config.importer.workers, index)
        .with_namespace(&config.redis.namespace)
        .run(cancel)
        .await
}
