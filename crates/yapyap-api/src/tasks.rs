use std::future::Future;
use std::sync::Arc;

use anyhow::anyhow;
use tracing::{error, warn};

use yapyap_db::Database;

use crate::error::ApiError;

/// Run a closure against the database on the blocking pool.
pub async fn blocking<F, T>(db: &Arc<Database>, f: F) -> Result<T, ApiError>
where
    F: FnOnce(&Database) -> Result<T, ApiError> + Send + 'static,
    T: Send + 'static,
{
    let db = db.clone();
    tokio::task::spawn_blocking(move || f(&db))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            ApiError::Server(anyhow!("blocking task failed: {}", e))
        })?
}

/// Fire-and-forget side effect. Failure is logged and never reaches the
/// request that triggered it.
pub fn spawn_best_effort<F>(what: &'static str, fut: F)
where
    F: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    tokio::spawn(async move {
        if let Err(e) = fut.await {
            warn!("{} failed: {:#}", what, e);
        }
    });
}
