use std::sync::Arc;

use tracing::error;

use beacon_db::{Database, Mutated};
use beacon_gateway::Emitter;
use beacon_types::models::PreviousStatus;

use crate::error::ApiError;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Database,
    pub jwt_secret: String,
    pub emitter: Emitter,
}

impl AppStateInner {
    pub fn new(db: Database, jwt_secret: String, emitter: Emitter) -> AppState {
        Arc::new(Self {
            db,
            jwt_secret,
            emitter,
        })
    }
}

/// Run a blocking DB call off the async runtime.
pub(crate) async fn db_call<T, F>(state: &AppState, f: F) -> Result<T, ApiError>
where
    F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let state = state.clone();
    tokio::task::spawn_blocking(move || f(&state.db))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            ApiError::Internal(anyhow::anyhow!("blocking task failed"))
        })?
        .map_err(ApiError::from)
}

/// Splits bulk results so each batch event carries one previous status.
pub(crate) fn group_by_previous<R>(rows: Vec<Mutated<R>>) -> Vec<(PreviousStatus, Vec<R>)> {
    let mut active = Vec::new();
    let mut deleted = Vec::new();
    for m in rows {
        match m.previous_status {
            PreviousStatus::Active => active.push(m.row),
            PreviousStatus::Deleted => deleted.push(m.row),
        }
    }
    [(PreviousStatus::Active, active), (PreviousStatus::Deleted, deleted)]
        .into_iter()
        .filter(|(_, rows)| !rows.is_empty())
        .collect()
}
