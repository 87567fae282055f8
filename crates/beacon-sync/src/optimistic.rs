use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use beacon_types::api::{ActionKind, BulkResponse};

use crate::error::ActionError;
use crate::reconcile::SyncRow;
use crate::resource::{ResourceSync, RowSnapshot};

struct InFlight {
    generation: u64,
    token: CancellationToken,
}

#[derive(Default)]
struct TrackerInner {
    next_generation: AtomicU64,
    rows: Mutex<HashMap<String, InFlight>>,
}

/// Which rows have an action in flight. Starting a new action on a row
/// cancels the one already running there.
#[derive(Clone, Default)]
pub struct ActionTracker {
    inner: Arc<TrackerInner>,
}

impl ActionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin(&self, id: &str) -> ActionGuard {
        self.begin_bulk(&[id.to_string()])
    }

    /// Tracks every id under one token.
    pub fn begin_bulk(&self, ids: &[String]) -> ActionGuard {
        let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed) + 1;
        let token = CancellationToken::new();

        let mut rows = self.inner.rows.lock().unwrap_or_else(|e| e.into_inner());
        for id in ids {
            let previous = rows.insert(
                id.clone(),
                InFlight {
                    generation,
                    token: token.clone(),
                },
            );
            if let Some(previous) = previous {
                debug!("action on {} superseded", id);
                previous.token.cancel();
            }
        }

        ActionGuard {
            tracker: self.inner.clone(),
            ids: ids.to_vec(),
            generation,
            token,
        }
    }

    pub fn is_processing(&self, id: &str) -> bool {
        self.inner
            .rows
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(id)
    }

    pub fn processing_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .inner
            .rows
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }
}

/// Marks its rows as processing until dropped.
pub struct ActionGuard {
    tracker: Arc<TrackerInner>,
    ids: Vec<String>,
    generation: u64,
    token: CancellationToken,
}

impl ActionGuard {
    /// A newer action on one of the rows has started.
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

impl Drop for ActionGuard {
    fn drop(&mut self) {
        let mut rows = self.tracker.rows.lock().unwrap_or_else(|e| e.into_inner());
        for id in &self.ids {
            if rows.get(id).is_some_and(|f| f.generation == self.generation) {
                rows.remove(id);
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ActionOutcome<T> {
    Applied(T),
    /// A newer action on the same row took over; this result was dropped.
    Superseded,
}

/// Optimistic mutations of one resource: patch the cache, call the server,
/// then reconcile with its answer or roll back.
pub struct ResourceActions<R: SyncRow> {
    sync: Arc<ResourceSync<R>>,
    tracker: ActionTracker,
}

impl<R: SyncRow> ResourceActions<R> {
    pub fn new(sync: Arc<ResourceSync<R>>) -> Self {
        Self {
            sync,
            tracker: ActionTracker::new(),
        }
    }

    pub fn tracker(&self) -> &ActionTracker {
        &self.tracker
    }

    pub fn is_processing(&self, id: &str) -> bool {
        self.tracker.is_processing(id)
    }

    fn roll_back(&self, kind: ActionKind, snapshots: Vec<RowSnapshot<R>>, err: &ActionError) {
        warn!("{} {} failed, rolling back {} row(s): {}", self.sync.namespace(), kind.as_str(), snapshots.len(), err);
        self.sync.restore_all(snapshots);
    }

    /// Single-row update that returns the server's copy of the row.
    pub async fn run<Fut>(
        &self,
        id: &str,
        kind: ActionKind,
        patch: impl FnOnce(&mut R),
        call: Fut,
    ) -> Result<ActionOutcome<R>, ActionError>
    where
        Fut: Future<Output = Result<R, ActionError>>,
    {
        let guard = self.tracker.begin(id);
        let snapshot = self.sync.patch_local(id, patch);

        let result = call.await;
        if guard.is_cancelled() {
            return Ok(ActionOutcome::Superseded);
        }

        match result {
            Ok(row) => {
                self.sync.apply_upsert(&row, None);
                Ok(ActionOutcome::Applied(row))
            }
            Err(err) => {
                self.roll_back(kind, snapshot.into_iter().collect(), &err);
                Err(err)
            }
        }
    }

    /// Hard delete: the row leaves every query at once.
    pub async fn run_remove<Fut>(&self, id: &str, kind: ActionKind, call: Fut) -> Result<ActionOutcome<()>, ActionError>
    where
        Fut: Future<Output = Result<(), ActionError>>,
    {
        let guard = self.tracker.begin(id);
        let snapshot = self.sync.remove_local(id);

        let result = call.await;
        if guard.is_cancelled() {
            return Ok(ActionOutcome::Superseded);
        }

        match result {
            Ok(()) => {
                self.sync.apply_remove(id, None);
                Ok(ActionOutcome::Applied(()))
            }
            Err(err) => {
                self.roll_back(kind, snapshot.into_iter().collect(), &err);
                Err(err)
            }
        }
    }

    /// Applies `patch` to every id, then lets the server's batch event
    /// settle the final state. A rejected call rolls every row back.
    pub async fn run_bulk<Fut>(
        &self,
        ids: &[String],
        kind: ActionKind,
        patch: impl Fn(&mut R),
        call: Fut,
    ) -> Result<ActionOutcome<BulkResponse>, ActionError>
    where
        Fut: Future<Output = Result<BulkResponse, ActionError>>,
    {
        let guard = self.tracker.begin_bulk(ids);
        let snapshots = self.sync.patch_local_many(ids, patch);

        let result = call.await;
        if guard.is_cancelled() {
            return Ok(ActionOutcome::Superseded);
        }

        match result {
            Ok(response) if response.success => Ok(ActionOutcome::Applied(response)),
            Ok(response) => {
                let err = ActionError::Validation(response.message.clone());
                self.roll_back(kind, snapshots, &err);
                Ok(ActionOutcome::Applied(response))
            }
            Err(err) => {
                self.roll_back(kind, snapshots, &err);
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconcile::tests::{comment, page_of};
    use beacon_types::models::CommentRow;
    use beacon_types::query::ListParams;

    fn actions() -> (ResourceActions<CommentRow>, ListParams) {
        let sync = Arc::new(ResourceSync::new("comments"));
        let params = ListParams::default();
        sync.store_list(params.clone(), page_of(&["a", "b", "c"], 1, 10, 3));
        (ResourceActions::new(sync), params)
    }

    fn approved(row: &mut CommentRow) {
        row.approved = true;
    }

    #[test]
    fn newer_action_cancels_older_and_keeps_tracking() {
        let tracker = ActionTracker::new();
        let first = tracker.begin("a");
        let second = tracker.begin("a");
        assert!(first.is_cancelled());
        assert!(!second.is_cancelled());

        drop(first);
        assert!(tracker.is_processing("a"));
        drop(second);
        assert!(!tracker.is_processing("a"));
    }

    #[test]
    fn bulk_guard_tracks_every_id() {
        let tracker = ActionTracker::new();
        let guard = tracker.begin_bulk(&["a".into(), "b".into()]);
        assert_eq!(tracker.processing_ids(), vec!["a".to_string(), "b".to_string()]);
        drop(guard);
        assert!(tracker.processing_ids().is_empty());
    }

    #[tokio::test]
    async fn failed_update_rolls_back() {
        let (actions, params) = actions();
        let result = actions
            .run("b", ActionKind::Approve, approved, async {
                Err(ActionError::Forbidden(ActionKind::Approve))
            })
            .await;

        let err = result.unwrap_err();
        assert!(err.is_permission());
        assert_eq!(err.to_string(), ActionKind::Approve.denied_message());
        let page = actions.sync.list(&params).unwrap();
        assert!(page.rows.iter().all(|r| !r.approved));
        assert!(!actions.is_processing("b"));
    }

    #[tokio::test]
    async fn success_keeps_the_server_row() {
        let (actions, params) = actions();
        let mut server = comment("b", true, false);
        server.version = 5;
        server.content = "edited by server".into();

        let outcome = actions
            .run("b", ActionKind::Approve, approved, async { Ok(server.clone()) })
            .await
            .unwrap();
        assert_eq!(outcome, ActionOutcome::Applied(server));
        let page = actions.sync.list(&params).unwrap();
        assert_eq!(page.rows[1].content, "edited by server");
    }

    #[tokio::test]
    async fn superseded_failure_does_not_roll_back() {
        let (actions, params) = actions();
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();

        let first = actions.run("b", ActionKind::Approve, approved, async move {
            let _ = rx.await;
            Err(ActionError::Server {
                status: 500,
                message: "boom".into(),
            })
        });
        let second = async {
            let mut server = comment("b", true, false);
            server.version = 2;
            let outcome = actions
                .run("b", ActionKind::Approve, approved, async { Ok(server) })
                .await;
            let _ = tx.send(());
            outcome
        };

        let (first, second) = tokio::join!(first, second);
        assert_eq!(first.unwrap(), ActionOutcome::Superseded);
        assert!(matches!(second.unwrap(), ActionOutcome::Applied(_)));
        assert!(actions.sync.list(&params).unwrap().rows[1].approved);
    }

    #[tokio::test]
    async fn failed_hard_delete_restores_the_row() {
        let (actions, params) = actions();
        let result = actions
            .run_remove("a", ActionKind::HardDelete, async {
                Err(ActionError::NotFound("Comment not found".into()))
            })
            .await;
        assert!(result.is_err());
        let page = actions.sync.list(&params).unwrap();
        assert_eq!(page.rows[0].id, "a");
        assert_eq!(page.total, 3);
    }

    #[tokio::test]
    async fn rejected_bulk_rolls_every_row_back() {
        let (actions, params) = actions();
        let ids = vec!["a".to_string(), "c".to_string()];
        let outcome = actions
            .run_bulk(&ids, ActionKind::Bulk, approved, async {
                Ok(BulkResponse {
                    success: false,
                    message: "Không có bản ghi nào được cập nhật".into(),
                    affected: 0,
                })
            })
            .await
            .unwrap();

        assert!(matches!(outcome, ActionOutcome::Applied(BulkResponse { success: false, .. })));
        let page = actions.sync.list(&params).unwrap();
        assert!(page.rows.iter().all(|r| !r.approved));
    }
}
