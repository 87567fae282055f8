use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::watch;
use tracing::{debug, trace};

use beacon_types::models::{Paginated, PreviousStatus};
use beacon_types::query::ListParams;

use crate::cache::{MemoryQueryCache, QueryCache, QueryKey, QueryKind};
use crate::reconcile::{self, PageChange, SyncRow};

/// Highest version applied per row id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Seen {
    Version(u64),
    /// Hard-deleted. Versioned upserts for the id are ignored from now on.
    Tombstone,
}

#[derive(Default)]
struct Ledger {
    rows: HashMap<String, Seen>,
}

impl Ledger {
    /// Whether an event carrying `version` for `id` should be applied.
    /// Version 0 is unversioned and always applies.
    fn admit(&mut self, id: &str, version: u64) -> bool {
        if version == 0 {
            return true;
        }
        match self.rows.get(id) {
            Some(Seen::Tombstone) => false,
            Some(Seen::Version(seen)) if version <= *seen => false,
            _ => {
                self.rows.insert(id.to_string(), Seen::Version(version));
                true
            }
        }
    }

    fn bury(&mut self, id: &str) {
        self.rows.insert(id.to_string(), Seen::Tombstone);
    }
}

const LEDGER_LIMIT: usize = 4096;

/// Which cached queries one event touched.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub changed: Vec<QueryKey>,
    /// Pages past the first that should now hold the row but cannot.
    pub gaps: usize,
    /// Rows dropped because a newer version was already applied.
    pub stale: usize,
}

impl SyncReport {
    pub fn is_changed(&self) -> bool {
        !self.changed.is_empty()
    }
}

#[derive(Debug, Clone)]
struct Origin<R> {
    index: usize,
    /// Id of the row just above, to find the slot again after other inserts.
    after: Option<String>,
    row: R,
}

impl<R: SyncRow> Origin<R> {
    fn locate(page: &Paginated<R>, id: &str) -> Option<Self> {
        let index = page.rows.iter().position(|r| r.id() == id)?;
        Some(Self {
            index,
            after: index.checked_sub(1).map(|i| page.rows[i].id().to_string()),
            row: page.rows[index].clone(),
        })
    }

    fn reinsert(self, page: &mut Paginated<R>) {
        let index = match &self.after {
            Some(after) => page
                .rows
                .iter()
                .position(|r| r.id() == after)
                .map(|i| i + 1)
                .unwrap_or(self.index),
            None => 0,
        };
        page.rows.insert(index.min(page.rows.len()), self.row);
        page.rows.truncate(page.limit as usize);
    }
}

#[derive(Debug, Clone)]
struct Placement<R> {
    key: QueryKey,
    /// Where the row sat before the local change, if it was on the page.
    before: Option<Origin<R>>,
    /// `total` after minus `total` before.
    delta: i64,
}

/// One row's cached state before an optimistic change, for rollback.
#[derive(Debug, Clone)]
pub struct RowSnapshot<R> {
    id: String,
    /// Version of the row the change was made on.
    version: u64,
    /// Detail entry before the change, when the change altered it.
    detail: Option<R>,
    lists: Vec<Placement<R>>,
}

impl<R> RowSnapshot<R> {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Whether the local change altered any cached query.
    pub fn touches_cache(&self) -> bool {
        !self.lists.is_empty() || self.detail.is_some()
    }
}

/// Keeps every cached list and detail query of one resource in step with
/// the mutations pushed by the server.
pub struct ResourceSync<R: SyncRow> {
    namespace: String,
    lists: Arc<dyn QueryCache<Paginated<R>>>,
    details: Arc<dyn QueryCache<R>>,
    /// Also serializes writers, so one event is applied to every query
    /// before the next one starts.
    ledger: Mutex<Ledger>,
    ledger_limit: usize,
    version_tx: watch::Sender<u64>,
}

impl<R: SyncRow> ResourceSync<R> {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self::with_caches(
            namespace,
            Arc::new(MemoryQueryCache::new()),
            Arc::new(MemoryQueryCache::new()),
        )
    }

    pub fn with_caches(
        namespace: impl Into<String>,
        lists: Arc<dyn QueryCache<Paginated<R>>>,
        details: Arc<dyn QueryCache<R>>,
    ) -> Self {
        let (version_tx, _) = watch::channel(0);
        Self {
            namespace: namespace.into(),
            lists,
            details,
            ledger: Mutex::new(Ledger::default()),
            ledger_limit: LEDGER_LIMIT,
            version_tx,
        }
    }

    /// Ledger size above which versions of uncached rows are forgotten.
    pub fn with_ledger_limit(mut self, limit: usize) -> Self {
        self.ledger_limit = limit;
        self
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Bumped once per batch of changed queries.
    pub fn cache_version(&self) -> u64 {
        *self.version_tx.borrow()
    }

    /// Notified whenever `cache_version` moves.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.version_tx.subscribe()
    }

    fn lock(&self) -> MutexGuard<'_, Ledger> {
        self.ledger.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn bump(&self) {
        self.version_tx.send_modify(|v| *v += 1);
    }

    fn list_key(&self, params: ListParams) -> QueryKey {
        QueryKey::list(self.namespace.clone(), params)
    }

    fn detail_key(&self, id: &str) -> QueryKey {
        QueryKey::detail(self.namespace.clone(), id)
    }

    // -- Reads and fetch results --

    pub fn list(&self, params: &ListParams) -> Option<Paginated<R>> {
        self.lists.get(&self.list_key(params.clone()))
    }

    pub fn detail(&self, id: &str) -> Option<R> {
        self.details.get(&self.detail_key(id))
    }

    /// Caches a freshly fetched page.
    pub fn store_list(&self, params: ListParams, page: Paginated<R>) {
        let _guard = self.lock();
        self.lists.set(self.list_key(params), page);
    }

    pub fn store_detail(&self, row: R) {
        let _guard = self.lock();
        self.details.set(self.detail_key(row.id()), row);
    }

    /// Drops every cached query so the next read refetches. The version
    /// ledger goes too, since refetched rows are authoritative.
    pub fn invalidate_all(&self) -> usize {
        let mut ledger = self.lock();
        ledger.rows.clear();
        let dropped = self.lists.invalidate_namespace(&self.namespace)
            + self.details.invalidate_namespace(&self.namespace);
        if dropped > 0 {
            self.bump();
        }
        dropped
    }

    // -- Server events --

    /// Applies each cached list page, writing back only the pages `apply`
    /// reports as changed.
    fn for_each_page(&self, mut apply: impl FnMut(&ListParams, &mut Paginated<R>) -> bool) -> Vec<QueryKey> {
        let mut changed = Vec::new();
        for key in self.lists.keys(&self.namespace) {
            let Some(params) = key.list_params() else {
                continue;
            };
            let Some(mut page) = self.lists.get(&key) else {
                continue;
            };
            if apply(params, &mut page) {
                self.lists.set(key.clone(), page);
                changed.push(key);
            }
        }
        changed
    }

    fn upsert_detail(&self, row: &R) -> Option<QueryKey> {
        let key = self.detail_key(row.id());
        let cached = self.details.get(&key)?;
        if cached == *row || (row.version() != 0 && cached.version() > row.version()) {
            return None;
        }
        self.details.set(key.clone(), row.clone());
        Some(key)
    }

    fn apply_rows(&self, rows: &[&R], report: &mut SyncReport) {
        let mut gaps = 0;
        let mut stale = 0;
        report.changed.extend(self.for_each_page(|params, page| {
            let mut changed = false;
            for row in rows {
                match reconcile::apply_upsert(page, params, *row) {
                    PageChange::Gap => gaps += 1,
                    PageChange::Stale => stale += 1,
                    change => changed |= change.is_changed(),
                }
            }
            changed
        }));
        report.gaps += gaps;
        report.stale += stale;
        report.changed.extend(rows.iter().filter_map(|row| self.upsert_detail(row)));
    }

    /// Reconciles one created or updated row into every cached query.
    pub fn apply_upsert(&self, row: &R, previous_status: Option<PreviousStatus>) -> SyncReport {
        self.apply_batch(std::slice::from_ref(row), previous_status)
    }

    /// Reconciles many rows from one event, bumping the cache version once.
    pub fn apply_batch(&self, rows: &[R], previous_status: Option<PreviousStatus>) -> SyncReport {
        let mut ledger = self.lock();
        let mut report = SyncReport::default();

        let admitted: Vec<&R> = rows
            .iter()
            .filter(|row| {
                let fresh = ledger.admit(row.id(), row.version());
                if !fresh {
                    trace!("{}: ignoring stale v{} of {}", self.namespace, row.version(), row.id());
                    report.stale += 1;
                }
                fresh
            })
            .collect();
        if admitted.is_empty() {
            return report;
        }

        self.apply_rows(&admitted, &mut report);
        if report.is_changed() {
            self.bump();
        }
        self.prune(&mut ledger);
        debug!(
            "{}: applied {} row(s) (previous {:?}), {} quer(ies) changed, {} gap(s)",
            self.namespace,
            admitted.len(),
            previous_status,
            report.changed.len(),
            report.gaps
        );
        report
    }

    /// Drops a hard-deleted row from every cached query.
    pub fn apply_remove(&self, id: &str, previous_status: Option<PreviousStatus>) -> SyncReport {
        let mut ledger = self.lock();
        ledger.bury(id);

        let mut report = SyncReport {
            changed: self.for_each_page(|_, page| reconcile::apply_remove(page, id).is_changed()),
            ..SyncReport::default()
        };
        let key = self.detail_key(id);
        if self.details.invalidate(&key) {
            report.changed.push(key);
        }

        if report.is_changed() {
            self.bump();
        }
        self.prune(&mut ledger);
        debug!(
            "{}: removed {} (previous {:?}), {} quer(ies) changed",
            self.namespace,
            id,
            previous_status,
            report.changed.len()
        );
        report
    }

    // -- Optimistic local changes --

    fn cached_row(&self, id: &str) -> Option<R> {
        if let Some(row) = self.detail(id) {
            return Some(row);
        }
        self.lists
            .keys(&self.namespace)
            .iter()
            .filter_map(|key| self.lists.get(key))
            .find_map(|page| page.rows.into_iter().find(|r| r.id() == id))
    }

    fn patch_row(&self, id: &str, patch: impl FnOnce(&mut R)) -> Option<RowSnapshot<R>> {
        let base = self.cached_row(id)?;
        let mut patched = base.clone();
        patch(&mut patched);

        let mut lists = Vec::new();
        self.for_each_page(|params, page| {
            let before = Origin::locate(page, id);
            let total_before = page.total;
            let changed = reconcile::apply_upsert(page, params, &patched).is_changed();
            if changed {
                lists.push(Placement {
                    key: QueryKey::list(self.namespace.clone(), params.clone()),
                    before,
                    delta: page.total as i64 - total_before as i64,
                });
            }
            changed
        });

        let key = self.detail_key(id);
        let detail = self.details.get(&key).filter(|cached| *cached != patched);
        if detail.is_some() {
            self.details.set(key, patched);
        }

        Some(RowSnapshot {
            id: id.to_string(),
            version: base.version(),
            detail,
            lists,
        })
    }

    /// Applies `patch` to the cached copy of `id` and reconciles the result
    /// locally, without consulting the version ledger. Returns what is
    /// needed to undo it, or `None` if the row is not cached anywhere.
    pub fn patch_local(&self, id: &str, patch: impl FnOnce(&mut R)) -> Option<RowSnapshot<R>> {
        let _guard = self.lock();
        let snapshot = self.patch_row(id, patch)?;
        if snapshot.touches_cache() {
            self.bump();
        }
        Some(snapshot)
    }

    /// `patch_local` for several rows, bumping the cache version once.
    pub fn patch_local_many(&self, ids: &[String], patch: impl Fn(&mut R)) -> Vec<RowSnapshot<R>> {
        let _guard = self.lock();
        let snapshots: Vec<RowSnapshot<R>> = ids
            .iter()
            .filter_map(|id| self.patch_row(id, &patch))
            .collect();
        if snapshots.iter().any(RowSnapshot::touches_cache) {
            self.bump();
        }
        snapshots
    }

    /// Removes `id` from every cached query locally.
    pub fn remove_local(&self, id: &str) -> Option<RowSnapshot<R>> {
        let _guard = self.lock();
        let mut lists = Vec::new();
        self.for_each_page(|params, page| {
            let Some(origin) = Origin::locate(page, id) else {
                return false;
            };
            reconcile::apply_remove(page, id);
            lists.push(Placement {
                key: QueryKey::list(self.namespace.clone(), params.clone()),
                before: Some(origin),
                delta: -1,
            });
            true
        });

        let key = self.detail_key(id);
        let detail = self.details.get(&key);
        if detail.is_some() {
            self.details.invalidate(&key);
        }

        let version = detail
            .as_ref()
            .map(SyncRow::version)
            .or_else(|| lists.iter().find_map(|p| p.before.as_ref().map(|o| o.row.version())))?;
        self.bump();
        Some(RowSnapshot {
            id: id.to_string(),
            version,
            detail,
            lists,
        })
    }

    /// Puts one snapshot back. The server's word wins: a row it hard-deleted
    /// or sent a newer version of in the meantime is left as it is.
    fn restore_row(&self, ledger: &Ledger, snapshot: RowSnapshot<R>) -> bool {
        let id = snapshot.id.as_str();
        let base = snapshot.version;
        match ledger.rows.get(id) {
            Some(Seen::Tombstone) => {
                debug!("{}: {} was hard-deleted meanwhile, not restoring", self.namespace, id);
                return false;
            }
            Some(Seen::Version(seen)) if base != 0 && *seen > base => {
                debug!("{}: v{} of {} arrived meanwhile, not restoring v{}", self.namespace, seen, id, base);
                return false;
            }
            _ => {}
        }
        let newer = |row: &R| base != 0 && row.version() > base;

        let mut changed = false;
        for placement in snapshot.lists {
            let Some(mut page) = self.lists.get(&placement.key) else {
                continue;
            };
            if let Some(index) = page.rows.iter().position(|r| r.id() == id) {
                if newer(&page.rows[index]) {
                    continue;
                }
                page.rows.remove(index);
            }
            if let Some(origin) = placement.before {
                origin.reinsert(&mut page);
            }
            page.total = (page.total as i64 - placement.delta).max(0) as u64;
            page.recompute_total_pages();
            self.lists.set(placement.key, page);
            changed = true;
        }

        if let Some(row) = snapshot.detail {
            let key = self.detail_key(id);
            if !self.details.get(&key).is_some_and(|cached| newer(&cached)) {
                self.details.set(key, row);
                changed = true;
            }
        }
        changed
    }

    /// Undoes an optimistic change. Totals are adjusted by the change's own
    /// delta, so events applied in between are kept.
    pub fn restore(&self, snapshot: RowSnapshot<R>) -> bool {
        self.restore_all(vec![snapshot]) > 0
    }

    /// Undoes several optimistic changes, newest first, bumping the cache
    /// version once. Returns how many rows were put back.
    pub fn restore_all(&self, snapshots: Vec<RowSnapshot<R>>) -> usize {
        let ledger = self.lock();
        let mut restored = 0;
        for snapshot in snapshots.into_iter().rev() {
            let id = snapshot.id.clone();
            if self.restore_row(&ledger, snapshot) {
                debug!("{}: rolled back optimistic change to {}", self.namespace, id);
                restored += 1;
            }
        }
        if restored > 0 {
            self.bump();
        }
        restored
    }

    // -- Ledger upkeep --

    /// Ids present in any cached query of this namespace.
    fn cached_ids(&self) -> HashSet<String> {
        let mut ids = HashSet::new();
        for key in self.lists.keys(&self.namespace) {
            if let Some(page) = self.lists.get(&key) {
                ids.extend(page.rows.iter().map(|r| r.id().to_string()));
            }
        }
        for key in self.details.keys(&self.namespace) {
            if let QueryKind::Detail(id) = key.kind {
                ids.insert(id);
            }
        }
        ids
    }

    /// Forgets versions of rows no longer cached once the ledger outgrows
    /// its limit. Tombstones are kept.
    fn prune(&self, ledger: &mut Ledger) {
        if ledger.rows.len() <= self.ledger_limit {
            return;
        }
        let cached = self.cached_ids();
        let before = ledger.rows.len();
        ledger
            .rows
            .retain(|id, seen| *seen == Seen::Tombstone || cached.contains(id));
        trace!("{}: pruned {} ledger entries", self.namespace, before - ledger.rows.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconcile::tests::{comment, page_of};
    use beacon_types::models::{CommentRow, StatusView};

    fn seeded() -> (ResourceSync<CommentRow>, ListParams, ListParams) {
        let sync = ResourceSync::new("comments");
        let active = ListParams::default();
        let deleted = ListParams::default().with_status(StatusView::Deleted);
        sync.store_list(active.clone(), page_of(&["a", "b", "c"], 1, 10, 3));
        sync.store_list(deleted.clone(), Paginated::new(Vec::new(), 1, 10, 0));
        (sync, active, deleted)
    }

    #[test]
    fn soft_delete_moves_row_between_views() {
        let (sync, active, deleted) = seeded();
        let mut row = comment("b", false, true);
        row.version = 2;

        let report = sync.apply_upsert(&row, Some(PreviousStatus::Active));
        assert_eq!(report.changed.len(), 2);
        assert_eq!(sync.cache_version(), 1);

        let active = sync.list(&active).unwrap();
        assert_eq!(active.total, 2);
        assert!(active.rows.iter().all(|r| r.id != "b"));
        let deleted = sync.list(&deleted).unwrap();
        assert_eq!(deleted.total, 1);
        assert_eq!(deleted.rows[0].id, "b");
    }

    #[test]
    fn batch_bumps_cache_version_once() {
        let (sync, active, _) = seeded();
        let mut rx = sync.subscribe();
        let rows: Vec<CommentRow> = ["x", "y"]
            .iter()
            .map(|id| {
                let mut row = comment(id, false, false);
                row.version = 3;
                row
            })
            .collect();

        let report = sync.apply_batch(&rows, None);
        assert_eq!(report.changed.len(), 1);
        assert_eq!(sync.cache_version(), 1);
        assert!(rx.has_changed().unwrap());
        assert_eq!(sync.list(&active).unwrap().total, 5);
    }

    #[test]
    fn unchanged_queries_are_not_written_or_counted() {
        let (sync, _, _) = seeded();
        let same = comment("a", false, false);
        // Same version as cached: the ledger has not seen it yet, but the
        // page already holds an identical row.
        let report = sync.apply_upsert(&same, None);
        assert!(!report.is_changed());
        assert_eq!(sync.cache_version(), 0);
    }

    #[test]
    fn out_of_order_events_are_ignored() {
        let (sync, active, _) = seeded();
        let mut newer = comment("a", true, false);
        newer.version = 4;
        let mut older = comment("a", false, true);
        older.version = 3;

        sync.apply_upsert(&newer, None);
        let report = sync.apply_upsert(&older, Some(PreviousStatus::Active));
        assert_eq!(report.stale, 1);
        assert!(sync.list(&active).unwrap().rows.iter().any(|r| r.id == "a" && r.approved));
    }

    #[test]
    fn invalidate_all_forgets_rows_and_versions() {
        let (sync, active, deleted) = seeded();
        let mut newer = comment("a", true, false);
        newer.version = 4;
        sync.apply_upsert(&newer, None);

        assert_eq!(sync.invalidate_all(), 2);
        assert!(sync.list(&active).is_none());
        assert!(sync.list(&deleted).is_none());

        sync.store_list(active.clone(), page_of(&["a"], 1, 10, 1));
        let mut refetched = comment("a", false, false);
        refetched.version = 3;
        let report = sync.apply_upsert(&refetched, None);
        assert_eq!(report.stale, 0);
    }

    #[test]
    fn hard_delete_tombstones_the_row() {
        let (sync, active, _) = seeded();
        sync.store_detail(comment("a", false, false));

        let report = sync.apply_remove("a", Some(PreviousStatus::Active));
        assert_eq!(report.changed.len(), 2);
        assert!(sync.detail("a").is_none());

        let mut late = comment("a", false, false);
        late.version = 9;
        assert!(!sync.apply_upsert(&late, None).is_changed());
        assert_eq!(sync.list(&active).unwrap().total, 2);
    }

    #[test]
    fn optimistic_patch_rolls_back_without_losing_other_events() {
        let (sync, active, deleted) = seeded();

        let snapshot = sync
            .patch_local("b", |row| row.deleted_at = Some(chrono::Utc::now()))
            .unwrap();
        assert_eq!(sync.list(&active).unwrap().total, 2);
        assert_eq!(sync.list(&deleted).unwrap().total, 1);

        // Someone else's comment arrives while the request is in flight
        let mut other = comment("z", false, false);
        other.version = 2;
        sync.apply_upsert(&other, None);

        sync.restore(snapshot);
        let page = sync.list(&active).unwrap();
        let ids: Vec<&str> = page.rows.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["z", "a", "b", "c"]);
        assert_eq!(page.total, 4);
        assert_eq!(sync.list(&deleted).unwrap().total, 0);
    }

    #[test]
    fn remove_local_restores_position() {
        let (sync, active, _) = seeded();
        let snapshot = sync.remove_local("b").unwrap();
        assert_eq!(sync.list(&active).unwrap().rows.len(), 2);

        sync.restore(snapshot);
        let page = sync.list(&active).unwrap();
        assert_eq!(page.rows[1].id, "b");
        assert_eq!(page.total, 3);
        assert!(sync.remove_local("missing").is_none());
    }

    #[test]
    fn rollback_keeps_a_newer_server_version() {
        let (sync, active, _) = seeded();
        sync.store_detail(comment("b", false, false));
        let snapshot = sync.patch_local("b", |row| row.approved = true).unwrap();

        let mut edited = comment("b", false, false);
        edited.content = "edited elsewhere".into();
        edited.version = 5;
        sync.apply_upsert(&edited, None);

        assert!(!sync.restore(snapshot));
        let page = sync.list(&active).unwrap();
        let b = page.rows.iter().find(|r| r.id == "b").unwrap();
        assert_eq!((b.content.as_str(), b.version), ("edited elsewhere", 5));
        assert_eq!(page.total, 3);
        assert_eq!(sync.detail("b").unwrap().version, 5);
    }

    #[test]
    fn rollback_leaves_a_hard_delete_in_place() {
        let (sync, active, _) = seeded();
        let snapshot = sync.remove_local("b").unwrap();
        sync.apply_remove("b", Some(PreviousStatus::Active));

        assert!(!sync.restore(snapshot));
        let page = sync.list(&active).unwrap();
        let ids: Vec<&str> = page.rows.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c"]);
        assert_eq!(page.total, 2);
    }

    #[test]
    fn local_patches_bump_only_when_something_changed() {
        let (sync, _, _) = seeded();
        let noop = sync.patch_local("a", |_| {}).unwrap();
        assert!(!noop.touches_cache());
        assert_eq!(sync.cache_version(), 0);

        let ids = ["a".to_string(), "b".to_string(), "missing".to_string()];
        let snapshots = sync.patch_local_many(&ids, |row| row.approved = true);
        assert_eq!(snapshots.len(), 2);
        assert_eq!(sync.cache_version(), 1);

        assert_eq!(sync.restore_all(snapshots), 2);
        assert_eq!(sync.cache_version(), 2);
    }

    #[test]
    fn ledger_forgets_uncached_rows_past_its_limit() {
        let sync = ResourceSync::<CommentRow>::new("comments").with_ledger_limit(2);
        let active = ListParams::default();
        sync.store_list(active.clone(), page_of(&["a"], 1, 10, 1));

        sync.apply_remove("gone", None);
        let mut hidden = comment("y", false, true);
        hidden.version = 2;
        sync.apply_upsert(&hidden, None);
        let mut cached = comment("a", true, false);
        cached.version = 2;
        sync.apply_upsert(&cached, None);

        {
            let ledger = sync.lock();
            assert_eq!(ledger.rows.get("gone"), Some(&Seen::Tombstone));
            assert_eq!(ledger.rows.get("a"), Some(&Seen::Version(2)));
            assert!(!ledger.rows.contains_key("y"));
        }

        let mut late = comment("gone", false, false);
        late.version = 9;
        assert_eq!(sync.apply_upsert(&late, None).stale, 1);
    }
}

