//! Patching one cached page with one changed row.
//!
//! Membership is decided the same way the server builds the list: the
//! status view, a case-insensitive substring search over a fixed field set,
//! and exact-match column filters. A row that belongs in the page is
//! replaced in place or, on page 1 only, prepended. A row that no longer
//! belongs is removed. Anything else leaves the page untouched.

use chrono::{DateTime, Utc};
use tracing::trace;

use beacon_types::models::{CommentRow, ContactRequestRow, Paginated, StatusView};
use beacon_types::query::ListParams;

/// A filterable field value as seen by a column filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterValue<'a> {
    Text(Option<&'a str>),
    Bool(bool),
}

impl FilterValue<'_> {
    /// Compares against the raw query-string value, parsed the way the
    /// server parses it.
    pub fn matches(&self, raw: &str) -> bool {
        match self {
            Self::Text(value) => *value == Some(raw),
            Self::Bool(flag) => match raw {
                "true" | "1" => *flag,
                "false" | "0" => !*flag,
                _ => false,
            },
        }
    }
}

/// A row type the cache can reconcile.
pub trait SyncRow: Clone + PartialEq + Send + Sync + 'static {
    fn id(&self) -> &str;

    /// Monotonic per-row version. 0 means the producer did not version it.
    fn version(&self) -> u64;

    fn deleted_at(&self) -> Option<DateTime<Utc>>;

    /// Domain status matched by custom status views.
    fn status(&self) -> Option<&str>;

    /// Fields searched by `ListParams::search`; missing values count as "".
    fn search_fields(&self) -> Vec<&str>;

    /// Value of a whitelisted filter field, or `None` if `field` is not
    /// filterable.
    fn filter_value(&self, field: &str) -> Option<FilterValue<'_>>;
}

impl SyncRow for CommentRow {
    fn id(&self) -> &str {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }

    fn deleted_at(&self) -> Option<DateTime<Utc>> {
        self.deleted_at
    }

    fn status(&self) -> Option<&str> {
        Some(if self.approved { "APPROVED" } else { "PENDING" })
    }

    fn search_fields(&self) -> Vec<&str> {
        vec![self.content.as_str(), self.author_name.as_str(), self.post_title.as_str()]
    }

    fn filter_value(&self, field: &str) -> Option<FilterValue<'_>> {
        match field {
            "approved" => Some(FilterValue::Bool(self.approved)),
            "postId" => Some(FilterValue::Text(Some(self.post_id.as_str()))),
            "authorId" => Some(FilterValue::Text(Some(self.author_id.as_str()))),
            _ => None,
        }
    }
}

impl SyncRow for ContactRequestRow {
    fn id(&self) -> &str {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }

    fn deleted_at(&self) -> Option<DateTime<Utc>> {
        self.deleted_at
    }

    fn status(&self) -> Option<&str> {
        Some(self.status.as_str())
    }

    fn search_fields(&self) -> Vec<&str> {
        vec![
            self.name.as_str(),
            self.email.as_str(),
            self.subject.as_str(),
            self.content.as_str(),
        ]
    }

    fn filter_value(&self, field: &str) -> Option<FilterValue<'_>> {
        match field {
            "priority" => Some(FilterValue::Text(Some(self.priority.as_str()))),
            "isRead" => Some(FilterValue::Bool(self.is_read)),
            "assignedToId" => Some(FilterValue::Text(self.assigned_to_id.as_deref())),
            _ => None,
        }
    }
}

/// What reconciliation did to one page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageChange {
    /// Present and belongs: swapped for the new row at the same position.
    Replaced,
    /// Absent, belongs, page 1: prepended and counted.
    Inserted,
    /// Present, no longer belongs: dropped and uncounted.
    Removed,
    /// Absent, belongs, page > 1. There is no safe insertion point; the
    /// page stays stale until it is refetched.
    Gap,
    /// The cached copy is newer than the incoming row.
    Stale,
    /// Nothing to do.
    Unchanged,
}

impl PageChange {
    pub fn is_changed(&self) -> bool {
        matches!(self, Self::Replaced | Self::Inserted | Self::Removed)
    }
}

pub fn matches_filter<R: SyncRow>(params: &ListParams, row: &R) -> bool {
    params.filters.iter().all(|(field, raw)| match row.filter_value(field) {
        Some(value) => value.matches(raw),
        None => {
            trace!("Row {} has no filter field '{}'", row.id(), field);
            false
        }
    })
}

/// Folds case with `str::to_lowercase`, as the server's `fold_case` does.
pub fn matches_search<R: SyncRow>(params: &ListParams, row: &R) -> bool {
    let Some(search) = params.search.as_deref() else {
        return true;
    };
    let needle = search.to_lowercase();
    row.search_fields()
        .iter()
        .any(|field| field.to_lowercase().contains(&needle))
}

pub fn included_by_status<R: SyncRow>(status: &StatusView, row: &R) -> bool {
    let live = row.deleted_at().is_none();
    match status {
        StatusView::Active => live,
        StatusView::Deleted => !live,
        StatusView::All => true,
        StatusView::Custom(wanted) => live && row.status() == Some(wanted.as_str()),
    }
}

/// Whether `row` belongs in the result set of `params`, ignoring paging.
pub fn should_include<R: SyncRow>(params: &ListParams, row: &R) -> bool {
    matches_filter(params, row) && matches_search(params, row) && included_by_status(&params.status, row)
}

/// Reconciles one changed row into one cached page.
pub fn apply_upsert<R: SyncRow>(page: &mut Paginated<R>, params: &ListParams, row: &R) -> PageChange {
    let position = page.rows.iter().position(|r| r.id() == row.id());

    if let Some(index) = position {
        let cached = &page.rows[index];
        if row.version() != 0 && cached.version() > row.version() {
            return PageChange::Stale;
        }
    }

    match (should_include(params, row), position) {
        (true, Some(index)) => {
            if page.rows[index] == *row {
                PageChange::Unchanged
            } else {
                page.rows[index] = row.clone();
                PageChange::Replaced
            }
        }
        (true, None) if page.page <= 1 => {
            page.rows.insert(0, row.clone());
            page.rows.truncate(page.limit as usize);
            page.total += 1;
            page.recompute_total_pages();
            PageChange::Inserted
        }
        (true, None) => PageChange::Gap,
        (false, Some(index)) => {
            page.rows.remove(index);
            page.total = page.total.saturating_sub(1);
            page.recompute_total_pages();
            PageChange::Removed
        }
        (false, None) => PageChange::Unchanged,
    }
}

/// Drops a hard-deleted row from one cached page.
pub fn apply_remove<R: SyncRow>(page: &mut Paginated<R>, id: &str) -> PageChange {
    match page.rows.iter().position(|r| r.id() == id) {
        Some(index) => {
            page.rows.remove(index);
            page.total = page.total.saturating_sub(1);
            page.recompute_total_pages();
            PageChange::Removed
        }
        None => PageChange::Unchanged,
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use beacon_types::models::{ContactRequestStatus, Priority};
    use chrono::TimeZone;
    use proptest::prelude::*;

    pub(crate) fn comment(id: &str, approved: bool, deleted: bool) -> CommentRow {
        let at = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap();
        CommentRow {
            id: id.to_string(),
            content: format!("comment {}", id),
            post_id: "p1".into(),
            post_title: "Release notes".into(),
            author_id: "u1".into(),
            author_name: "Alice".into(),
            parent_id: None,
            approved,
            created_at: at,
            updated_at: at,
            deleted_at: deleted.then_some(at),
            version: 1,
        }
    }

    pub(crate) fn page_of(ids: &[&str], page: u32, limit: u32, total: u64) -> Paginated<CommentRow> {
        let rows = ids.iter().map(|id| comment(id, false, false)).collect();
        Paginated::new(rows, page, limit, total)
    }

    fn request(status: ContactRequestStatus, assignee: Option<&str>) -> ContactRequestRow {
        let at = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap();
        ContactRequestRow {
            id: "r1".into(),
            name: "Ann Lee".into(),
            email: "ann@example.com".into(),
            phone: None,
            subject: "Refund".into(),
            content: "Please refund order 42".into(),
            status,
            priority: Priority::High,
            is_read: false,
            assigned_to_id: assignee.map(str::to_string),
            assigned_to_name: None,
            created_at: at,
            updated_at: at,
            deleted_at: None,
            version: 1,
        }
    }

    #[test]
    fn status_views() {
        let live = comment("c1", true, false);
        let gone = comment("c2", true, true);
        assert!(included_by_status(&StatusView::Active, &live));
        assert!(!included_by_status(&StatusView::Active, &gone));
        assert!(included_by_status(&StatusView::Deleted, &gone));
        assert!(included_by_status(&StatusView::All, &gone));
        assert!(included_by_status(&StatusView::Custom("APPROVED".into()), &live));
        assert!(!included_by_status(&StatusView::Custom("PENDING".into()), &live));
        assert!(!included_by_status(&StatusView::Custom("APPROVED".into()), &gone));
    }

    #[test]
    fn search_is_case_insensitive_over_fixed_fields() {
        let row = request(ContactRequestStatus::New, None);
        assert!(matches_search(&ListParams::default().with_search("REFUND"), &row));
        assert!(matches_search(&ListParams::default().with_search("example.COM"), &row));
        // phone is not a search field
        assert!(!matches_search(&ListParams::default().with_search("555"), &row));
    }

    #[test]
    fn search_folds_vietnamese_case() {
        let mut row = comment("c4", false, false);
        row.content = "ĐƠN HÀNG bị trễ".into();
        assert!(matches_search(&ListParams::default().with_search("đơn"), &row));
        assert!(matches_search(&ListParams::default().with_search("HÀNG"), &row));
        assert!(!matches_search(&ListParams::default().with_search("don"), &row));
    }

    #[test]
    fn filters_compare_like_the_server() {
        let row = request(ContactRequestStatus::InProgress, Some("u9"));
        let params = ListParams::default()
            .with_filter("priority", "HIGH")
            .with_filter("isRead", "0")
            .with_filter("assignedToId", "u9");
        assert!(matches_filter(&params, &row));
        assert!(!matches_filter(&ListParams::default().with_filter("isRead", "yes"), &row));
        assert!(!matches_filter(&ListParams::default().with_filter("email", "x"), &row));

        let unassigned = request(ContactRequestStatus::New, None);
        assert!(!matches_filter(&ListParams::default().with_filter("assignedToId", "u9"), &unassigned));
    }

    #[test]
    fn insert_on_first_page_truncates_and_counts() {
        let params = ListParams::default().with_limit(3);
        let mut page = page_of(&["a", "b", "c"], 1, 3, 3);

        let change = apply_upsert(&mut page, &params, &comment("new", false, false));
        assert_eq!(change, PageChange::Inserted);
        let ids: Vec<&str> = page.rows.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["new", "a", "b"]);
        assert_eq!(page.total, 4);
        assert_eq!(page.total_pages, 2);
    }

    #[test]
    fn later_pages_leave_a_gap() {
        let params = ListParams::default().with_page(2);
        let mut page = page_of(&["k"], 2, 10, 11);
        let before = page.clone();
        assert_eq!(apply_upsert(&mut page, &params, &comment("new", false, false)), PageChange::Gap);
        assert_eq!(page, before);
    }

    #[test]
    fn soft_delete_leaves_active_view() {
        let params = ListParams::default();
        let mut page = page_of(&["a", "b"], 1, 10, 2);
        let change = apply_upsert(&mut page, &params, &comment("a", false, true));
        assert_eq!(change, PageChange::Removed);
        assert_eq!(page.total, 1);
        assert_eq!(page.rows.len(), 1);
    }

    #[test]
    fn replace_keeps_position() {
        let params = ListParams::default();
        let mut page = page_of(&["a", "b", "c"], 1, 10, 3);
        let mut edited = comment("b", false, false);
        edited.content = "edited".into();
        edited.version = 2;
        assert_eq!(apply_upsert(&mut page, &params, &edited), PageChange::Replaced);
        assert_eq!(page.rows[1].content, "edited");
        assert_eq!(page.total, 3);
    }

    #[test]
    fn older_versions_are_ignored() {
        let params = ListParams::default();
        let mut page = page_of(&["a"], 1, 10, 1);
        page.rows[0].version = 5;
        let mut old = comment("a", false, true);
        old.version = 4;
        assert_eq!(apply_upsert(&mut page, &params, &old), PageChange::Stale);
        assert_eq!(page.rows.len(), 1);

        // Unversioned rows always apply
        old.version = 0;
        assert_eq!(apply_upsert(&mut page, &params, &old), PageChange::Removed);
    }

    #[test]
    fn remove_event_scenario_totals() {
        let ids: Vec<String> = (0..10).map(|i| format!("r{}", i)).collect();
        let refs: Vec<&str> = ids.iter().map(String::as_str).collect();

        let mut page = page_of(&refs, 1, 10, 23);
        assert_eq!(page.total_pages, 3);
        assert_eq!(apply_remove(&mut page, "r4"), PageChange::Removed);
        assert_eq!(page.rows.len(), 9);
        assert_eq!(page.total, 22);
        assert_eq!(page.total_pages, 3);

        let mut page = page_of(&refs, 1, 10, 21);
        apply_remove(&mut page, "r0");
        assert_eq!(page.total_pages, 2);

        assert_eq!(apply_remove(&mut page, "missing"), PageChange::Unchanged);
    }

    fn arb_comment() -> impl Strategy<Value = CommentRow> {
        (0u8..6, any::<bool>(), any::<bool>(), prop::sample::select(vec!["Alice", "Bob"]))
            .prop_map(|(n, approved, deleted, author)| {
                let mut row = comment(&format!("c{}", n), approved, deleted);
                row.author_name = author.to_string();
                row
            })
    }

    fn arb_params() -> impl Strategy<Value = ListParams> {
        (
            prop::sample::select(vec![
                StatusView::Active,
                StatusView::Deleted,
                StatusView::All,
                StatusView::Custom("APPROVED".into()),
            ]),
            1u32..3,
            1u32..5,
            prop::option::of(prop::sample::select(vec!["alice", "BOB", "comment c1"])),
            prop::option::of(any::<bool>()),
        )
            .prop_map(|(status, page, limit, search, approved)| {
                let mut params = ListParams::default()
                    .with_status(status)
                    .with_page(page)
                    .with_limit(limit);
                if let Some(search) = search {
                    params = params.with_search(search);
                }
                if let Some(approved) = approved {
                    params = params.with_filter("approved", approved.to_string());
                }
                params
            })
    }

    /// A consistent cached page: distinct rows that all belong to `params`.
    fn arb_page() -> impl Strategy<Value = (ListParams, Paginated<CommentRow>)> {
        (arb_params(), prop::collection::vec(arb_comment(), 0..6), 0u64..20).prop_map(
            |(params, candidates, extra)| {
                let mut rows: Vec<CommentRow> = Vec::new();
                for row in candidates {
                    if should_include(&params, &row) && !rows.iter().any(|r| r.id == row.id) {
                        rows.push(row);
                    }
                }
                rows.truncate(params.limit as usize);
                let total = rows.len() as u64 + extra;
                let page = Paginated::new(rows, params.page, params.limit, total);
                (params, page)
            },
        )
    }

    proptest! {
        #[test]
        fn membership_follows_predicates((params, page) in arb_page(), row in arb_comment()) {
            let was_present = page.rows.iter().any(|r| r.id == row.id);
            let mut page = page;
            apply_upsert(&mut page, &params, &row);

            let present = page.rows.iter().any(|r| r.id == row.id);
            let expected = should_include(&params, &row) && (was_present || params.page == 1);
            prop_assert_eq!(present, expected);
        }

        #[test]
        fn totals_track_inserts_and_removals((params, page) in arb_page(), row in arb_comment()) {
            let before = page.total;
            let mut page = page;
            let change = apply_upsert(&mut page, &params, &row);

            let expected = match change {
                PageChange::Inserted => before + 1,
                PageChange::Removed => before - 1,
                _ => before,
            };
            prop_assert_eq!(page.total, expected);
            prop_assert!(page.rows.len() <= page.limit as usize);
            let pages = if page.total == 0 { 0 } else { page.total.div_ceil(u64::from(page.limit)) };
            prop_assert_eq!(u64::from(page.total_pages), pages);
        }

        #[test]
        fn upsert_is_idempotent((params, page) in arb_page(), row in arb_comment()) {
            let mut once = page;
            apply_upsert(&mut once, &params, &row);
            let mut twice = once.clone();
            let second = apply_upsert(&mut twice, &params, &row);

            prop_assert_eq!(&once, &twice);
            prop_assert!(!second.is_changed());
        }
    }
}
