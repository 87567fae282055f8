use anyhow::Result;
use rusqlite::Connection;
use rusqlite::types::Value;
use tracing::warn;

use beacon_types::api::BulkAction;
use beacon_types::models::{CommentRow, Paginated, PreviousStatus};
use beacon_types::query::ListParams;

use super::list::{FilterKind, ListSpec, run_list};
use super::{OptionalExt, QueryError, delete_row, mutate_row};
use crate::Database;
use crate::mappers::{COMMENT_COLUMNS, COMMENT_FROM, comment_from_row, now_ts};
use crate::models::{BulkOutcome, Mutated};

const COMMENT_LIST: ListSpec = ListSpec {
    from: COMMENT_FROM,
    columns: COMMENT_COLUMNS,
    deleted_col: "c.deleted_at",
    status_col: Some("CASE WHEN c.approved = 1 THEN 'APPROVED' ELSE 'PENDING' END"),
    search_cols: &["c.content", "u.username", "p.title"],
    filters: &[
        ("approved", "c.approved", FilterKind::Bool),
        ("postId", "c.post_id", FilterKind::Text),
        ("authorId", "c.author_id", FilterKind::Text),
    ],
    sorts: &[
        ("createdAt", "c.created_at"),
        ("updatedAt", "c.updated_at"),
        ("authorName", "u.username"),
    ],
    default_sort: "c.created_at",
    id_col: "c.id",
};

fn fetch_comment(conn: &Connection, id: &str) -> Result<Option<CommentRow>> {
    conn.query_row(
        &format!("SELECT {} FROM {} WHERE c.id = ?1", COMMENT_COLUMNS, COMMENT_FROM),
        [id],
        comment_from_row,
    )
    .optional()
}

fn set_deleted(conn: &Connection, id: &str, deleted: bool) -> Result<Option<Mutated<CommentRow>>> {
    if deleted {
        mutate_row(
            conn,
            "comments",
            id,
            "deleted_at = ?2",
            vec![Value::Text(now_ts())],
            Some("deleted_at IS NULL"),
            fetch_comment,
        )
    } else {
        mutate_row(
            conn,
            "comments",
            id,
            "deleted_at = NULL",
            vec![],
            Some("deleted_at IS NOT NULL"),
            fetch_comment,
        )
    }
}

fn set_approved(conn: &Connection, id: &str, approved: bool) -> Result<Option<Mutated<CommentRow>>> {
    mutate_row(
        conn,
        "comments",
        id,
        "approved = ?2",
        vec![Value::Integer(i64::from(approved))],
        Some("deleted_at IS NULL"),
        fetch_comment,
    )
}

impl Database {
    pub fn create_post(&self, id: &str, title: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO posts (id, title, created_at) VALUES (?1, ?2, ?3)",
                (id, title, now_ts()),
            )?;
            Ok(())
        })
    }

    pub fn insert_comment(
        &self,
        id: &str,
        post_id: &str,
        author_id: &str,
        parent_id: Option<&str>,
        content: &str,
    ) -> Result<CommentRow> {
        self.with_conn(|conn| {
            let now = now_ts();
            conn.execute(
                "INSERT INTO comments (id, post_id, author_id, parent_id, content, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
                rusqlite::params![id, post_id, author_id, parent_id, content, now],
            )?;
            fetch_comment(conn, id)?.ok_or_else(|| anyhow::anyhow!("Comment vanished after insert: {}", id))
        })
    }

    pub fn list_comments(&self, params: &ListParams) -> Result<Paginated<CommentRow>> {
        self.with_conn(|conn| run_list(conn, &COMMENT_LIST, params, comment_from_row))
    }

    pub fn get_comment(&self, id: &str) -> Result<Option<CommentRow>> {
        self.with_conn(|conn| fetch_comment(conn, id))
    }

    /// Edits content and/or approval in one transaction.
    pub fn update_comment(
        &self,
        id: &str,
        content: Option<&str>,
        approved: Option<bool>,
    ) -> Result<Option<Mutated<CommentRow>>> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let mut sets = Vec::new();
            let mut values = Vec::new();
            if let Some(content) = content {
                values.push(Value::Text(content.to_string()));
                sets.push(format!("content = ?{}", values.len() + 1));
            }
            if let Some(approved) = approved {
                values.push(Value::Integer(i64::from(approved)));
                sets.push(format!("approved = ?{}", values.len() + 1));
            }
            if sets.is_empty() {
                let row = fetch_comment(&tx, id)?;
                return Ok(row.map(|row| Mutated {
                    previous_status: PreviousStatus::of(row.deleted_at),
                    row,
                    applied: false,
                }));
            }
            let mutated = mutate_row(&tx, "comments", id, &sets.join(", "), values, None, fetch_comment)?;
            tx.commit()?;
            Ok(mutated)
        })
    }

    pub fn soft_delete_comment(&self, id: &str) -> Result<Option<Mutated<CommentRow>>> {
        self.with_conn(|conn| set_deleted(conn, id, true))
    }

    pub fn restore_comment(&self, id: &str) -> Result<Option<Mutated<CommentRow>>> {
        self.with_conn(|conn| set_deleted(conn, id, false))
    }

    pub fn hard_delete_comment(&self, id: &str) -> Result<Option<PreviousStatus>> {
        self.with_conn(|conn| delete_row(conn, "comments", id))
    }

    /// Applies one moderation action to many comments. Unknown ids are
    /// skipped. Restores that fail are logged and skipped so one bad row
    /// does not abort the batch.
    pub fn bulk_comments(&self, action: BulkAction, ids: &[String]) -> Result<BulkOutcome<CommentRow>> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let outcome = match action {
                BulkAction::HardDelete => {
                    let mut removed = Vec::new();
                    for id in ids {
                        if let Some(prev) = delete_row(&tx, "comments", id)? {
                            removed.push((id.clone(), prev));
                        }
                    }
                    BulkOutcome::Removed(removed)
                }
                BulkAction::Restore => {
                    let mut rows = Vec::new();
                    for id in ids {
                        match set_deleted(&tx, id, false) {
                            Ok(Some(m)) if m.applied => rows.push(m),
                            Ok(_) => {}
                            Err(e) => warn!("Bulk restore skipped comment {}: {}", id, e),
                        }
                    }
                    BulkOutcome::Updated(rows)
                }
                BulkAction::Delete | BulkAction::Approve | BulkAction::Unapprove => {
                    let mut rows = Vec::new();
                    for id in ids {
                        let mutated = match action {
                            BulkAction::Delete => set_deleted(&tx, id, true)?,
                            BulkAction::Approve => set_approved(&tx, id, true)?,
                            _ => set_approved(&tx, id, false)?,
                        };
                        rows.extend(mutated.filter(|m| m.applied));
                    }
                    BulkOutcome::Updated(rows)
                }
                other => return Err(QueryError::UnsupportedAction(other.as_str().to_string()).into()),
            };
            tx.commit()?;
            Ok(outcome)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use beacon_types::models::{Role, StatusView};

    fn seed() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.create_user("u1", "alice", "hash", Role::User).unwrap();
        db.create_user("u2", "bob", "hash", Role::User).unwrap();
        db.create_post("p1", "Release notes").unwrap();
        db.create_post("p2", "Roadmap").unwrap();
        db.insert_comment("c1", "p1", "u1", None, "Great release").unwrap();
        db.insert_comment("c2", "p1", "u2", Some("c1"), "Agreed").unwrap();
        db.insert_comment("c3", "p2", "u2", None, "When is 2.0?").unwrap();
        db
    }

    #[test]
    fn lists_active_comments_with_joins() {
        let db = seed();
        let page = db.list_comments(&ListParams::default()).unwrap();
        assert_eq!(page.total, 3);
        assert_eq!(page.total_pages, 1);
        let c2 = page.rows.iter().find(|r| r.id == "c2").unwrap();
        assert_eq!(c2.author_name, "bob");
        assert_eq!(c2.post_title, "Release notes");
        assert_eq!(c2.parent_id.as_deref(), Some("c1"));
        assert_eq!(c2.version, 1);
    }

    #[test]
    fn search_matches_author_and_title_case_insensitively() {
        let db = seed();
        let page = db
            .list_comments(&ListParams::default().with_search("ROADMAP"))
            .unwrap();
        assert_eq!(page.rows.len(), 1);
        assert_eq!(page.rows[0].id, "c3");

        let page = db
            .list_comments(&ListParams::default().with_search("alice"))
            .unwrap();
        assert_eq!(page.rows.len(), 1);
    }

    #[test]
    fn search_folds_vietnamese_case() {
        let db = seed();
        db.insert_comment("c4", "p2", "u1", None, "ĐƠN HÀNG bị trễ").unwrap();

        let page = db.list_comments(&ListParams::default().with_search("đơn")).unwrap();
        assert_eq!(page.rows.len(), 1);
        assert_eq!(page.rows[0].id, "c4");

        let page = db.list_comments(&ListParams::default().with_search("don")).unwrap();
        assert!(page.rows.is_empty());
    }

    #[test]
    fn soft_delete_moves_row_between_buckets() {
        let db = seed();
        let mutated = db.soft_delete_comment("c1").unwrap().unwrap();
        assert_eq!(mutated.previous_status, PreviousStatus::Active);
        assert!(mutated.row.deleted_at.is_some());
        assert_eq!(mutated.row.version, 2);

        let active = db.list_comments(&ListParams::default()).unwrap();
        assert_eq!(active.total, 2);
        let deleted = db
            .list_comments(&ListParams::default().with_status(StatusView::Deleted))
            .unwrap();
        assert_eq!(deleted.total, 1);

        // Deleting again leaves the row untouched
        let again = db.soft_delete_comment("c1").unwrap().unwrap();
        assert_eq!(again.previous_status, PreviousStatus::Deleted);
        assert_eq!(again.row.version, 2);
        assert!(!again.applied);

        let restored = db.restore_comment("c1").unwrap().unwrap();
        assert!(restored.row.deleted_at.is_none());
        assert_eq!(restored.row.version, 3);
    }

    #[test]
    fn approval_filters_and_custom_status() {
        let db = seed();
        db.update_comment("c2", None, Some(true)).unwrap();

        let approved = db
            .list_comments(&ListParams::default().with_filter("approved", "true"))
            .unwrap();
        assert_eq!(approved.rows.len(), 1);

        let pending = db
            .list_comments(&ListParams::default().with_status(StatusView::Custom("PENDING".into())))
            .unwrap();
        assert_eq!(pending.total, 2);

        let err = db
            .list_comments(&ListParams::default().with_filter("password", "x"))
            .unwrap_err();
        assert_eq!(
            err.downcast_ref::<QueryError>(),
            Some(&QueryError::UnknownFilter("password".into()))
        );
    }

    #[test]
    fn pagination_counts_all_matching_rows() {
        let db = seed();
        let page = db
            .list_comments(&ListParams::default().with_limit(2).with_page(2))
            .unwrap();
        assert_eq!(page.total, 3);
        assert_eq!(page.total_pages, 2);
        assert_eq!(page.rows.len(), 1);
    }

    #[test]
    fn bulk_hard_delete_reports_removed_ids() {
        let db = seed();
        let outcome = db
            .bulk_comments(
                BulkAction::HardDelete,
                &["c3".to_string(), "missing".to_string()],
            )
            .unwrap();
        match outcome {
            BulkOutcome::Removed(ids) => {
                assert_eq!(ids, vec![("c3".to_string(), PreviousStatus::Active)])
            }
            BulkOutcome::Updated(_) => panic!("expected removal"),
        }
        assert!(db.get_comment("c3").unwrap().is_none());
    }

    #[test]
    fn bulk_counts_only_rows_it_changed() {
        let db = seed();
        db.soft_delete_comment("c1").unwrap();
        let ids = ["c1".to_string(), "c2".to_string()];

        let deleted = db.bulk_comments(BulkAction::Delete, &ids).unwrap();
        assert_eq!(deleted.affected(), 1);
        match deleted {
            BulkOutcome::Updated(rows) => {
                assert_eq!(rows.len(), 1);
                assert_eq!(rows[0].row.id, "c2");
            }
            BulkOutcome::Removed(_) => panic!("expected updates"),
        }

        // Approval is guarded on live rows, both are deleted now
        let approved = db.bulk_comments(BulkAction::Approve, &ids).unwrap();
        assert_eq!(approved.affected(), 0);

        let restored = db
            .bulk_comments(BulkAction::Restore, &["c1".to_string(), "c3".to_string()])
            .unwrap();
        assert_eq!(restored.affected(), 1);
        assert_eq!(db.get_comment("c3").unwrap().unwrap().version, 1);
    }

    #[test]
    fn bulk_rejects_contact_request_actions() {
        let db = seed();
        let err = db
            .bulk_comments(BulkAction::Assign, &["c1".to_string()])
            .unwrap_err();
        assert!(err.downcast_ref::<QueryError>().is_some());
    }
}
