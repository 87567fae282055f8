use anyhow::Result;
use rusqlite::Connection;
use rusqlite::types::Value;
use tracing::warn;

use beacon_types::api::{BulkAction, BulkRequest, CreateContactRequest, UpdateContactRequest};
use beacon_types::models::{ContactRequestRow, ContactRequestStatus, Paginated, PreviousStatus};
use beacon_types::query::ListParams;

use super::list::{FilterKind, ListSpec, run_list};
use super::{OptionalExt, QueryError, delete_row, mutate_row};
use crate::Database;
use crate::mappers::{CONTACT_REQUEST_COLUMNS, CONTACT_REQUEST_FROM, contact_request_from_row, now_ts};
use crate::models::{BulkOutcome, Mutated};

const CONTACT_REQUEST_LIST: ListSpec = ListSpec {
    from: CONTACT_REQUEST_FROM,
    columns: CONTACT_REQUEST_COLUMNS,
    deleted_col: "r.deleted_at",
    status_col: Some("r.status"),
    search_cols: &["r.name", "r.email", "r.subject", "r.content"],
    filters: &[
        ("priority", "r.priority", FilterKind::Text),
        ("isRead", "r.is_read", FilterKind::Bool),
        ("assignedToId", "r.assigned_to_id", FilterKind::Text),
    ],
    sorts: &[
        ("createdAt", "r.created_at"),
        ("updatedAt", "r.updated_at"),
        ("priority", "r.priority"),
        ("name", "r.name"),
    ],
    default_sort: "r.created_at",
    id_col: "r.id",
};

const TABLE: &str = "contact_requests";

fn fetch_contact_request(conn: &Connection, id: &str) -> Result<Option<ContactRequestRow>> {
    conn.query_row(
        &format!(
            "SELECT {} FROM {} WHERE r.id = ?1",
            CONTACT_REQUEST_COLUMNS, CONTACT_REQUEST_FROM
        ),
        [id],
        contact_request_from_row,
    )
    .optional()
}

type MutatedRequest = Option<Mutated<ContactRequestRow>>;

fn set_deleted(conn: &Connection, id: &str, deleted: bool) -> Result<MutatedRequest> {
    if deleted {
        mutate_row(
            conn,
            TABLE,
            id,
            "deleted_at = ?2",
            vec![Value::Text(now_ts())],
            Some("deleted_at IS NULL"),
            fetch_contact_request,
        )
    } else {
        mutate_row(
            conn,
            TABLE,
            id,
            "deleted_at = NULL",
            vec![],
            Some("deleted_at IS NOT NULL"),
            fetch_contact_request,
        )
    }
}

fn apply_update(conn: &Connection, id: &str, update: &UpdateContactRequest) -> Result<MutatedRequest> {
    let mut sets = Vec::new();
    let mut values = Vec::new();
    if let Some(status) = update.status {
        values.push(Value::Text(status.as_str().to_string()));
        sets.push(format!("status = ?{}", values.len() + 1));
    }
    if let Some(priority) = update.priority {
        values.push(Value::Text(priority.as_str().to_string()));
        sets.push(format!("priority = ?{}", values.len() + 1));
    }
    if let Some(is_read) = update.is_read {
        values.push(Value::Integer(i64::from(is_read)));
        sets.push(format!("is_read = ?{}", values.len() + 1));
    }
    if sets.is_empty() {
        return Ok(fetch_contact_request(conn, id)?.map(|row| Mutated {
            previous_status: PreviousStatus::of(row.deleted_at),
            row,
            applied: false,
        }));
    }
    mutate_row(conn, TABLE, id, &sets.join(", "), values, None, fetch_contact_request)
}

fn apply_assign(conn: &Connection, id: &str, assignee: Option<&str>) -> Result<MutatedRequest> {
    let value = assignee.map_or(Value::Null, |a| Value::Text(a.to_string()));
    // Picking up a new request moves it into progress.
    mutate_row(
        conn,
        TABLE,
        id,
        "assigned_to_id = ?2, status = CASE WHEN status = 'NEW' AND ?2 IS NOT NULL THEN 'IN_PROGRESS' ELSE status END",
        vec![value],
        None,
        fetch_contact_request,
    )
}

impl Database {
    pub fn create_contact_request(&self, id: &str, req: &CreateContactRequest) -> Result<ContactRequestRow> {
        self.with_conn(|conn| {
            let now = now_ts();
            conn.execute(
                "INSERT INTO contact_requests (id, name, email, phone, subject, content, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
                rusqlite::params![id, req.name, req.email, req.phone, req.subject, req.content, now],
            )?;
            fetch_contact_request(conn, id)?
                .ok_or_else(|| anyhow::anyhow!("Contact request vanished after insert: {}", id))
        })
    }

    pub fn list_contact_requests(&self, params: &ListParams) -> Result<Paginated<ContactRequestRow>> {
        self.with_conn(|conn| run_list(conn, &CONTACT_REQUEST_LIST, params, contact_request_from_row))
    }

    pub fn get_contact_request(&self, id: &str) -> Result<Option<ContactRequestRow>> {
        self.with_conn(|conn| fetch_contact_request(conn, id))
    }

    pub fn update_contact_request(&self, id: &str, update: &UpdateContactRequest) -> Result<MutatedRequest> {
        self.with_conn(|conn| apply_update(conn, id, update))
    }

    /// Assigns (or unassigns with `None`) a handler.
    pub fn assign_contact_request(&self, id: &str, assignee: Option<&str>) -> Result<MutatedRequest> {
        self.with_conn(|conn| apply_assign(conn, id, assignee))
    }

    pub fn soft_delete_contact_request(&self, id: &str) -> Result<MutatedRequest> {
        self.with_conn(|conn| set_deleted(conn, id, true))
    }

    pub fn restore_contact_request(&self, id: &str) -> Result<MutatedRequest> {
        self.with_conn(|conn| set_deleted(conn, id, false))
    }

    pub fn hard_delete_contact_request(&self, id: &str) -> Result<Option<PreviousStatus>> {
        self.with_conn(|conn| delete_row(conn, TABLE, id))
    }

    pub fn bulk_contact_requests(&self, req: &BulkRequest) -> Result<BulkOutcome<ContactRequestRow>> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let outcome = match req.action {
                BulkAction::HardDelete => {
                    let mut removed = Vec::new();
                    for id in &req.ids {
                        if let Some(prev) = delete_row(&tx, TABLE, id)? {
                            removed.push((id.clone(), prev));
                        }
                    }
                    BulkOutcome::Removed(removed)
                }
                BulkAction::Restore => {
                    let mut rows = Vec::new();
                    for id in &req.ids {
                        match set_deleted(&tx, id, false) {
                            Ok(Some(m)) if m.applied => rows.push(m),
                            Ok(_) => {}
                            Err(e) => warn!("Bulk restore skipped contact request {}: {}", id, e),
                        }
                    }
                    BulkOutcome::Updated(rows)
                }
                action => {
                    let update = match action {
                        BulkAction::MarkRead => Some(UpdateContactRequest {
                            is_read: Some(true),
                            ..Default::default()
                        }),
                        BulkAction::MarkUnread => Some(UpdateContactRequest {
                            is_read: Some(false),
                            ..Default::default()
                        }),
                        BulkAction::SetStatus => Some(UpdateContactRequest {
                            status: Some(req.status.ok_or_else(|| {
                                QueryError::MissingField(action.as_str().to_string(), "status")
                            })?),
                            ..Default::default()
                        }),
                        BulkAction::Delete | BulkAction::Assign => None,
                        other => {
                            return Err(QueryError::UnsupportedAction(other.as_str().to_string()).into());
                        }
                    };
                    let mut rows = Vec::new();
                    for id in &req.ids {
                        let mutated = match (&update, action) {
                            (Some(update), _) => apply_update(&tx, id, update)?,
                            (None, BulkAction::Delete) => set_deleted(&tx, id, true)?,
                            (None, _) => apply_assign(&tx, id, req.assigned_to_id.as_deref())?,
                        };
                        rows.extend(mutated.filter(|m| m.applied));
                    }
                    BulkOutcome::Updated(rows)
                }
            };
            tx.commit()?;
            Ok(outcome)
        })
    }
}

impl Database {
    /// Counts of live requests per status, for the dashboard badges.
    pub fn count_contact_requests_by_status(&self) -> Result<Vec<(ContactRequestStatus, u64)>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT status, COUNT(*) FROM contact_requests WHERE deleted_at IS NULL GROUP BY status",
            )?;
            let rows = stmt
                .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows
                .into_iter()
                .filter_map(|(status, count)| match status.parse() {
                    Ok(status) => Some((status, count as u64)),
                    Err(e) => {
                        warn!("Skipping corrupt status count: {}", e);
                        None
                    }
                })
                .collect())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use beacon_types::models::{Priority, Role, StatusView};

    fn request(name: &str, subject: &str) -> CreateContactRequest {
        CreateContactRequest {
            name: name.to_string(),
            email: format!("{}@example.com", name.to_lowercase()),
            phone: None,
            subject: subject.to_string(),
            content: "Please get back to me".to_string(),
        }
    }

    fn seed() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.create_user("s1", "sam", "hash", Role::Support).unwrap();
        db.create_contact_request("r1", &request("Ann", "Billing")).unwrap();
        db.create_contact_request("r2", &request("Ben", "Bug report")).unwrap();
        db.create_contact_request("r3", &request("Cat", "Partnership")).unwrap();
        db
    }

    #[test]
    fn new_requests_default_to_new_and_unread() {
        let db = seed();
        let row = db.get_contact_request("r1").unwrap().unwrap();
        assert_eq!(row.status, ContactRequestStatus::New);
        assert_eq!(row.priority, Priority::Medium);
        assert!(!row.is_read);
        assert_eq!(row.email, "ann@example.com");
    }

    #[test]
    fn assignment_moves_new_request_in_progress() {
        let db = seed();
        let mutated = db.assign_contact_request("r2", Some("s1")).unwrap().unwrap();
        assert_eq!(mutated.row.assigned_to_name.as_deref(), Some("sam"));
        assert_eq!(mutated.row.status, ContactRequestStatus::InProgress);

        let in_progress = db
            .list_contact_requests(
                &ListParams::default().with_status(StatusView::Custom("IN_PROGRESS".into())),
            )
            .unwrap();
        assert_eq!(in_progress.total, 1);
        assert_eq!(in_progress.rows[0].id, "r2");

        let unassigned = db.assign_contact_request("r2", None).unwrap().unwrap();
        assert!(unassigned.row.assigned_to_id.is_none());
        assert_eq!(unassigned.row.status, ContactRequestStatus::InProgress);
    }

    #[test]
    fn bulk_mark_read_and_filter() {
        let db = seed();
        let outcome = db
            .bulk_contact_requests(&BulkRequest {
                action: BulkAction::MarkRead,
                ids: vec!["r1".into(), "r3".into()],
                status: None,
                assigned_to_id: None,
            })
            .unwrap();
        assert_eq!(outcome.affected(), 2);

        let unread = db
            .list_contact_requests(&ListParams::default().with_filter("isRead", "false"))
            .unwrap();
        assert_eq!(unread.total, 1);
        assert_eq!(unread.rows[0].id, "r2");
    }

    #[test]
    fn bulk_set_status_requires_status() {
        let db = seed();
        let err = db
            .bulk_contact_requests(&BulkRequest {
                action: BulkAction::SetStatus,
                ids: vec!["r1".into()],
                status: None,
                assigned_to_id: None,
            })
            .unwrap_err();
        assert_eq!(
            err.downcast_ref::<QueryError>(),
            Some(&QueryError::MissingField("set-status".into(), "status"))
        );
    }

    #[test]
    fn status_counts_skip_deleted() {
        let db = seed();
        db.soft_delete_contact_request("r3").unwrap();
        db.update_contact_request(
            "r1",
            &UpdateContactRequest {
                status: Some(ContactRequestStatus::Resolved),
                ..Default::default()
            },
        )
        .unwrap();
        let mut counts = db.count_contact_requests_by_status().unwrap();
        counts.sort_by_key(|(s, _)| s.as_str());
        assert_eq!(
            counts,
            vec![
                (ContactRequestStatus::New, 1),
                (ContactRequestStatus::Resolved, 1),
            ]
        );
    }
}
