//! Conversions from SQLite rows into the display rows of beacon-types.

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::Row;
use tracing::warn;

use beacon_types::models::{CommentRow, ContactRequestRow, Message, ReadState};

pub fn now_ts() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn parse_ts(raw: &str) -> DateTime<Utc> {
    raw.parse::<DateTime<Utc>>()
        .or_else(|_| {
            // Rows written by hand in sqlite3 use "YYYY-MM-DD HH:MM:SS" without timezone.
            chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S").map(|ndt| ndt.and_utc())
        })
        .unwrap_or_else(|e| {
            warn!("Corrupt timestamp '{}': {}", raw, e);
            DateTime::default()
        })
}

fn opt_ts(raw: Option<String>) -> Option<DateTime<Utc>> {
    raw.as_deref().map(parse_ts)
}

fn parse_enum<T: std::str::FromStr>(raw: &str, fallback: T, id: &str) -> T {
    raw.parse().unwrap_or_else(|_| {
        warn!("Corrupt enum value '{}' on row '{}'", raw, id);
        fallback
    })
}

pub const COMMENT_COLUMNS: &str = "c.id, c.content, c.post_id, p.title, c.author_id, u.username, \
     c.parent_id, c.approved, c.created_at, c.updated_at, c.deleted_at, c.version";

pub const COMMENT_FROM: &str =
    "comments c JOIN users u ON u.id = c.author_id JOIN posts p ON p.id = c.post_id";

pub fn comment_from_row(row: &Row<'_>) -> rusqlite::Result<CommentRow> {
    Ok(CommentRow {
        id: row.get(0)?,
        content: row.get(1)?,
        post_id: row.get(2)?,
        post_title: row.get(3)?,
        author_id: row.get(4)?,
        author_name: row.get(5)?,
        parent_id: row.get(6)?,
        approved: row.get(7)?,
        created_at: parse_ts(&row.get::<_, String>(8)?),
        updated_at: parse_ts(&row.get::<_, String>(9)?),
        deleted_at: opt_ts(row.get(10)?),
        version: row.get::<_, i64>(11)? as u64,
    })
}

pub const CONTACT_REQUEST_COLUMNS: &str = "r.id, r.name, r.email, r.phone, r.subject, r.content, \
     r.status, r.priority, r.is_read, r.assigned_to_id, a.username, \
     r.created_at, r.updated_at, r.deleted_at, r.version";

pub const CONTACT_REQUEST_FROM: &str =
    "contact_requests r LEFT JOIN users a ON a.id = r.assigned_to_id";

pub fn contact_request_from_row(row: &Row<'_>) -> rusqlite::Result<ContactRequestRow> {
    let id: String = row.get(0)?;
    let status: String = row.get(6)?;
    let priority: String = row.get(7)?;
    Ok(ContactRequestRow {
        name: row.get(1)?,
        email: row.get(2)?,
        phone: row.get(3)?,
        subject: row.get(4)?,
        content: row.get(5)?,
        status: parse_enum(&status, beacon_types::models::ContactRequestStatus::New, &id),
        priority: parse_enum(&priority, beacon_types::models::Priority::Medium, &id),
        is_read: row.get(8)?,
        assigned_to_id: row.get(9)?,
        assigned_to_name: row.get(10)?,
        created_at: parse_ts(&row.get::<_, String>(11)?),
        updated_at: parse_ts(&row.get::<_, String>(12)?),
        deleted_at: opt_ts(row.get(13)?),
        version: row.get::<_, i64>(14)? as u64,
        id,
    })
}

pub const MESSAGE_COLUMNS: &str = "m.id, m.sender_id, u.username, m.receiver_id, m.group_id, \
     m.content, m.is_read, m.created_at, m.deleted_at";

pub const MESSAGE_FROM: &str = "messages m LEFT JOIN users u ON u.id = m.sender_id";

/// Maps a message row. Group read state starts empty and is filled from
/// `message_reads` by the caller.
pub fn message_from_row(row: &Row<'_>) -> rusqlite::Result<Message> {
    let group_id: Option<String> = row.get(4)?;
    let is_read: bool = row.get(6)?;
    let read_state = if group_id.is_some() {
        ReadState::empty_group()
    } else {
        ReadState::Personal { is_read }
    };
    Ok(Message {
        id: row.get(0)?,
        client_id: None,
        sender_id: row.get(1)?,
        sender_name: row
            .get::<_, Option<String>>(2)?
            .unwrap_or_else(|| "unknown".to_string()),
        receiver_id: row.get(3)?,
        group_id,
        content: row.get(5)?,
        created_at: parse_ts(&row.get::<_, String>(7)?),
        read_state,
        pending: false,
        deleted_at: opt_ts(row.get(8)?),
    })
}
