mod chat;
mod comments;
mod contact_requests;
pub(crate) mod list;
mod users;

use anyhow::Result;
use rusqlite::Connection;
use rusqlite::types::Value;
use thiserror::Error;

use beacon_types::models::PreviousStatus;

use crate::mappers::{now_ts, parse_ts};
use crate::models::Mutated;

/// Rejections of caller-supplied list parameters. Handlers map these to
/// validation errors rather than server errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryError {
    #[error("unknown filter field '{0}'")]
    UnknownFilter(String),

    #[error("invalid value {value:?} for filter '{field}'")]
    InvalidFilterValue { field: String, value: String },

    #[error("unknown sort field '{0}'")]
    UnknownSort(String),

    #[error("status view '{0}' is not supported here")]
    UnknownStatus(String),

    #[error("bulk action '{0}' is not supported here")]
    UnsupportedAction(String),

    #[error("bulk action '{0}' requires '{1}'")]
    MissingField(String, &'static str),
}

/// Extension trait for optional query results
pub(crate) trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// Builds `?1, ?2, ...` for an IN clause of `n` values.
pub(crate) fn placeholders(n: usize) -> String {
    (1..=n)
        .map(|i| format!("?{}", i))
        .collect::<Vec<_>>()
        .join(", ")
}

fn previous_status(conn: &Connection, table: &str, id: &str) -> Result<Option<PreviousStatus>> {
    let deleted_at: Option<Option<String>> = conn
        .query_row(
            &format!("SELECT deleted_at FROM {} WHERE id = ?1", table),
            [id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(deleted_at.map(|d| PreviousStatus::of(d.as_deref().map(parse_ts))))
}

/// Applies `set` to one row, bumping `updated_at` and `version`, and returns
/// the re-read row with its soft-delete state before the update.
///
/// Placeholders in `set` start at `?2`; `?1` is the id. When `guard` does
/// not hold the row is returned untouched with `applied` unset.
pub(crate) fn mutate_row<R>(
    conn: &Connection,
    table: &str,
    id: &str,
    set: &str,
    mut values: Vec<Value>,
    guard: Option<&str>,
    fetch: fn(&Connection, &str) -> Result<Option<R>>,
) -> Result<Option<Mutated<R>>> {
    let Some(previous_status) = previous_status(conn, table, id)? else {
        return Ok(None);
    };

    let ts_idx = values.len() + 2;
    let sql = format!(
        "UPDATE {} SET {}, updated_at = ?{}, version = version + 1 WHERE id = ?1{}",
        table,
        set,
        ts_idx,
        guard.map(|g| format!(" AND {}", g)).unwrap_or_default(),
    );
    values.insert(0, Value::Text(id.to_string()));
    values.push(Value::Text(now_ts()));
    let changed = conn.execute(&sql, rusqlite::params_from_iter(values.iter()))?;

    Ok(fetch(conn, id)?.map(|row| Mutated {
        row,
        previous_status,
        applied: changed > 0,
    }))
}

/// Irreversibly removes one row. Returns its soft-delete state, or `None`
/// when the row did not exist.
pub(crate) fn delete_row(conn: &Connection, table: &str, id: &str) -> Result<Option<PreviousStatus>> {
    let Some(previous_status) = previous_status(conn, table, id)? else {
        return Ok(None);
    };
    conn.execute(&format!("DELETE FROM {} WHERE id = ?1", table), [id])?;
    Ok(Some(previous_status))
}
