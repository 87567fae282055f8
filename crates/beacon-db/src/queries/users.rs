use anyhow::Result;
use rusqlite::Connection;

use beacon_types::models::Role;

use super::OptionalExt;
use crate::Database;
use crate::mappers::now_ts;
use crate::models::UserRow;

impl Database {
    pub fn create_user(&self, id: &str, username: &str, password_hash: &str, role: Role) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (id, username, password, role, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
                (id, username, password_hash, role.as_str(), now_ts()),
            )?;
            Ok(())
        })
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "SELECT id, username, password, role, created_at FROM users WHERE username = ?1", username))
    }

    pub fn get_user_by_id(&self, id: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "SELECT id, username, password, role, created_at FROM users WHERE id = ?1", id))
    }

    pub fn user_count(&self) -> Result<u64> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?;
            Ok(count as u64)
        })
    }
}

fn query_user(conn: &Connection, sql: &str, value: &str) -> Result<Option<UserRow>> {
    let mut stmt = conn.prepare(sql)?;

    let row = stmt
        .query_row([value], |row| {
            Ok(UserRow {
                id: row.get(0)?,
                username: row.get(1)?,
                password: row.get(2)?,
                role: row.get(3)?,
                created_at: row.get(4)?,
            })
        })
        .optional()?;

    Ok(row)
}
