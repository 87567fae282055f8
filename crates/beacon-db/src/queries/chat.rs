use std::collections::{BTreeSet, HashMap};

use anyhow::{Result, anyhow};
use rusqlite::Connection;
use rusqlite::types::Value;

use beacon_types::models::{Contact, ContactKind, Message, PreviousStatus, ReadState};

use super::{OptionalExt, mutate_row, placeholders};
use crate::Database;
use crate::mappers::{MESSAGE_COLUMNS, MESSAGE_FROM, message_from_row, now_ts, parse_ts};
use crate::models::Mutated;

fn fetch_group(conn: &Connection, id: &str) -> Result<Option<Contact>> {
    let group = conn
        .query_row(
            "SELECT id, name, deleted_at, version FROM chat_groups WHERE id = ?1",
            [id],
            |row| {
                Ok(Contact {
                    id: row.get(0)?,
                    kind: ContactKind::Group,
                    name: row.get(1)?,
                    member_ids: Vec::new(),
                    unread_count: 0,
                    messages: Vec::new(),
                    deleted_at: row.get::<_, Option<String>>(2)?.as_deref().map(parse_ts),
                    version: row.get::<_, i64>(3)? as u64,
                })
            },
        )
        .optional()?;

    match group {
        Some(mut group) => {
            group.member_ids = query_member_ids(conn, id)?;
            Ok(Some(group))
        }
        None => Ok(None),
    }
}

fn query_member_ids(conn: &Connection, group_id: &str) -> Result<Vec<String>> {
    let mut stmt =
        conn.prepare("SELECT user_id FROM group_members WHERE group_id = ?1 ORDER BY user_id")?;
    let ids = stmt
        .query_map([group_id], |row| row.get(0))?
        .collect::<std::result::Result<Vec<String>, _>>()?;
    Ok(ids)
}

fn is_group(conn: &Connection, id: &str) -> Result<bool> {
    Ok(conn
        .query_row("SELECT 1 FROM chat_groups WHERE id = ?1", [id], |_| Ok(()))
        .optional()?
        .is_some())
}

fn fetch_message(conn: &Connection, id: &str) -> Result<Option<Message>> {
    let message = conn
        .query_row(
            &format!("SELECT {} FROM {} WHERE m.id = ?1", MESSAGE_COLUMNS, MESSAGE_FROM),
            [id],
            message_from_row,
        )
        .optional()?;
    match message {
        Some(message) => {
            let mut messages = vec![message];
            attach_readers(conn, &mut messages)?;
            Ok(messages.pop())
        }
        None => Ok(None),
    }
}

/// Fills `readers` on group messages with one batched query.
fn attach_readers(conn: &Connection, messages: &mut [Message]) -> Result<()> {
    let group_ids: Vec<&str> = messages
        .iter()
        .filter(|m| m.read_state.is_group())
        .map(|m| m.id.as_str())
        .collect();
    if group_ids.is_empty() {
        return Ok(());
    }

    let sql = format!(
        "SELECT message_id, user_id FROM message_reads WHERE message_id IN ({})",
        placeholders(group_ids.len())
    );
    let mut stmt = conn.prepare(&sql)?;
    let pairs = stmt
        .query_map(rusqlite::params_from_iter(group_ids.iter()), |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut readers: HashMap<String, BTreeSet<String>> = HashMap::new();
    for (message_id, user_id) in pairs {
        readers.entry(message_id).or_default().insert(user_id);
    }

    for message in messages.iter_mut() {
        if message.read_state.is_group() {
            message.read_state = ReadState::Group {
                readers: readers.remove(&message.id).unwrap_or_default(),
            };
        }
    }
    Ok(())
}

fn query_conversation(
    conn: &Connection,
    viewer: &str,
    contact_id: &str,
    limit: u32,
) -> Result<Vec<Message>> {
    let (filter, params): (&str, Vec<Value>) = if is_group(conn, contact_id)? {
        ("m.group_id = ?1", vec![Value::Text(contact_id.to_string())])
    } else {
        (
            "m.group_id IS NULL AND ((m.sender_id = ?1 AND m.receiver_id = ?2) \
             OR (m.sender_id = ?2 AND m.receiver_id = ?1))",
            vec![
                Value::Text(viewer.to_string()),
                Value::Text(contact_id.to_string()),
            ],
        )
    };

    let sql = format!(
        "SELECT {} FROM {} WHERE {} AND m.deleted_at IS NULL \
         ORDER BY m.created_at DESC, m.id DESC LIMIT {}",
        MESSAGE_COLUMNS, MESSAGE_FROM, filter, limit
    );
    let mut stmt = conn.prepare(&sql)?;
    let mut messages = stmt
        .query_map(rusqlite::params_from_iter(params.iter()), message_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    // Newest-first for the LIMIT, oldest-first for display.
    messages.reverse();
    attach_readers(conn, &mut messages)?;
    Ok(messages)
}

fn set_group_deleted(conn: &Connection, id: &str, deleted: bool) -> Result<Option<Mutated<Contact>>> {
    if deleted {
        mutate_row(
            conn,
            "chat_groups",
            id,
            "deleted_at = ?2",
            vec![Value::Text(now_ts())],
            Some("deleted_at IS NULL"),
            fetch_group,
        )
    } else {
        mutate_row(
            conn,
            "chat_groups",
            id,
            "deleted_at = NULL",
            vec![],
            Some("deleted_at IS NOT NULL"),
            fetch_group,
        )
    }
}

impl Database {
    // -- Groups --

    pub fn create_group(
        &self,
        id: &str,
        name: &str,
        created_by: &str,
        member_ids: &[String],
    ) -> Result<Contact> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let now = now_ts();
            tx.execute(
                "INSERT INTO chat_groups (id, name, created_by, created_at, updated_at) VALUES (?1, ?2, ?3, ?4, ?4)",
                (id, name, created_by, &now),
            )?;
            tx.execute(
                "INSERT OR IGNORE INTO group_members (group_id, user_id) VALUES (?1, ?2)",
                (id, created_by),
            )?;
            for member in member_ids {
                tx.execute(
                    "INSERT OR IGNORE INTO group_members (group_id, user_id) VALUES (?1, ?2)",
                    (id, member),
                )?;
            }
            let group = fetch_group(&tx, id)?.ok_or_else(|| anyhow!("Group vanished after insert: {}", id))?;
            tx.commit()?;
            Ok(group)
        })
    }

    pub fn get_group(&self, id: &str) -> Result<Option<Contact>> {
        self.with_conn(|conn| fetch_group(conn, id))
    }

    pub fn group_member_ids(&self, group_id: &str) -> Result<Vec<String>> {
        self.with_conn(|conn| query_member_ids(conn, group_id))
    }

    pub fn is_group_member(&self, group_id: &str, user_id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            Ok(conn
                .query_row(
                    "SELECT 1 FROM group_members WHERE group_id = ?1 AND user_id = ?2",
                    [group_id, user_id],
                    |_| Ok(()),
                )
                .optional()?
                .is_some())
        })
    }

    pub fn is_group(&self, id: &str) -> Result<bool> {
        self.with_conn(|conn| is_group(conn, id))
    }

    pub fn rename_group(&self, id: &str, name: &str) -> Result<Option<Mutated<Contact>>> {
        self.with_conn(|conn| {
            mutate_row(
                conn,
                "chat_groups",
                id,
                "name = ?2",
                vec![Value::Text(name.to_string())],
                None,
                fetch_group,
            )
        })
    }

    pub fn soft_delete_group(&self, id: &str) -> Result<Option<Mutated<Contact>>> {
        self.with_conn(|conn| set_group_deleted(conn, id, true))
    }

    pub fn restore_group(&self, id: &str) -> Result<Option<Mutated<Contact>>> {
        self.with_conn(|conn| set_group_deleted(conn, id, false))
    }

    // -- Contacts --

    /// Every conversation `viewer` can see: one personal contact per other
    /// user and every live group they belong to, each with its latest
    /// `message_limit` messages.
    pub fn list_contacts(&self, viewer: &str, message_limit: u32) -> Result<Vec<Contact>> {
        self.with_conn(|conn| {
            let mut contacts = Vec::new();

            let mut stmt = conn.prepare("SELECT id, username FROM users WHERE id <> ?1 ORDER BY username")?;
            let users = stmt
                .query_map([viewer], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            for (user_id, username) in users {
                contacts.push(Contact {
                    messages: query_conversation(conn, viewer, &user_id, message_limit)?,
                    member_ids: vec![viewer.to_string(), user_id.clone()],
                    id: user_id,
                    kind: ContactKind::Personal,
                    name: username,
                    unread_count: 0,
                    deleted_at: None,
                    version: 0,
                });
            }

            let mut stmt = conn.prepare(
                "SELECT g.id FROM chat_groups g JOIN group_members gm ON gm.group_id = g.id
                 WHERE gm.user_id = ?1 AND g.deleted_at IS NULL ORDER BY g.name",
            )?;
            let group_ids = stmt
                .query_map([viewer], |row| row.get::<_, String>(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            for group_id in group_ids {
                if let Some(mut group) = fetch_group(conn, &group_id)? {
                    group.messages = query_conversation(conn, viewer, &group_id, message_limit)?;
                    contacts.push(group);
                }
            }

            for contact in &mut contacts {
                contact.recompute_unread(viewer);
            }
            Ok(contacts)
        })
    }

    pub fn get_conversation_messages(&self, viewer: &str, contact_id: &str, limit: u32) -> Result<Vec<Message>> {
        self.with_conn(|conn| query_conversation(conn, viewer, contact_id, limit))
    }

    // -- Messages --

    pub fn insert_personal_message(&self, id: &str, sender_id: &str, receiver_id: &str, content: &str) -> Result<Message> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO messages (id, sender_id, receiver_id, content, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
                (id, sender_id, receiver_id, content, now_ts()),
            )?;
            fetch_message(conn, id)?.ok_or_else(|| anyhow!("Message vanished after insert: {}", id))
        })
    }

    pub fn insert_group_message(&self, id: &str, sender_id: &str, group_id: &str, content: &str) -> Result<Message> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO messages (id, sender_id, group_id, content, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
                (id, sender_id, group_id, content, now_ts()),
            )?;
            fetch_message(conn, id)?.ok_or_else(|| anyhow!("Message vanished after insert: {}", id))
        })
    }

    pub fn get_message(&self, id: &str) -> Result<Option<Message>> {
        self.with_conn(|conn| fetch_message(conn, id))
    }

    /// Records that `viewer` read the given messages. Personal messages flip
    /// their flag when `viewer` is the receiver; group messages gain `viewer`
    /// as a reader when they are a member and not the sender. Returns only
    /// the messages whose read state changed.
    pub fn mark_messages_read(&self, viewer: &str, ids: &[String]) -> Result<Vec<Message>> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let mut changed = Vec::new();
            let now = now_ts();

            for id in ids {
                let Some(message) = fetch_message(&tx, id)? else {
                    continue;
                };
                if message.deleted_at.is_some() || message.sender_id == viewer {
                    continue;
                }

                let updated = match &message.group_id {
                    Some(group_id) => {
                        let member = tx
                            .query_row(
                                "SELECT 1 FROM group_members WHERE group_id = ?1 AND user_id = ?2",
                                [group_id.as_str(), viewer],
                                |_| Ok(()),
                            )
                            .optional()?
                            .is_some();
                        member
                            && tx.execute(
                                "INSERT OR IGNORE INTO message_reads (message_id, user_id, read_at) VALUES (?1, ?2, ?3)",
                                (id, viewer, &now),
                            )? > 0
                    }
                    None => {
                        message.receiver_id.as_deref() == Some(viewer)
                            && tx.execute(
                                "UPDATE messages SET is_read = 1 WHERE id = ?1 AND is_read = 0",
                                [id],
                            )? > 0
                    }
                };

                if updated {
                    if let Some(message) = fetch_message(&tx, id)? {
                        changed.push(message);
                    }
                }
            }

            tx.commit()?;
            Ok(changed)
        })
    }

    pub fn soft_delete_message(&self, id: &str) -> Result<Option<(Message, PreviousStatus)>> {
        self.with_conn(|conn| {
            let Some(before) = fetch_message(conn, id)? else {
                return Ok(None);
            };
            conn.execute(
                "UPDATE messages SET deleted_at = ?2 WHERE id = ?1 AND deleted_at IS NULL",
                (id, now_ts()),
            )?;
            let previous = PreviousStatus::of(before.deleted_at);
            Ok(fetch_message(conn, id)?.map(|m| (m, previous)))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use beacon_types::models::Role;

    fn seed() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.create_user("a", "alice", "hash", Role::Admin).unwrap();
        db.create_user("b", "bob", "hash", Role::Editor).unwrap();
        db.create_user("c", "carol", "hash", Role::Support).unwrap();
        db.create_group("g1", "Moderators", "a", &["b".to_string()]).unwrap();
        db
    }

    #[test]
    fn personal_read_flag_only_flips_for_receiver() {
        let db = seed();
        db.insert_personal_message("m1", "a", "b", "hi bob").unwrap();

        // Sender marking their own message is a no-op
        assert!(db.mark_messages_read("a", &["m1".to_string()]).unwrap().is_empty());

        let changed = db.mark_messages_read("b", &["m1".to_string()]).unwrap();
        assert_eq!(changed.len(), 1);
        assert_eq!(changed[0].read_state, ReadState::Personal { is_read: true });

        // Second mark changes nothing
        assert!(db.mark_messages_read("b", &["m1".to_string()]).unwrap().is_empty());
    }

    #[test]
    fn group_reads_accumulate_readers() {
        let db = seed();
        db.insert_group_message("m1", "b", "g1", "hello team").unwrap();

        // Non-members cannot mark group messages
        assert!(db.mark_messages_read("c", &["m1".to_string()]).unwrap().is_empty());

        let changed = db.mark_messages_read("a", &["m1".to_string()]).unwrap();
        assert_eq!(changed.len(), 1);
        assert!(changed[0].read_state.is_read_by("a"));
        assert!(!changed[0].read_state.is_read_by("c"));
    }

    #[test]
    fn contacts_carry_unread_counts() {
        let db = seed();
        db.insert_personal_message("m1", "b", "a", "ping").unwrap();
        db.insert_personal_message("m2", "b", "a", "ping again").unwrap();
        db.insert_group_message("m3", "b", "g1", "standup?").unwrap();

        let contacts = db.list_contacts("a", 50).unwrap();
        let bob = contacts.iter().find(|c| c.id == "b").unwrap();
        assert_eq!(bob.kind, ContactKind::Personal);
        assert_eq!(bob.messages.len(), 2);
        assert_eq!(bob.unread_count, 2);

        let group = contacts.iter().find(|c| c.id == "g1").unwrap();
        assert_eq!(group.member_ids, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(group.unread_count, 1);

        // carol is not in the group
        let carol_contacts = db.list_contacts("c", 50).unwrap();
        assert!(carol_contacts.iter().all(|c| c.id != "g1"));
    }

    #[test]
    fn deleted_groups_drop_out_of_contacts_until_restored() {
        let db = seed();
        let deleted = db.soft_delete_group("g1").unwrap().unwrap();
        assert_eq!(deleted.previous_status, PreviousStatus::Active);
        assert!(db.list_contacts("a", 10).unwrap().iter().all(|c| c.id != "g1"));

        let restored = db.restore_group("g1").unwrap().unwrap();
        assert_eq!(restored.row.version, 3);
        assert!(db.list_contacts("a", 10).unwrap().iter().any(|c| c.id == "g1"));
    }
}
