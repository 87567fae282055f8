use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::{debug, trace, warn};

use beacon_types::events::{MessageDeleted, MessageUpdated};
use beacon_types::models::{Contact, ContactKind, Message, ReadState};

use crate::cache::{MemoryQueryCache, QueryCache, QueryKey};

pub const CONTACTS_NAMESPACE: &str = "chat-contacts";

/// A pending local echo and a server message with the same content and
/// sender this close together are one message.
const DEDUP_WINDOW_MS: i64 = 2000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// Replaced the matching optimistic echo.
    Confirmed,
    Duplicate,
    /// Not a conversation the viewer has loaded.
    UnknownConversation,
}

/// Messages flipped to read by `mark_read_optimistic`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadSnapshot {
    pub contact_id: String,
    pub message_ids: Vec<String>,
}

fn within_window(a: DateTime<Utc>, b: DateTime<Utc>) -> bool {
    (a - b).num_milliseconds().abs() <= DEDUP_WINDOW_MS
}

fn echoes(pending: &Message, incoming: &Message) -> bool {
    if !pending.pending {
        return false;
    }
    if let Some(client_id) = &incoming.client_id {
        if pending.id == *client_id || pending.client_id.as_ref() == Some(client_id) {
            return true;
        }
    }
    pending.content == incoming.content
        && pending.sender_id == incoming.sender_id
        && within_window(pending.created_at, incoming.created_at)
}

fn sort_by_activity(contacts: &mut [Contact]) {
    contacts.sort_by(|a, b| b.last_activity().cmp(&a.last_activity()));
}

/// The viewer's chat sidebar: every conversation with its loaded messages.
pub struct ChatStore {
    viewer_id: String,
    viewer_name: String,
    key: QueryKey,
    cache: Arc<dyn QueryCache<Vec<Contact>>>,
    write: Mutex<()>,
    version_tx: watch::Sender<u64>,
}

impl ChatStore {
    pub fn new(viewer_id: impl Into<String>, viewer_name: impl Into<String>) -> Self {
        Self::with_cache(viewer_id, viewer_name, Arc::new(MemoryQueryCache::new()))
    }

    pub fn with_cache(
        viewer_id: impl Into<String>,
        viewer_name: impl Into<String>,
        cache: Arc<dyn QueryCache<Vec<Contact>>>,
    ) -> Self {
        let viewer_id = viewer_id.into();
        let (version_tx, _) = watch::channel(0);
        Self {
            key: QueryKey::detail(CONTACTS_NAMESPACE, viewer_id.clone()),
            viewer_id,
            viewer_name: viewer_name.into(),
            cache,
            write: Mutex::new(()),
            version_tx,
        }
    }

    pub fn viewer_id(&self) -> &str {
        &self.viewer_id
    }

    pub fn cache_version(&self) -> u64 {
        *self.version_tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.version_tx.subscribe()
    }

    fn lock(&self) -> MutexGuard<'_, ()> {
        self.write.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Runs `f` on the cached contacts and writes them back if it reports
    /// a change. A no-op when nothing is cached yet.
    fn update<T>(&self, f: impl FnOnce(&mut Vec<Contact>) -> Option<T>) -> Option<T> {
        let _guard = self.lock();
        let mut contacts = self.cache.get(&self.key)?;
        let result = f(&mut contacts)?;
        self.cache.set(self.key.clone(), contacts);
        self.version_tx.send_modify(|v| *v += 1);
        Some(result)
    }

    pub fn set_contacts(&self, mut contacts: Vec<Contact>) {
        let _guard = self.lock();
        for contact in &mut contacts {
            contact.recompute_unread(&self.viewer_id);
        }
        sort_by_activity(&mut contacts);
        self.cache.set(self.key.clone(), contacts);
        self.version_tx.send_modify(|v| *v += 1);
    }

    pub fn contacts(&self) -> Vec<Contact> {
        self.cache.get(&self.key).unwrap_or_default()
    }

    pub fn contact(&self, id: &str) -> Option<Contact> {
        self.contacts().into_iter().find(|c| c.id == id)
    }

    /// Forces the next read to refetch, e.g. after a message arrives for a
    /// conversation that is not loaded yet.
    pub fn invalidate(&self) -> bool {
        let _guard = self.lock();
        self.cache.invalidate(&self.key)
    }

    pub fn unread_total(&self) -> u32 {
        self.contacts().iter().map(|c| c.unread_count).sum()
    }

    /// Appends a pending local echo of a message the viewer is sending.
    pub fn add_optimistic(&self, contact_id: &str, content: &str, client_id: &str) -> Option<Message> {
        self.update(|contacts| {
            let contact = contacts.iter_mut().find(|c| c.id == contact_id)?;
            let (receiver_id, group_id, read_state) = match contact.kind {
                ContactKind::Personal => (Some(contact_id.to_string()), None, ReadState::unread_personal()),
                ContactKind::Group => (None, Some(contact_id.to_string()), ReadState::empty_group()),
            };
            let message = Message {
                id: client_id.to_string(),
                client_id: Some(client_id.to_string()),
                sender_id: self.viewer_id.clone(),
                sender_name: self.viewer_name.clone(),
                receiver_id,
                group_id,
                content: content.to_string(),
                created_at: Utc::now(),
                read_state,
                pending: true,
                deleted_at: None,
            };
            contact.messages.push(message.clone());
            sort_by_activity(contacts);
            Some(message)
        })
    }

    /// Drops a pending echo whose send failed.
    pub fn discard_optimistic(&self, contact_id: &str, client_id: &str) -> bool {
        self.update(|contacts| {
            let contact = contacts.iter_mut().find(|c| c.id == contact_id)?;
            let index = contact.messages.iter().position(|m| m.pending && m.id == client_id)?;
            contact.messages.remove(index);
            Some(())
        })
        .is_some()
    }

    /// Adds a server-confirmed message, folding it into its optimistic echo
    /// when there is one.
    pub fn insert_message(&self, message: Message) -> InsertOutcome {
        let Some(conversation) = message.conversation_id_for(&self.viewer_id).map(str::to_string) else {
            return InsertOutcome::UnknownConversation;
        };
        let viewer = self.viewer_id.as_str();

        let outcome = self.update(|contacts| {
            let contact = contacts.iter_mut().find(|c| c.id == conversation)?;
            if contact.messages.iter().any(|m| m.id == message.id && !m.pending) {
                return None;
            }
            let outcome = match contact.messages.iter().position(|m| echoes(m, &message)) {
                Some(index) => {
                    contact.messages[index] = Message {
                        pending: false,
                        ..message.clone()
                    };
                    InsertOutcome::Confirmed
                }
                None => {
                    contact.messages.push(Message {
                        pending: false,
                        ..message.clone()
                    });
                    InsertOutcome::Inserted
                }
            };
            contact.recompute_unread(viewer);
            sort_by_activity(contacts);
            Some(outcome)
        });

        match outcome {
            Some(outcome) => {
                trace!("chat: {:?} message {} in {}", outcome, message.id, conversation);
                outcome
            }
            None if self.contact(&conversation).is_some() => InsertOutcome::Duplicate,
            None => {
                debug!("chat: message {} for unloaded conversation {}", message.id, conversation);
                InsertOutcome::UnknownConversation
            }
        }
    }

    /// Applies the server's read state and content for one message.
    pub fn apply_message_update(&self, update: &MessageUpdated) -> bool {
        let Some(conversation) = beacon_types::models::conversation_id_for(
            &self.viewer_id,
            &update.sender_id,
            update.receiver_id.as_deref(),
            update.group_id.as_deref(),
        ) else {
            return false;
        };
        let viewer = self.viewer_id.as_str();

        self.update(|contacts| {
            let contact = contacts.iter_mut().find(|c| c.id == conversation)?;
            let message = contact.messages.iter_mut().find(|m| m.id == update.id)?;
            let mut changed = false;
            if let Some(read_state) = &update.read_state {
                if message.read_state != *read_state {
                    message.read_state = read_state.clone();
                    changed = true;
                }
            }
            if let Some(content) = &update.content {
                if message.content != *content {
                    message.content = content.clone();
                    changed = true;
                }
            }
            if !changed {
                return None;
            }
            contact.recompute_unread(viewer);
            Some(())
        })
        .is_some()
    }

    /// Flips the viewer's unread personal messages among `message_ids` to
    /// read before the server confirms. Group messages are left alone:
    /// their reader sets only ever come from the server.
    pub fn mark_read_optimistic(&self, contact_id: &str, message_ids: &[String]) -> Option<ReadSnapshot> {
        let viewer = self.viewer_id.as_str();
        self.update(|contacts| {
            let contact = contacts.iter_mut().find(|c| c.id == contact_id)?;
            let mut flipped = Vec::new();
            for message in contact.messages.iter_mut() {
                if message.sender_id == viewer || !message_ids.contains(&message.id) {
                    continue;
                }
                if let ReadState::Personal { is_read } = &mut message.read_state {
                    if !*is_read {
                        *is_read = true;
                        flipped.push(message.id.clone());
                    }
                }
            }
            if flipped.is_empty() {
                return None;
            }
            contact.recompute_unread(viewer);
            Some(ReadSnapshot {
                contact_id: contact_id.to_string(),
                message_ids: flipped,
            })
        })
    }

    /// Reverts an optimistic mark-read whose request failed.
    pub fn rollback(&self, snapshot: &ReadSnapshot) -> bool {
        let viewer = self.viewer_id.as_str();
        let reverted = self
            .update(|contacts| {
                let contact = contacts.iter_mut().find(|c| c.id == snapshot.contact_id)?;
                let mut reverted = 0;
                for message in contact.messages.iter_mut() {
                    if !snapshot.message_ids.contains(&message.id) {
                        continue;
                    }
                    if let ReadState::Personal { is_read } = &mut message.read_state {
                        if *is_read {
                            *is_read = false;
                            reverted += 1;
                        }
                    }
                }
                if reverted == 0 {
                    return None;
                }
                contact.recompute_unread(viewer);
                Some(reverted)
            })
            .is_some();
        if reverted {
            warn!("chat: rolled back read state in {}", snapshot.contact_id);
        }
        reverted
    }

    pub fn remove_message(&self, deleted: &MessageDeleted) -> bool {
        let Some(conversation) = beacon_types::models::conversation_id_for(
            &self.viewer_id,
            &deleted.sender_id,
            deleted.receiver_id.as_deref(),
            deleted.group_id.as_deref(),
        ) else {
            return false;
        };
        let viewer = self.viewer_id.as_str();

        self.update(|contacts| {
            let contact = contacts.iter_mut().find(|c| c.id == conversation)?;
            let index = contact.messages.iter().position(|m| m.id == deleted.id)?;
            contact.messages.remove(index);
            contact.recompute_unread(viewer);
            Some(())
        })
        .is_some()
    }

    /// Applies a group's new name, membership or deletion marker. A viewer
    /// no longer among the members loses the conversation.
    pub fn apply_group_update(&self, group: &Contact) -> bool {
        let viewer = self.viewer_id.as_str();
        let is_member = group.member_ids.iter().any(|m| m == viewer);

        self.update(|contacts| {
            let position = contacts.iter().position(|c| c.id == group.id);
            if let Some(index) = position
                && group.version != 0
                && contacts[index].version > group.version
            {
                trace!("chat: ignoring stale v{} of group {}", group.version, group.id);
                return None;
            }
            match (position, is_member) {
                (Some(index), false) => {
                    contacts.remove(index);
                    debug!("chat: left group {}", group.id);
                }
                (Some(index), true) => {
                    let cached = &mut contacts[index];
                    if cached.name == group.name
                        && cached.member_ids == group.member_ids
                        && cached.deleted_at == group.deleted_at
                    {
                        return None;
                    }
                    cached.name = group.name.clone();
                    cached.member_ids = group.member_ids.clone();
                    cached.deleted_at = group.deleted_at;
                    cached.version = group.version;
                }
                (None, true) => {
                    let mut added = group.clone();
                    added.recompute_unread(viewer);
                    contacts.push(added);
                    sort_by_activity(contacts);
                }
                (None, false) => return None,
            }
            Some(())
        })
        .is_some()
    }

    pub fn remove_group(&self, id: &str) -> bool {
        self.update(|contacts| {
            let index = contacts.iter().position(|c| c.id == id && c.kind == ContactKind::Group)?;
            contacts.remove(index);
            Some(())
        })
        .is_some()
    }

    pub fn restore_group(&self, group: &Contact) -> bool {
        let restored = Contact {
            deleted_at: None,
            ..group.clone()
        };
        self.apply_group_update(&restored)
    }
}
