use std::sync::Arc;

use tracing::debug;

use beacon_types::events::{RowBatch, RowRemove, RowUpsert, SocketEvent};
use beacon_types::models::{CommentRow, ContactRequestRow};

use crate::bus::{EventSource, Subscription};
use crate::chat::{ChatStore, InsertOutcome};
use crate::reconcile::SyncRow;
use crate::resource::ResourceSync;

/// A row type with socket events of its own.
pub trait BridgedRow: SyncRow {
    const UPSERT_EVENTS: &'static [&'static str];
    const BATCH_EVENT: &'static str;
    const REMOVE_EVENT: &'static str;

    fn upsert_payload(event: &SocketEvent) -> Option<&RowUpsert<Self>>;
    fn batch_payload(event: &SocketEvent) -> Option<&RowBatch<Self>>;
    fn remove_payload(event: &SocketEvent) -> Option<&RowRemove>;
}

impl BridgedRow for CommentRow {
    const UPSERT_EVENTS: &'static [&'static str] = &[SocketEvent::COMMENT_UPSERT];
    const BATCH_EVENT: &'static str = SocketEvent::COMMENT_BATCH_UPSERT;
    const REMOVE_EVENT: &'static str = SocketEvent::COMMENT_REMOVE;

    fn upsert_payload(event: &SocketEvent) -> Option<&RowUpsert<Self>> {
        match event {
            SocketEvent::CommentUpsert(payload) => Some(payload),
            _ => None,
        }
    }

    fn batch_payload(event: &SocketEvent) -> Option<&RowBatch<Self>> {
        match event {
            SocketEvent::CommentBatchUpsert(payload) => Some(payload),
            _ => None,
        }
    }

    fn remove_payload(event: &SocketEvent) -> Option<&RowRemove> {
        match event {
            SocketEvent::CommentRemove(payload) => Some(payload),
            _ => None,
        }
    }
}

impl BridgedRow for ContactRequestRow {
    const UPSERT_EVENTS: &'static [&'static str] = &[
        SocketEvent::CONTACT_REQUEST_NEW,
        SocketEvent::CONTACT_REQUEST_UPSERT,
        SocketEvent::CONTACT_REQUEST_ASSIGNED,
    ];
    const BATCH_EVENT: &'static str = SocketEvent::CONTACT_REQUEST_BATCH_UPSERT;
    const REMOVE_EVENT: &'static str = SocketEvent::CONTACT_REQUEST_REMOVE;

    fn upsert_payload(event: &SocketEvent) -> Option<&RowUpsert<Self>> {
        match event {
            SocketEvent::ContactRequestNew(payload)
            | SocketEvent::ContactRequestUpsert(payload)
            | SocketEvent::ContactRequestAssigned(payload) => Some(payload),
            _ => None,
        }
    }

    fn batch_payload(event: &SocketEvent) -> Option<&RowBatch<Self>> {
        match event {
            SocketEvent::ContactRequestBatchUpsert(payload) => Some(payload),
            _ => None,
        }
    }

    fn remove_payload(event: &SocketEvent) -> Option<&RowRemove> {
        match event {
            SocketEvent::ContactRequestRemove(payload) => Some(payload),
            _ => None,
        }
    }
}

/// Patches one resource's caches from its socket events for as long as it
/// is alive.
pub struct ResourceBridge<R: BridgedRow> {
    sync: Arc<ResourceSync<R>>,
    _subscriptions: Vec<Subscription>,
}

pub type CommentBridge = ResourceBridge<CommentRow>;
pub type ContactRequestBridge = ResourceBridge<ContactRequestRow>;

impl<R: BridgedRow> ResourceBridge<R> {
    pub fn attach(source: &dyn EventSource, sync: Arc<ResourceSync<R>>) -> Self {
        let mut subscriptions = Vec::with_capacity(R::UPSERT_EVENTS.len() + 2);

        for &name in R::UPSERT_EVENTS {
            let sync = sync.clone();
            subscriptions.push(source.on(
                name,
                Arc::new(move |event: &SocketEvent| {
                    if let Some(payload) = R::upsert_payload(event) {
                        sync.apply_upsert(&payload.row, payload.previous_status);
                    }
                }),
            ));
        }

        let batch_sync = sync.clone();
        subscriptions.push(source.on(
            R::BATCH_EVENT,
            Arc::new(move |event: &SocketEvent| {
                if let Some(payload) = R::batch_payload(event) {
                    batch_sync.apply_batch(&payload.rows, payload.previous_status);
                }
            }),
        ));

        let remove_sync = sync.clone();
        subscriptions.push(source.on(
            R::REMOVE_EVENT,
            Arc::new(move |event: &SocketEvent| {
                if let Some(payload) = R::remove_payload(event) {
                    remove_sync.apply_remove(&payload.id, payload.previous_status);
                }
            }),
        ));

        debug!("bridge: attached {} ({} events)", sync.namespace(), subscriptions.len());
        Self {
            sync,
            _subscriptions: subscriptions,
        }
    }

    pub fn sync(&self) -> &Arc<ResourceSync<R>> {
        &self.sync
    }
}

fn listen(
    source: &dyn EventSource,
    store: &Arc<ChatStore>,
    name: &'static str,
    handle: fn(&ChatStore, &SocketEvent),
) -> Subscription {
    let store = store.clone();
    source.on(name, Arc::new(move |event: &SocketEvent| handle(&store, event)))
}

/// Patches the chat sidebar from message and group events.
pub struct ChatBridge {
    store: Arc<ChatStore>,
    _subscriptions: Vec<Subscription>,
}

impl ChatBridge {
    pub fn attach(source: &dyn EventSource, store: Arc<ChatStore>) -> Self {
        let subscriptions = vec![
            listen(source, &store, SocketEvent::MESSAGE_NEW, |store, event| {
                if let SocketEvent::MessageNew(payload) = event {
                    if store.insert_message(payload.message.clone()) == InsertOutcome::UnknownConversation {
                        store.invalidate();
                    }
                }
            }),
            listen(source, &store, SocketEvent::MESSAGE_UPDATED, |store, event| {
                if let SocketEvent::MessageUpdated(payload) = event {
                    store.apply_message_update(payload);
                }
            }),
            listen(source, &store, SocketEvent::MESSAGE_DELETED, |store, event| {
                if let SocketEvent::MessageDeleted(payload) = event {
                    store.remove_message(payload);
                }
            }),
            listen(source, &store, SocketEvent::GROUP_UPDATED, |store, event| {
                if let SocketEvent::GroupUpdated(payload) = event {
                    store.apply_group_update(&payload.group);
                }
            }),
            listen(source, &store, SocketEvent::GROUP_DELETED, |store, event| {
                if let SocketEvent::GroupDeleted(payload) = event {
                    store.remove_group(&payload.id);
                }
            }),
            listen(source, &store, SocketEvent::GROUP_RESTORED, |store, event| {
                if let SocketEvent::GroupRestored(payload) = event {
                    store.restore_group(&payload.group);
                }
            }),
        ];

        debug!("bridge: attached chat for {}", store.viewer_id());
        Self {
            store,
            _subscriptions: subscriptions,
        }
    }

    pub fn store(&self) -> &Arc<ChatStore> {
        &self.store
    }
}
