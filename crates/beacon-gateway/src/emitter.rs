use tracing::warn;
use uuid::Uuid;

use beacon_types::events::{
    GroupChanged, GroupRemoved, MessageDeleted, MessageNew, MessageUpdated, Room, RowBatch, RowRemove,
    RowUpsert, SocketEvent,
};
use beacon_types::models::{CommentRow, Contact, ContactRequestRow, Message, PreviousStatus, Role};

use crate::dispatcher::Dispatcher;

/// Staff who moderate comments.
const MODERATION_ROOMS: [Room; 2] = [Room::Role(Role::Admin), Room::Role(Role::Editor)];

/// Staff who triage contact requests.
const SUPPORT_ROOMS: [Room; 2] = [Room::Role(Role::Admin), Room::Role(Role::Support)];

fn user_rooms<'a>(user_ids: impl IntoIterator<Item = &'a str>) -> Vec<Room> {
    user_ids
        .into_iter()
        .filter_map(|id| match id.parse::<Uuid>() {
            Ok(uuid) => Some(Room::User(uuid)),
            Err(e) => {
                warn!("Skipping room for malformed user id '{}': {}", id, e);
                None
            }
        })
        .collect()
}

/// Publishes committed mutations to the rooms that display them.
#[derive(Clone)]
pub struct Emitter {
    dispatcher: Dispatcher,
}

impl Emitter {
    pub fn new(dispatcher: Dispatcher) -> Self {
        Self { dispatcher }
    }

    // -- Comments --

    pub async fn comment_upsert(&self, row: CommentRow, previous_status: Option<PreviousStatus>) {
        let event = SocketEvent::CommentUpsert(RowUpsert { row, previous_status });
        self.dispatcher.emit_many(&MODERATION_ROOMS, &event).await;
    }

    pub async fn comment_batch_upsert(&self, rows: Vec<CommentRow>, previous_status: Option<PreviousStatus>) {
        if rows.is_empty() {
            return;
        }
        let event = SocketEvent::CommentBatchUpsert(RowBatch { rows, previous_status });
        self.dispatcher.emit_many(&MODERATION_ROOMS, &event).await;
    }

    pub async fn comment_remove(&self, id: String, previous_status: Option<PreviousStatus>) {
        let event = SocketEvent::CommentRemove(RowRemove { id, previous_status });
        self.dispatcher.emit_many(&MODERATION_ROOMS, &event).await;
    }

    // -- Contact requests --

    pub async fn contact_request_new(&self, row: ContactRequestRow) {
        let event = SocketEvent::ContactRequestNew(RowUpsert {
            row,
            previous_status: None,
        });
        self.dispatcher.emit_many(&SUPPORT_ROOMS, &event).await;
    }

    pub async fn contact_request_upsert(&self, row: ContactRequestRow, previous_status: Option<PreviousStatus>) {
        let event = SocketEvent::ContactRequestUpsert(RowUpsert { row, previous_status });
        self.dispatcher.emit_many(&SUPPORT_ROOMS, &event).await;
    }

    /// Support staff see the updated row; the assignee is also told
    /// directly, even when their role would not otherwise receive it.
    pub async fn contact_request_assigned(&self, row: ContactRequestRow, previous_status: Option<PreviousStatus>) {
        let mut rooms = SUPPORT_ROOMS.to_vec();
        rooms.extend(user_rooms(row.assigned_to_id.as_deref()));
        let event = SocketEvent::ContactRequestAssigned(RowUpsert { row, previous_status });
        self.dispatcher.emit_many(&rooms, &event).await;
    }

    pub async fn contact_request_remove(&self, id: String, previous_status: Option<PreviousStatus>) {
        let event = SocketEvent::ContactRequestRemove(RowRemove { id, previous_status });
        self.dispatcher.emit_many(&SUPPORT_ROOMS, &event).await;
    }

    pub async fn contact_request_batch_upsert(
        &self,
        rows: Vec<ContactRequestRow>,
        previous_status: Option<PreviousStatus>,
    ) {
        if rows.is_empty() {
            return;
        }
        let event = SocketEvent::ContactRequestBatchUpsert(RowBatch { rows, previous_status });
        self.dispatcher.emit_many(&SUPPORT_ROOMS, &event).await;
    }

    // -- Chat --

    pub async fn message_new(&self, message: Message, participants: &[String]) {
        let rooms = user_rooms(participants.iter().map(String::as_str));
        let event = SocketEvent::MessageNew(MessageNew { message });
        self.dispatcher.emit_many(&rooms, &event).await;
    }

    pub async fn message_updated(&self, update: MessageUpdated, participants: &[String]) {
        let rooms = user_rooms(participants.iter().map(String::as_str));
        self.dispatcher
            .emit_many(&rooms, &SocketEvent::MessageUpdated(update))
            .await;
    }

    pub async fn message_deleted(&self, deleted: MessageDeleted, participants: &[String]) {
        let rooms = user_rooms(participants.iter().map(String::as_str));
        self.dispatcher
            .emit_many(&rooms, &SocketEvent::MessageDeleted(deleted))
            .await;
    }

    pub async fn group_updated(&self, group: Contact) {
        let rooms = user_rooms(group.member_ids.iter().map(String::as_str));
        self.dispatcher
            .emit_many(&rooms, &SocketEvent::GroupUpdated(GroupChanged { group }))
            .await;
    }

    pub async fn group_deleted(&self, id: String, members: &[String]) {
        let rooms = user_rooms(members.iter().map(String::as_str));
        self.dispatcher
            .emit_many(&rooms, &SocketEvent::GroupDeleted(GroupRemoved { id }))
            .await;
    }

    pub async fn group_restored(&self, group: Contact) {
        let rooms = user_rooms(group.member_ids.iter().map(String::as_str));
        self.dispatcher
            .emit_many(&rooms, &SocketEvent::GroupRestored(GroupChanged { group }))
            .await;
    }
}
