use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ParseEnumError;
use crate::models::{CommentRow, Contact, ContactRequestRow, Message, PreviousStatus, ReadState, Role};

/// A mutated row plus its soft-delete state before the mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RowUpsert<R> {
    pub row: R,
    #[serde(default)]
    pub previous_status: Option<PreviousStatus>,
}

/// Rows changed together by one bulk operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RowBatch<R> {
    pub rows: Vec<R>,
    #[serde(default)]
    pub previous_status: Option<PreviousStatus>,
}

/// A hard-deleted row. Only the id survives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RowRemove {
    pub id: String,
    #[serde(default)]
    pub previous_status: Option<PreviousStatus>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageNew {
    pub message: Message,
}

/// Server-confirmed change to an existing message. Fields left `None` are
/// unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageUpdated {
    pub id: String,
    pub sender_id: String,
    pub receiver_id: Option<String>,
    pub group_id: Option<String>,
    #[serde(default)]
    pub read_state: Option<ReadState>,
    #[serde(default)]
    pub content: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageDeleted {
    pub id: String,
    pub sender_id: String,
    pub receiver_id: Option<String>,
    pub group_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupChanged {
    pub group: Contact,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupRemoved {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ready {
    pub user_id: Uuid,
    pub username: String,
    pub rooms: Vec<String>,
}

/// Events pushed to clients over the realtime gateway.
///
/// Wire form is `{ "event": "<name>", "payload": { ... } }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload")]
pub enum SocketEvent {
    #[serde(rename = "ready")]
    Ready(Ready),

    #[serde(rename = "pong")]
    Pong,

    #[serde(rename = "comment:upsert")]
    CommentUpsert(RowUpsert<CommentRow>),

    #[serde(rename = "comment:batch-upsert")]
    CommentBatchUpsert(RowBatch<CommentRow>),

    #[serde(rename = "comment:remove")]
    CommentRemove(RowRemove),

    #[serde(rename = "contact-request:new")]
    ContactRequestNew(RowUpsert<ContactRequestRow>),

    #[serde(rename = "contact-request:upsert")]
    ContactRequestUpsert(RowUpsert<ContactRequestRow>),

    #[serde(rename = "contact-request:assigned")]
    ContactRequestAssigned(RowUpsert<ContactRequestRow>),

    #[serde(rename = "contact-request:remove")]
    ContactRequestRemove(RowRemove),

    #[serde(rename = "contact-request:batch-upsert")]
    ContactRequestBatchUpsert(RowBatch<ContactRequestRow>),

    #[serde(rename = "message:new")]
    MessageNew(MessageNew),

    #[serde(rename = "message:updated")]
    MessageUpdated(MessageUpdated),

    #[serde(rename = "message:deleted")]
    MessageDeleted(MessageDeleted),

    #[serde(rename = "group:updated")]
    GroupUpdated(GroupChanged),

    #[serde(rename = "group:deleted")]
    GroupDeleted(GroupRemoved),

    #[serde(rename = "group:restored")]
    GroupRestored(GroupChanged),
}

impl SocketEvent {
    pub const COMMENT_UPSERT: &'static str = "comment:upsert";
    pub const COMMENT_BATCH_UPSERT: &'static str = "comment:batch-upsert";
    pub const COMMENT_REMOVE: &'static str = "comment:remove";
    pub const CONTACT_REQUEST_NEW: &'static str = "contact-request:new";
    pub const CONTACT_REQUEST_UPSERT: &'static str = "contact-request:upsert";
    pub const CONTACT_REQUEST_ASSIGNED: &'static str = "contact-request:assigned";
    pub const CONTACT_REQUEST_REMOVE: &'static str = "contact-request:remove";
    pub const CONTACT_REQUEST_BATCH_UPSERT: &'static str = "contact-request:batch-upsert";
    pub const MESSAGE_NEW: &'static str = "message:new";
    pub const MESSAGE_UPDATED: &'static str = "message:updated";
    pub const MESSAGE_DELETED: &'static str = "message:deleted";
    pub const GROUP_UPDATED: &'static str = "group:updated";
    pub const GROUP_DELETED: &'static str = "group:deleted";
    pub const GROUP_RESTORED: &'static str = "group:restored";

    /// The wire event name, matching the serde tag.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Ready(_) => "ready",
            Self::Pong => "pong",
            Self::CommentUpsert(_) => Self::COMMENT_UPSERT,
            Self::CommentBatchUpsert(_) => Self::COMMENT_BATCH_UPSERT,
            Self::CommentRemove(_) => Self::COMMENT_REMOVE,
            Self::ContactRequestNew(_) => Self::CONTACT_REQUEST_NEW,
            Self::ContactRequestUpsert(_) => Self::CONTACT_REQUEST_UPSERT,
            Self::ContactRequestAssigned(_) => Self::CONTACT_REQUEST_ASSIGNED,
            Self::ContactRequestRemove(_) => Self::CONTACT_REQUEST_REMOVE,
            Self::ContactRequestBatchUpsert(_) => Self::CONTACT_REQUEST_BATCH_UPSERT,
            Self::MessageNew(_) => Self::MESSAGE_NEW,
            Self::MessageUpdated(_) => Self::MESSAGE_UPDATED,
            Self::MessageDeleted(_) => Self::MESSAGE_DELETED,
            Self::GroupUpdated(_) => Self::GROUP_UPDATED,
            Self::GroupDeleted(_) => Self::GROUP_DELETED,
            Self::GroupRestored(_) => Self::GROUP_RESTORED,
        }
    }
}

/// Delivery scope of an event on the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Room {
    User(Uuid),
    Role(Role),
}

impl fmt::Display for Room {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User(id) => write!(f, "user:{}", id),
            Self::Role(role) => write!(f, "role:{}", role),
        }
    }
}

impl FromStr for Room {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            Some(("user", id)) => id
                .parse()
                .map(Self::User)
                .map_err(|_| ParseEnumError::new("room", s)),
            Some(("role", role)) => role
                .parse()
                .map(Self::Role)
                .map_err(|_| ParseEnumError::new("room", s)),
            _ => Err(ParseEnumError::new("room", s)),
        }
    }
}

/// Commands sent FROM client TO server over the gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayCommand {
    /// Authenticate a connection that was not authenticated at upgrade.
    Identify { token: String },

    /// Application-level keepalive; answered with `pong`.
    Ping,
}
