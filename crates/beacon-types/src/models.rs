use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ParseEnumError;

// -- Roles --

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Editor,
    Support,
    User,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Editor => "editor",
            Self::Support => "support",
            Self::User => "user",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin" => Ok(Self::Admin),
            "editor" => Ok(Self::Editor),
            "support" => Ok(Self::Support),
            "user" => Ok(Self::User),
            other => Err(ParseEnumError::new("role", other)),
        }
    }
}

// -- Status buckets --

/// The status bucket a table view displays.
///
/// `Active` and `Deleted` split on the soft-delete marker, `All` accepts
/// both, and `Custom` matches a domain status value (e.g. `IN_PROGRESS`)
/// among rows that are not soft-deleted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum StatusView {
    #[default]
    Active,
    Deleted,
    All,
    Custom(String),
}

impl StatusView {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Active => "active",
            Self::Deleted => "deleted",
            Self::All => "all",
            Self::Custom(s) => s,
        }
    }
}

impl fmt::Display for StatusView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StatusView {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "" | "active" => Ok(Self::Active),
            "deleted" => Ok(Self::Deleted),
            "all" => Ok(Self::All),
            other if other.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') => {
                Ok(Self::Custom(other.to_string()))
            }
            other => Err(ParseEnumError::new("status view", other)),
        }
    }
}

impl TryFrom<String> for StatusView {
    type Error = ParseEnumError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<StatusView> for String {
    fn from(value: StatusView) -> Self {
        value.as_str().to_string()
    }
}

/// Soft-delete state of a row before a mutation, carried on update events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PreviousStatus {
    Active,
    Deleted,
}

impl PreviousStatus {
    pub fn of(deleted_at: Option<DateTime<Utc>>) -> Self {
        if deleted_at.is_some() {
            Self::Deleted
        } else {
            Self::Active
        }
    }
}

// -- Pagination --

pub fn total_pages_for(total: u64, limit: u32) -> u32 {
    if total == 0 || limit == 0 {
        0
    } else {
        total.div_ceil(u64::from(limit)) as u32
    }
}

/// One cached page of a list query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Paginated<R> {
    pub rows: Vec<R>,
    pub page: u32,
    pub limit: u32,
    pub total: u64,
    pub total_pages: u32,
}

impl<R> Paginated<R> {
    pub fn new(rows: Vec<R>, page: u32, limit: u32, total: u64) -> Self {
        Self {
            rows,
            page,
            limit,
            total,
            total_pages: total_pages_for(total, limit),
        }
    }

    pub fn recompute_total_pages(&mut self) {
        self.total_pages = total_pages_for(self.total, self.limit);
    }
}

// -- Comments --

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentRow {
    pub id: String,
    pub content: String,
    pub post_id: String,
    pub post_title: String,
    pub author_id: String,
    pub author_name: String,
    pub parent_id: Option<String>,
    pub approved: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub version: u64,
}

// -- Contact requests --

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ContactRequestStatus {
    New,
    InProgress,
    Resolved,
    Closed,
}

impl ContactRequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "NEW",
            Self::InProgress => "IN_PROGRESS",
            Self::Resolved => "RESOLVED",
            Self::Closed => "CLOSED",
        }
    }
}

impl fmt::Display for ContactRequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContactRequestStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NEW" => Ok(Self::New),
            "IN_PROGRESS" => Ok(Self::InProgress),
            "RESOLVED" => Ok(Self::Resolved),
            "CLOSED" => Ok(Self::Closed),
            other => Err(ParseEnumError::new("contact request status", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Priority {
    Low,
    Medium,
    High,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
        }
    }
}

impl FromStr for Priority {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "LOW" => Ok(Self::Low),
            "MEDIUM" => Ok(Self::Medium),
            "HIGH" => Ok(Self::High),
            other => Err(ParseEnumError::new("priority", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactRequestRow {
    pub id: String,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub subject: String,
    pub content: String,
    pub status: ContactRequestStatus,
    pub priority: Priority,
    pub is_read: bool,
    pub assigned_to_id: Option<String>,
    pub assigned_to_name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub version: u64,
}

// -- Chat --

/// Read tracking for a chat message.
///
/// Personal messages have a single recipient and carry a plain flag. Group
/// messages record every member that has read them; that list is only ever
/// written from server-confirmed state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ReadState {
    #[serde(rename_all = "camelCase")]
    Personal { is_read: bool },
    Group { readers: BTreeSet<String> },
}

impl ReadState {
    pub fn unread_personal() -> Self {
        Self::Personal { is_read: false }
    }

    pub fn empty_group() -> Self {
        Self::Group {
            readers: BTreeSet::new(),
        }
    }

    /// UI boolean: has `viewer` read this message.
    pub fn is_read_by(&self, viewer: &str) -> bool {
        match self {
            Self::Personal { is_read } => *is_read,
            Self::Group { readers } => readers.contains(viewer),
        }
    }

    pub fn is_group(&self) -> bool {
        matches!(self, Self::Group { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContactKind {
    Personal,
    Group,
}

/// Resolves which conversation a message belongs to from `viewer`'s side.
///
/// Group messages live under the group id. Personal messages live under the
/// other participant's user id.
pub fn conversation_id_for<'a>(
    viewer: &str,
    sender_id: &'a str,
    receiver_id: Option<&'a str>,
    group_id: Option<&'a str>,
) -> Option<&'a str> {
    if let Some(group_id) = group_id {
        return Some(group_id);
    }
    let receiver_id = receiver_id?;
    if sender_id == viewer {
        Some(receiver_id)
    } else if receiver_id == viewer {
        Some(sender_id)
    } else {
        None
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    /// Temporary id assigned by the sending client before the server
    /// confirmed the message.
    #[serde(default)]
    pub client_id: Option<String>,
    pub sender_id: String,
    pub sender_name: String,
    pub receiver_id: Option<String>,
    pub group_id: Option<String>,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub read_state: ReadState,
    /// True while the message only exists as a local optimistic echo.
    #[serde(default)]
    pub pending: bool,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Message {
    pub fn conversation_id_for(&self, viewer: &str) -> Option<&str> {
        conversation_id_for(
            viewer,
            &self.sender_id,
            self.receiver_id.as_deref(),
            self.group_id.as_deref(),
        )
    }

    pub fn is_unread_for(&self, viewer: &str) -> bool {
        self.deleted_at.is_none()
            && self.sender_id != viewer
            && !self.read_state.is_read_by(viewer)
    }
}

/// A conversation as shown in the chat sidebar, with its loaded messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    pub id: String,
    pub kind: ContactKind,
    pub name: String,
    #[serde(default)]
    pub member_ids: Vec<String>,
    #[serde(default)]
    pub unread_count: u32,
    #[serde(default)]
    pub messages: Vec<Message>,
    pub deleted_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub version: u64,
}

impl Contact {
    pub fn recompute_unread(&mut self, viewer: &str) {
        self.unread_count = self
            .messages
            .iter()
            .filter(|m| m.is_unread_for(viewer))
            .count() as u32;
    }

    pub fn last_activity(&self) -> Option<DateTime<Utc>> {
        self.messages.iter().map(|m| m.created_at).max()
    }
}
