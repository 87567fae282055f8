use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{ContactRequestStatus, Paginated, Priority, Role};

// -- JWT Claims --

/// JWT claims shared by the REST middleware and the gateway upgrade.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub username: String,
    pub role: Role,
    pub exp: usize,
}

// -- Auth --

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegisterRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthResponse {
    pub user_id: Uuid,
    pub username: String,
    pub role: Role,
    pub token: String,
}

// -- Envelopes --

/// `{ success, data, message }` wrapper used by every REST response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiEnvelope<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl<T> ApiEnvelope<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
        }
    }
}

impl ApiEnvelope<()> {
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            message: Some(message.into()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub page: u32,
    pub limit: u32,
    pub total: u64,
    pub total_pages: u32,
}

/// List payload: `{ data: [...], pagination: {...} }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListData<R> {
    pub data: Vec<R>,
    pub pagination: Pagination,
}

impl<R> From<Paginated<R>> for ListData<R> {
    fn from(page: Paginated<R>) -> Self {
        Self {
            pagination: Pagination {
                page: page.page,
                limit: page.limit,
                total: page.total,
                total_pages: page.total_pages,
            },
            data: page.rows,
        }
    }
}

impl<R> From<ListData<R>> for Paginated<R> {
    fn from(list: ListData<R>) -> Self {
        Self {
            rows: list.data,
            page: list.pagination.page,
            limit: list.pagination.limit,
            total: list.pagination.total,
            total_pages: list.pagination.total_pages,
        }
    }
}

// -- Actions --

/// A user-facing operation, used to pick the fixed message shown when the
/// server refuses it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ActionKind {
    View,
    Create,
    Update,
    Delete,
    Restore,
    HardDelete,
    Bulk,
    Approve,
    Assign,
    MarkRead,
    SendMessage,
    ManageGroup,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::View => "view",
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Restore => "restore",
            Self::HardDelete => "hard-delete",
            Self::Bulk => "bulk",
            Self::Approve => "approve",
            Self::Assign => "assign",
            Self::MarkRead => "mark-read",
            Self::SendMessage => "send-message",
            Self::ManageGroup => "manage-group",
        }
    }

    /// Message shown for 401/403 responses to this action.
    pub fn denied_message(&self) -> &'static str {
        match self {
            Self::View => "Bạn không có quyền xem dữ liệu này",
            Self::Create => "Bạn không có quyền tạo mới",
            Self::Update => "Bạn không có quyền cập nhật",
            Self::Delete => "Bạn không có quyền xóa",
            Self::Restore => "Bạn không có quyền khôi phục",
            Self::HardDelete => "Bạn không có quyền xóa vĩnh viễn",
            Self::Bulk => "Bạn không có quyền thực hiện thao tác hàng loạt",
            Self::Approve => "Bạn không có quyền duyệt bình luận",
            Self::Assign => "Bạn không có quyền phân công yêu cầu liên hệ",
            Self::MarkRead => "Bạn không có quyền đánh dấu đã đọc",
            Self::SendMessage => "Bạn không có quyền gửi tin nhắn",
            Self::ManageGroup => "Bạn không có quyền quản lý nhóm",
        }
    }
}

// -- Bulk --

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BulkAction {
    Delete,
    Restore,
    HardDelete,
    Approve,
    Unapprove,
    MarkRead,
    MarkUnread,
    SetStatus,
    Assign,
}

impl BulkAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Delete => "delete",
            Self::Restore => "restore",
            Self::HardDelete => "hard-delete",
            Self::Approve => "approve",
            Self::Unapprove => "unapprove",
            Self::MarkRead => "mark-read",
            Self::MarkUnread => "mark-unread",
            Self::SetStatus => "set-status",
            Self::Assign => "assign",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkRequest {
    pub action: BulkAction,
    pub ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ContactRequestStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_to_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkResponse {
    pub success: bool,
    pub message: String,
    pub affected: usize,
}

// -- Comments --

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct UpdateCommentRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approved: Option<bool>,
}

// -- Contact requests --

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CreateContactRequest {
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub phone: Option<String>,
    pub subject: String,
    pub content: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct UpdateContactRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ContactRequestStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_read: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AssignRequest {
    pub assigned_to_id: Option<String>,
}

// -- Chat --

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SendMessageRequest {
    pub content: String,
    #[serde(default)]
    pub client_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct MarkReadRequest {
    pub message_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CreateGroupRequest {
    pub name: String,
    pub member_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct UpdateGroupRequest {
    pub name: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::de::DeserializeOwned;

    fn parse<T: DeserializeOwned>(text: &str) -> ApiEnvelope<T> {
        serde_json::from_str(text).unwrap()
    }

    #[test]
    fn envelope_decodes_for_any_payload() {
        let failed: ApiEnvelope<Claims> = parse(r#"{"success":false,"message":"Không tìm thấy"}"#);
        assert!(failed.data.is_none());
        assert_eq!(failed.message.as_deref(), Some("Không tìm thấy"));

        let id = Uuid::new_v4();
        let ok: ApiEnvelope<Claims> = parse(&format!(
            r#"{{"success":true,"data":{{"sub":"{}","username":"alice","role":"admin","exp":1}}}}"#,
            id
        ));
        assert_eq!(ok.data.unwrap().sub, id);
    }
}
