use std::collections::HashMap;
use std::marker::PhantomData;

use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use beacon_types::api::{
    ActionKind, ApiEnvelope, AssignRequest, AuthResponse, BulkRequest, BulkResponse, CreateContactRequest,
    CreateGroupRequest, ListData, LoginRequest, MarkReadRequest, RegisterRequest, SendMessageRequest, UpdateCommentRequest,
    UpdateContactRequest, UpdateGroupRequest,
};
use beacon_types::models::{CommentRow, Contact, ContactRequestRow, Message, Paginated};
use beacon_types::query::ListParams;

use crate::error::ActionError;

/// Maps a refused request onto the categories the UI reports.
pub fn error_for(status: StatusCode, message: Option<String>, kind: ActionKind) -> ActionError {
    let message = message.unwrap_or_else(|| {
        status
            .canonical_reason()
            .unwrap_or("Request failed")
            .to_string()
    });
    match status {
        StatusCode::BAD_REQUEST => ActionError::Validation(message),
        StatusCode::UNAUTHORIZED => ActionError::Unauthorized(kind),
        StatusCode::FORBIDDEN => ActionError::Forbidden(kind),
        StatusCode::NOT_FOUND => ActionError::NotFound(message),
        _ => ActionError::Server {
            status: status.as_u16(),
            message,
        },
    }
}

/// REST client for the admin API.
#[derive(Clone)]
pub struct AdminClient {
    http: Client,
    base_url: String,
    token: Option<String>,
}

impl AdminClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: None,
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self.http.request(method, format!("{}{}", self.base_url, path));
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn send_raw<T: DeserializeOwned>(&self, builder: RequestBuilder, kind: ActionKind) -> Result<T, ActionError> {
        let response = builder.send().await?;
        let status = response.status();
        let body = response.bytes().await?;

        if status.is_success() {
            return serde_json::from_slice(&body).map_err(|e| ActionError::Server {
                status: status.as_u16(),
                message: format!("unexpected response body: {}", e),
            });
        }

        let message = serde_json::from_slice::<ApiEnvelope<serde_json::Value>>(&body)
            .ok()
            .and_then(|envelope| envelope.message);
        debug!("{} refused with {}: {:?}", kind.as_str(), status, message);
        Err(error_for(status, message, kind))
    }

    /// Sends a request answered with `{ success, data }` and unwraps `data`.
    async fn send<T: DeserializeOwned>(&self, builder: RequestBuilder, kind: ActionKind) -> Result<T, ActionError> {
        let envelope: ApiEnvelope<T> = self.send_raw(builder, kind).await?;
        match envelope.data {
            Some(data) if envelope.success => Ok(data),
            _ => Err(ActionError::Server {
                status: StatusCode::OK.as_u16(),
                message: envelope.message.unwrap_or_else(|| "Response carried no data".into()),
            }),
        }
    }

    /// Creates an account and keeps its token. The first account becomes
    /// an admin.
    pub async fn register(&mut self, username: &str, password: &str) -> Result<AuthResponse, ActionError> {
        let body = RegisterRequest {
            username: username.to_string(),
            password: password.to_string(),
        };
        let auth: AuthResponse = self
            .send(self.request(Method::POST, "/auth/register").json(&body), ActionKind::Create)
            .await?;
        self.token = Some(auth.token.clone());
        Ok(auth)
    }

    /// Logs in and keeps the token for later calls.
    pub async fn login(&mut self, username: &str, password: &str) -> Result<AuthResponse, ActionError> {
        let body = LoginRequest {
            username: username.to_string(),
            password: password.to_string(),
        };
        let auth: AuthResponse = self
            .send(self.request(Method::POST, "/auth/login").json(&body), ActionKind::View)
            .await?;
        self.token = Some(auth.token.clone());
        Ok(auth)
    }

    pub fn comments(&self) -> ResourceClient<'_, CommentRow> {
        ResourceClient::new(self, "/api/comments")
    }

    pub fn contact_requests(&self) -> ResourceClient<'_, ContactRequestRow> {
        ResourceClient::new(self, "/api/contact-requests")
    }

    // -- Chat --

    pub async fn contacts(&self) -> Result<Vec<Contact>, ActionError> {
        self.send(self.request(Method::GET, "/api/chat/contacts"), ActionKind::View)
            .await
    }

    pub async fn messages(&self, contact_id: &str) -> Result<Vec<Message>, ActionError> {
        let path = format!("/api/chat/contacts/{}/messages", contact_id);
        self.send(self.request(Method::GET, &path), ActionKind::View).await
    }

    pub async fn send_message(&self, contact_id: &str, body: &SendMessageRequest) -> Result<Message, ActionError> {
        let path = format!("/api/chat/contacts/{}/messages", contact_id);
        self.send(self.request(Method::POST, &path).json(body), ActionKind::SendMessage)
            .await
    }

    /// Returns the messages whose read state changed.
    pub async fn mark_read(&self, message_ids: &[String]) -> Result<Vec<Message>, ActionError> {
        let body = MarkReadRequest {
            message_ids: message_ids.to_vec(),
        };
        self.send(
            self.request(Method::POST, "/api/chat/messages/read").json(&body),
            ActionKind::MarkRead,
        )
        .await
    }

    pub async fn delete_message(&self, id: &str) -> Result<Message, ActionError> {
        let path = format!("/api/chat/messages/{}", id);
        self.send(self.request(Method::DELETE, &path), ActionKind::Delete).await
    }

    pub async fn create_group(&self, body: &CreateGroupRequest) -> Result<Contact, ActionError> {
        self.send(
            self.request(Method::POST, "/api/chat/groups").json(body),
            ActionKind::ManageGroup,
        )
        .await
    }

    pub async fn update_group(&self, id: &str, body: &UpdateGroupRequest) -> Result<Contact, ActionError> {
        let path = format!("/api/chat/groups/{}", id);
        self.send(self.request(Method::PATCH, &path).json(body), ActionKind::ManageGroup)
            .await
    }

    pub async fn delete_group(&self, id: &str) -> Result<Contact, ActionError> {
        let path = format!("/api/chat/groups/{}", id);
        self.send(self.request(Method::DELETE, &path), ActionKind::ManageGroup)
            .await
    }

    pub async fn restore_group(&self, id: &str) -> Result<Contact, ActionError> {
        let path = format!("/api/chat/groups/{}/restore", id);
        self.send(self.request(Method::POST, &path), ActionKind::ManageGroup)
            .await
    }
}

/// The list/detail/mutation routes shared by every moderated resource.
pub struct ResourceClient<'a, R> {
    client: &'a AdminClient,
    base: &'static str,
    _row: PhantomData<R>,
}

impl<'a, R: DeserializeOwned> ResourceClient<'a, R> {
    fn new(client: &'a AdminClient, base: &'static str) -> Self {
        Self {
            client,
            base,
            _row: PhantomData,
        }
    }

    fn path(&self, id: &str, suffix: &str) -> String {
        format!("{}/{}{}", self.base, id, suffix)
    }

    pub async fn list(&self, params: &ListParams) -> Result<Paginated<R>, ActionError> {
        let builder = self.client.request(Method::GET, self.base).query(&params.to_query());
        let list: ListData<R> = self.client.send(builder, ActionKind::View).await?;
        Ok(list.into())
    }

    pub async fn detail(&self, id: &str) -> Result<R, ActionError> {
        let builder = self.client.request(Method::GET, &self.path(id, ""));
        self.client.send(builder, ActionKind::View).await
    }

    async fn patch<B: Serialize>(&self, id: &str, body: &B) -> Result<R, ActionError> {
        let builder = self.client.request(Method::PATCH, &self.path(id, "")).json(body);
        self.client.send(builder, ActionKind::Update).await
    }

    /// Soft delete. The row stays visible under the deleted view.
    pub async fn delete(&self, id: &str) -> Result<R, ActionError> {
        let builder = self.client.request(Method::DELETE, &self.path(id, ""));
        self.client.send(builder, ActionKind::Delete).await
    }

    pub async fn restore(&self, id: &str) -> Result<R, ActionError> {
        let builder = self.client.request(Method::POST, &self.path(id, "/restore"));
        self.client.send(builder, ActionKind::Restore).await
    }

    pub async fn hard_delete(&self, id: &str) -> Result<(), ActionError> {
        let builder = self.client.request(Method::DELETE, &self.path(id, "/hard"));
        let _: serde_json::Value = self.client.send(builder, ActionKind::HardDelete).await?;
        Ok(())
    }

    pub async fn bulk(&self, body: &BulkRequest) -> Result<BulkResponse, ActionError> {
        let builder = self
            .client
            .request(Method::POST, &format!("{}/bulk", self.base))
            .json(body);
        self.client.send_raw(builder, ActionKind::Bulk).await
    }
}

impl ResourceClient<'_, CommentRow> {
    pub async fn update(&self, id: &str, body: &UpdateCommentRequest) -> Result<CommentRow, ActionError> {
        self.patch(id, body).await
    }
}

impl ResourceClient<'_, ContactRequestRow> {
    pub async fn update(&self, id: &str, body: &UpdateContactRequest) -> Result<ContactRequestRow, ActionError> {
        self.patch(id, body).await
    }

    pub async fn assign(&self, id: &str, assignee: Option<&str>) -> Result<ContactRequestRow, ActionError> {
        let body = AssignRequest {
            assigned_to_id: assignee.map(str::to_string),
        };
        let builder = self
            .client
            .request(Method::POST, &self.path(id, "/assign"))
            .json(&body);
        self.client.send(builder, ActionKind::Assign).await
    }

    /// Public contact form. Needs no token.
    pub async fn create(&self, body: &CreateContactRequest) -> Result<ContactRequestRow, ActionError> {
        let builder = self.client.request(Method::POST, self.base).json(body);
        self.client.send(builder, ActionKind::Create).await
    }

    pub async fn stats(&self) -> Result<HashMap<String, u64>, ActionError> {
        let builder = self.client.request(Method::GET, &format!("{}/stats", self.base));
        self.client.send(builder, ActionKind::View).await
    }
}
