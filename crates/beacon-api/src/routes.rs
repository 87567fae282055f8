use axum::{
    Router, middleware,
    routing::{delete, get, patch, post},
};

use crate::middleware::require_auth;
use crate::state::AppState;
use crate::{auth, chat, comments, contact_requests};

/// All REST routes. `/auth/*` and the contact form are public; everything
/// else requires a bearer token.
pub fn router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .route("/api/contact-requests", post(contact_requests::create))
        .with_state(state.clone());

    let protected_routes = Router::new()
        // Comments
        .route("/api/comments", get(comments::list))
        .route("/api/comments/bulk", post(comments::bulk))
        .route(
            "/api/comments/{id}",
            get(comments::detail).patch(comments::update).delete(comments::delete),
        )
        .route("/api/comments/{id}/restore", post(comments::restore))
        .route("/api/comments/{id}/hard", delete(comments::hard_delete))
        // Contact requests
        .route("/api/contact-requests", get(contact_requests::list))
        .route("/api/contact-requests/stats", get(contact_requests::stats))
        .route("/api/contact-requests/bulk", post(contact_requests::bulk))
        .route(
            "/api/contact-requests/{id}",
            get(contact_requests::detail)
                .patch(contact_requests::update)
                .delete(contact_requests::delete),
        )
        .route("/api/contact-requests/{id}/assign", post(contact_requests::assign))
        .route("/api/contact-requests/{id}/restore", post(contact_requests::restore))
        .route("/api/contact-requests/{id}/hard", delete(contact_requests::hard_delete))
        // Chat
        .route("/api/chat/contacts", get(chat::contacts))
        .route(
            "/api/chat/contacts/{id}/messages",
            get(chat::messages).post(chat::send),
        )
        .route("/api/chat/messages/read", post(chat::mark_read))
        .route("/api/chat/messages/{id}", delete(chat::delete_message))
        .route("/api/chat/groups", post(chat::create_group))
        .route(
            "/api/chat/groups/{id}",
            patch(chat::update_group).delete(chat::delete_group),
        )
        .route("/api/chat/groups/{id}/restore", post(chat::restore_group))
        .layer(middleware::from_fn_with_state(state.clone(), require_auth))
        .with_state(state);

    Router::new().merge(public_routes).merge(protected_routes)
}

#[cfg(test)]
mod tests {
    use super::*;

    use axum::body::Body;
    use axum::http::{Request, StatusCode, header};
    use http_body_util::BodyExt;
    use serde_json::{Value, json};
    use tower::ServiceExt;
    use uuid::Uuid;

    use beacon_db::Database;
    use beacon_gateway::{Dispatcher, Emitter};
    use beacon_types::api::ActionKind;
    use beacon_types::events::{Room, SocketEvent};
    use beacon_types::models::Role;

    use crate::auth::create_token;
    use crate::state::AppStateInner;

    const SECRET: &str = "test-secret";

    struct Harness {
        state: AppState,
        dispatcher: Dispatcher,
    }

    impl Harness {
        fn new() -> Self {
            let dispatcher = Dispatcher::new();
            let db = Database::open_in_memory().unwrap();
            let state = AppStateInner::new(db, SECRET.into(), Emitter::new(dispatcher.clone()));
            Self { state, dispatcher }
        }

        fn user(&self, name: &str, role: Role) -> (Uuid, String) {
            let id = Uuid::new_v4();
            self.state.db.create_user(&id.to_string(), name, "hash", role).unwrap();
            (id, create_token(SECRET, id, name, role).unwrap())
        }

        async fn call(&self, method: &str, uri: &str, token: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
            let mut req = Request::builder().method(method).uri(uri);
            if let Some(token) = token {
                req = req.header(header::AUTHORIZATION, format!("Bearer {}", token));
            }
            let req = match body {
                Some(body) => req
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
                None => req.body(Body::empty()).unwrap(),
            };

            let res = router(self.state.clone()).oneshot(req).await.unwrap();
            let status = res.status();
            let bytes = res.into_body().collect().await.unwrap().to_bytes();
            let value = if bytes.is_empty() {
                Value::Null
            } else {
                serde_json::from_slice(&bytes).unwrap()
            };
            (status, value)
        }
    }

    fn seed_comment(h: &Harness, author: Uuid) {
        h.state.db.create_post("p1", "Release notes").unwrap();
        h.state
            .db
            .insert_comment("c1", "p1", &author.to_string(), None, "First!")
            .unwrap();
    }

    #[tokio::test]
    async fn first_registration_becomes_admin() {
        let h = Harness::new();
        let body = json!({ "username": "root", "password": "correct horse" });
        let (status, value) = h.call("POST", "/auth/register", None, Some(body)).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(value["data"]["role"], "admin");

        let body = json!({ "username": "second", "password": "correct horse" });
        let (_, value) = h.call("POST", "/auth/register", None, Some(body)).await;
        assert_eq!(value["data"]["role"], "user");

        let body = json!({ "username": "root", "password": "wrong password" });
        let (status, value) = h.call("POST", "/auth/login", None, Some(body)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(value["success"], false);
    }

    #[tokio::test]
    async fn protected_routes_need_a_token() {
        let h = Harness::new();
        let (status, value) = h.call("GET", "/api/comments", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(value["message"], ActionKind::View.denied_message());
    }

    #[tokio::test]
    async fn roles_outside_moderation_get_the_action_message() {
        let h = Harness::new();
        let (_, support) = h.user("sam", Role::Support);
        let (status, value) = h.call("DELETE", "/api/comments/c1/hard", Some(&support), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(value["message"], ActionKind::HardDelete.denied_message());
    }

    #[tokio::test]
    async fn list_rejects_unknown_filters() {
        let h = Harness::new();
        let (_, editor) = h.user("ed", Role::Editor);
        let (status, value) = h
            .call("GET", "/api/comments?password=x", Some(&editor), None)
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(value["success"], false);
    }

    #[tokio::test]
    async fn soft_delete_emits_upsert_with_previous_status() {
        let h = Harness::new();
        let (editor_id, editor) = h.user("ed", Role::Editor);
        seed_comment(&h, editor_id);
        let (_, mut rx) = h
            .dispatcher
            .register(editor_id, [Room::Role(Role::Editor)])
            .await;

        let (status, value) = h.call("DELETE", "/api/comments/c1", Some(&editor), None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(value["data"]["deletedAt"].is_string());

        let event: SocketEvent = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        match event {
            SocketEvent::CommentUpsert(upsert) => {
                assert_eq!(upsert.row.id, "c1");
                assert!(upsert.row.deleted_at.is_some());
                assert_eq!(
                    upsert.previous_status,
                    Some(beacon_types::models::PreviousStatus::Active)
                );
            }
            other => panic!("unexpected event {}", other.name()),
        }

        // Deleting again changes nothing and broadcasts nothing
        let (status, _) = h.call("DELETE", "/api/comments/c1", Some(&editor), None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(rx.try_recv().is_err());

        let (_, value) = h
            .call("GET", "/api/comments?status=deleted", Some(&editor), None)
            .await;
        assert_eq!(value["data"]["pagination"]["total"], 1);
    }

    #[tokio::test]
    async fn bulk_reports_affected_rows() {
        let h = Harness::new();
        let (editor_id, editor) = h.user("ed", Role::Editor);
        seed_comment(&h, editor_id);

        let body = json!({ "action": "approve", "ids": ["c1", "missing"] });
        let (status, value) = h
            .call("POST", "/api/comments/bulk", Some(&editor), Some(body))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(value["success"], true);
        assert_eq!(value["affected"], 1);
    }

    #[tokio::test]
    async fn public_contact_form_reaches_support() {
        let h = Harness::new();
        let (support_id, support) = h.user("sam", Role::Support);
        let (_, mut rx) = h
            .dispatcher
            .register(support_id, [Room::Role(Role::Support)])
            .await;

        let body = json!({
            "name": "Ann",
            "email": "ann@example.com",
            "subject": "Billing",
            "content": "Invoice is wrong"
        });
        let (status, value) = h.call("POST", "/api/contact-requests", None, Some(body)).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(value["data"]["status"], "NEW");

        let event: SocketEvent = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(event.name(), SocketEvent::CONTACT_REQUEST_NEW);

        let (_, value) = h
            .call("GET", "/api/contact-requests?status=NEW", Some(&support), None)
            .await;
        assert_eq!(value["data"]["data"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn personal_messages_echo_client_id_and_mark_read() {
        let h = Harness::new();
        let (_, alice) = h.user("alice", Role::Admin);
        let (bob_id, bob) = h.user("bob", Role::Editor);
        let (_, mut bob_rx) = h.dispatcher.register(bob_id, [Room::User(bob_id)]).await;

        let body = json!({ "content": "hi bob", "clientId": "tmp-1" });
        let uri = format!("/api/chat/contacts/{}/messages", bob_id);
        let (status, value) = h.call("POST", &uri, Some(&alice), Some(body)).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(value["data"]["clientId"], "tmp-1");
        let message_id = value["data"]["id"].as_str().unwrap().to_string();

        let event: SocketEvent = serde_json::from_str(&bob_rx.recv().await.unwrap()).unwrap();
        assert_eq!(event.name(), SocketEvent::MESSAGE_NEW);

        let body = json!({ "messageIds": [message_id] });
        let (status, value) = h
            .call("POST", "/api/chat/messages/read", Some(&bob), Some(body))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(value["data"].as_array().unwrap().len(), 1);

        let event: SocketEvent = serde_json::from_str(&bob_rx.recv().await.unwrap()).unwrap();
        assert_eq!(event.name(), SocketEvent::MESSAGE_UPDATED);

        // Bob cannot delete Alice's message
        let uri = format!("/api/chat/messages/{}", value["data"][0]["id"].as_str().unwrap());
        let (status, _) = h.call("DELETE", &uri, Some(&bob), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, _) = h.call("DELETE", &uri, Some(&alice), None).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn non_members_cannot_post_to_groups() {
        let h = Harness::new();
        let (_, alice) = h.user("alice", Role::Admin);
        let (bob_id, _) = h.user("bob", Role::Editor);
        let (_, carol) = h.user("carol", Role::User);

        let body = json!({ "name": "Mods", "memberIds": [bob_id.to_string()] });
        let (status, value) = h.call("POST", "/api/chat/groups", Some(&alice), Some(body)).await;
        assert_eq!(status, StatusCode::CREATED);
        let group_id = value["data"]["id"].as_str().unwrap().to_string();

        let uri = format!("/api/chat/contacts/{}/messages", group_id);
        let (status, value) = h
            .call("POST", &uri, Some(&carol), Some(json!({ "content": "let me in" })))
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(value["message"], ActionKind::SendMessage.denied_message());

        let uri = format!("/api/chat/groups/{}", group_id);
        let (status, _) = h.call("DELETE", &uri, Some(&alice), None).await;
        assert_eq!(status, StatusCode::OK);
        let (status, value) = h
            .call("POST", &format!("{}/restore", uri), Some(&alice), None)
            .await;
        assert_eq!(status, StatusCode::OK);
        assert!(value["data"]["deletedAt"].is_null());
    }
}
