use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use tracing::{debug, info};
use uuid::Uuid;

use beacon_types::api::{
    ActionKind, ApiEnvelope, Claims, CreateGroupRequest, MarkReadRequest, SendMessageRequest, UpdateGroupRequest,
};
use beacon_types::events::{MessageDeleted, MessageUpdated};
use beacon_types::models::{Contact, Message, Role};

use crate::error::ApiError;
use crate::state::{AppState, db_call};

const MAX_MESSAGE_LEN: usize = 4000;
const MAX_GROUP_NAME_LEN: usize = 100;
const CONTACT_MESSAGE_LIMIT: u32 = 50;

#[derive(Debug, Deserialize)]
pub struct MessageQuery {
    #[serde(default = "default_limit")]
    pub limit: u32,
}

fn default_limit() -> u32 {
    CONTACT_MESSAGE_LIMIT
}

/// Who receives realtime events about `message`.
fn participants_of(db: &beacon_db::Database, message: &Message) -> anyhow::Result<Vec<String>> {
    match &message.group_id {
        Some(group_id) => db.group_member_ids(group_id),
        None => Ok(std::iter::once(message.sender_id.clone())
            .chain(message.receiver_id.clone())
            .collect()),
    }
}

fn validate_group_name(name: &str) -> Result<String, ApiError> {
    let name = name.trim();
    if name.is_empty() || name.chars().count() > MAX_GROUP_NAME_LEN {
        return Err(ApiError::validation(format!(
            "group name must be 1-{} characters",
            MAX_GROUP_NAME_LEN
        )));
    }
    Ok(name.to_string())
}

/// Loads a group the caller may manage: members and admins only.
fn managed_group(db: &beacon_db::Database, claims: &Claims, id: &str) -> anyhow::Result<Result<Contact, ApiError>> {
    let Some(group) = db.get_group(id)? else {
        return Ok(Err(ApiError::NotFound("Group")));
    };
    let me = claims.sub.to_string();
    if claims.role != Role::Admin && !group.member_ids.contains(&me) {
        return Ok(Err(ApiError::Forbidden(ActionKind::ManageGroup)));
    }
    Ok(Ok(group))
}

pub async fn contacts(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let viewer = claims.sub.to_string();
    let contacts = db_call(&state, move |db| db.list_contacts(&viewer, CONTACT_MESSAGE_LIMIT)).await?;
    Ok(Json(ApiEnvelope::ok(contacts)))
}

pub async fn messages(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(contact_id): Path<String>,
    Query(query): Query<MessageQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let viewer = claims.sub.to_string();
    let limit = query.limit.clamp(1, 200);

    let messages = db_call(&state, move |db| {
        if db.is_group(&contact_id)? {
            if !db.is_group_member(&contact_id, &viewer)? {
                return Ok(Err(ApiError::Forbidden(ActionKind::View)));
            }
        } else if db.get_user_by_id(&contact_id)?.is_none() {
            return Ok(Err(ApiError::NotFound("Contact")));
        }
        Ok(Ok(db.get_conversation_messages(&viewer, &contact_id, limit)?))
    })
    .await??;

    Ok(Json(ApiEnvelope::ok(messages)))
}

/// Send to a user or a group. `client_id` is echoed back so the sender can
/// match the confirmed message to its optimistic copy.
pub async fn send(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(contact_id): Path<String>,
    Json(req): Json<SendMessageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let content = req.content.trim().to_string();
    if content.is_empty() {
        return Err(ApiError::validation("message must not be empty"));
    }
    if content.chars().count() > MAX_MESSAGE_LEN {
        return Err(ApiError::validation(format!(
            "message must be at most {} characters",
            MAX_MESSAGE_LEN
        )));
    }

    let sender = claims.sub.to_string();
    let message_id = Uuid::new_v4().to_string();

    let (mut message, participants) = db_call(&state, move |db| {
        if let Some(group) = db.get_group(&contact_id)? {
            if group.deleted_at.is_some() {
                return Ok(Err(ApiError::NotFound("Group")));
            }
            if !group.member_ids.contains(&sender) {
                return Ok(Err(ApiError::Forbidden(ActionKind::SendMessage)));
            }
            let message = db.insert_group_message(&message_id, &sender, &contact_id, &content)?;
            return Ok(Ok((message, group.member_ids)));
        }

        if contact_id == sender {
            return Ok(Err(ApiError::validation("cannot message yourself")));
        }
        if db.get_user_by_id(&contact_id)?.is_none() {
            return Ok(Err(ApiError::NotFound("Contact")));
        }
        let message = db.insert_personal_message(&message_id, &sender, &contact_id, &content)?;
        Ok(Ok((message, vec![sender, contact_id])))
    })
    .await??;

    message.client_id = req.client_id;
    debug!("{} sent message {}", claims.username, message.id);

    state.emitter.message_new(message.clone(), &participants).await;
    Ok((StatusCode::CREATED, Json(ApiEnvelope::ok(message))))
}

/// Marks messages read for the caller. Returns the messages whose read
/// state actually changed, with their authoritative state.
pub async fn mark_read(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<MarkReadRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if req.message_ids.is_empty() {
        return Ok(Json(ApiEnvelope::ok(Vec::<Message>::new())));
    }

    let viewer = claims.sub.to_string();
    let changed = db_call(&state, move |db| {
        let changed = db.mark_messages_read(&viewer, &req.message_ids)?;
        changed
            .into_iter()
            .map(|message| {
                let participants = participants_of(db, &message)?;
                Ok((message, participants))
            })
            .collect::<anyhow::Result<Vec<_>>>()
    })
    .await?;

    for (message, participants) in &changed {
        let update = MessageUpdated {
            id: message.id.clone(),
            sender_id: message.sender_id.clone(),
            receiver_id: message.receiver_id.clone(),
            group_id: message.group_id.clone(),
            read_state: Some(message.read_state.clone()),
            content: None,
        };
        state.emitter.message_updated(update, participants).await;
    }

    let messages: Vec<Message> = changed.into_iter().map(|(m, _)| m).collect();
    Ok(Json(ApiEnvelope::ok(messages)))
}

/// Senders delete their own messages; admins may delete any.
pub async fn delete_message(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let caller = claims.sub.to_string();
    let is_admin = claims.role == Role::Admin;

    let (message, participants) = db_call(&state, move |db| {
        let Some(existing) = db.get_message(&id)? else {
            return Ok(Err(ApiError::NotFound("Message")));
        };
        if existing.sender_id != caller && !is_admin {
            return Ok(Err(ApiError::Forbidden(ActionKind::Delete)));
        }
        let Some((message, _previous)) = db.soft_delete_message(&id)? else {
            return Ok(Err(ApiError::NotFound("Message")));
        };
        let participants = participants_of(db, &message)?;
        Ok(Ok((message, participants)))
    })
    .await??;

    let deleted = MessageDeleted {
        id: message.id.clone(),
        sender_id: message.sender_id.clone(),
        receiver_id: message.receiver_id.clone(),
        group_id: message.group_id.clone(),
    };
    state.emitter.message_deleted(deleted, &participants).await;
    Ok(Json(ApiEnvelope::ok(message)))
}

pub async fn create_group(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateGroupRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let name = validate_group_name(&req.name)?;
    let creator = claims.sub.to_string();
    let id = Uuid::new_v4().to_string();

    let group = db_call(&state, move |db| {
        for member in &req.member_ids {
            if db.get_user_by_id(member)?.is_none() {
                return Ok(Err(ApiError::validation(format!("unknown member '{}'", member))));
            }
        }
        Ok(Ok(db.create_group(&id, &name, &creator, &req.member_ids)?))
    })
    .await??;
    info!("{} created group {} ({})", claims.username, group.name, group.id);

    state.emitter.group_updated(group.clone()).await;
    Ok((StatusCode::CREATED, Json(ApiEnvelope::ok(group))))
}

pub async fn update_group(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<String>,
    Json(req): Json<UpdateGroupRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let name = validate_group_name(&req.name)?;

    let mutated = db_call(&state, move |db| {
        if let Err(e) = managed_group(db, &claims, &id)? {
            return Ok(Err(e));
        }
        Ok(db.rename_group(&id, &name)?.ok_or(ApiError::NotFound("Group")))
    })
    .await??;

    state.emitter.group_updated(mutated.row.clone()).await;
    Ok(Json(ApiEnvelope::ok(mutated.row)))
}

pub async fn delete_group(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let username = claims.username.clone();
    let mutated = db_call(&state, move |db| {
        if let Err(e) = managed_group(db, &claims, &id)? {
            return Ok(Err(e));
        }
        Ok(db.soft_delete_group(&id)?.ok_or(ApiError::NotFound("Group")))
    })
    .await??;
    info!("{} deleted group {}", username, mutated.row.id);

    state
        .emitter
        .group_deleted(mutated.row.id.clone(), &mutated.row.member_ids)
        .await;
    Ok(Json(ApiEnvelope::ok(mutated.row)))
}

pub async fn restore_group(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let mutated = db_call(&state, move |db| {
        if let Err(e) = managed_group(db, &claims, &id)? {
            return Ok(Err(e));
        }
        Ok(db.restore_group(&id)?.ok_or(ApiError::NotFound("Group")))
    })
    .await??;

    state.emitter.group_restored(mutated.row.clone()).await;
    Ok(Json(ApiEnvelope::ok(mutated.row)))
}
