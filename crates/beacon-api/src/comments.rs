use std::collections::HashMap;

use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    response::IntoResponse,
};
use tracing::{debug, info};

use beacon_db::models::BulkOutcome;
use beacon_types::api::{ActionKind, ApiEnvelope, BulkRequest, BulkResponse, Claims, ListData, UpdateCommentRequest};
use beacon_types::query::ListParams;

use crate::error::ApiError;
use crate::middleware::{MODERATORS, require_role};
use crate::state::{AppState, db_call, group_by_previous};

const MAX_COMMENT_LEN: usize = 5000;

pub async fn list(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(query): Query<HashMap<String, String>>,
) -> Result<impl IntoResponse, ApiError> {
    require_role(&claims, MODERATORS, ActionKind::View)?;
    let params = ListParams::from_query(query)?;

    let page = db_call(&state, move |db| db.list_comments(&params)).await?;
    Ok(Json(ApiEnvelope::ok(ListData::from(page))))
}

pub async fn detail(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    require_role(&claims, MODERATORS, ActionKind::View)?;

    let row = db_call(&state, move |db| db.get_comment(&id))
        .await?
        .ok_or(ApiError::NotFound("Comment"))?;
    Ok(Json(ApiEnvelope::ok(row)))
}

pub async fn update(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<String>,
    Json(req): Json<UpdateCommentRequest>,
) -> Result<impl IntoResponse, ApiError> {
    require_role(&claims, MODERATORS, ActionKind::Update)?;

    let content = match req.content {
        Some(content) => {
            let trimmed = content.trim();
            if trimmed.is_empty() {
                return Err(ApiError::validation("content must not be empty"));
            }
            if trimmed.chars().count() > MAX_COMMENT_LEN {
                return Err(ApiError::validation(format!(
                    "content must be at most {} characters",
                    MAX_COMMENT_LEN
                )));
            }
            Some(trimmed.to_string())
        }
        None => None,
    };
    let approved = req.approved;

    let mutated = db_call(&state, move |db| db.update_comment(&id, content.as_deref(), approved))
        .await?
        .ok_or(ApiError::NotFound("Comment"))?;

    if mutated.applied {
        state
            .emitter
            .comment_upsert(mutated.row.clone(), Some(mutated.previous_status))
            .await;
    }
    Ok(Json(ApiEnvelope::ok(mutated.row)))
}

pub async fn delete(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    require_role(&claims, MODERATORS, ActionKind::Delete)?;

    let mutated = db_call(&state, move |db| db.soft_delete_comment(&id))
        .await?
        .ok_or(ApiError::NotFound("Comment"))?;
    info!("{} soft-deleted comment {}", claims.username, mutated.row.id);

    if mutated.applied {
        state
            .emitter
            .comment_upsert(mutated.row.clone(), Some(mutated.previous_status))
            .await;
    }
    Ok(Json(ApiEnvelope::ok(mutated.row)))
}

pub async fn restore(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    require_role(&claims, MODERATORS, ActionKind::Restore)?;

    let mutated = db_call(&state, move |db| db.restore_comment(&id))
        .await?
        .ok_or(ApiError::NotFound("Comment"))?;

    if mutated.applied {
        state
            .emitter
            .comment_upsert(mutated.row.clone(), Some(mutated.previous_status))
            .await;
    }
    Ok(Json(ApiEnvelope::ok(mutated.row)))
}

pub async fn hard_delete(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    require_role(&claims, MODERATORS, ActionKind::HardDelete)?;

    let target = id.clone();
    let previous = db_call(&state, move |db| db.hard_delete_comment(&target))
        .await?
        .ok_or(ApiError::NotFound("Comment"))?;
    info!("{} permanently deleted comment {}", claims.username, id);

    state.emitter.comment_remove(id.clone(), Some(previous)).await;
    Ok(Json(ApiEnvelope::ok(serde_json::json!({ "id": id }))))
}

pub async fn bulk(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<BulkRequest>,
) -> Result<impl IntoResponse, ApiError> {
    require_role(&claims, MODERATORS, ActionKind::Bulk)?;
    if req.ids.is_empty() {
        return Err(ApiError::validation("ids must not be empty"));
    }

    let action = req.action;
    let ids = req.ids;
    let outcome = db_call(&state, move |db| db.bulk_comments(action, &ids)).await?;
    let affected = outcome.affected();
    debug!("Bulk {} on comments affected {}", action.as_str(), affected);

    match outcome {
        BulkOutcome::Updated(rows) => {
            for (previous, rows) in group_by_previous(rows) {
                state.emitter.comment_batch_upsert(rows, Some(previous)).await;
            }
        }
        BulkOutcome::Removed(removed) => {
            for (id, previous) in removed {
                state.emitter.comment_remove(id, Some(previous)).await;
            }
        }
    }

    Ok(Json(BulkResponse {
        success: true,
        message: format!("{} comment(s) updated with '{}'", affected, action.as_str()),
        affected,
    }))
}
