use std::collections::HashMap;

use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::{debug, info};
use uuid::Uuid;

use beacon_db::models::BulkOutcome;
use beacon_types::api::{
    ActionKind, ApiEnvelope, AssignRequest, BulkAction, BulkRequest, BulkResponse, Claims, CreateContactRequest,
    ListData, UpdateContactRequest,
};
use beacon_types::query::ListParams;

use crate::error::ApiError;
use crate::middleware::{SUPPORT_STAFF, require_role};
use crate::state::{AppState, db_call, group_by_previous};

fn validate_create(req: &CreateContactRequest) -> Result<(), ApiError> {
    for (field, value) in [
        ("name", &req.name),
        ("email", &req.email),
        ("subject", &req.subject),
        ("content", &req.content),
    ] {
        if value.trim().is_empty() {
            return Err(ApiError::validation(format!("{} is required", field)));
        }
    }
    let email = req.email.trim();
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && domain.contains('.') => Ok(()),
        _ => Err(ApiError::validation("email is invalid")),
    }
}

/// Public contact form submission. Notifies support staff.
pub async fn create(
    State(state): State<AppState>,
    Json(req): Json<CreateContactRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validate_create(&req)?;

    let req = CreateContactRequest {
        name: req.name.trim().to_string(),
        email: req.email.trim().to_string(),
        phone: req.phone.map(|p| p.trim().to_string()).filter(|p| !p.is_empty()),
        subject: req.subject.trim().to_string(),
        content: req.content.trim().to_string(),
    };
    let id = Uuid::new_v4().to_string();
    let row = db_call(&state, move |db| db.create_contact_request(&id, &req)).await?;
    info!("New contact request {} from {}", row.id, row.email);

    state.emitter.contact_request_new(row.clone()).await;
    Ok((StatusCode::CREATED, Json(ApiEnvelope::ok(row))))
}

pub async fn list(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(query): Query<HashMap<String, String>>,
) -> Result<impl IntoResponse, ApiError> {
    require_role(&claims, SUPPORT_STAFF, ActionKind::View)?;
    let params = ListParams::from_query(query)?;

    let page = db_call(&state, move |db| db.list_contact_requests(&params)).await?;
    Ok(Json(ApiEnvelope::ok(ListData::from(page))))
}

/// Live request counts per status, for the triage tabs.
pub async fn stats(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    require_role(&claims, SUPPORT_STAFF, ActionKind::View)?;

    let counts = db_call(&state, |db| db.count_contact_requests_by_status()).await?;
    let counts: HashMap<&'static str, u64> = counts.into_iter().map(|(s, n)| (s.as_str(), n)).collect();
    Ok(Json(ApiEnvelope::ok(counts)))
}

pub async fn detail(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    require_role(&claims, SUPPORT_STAFF, ActionKind::View)?;

    let row = db_call(&state, move |db| db.get_contact_request(&id))
        .await?
        .ok_or(ApiError::NotFound("Contact request"))?;
    Ok(Json(ApiEnvelope::ok(row)))
}

pub async fn update(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<String>,
    Json(req): Json<UpdateContactRequest>,
) -> Result<impl IntoResponse, ApiError> {
    require_role(&claims, SUPPORT_STAFF, ActionKind::Update)?;

    let mutated = db_call(&state, move |db| db.update_contact_request(&id, &req))
        .await?
        .ok_or(ApiError::NotFound("Contact request"))?;

    if mutated.applied {
        state
            .emitter
            .contact_request_upsert(mutated.row.clone(), Some(mutated.previous_status))
            .await;
    }
    Ok(Json(ApiEnvelope::ok(mutated.row)))
}

pub async fn assign(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<String>,
    Json(req): Json<AssignRequest>,
) -> Result<impl IntoResponse, ApiError> {
    require_role(&claims, SUPPORT_STAFF, ActionKind::Assign)?;

    let assignee = req.assigned_to_id.filter(|a| !a.trim().is_empty());
    let mutated = db_call(&state, move |db| {
        if let Some(assignee) = &assignee {
            if db.get_user_by_id(assignee)?.is_none() {
                return Ok(Err(ApiError::validation(format!("unknown assignee '{}'", assignee))));
            }
        }
        Ok(Ok(db.assign_contact_request(&id, assignee.as_deref())?))
    })
    .await??
    .ok_or(ApiError::NotFound("Contact request"))?;
    info!(
        "{} assigned contact request {} to {:?}",
        claims.username, mutated.row.id, mutated.row.assigned_to_id
    );

    if mutated.applied {
        state
            .emitter
            .contact_request_assigned(mutated.row.clone(), Some(mutated.previous_status))
            .await;
    }
    Ok(Json(ApiEnvelope::ok(mutated.row)))
}

pub async fn delete(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    require_role(&claims, SUPPORT_STAFF, ActionKind::Delete)?;

    let mutated = db_call(&state, move |db| db.soft_delete_contact_request(&id))
        .await?
        .ok_or(ApiError::NotFound("Contact request"))?;

    if mutated.applied {
        state
            .emitter
            .contact_request_upsert(mutated.row.clone(), Some(mutated.previous_status))
            .await;
    }
    Ok(Json(ApiEnvelope::ok(mutated.row)))
}

pub async fn restore(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    require_role(&claims, SUPPORT_STAFF, ActionKind::Restore)?;

    let mutated = db_call(&state, move |db| db.restore_contact_request(&id))
        .await?
        .ok_or(ApiError::NotFound("Contact request"))?;

    if mutated.applied {
        state
            .emitter
            .contact_request_upsert(mutated.row.clone(), Some(mutated.previous_status))
            .await;
    }
    Ok(Json(ApiEnvelope::ok(mutated.row)))
}

pub async fn hard_delete(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    require_role(&claims, SUPPORT_STAFF, ActionKind::HardDelete)?;

    let target = id.clone();
    let previous = db_call(&state, move |db| db.hard_delete_contact_request(&target))
        .await?
        .ok_or(ApiError::NotFound("Contact request"))?;
    info!("{} permanently deleted contact request {}", claims.username, id);

    state.emitter.contact_request_remove(id.clone(), Some(previous)).await;
    Ok(Json(ApiEnvelope::ok(serde_json::json!({ "id": id }))))
}

pub async fn bulk(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<BulkRequest>,
) -> Result<impl IntoResponse, ApiError> {
    require_role(&claims, SUPPORT_STAFF, ActionKind::Bulk)?;
    if req.ids.is_empty() {
        return Err(ApiError::validation("ids must not be empty"));
    }

    let action = req.action;
    let outcome = db_call(&state, move |db| db.bulk_contact_requests(&req)).await?;
    let affected = outcome.affected();
    debug!("Bulk {} on contact requests affected {}", action.as_str(), affected);

    match outcome {
        BulkOutcome::Updated(rows) => {
            for (previous, rows) in group_by_previous(rows) {
                if action == BulkAction::Assign {
                    // Each assignee hears about their own rows.
                    for row in &rows {
                        state
                            .emitter
                            .contact_request_assigned(row.clone(), Some(previous))
                            .await;
                    }
                } else {
                    state
                        .emitter
                        .contact_request_batch_upsert(rows, Some(previous))
                        .await;
                }
            }
        }
        BulkOutcome::Removed(removed) => {
            for (id, previous) in removed {
                state.emitter.contact_request_remove(id, Some(previous)).await;
            }
        }
    }

    Ok(Json(BulkResponse {
        success: true,
        message: format!("{} contact request(s) updated with '{}'", affected, action.as_str()),
        affected,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn form(email: &str) -> CreateContactRequest {
        CreateContactRequest {
            name: "Ann".into(),
            email: email.into(),
            phone: None,
            subject: "Billing".into(),
            content: "Invoice is wrong".into(),
        }
    }

    #[test]
    fn contact_form_requires_a_plausible_email() {
        assert!(validate_create(&form("ann@example.com")).is_ok());
        assert!(validate_create(&form("ann")).is_err());
        assert!(validate_create(&form("@example.com")).is_err());
        assert!(validate_create(&form("ann@localhost")).is_err());
    }

    #[test]
    fn contact_form_rejects_blank_fields() {
        let mut req = form("ann@example.com");
        req.subject = "   ".into();
        let err = validate_create(&req).unwrap_err();
        assert_eq!(err.to_string(), "subject is required");
    }
}
