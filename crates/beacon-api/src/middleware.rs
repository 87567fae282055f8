use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};
use jsonwebtoken::{DecodingKey, Validation, decode};

use beacon_types::api::{ActionKind, Claims};
use beacon_types::models::Role;

use crate::error::ApiError;
use crate::state::AppState;

/// Staff allowed to moderate comments.
pub const MODERATORS: &[Role] = &[Role::Admin, Role::Editor];

/// Staff allowed to triage contact requests.
pub const SUPPORT_STAFF: &[Role] = &[Role::Admin, Role::Support];

pub fn decode_token(token: &str, secret: &str) -> Option<Claims> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .ok()
    .map(|data| data.claims)
}

/// Extract and validate JWT from Authorization header.
pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or(ApiError::Unauthorized(ActionKind::View))?;

    let claims = decode_token(token, &state.jwt_secret).ok_or(ApiError::Unauthorized(ActionKind::View))?;

    req.extensions_mut().insert(claims);
    Ok(next.run(req).await)
}

pub fn require_role(claims: &Claims, allowed: &[Role], action: ActionKind) -> Result<(), ApiError> {
    if allowed.contains(&claims.role) {
        Ok(())
    } else {
        Err(ApiError::Forbidden(action))
    }
}
