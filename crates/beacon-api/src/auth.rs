use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier, password_hash::{SaltString, rand_core::OsRng}};
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use jsonwebtoken::{EncodingKey, Header, encode};
use tracing::info;
use uuid::Uuid;

use beacon_types::api::{ActionKind, ApiEnvelope, AuthResponse, Claims, LoginRequest, RegisterRequest};
use beacon_types::models::Role;

use crate::error::ApiError;
use crate::state::{AppState, db_call};

/// Register an account. The first account on an empty database becomes the
/// admin; later ones start as plain users.
pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    // Validate input
    if req.username.len() < 3 || req.username.len() > 32 {
        return Err(ApiError::validation("username must be 3-32 characters"));
    }
    if req.password.len() < 8 {
        return Err(ApiError::validation("password must be at least 8 characters"));
    }

    let username = req.username.clone();
    let (taken, existing_users) = db_call(&state, move |db| {
        Ok((db.get_user_by_username(&username)?.is_some(), db.user_count()?))
    })
    .await?;
    if taken {
        return Err(ApiError::Conflict(format!("username '{}' is taken", req.username)));
    }

    // Hash password with Argon2id
    let salt = SaltString::generate(&mut OsRng);
    let password_hash = Argon2::default()
        .hash_password(req.password.as_bytes(), &salt)
        .map_err(|e| ApiError::Internal(anyhow::anyhow!("password hashing failed: {}", e)))?
        .to_string();

    let user_id = Uuid::new_v4();
    let role = if existing_users == 0 { Role::Admin } else { Role::User };

    let username = req.username.clone();
    db_call(&state, move |db| {
        db.create_user(&user_id.to_string(), &username, &password_hash, role)
    })
    .await?;
    info!("Registered {} ({}) as {}", req.username, user_id, role);

    let token = create_token(&state.jwt_secret, user_id, &req.username, role).map_err(ApiError::Internal)?;

    Ok((
        StatusCode::CREATED,
        Json(ApiEnvelope::ok(AuthResponse {
            user_id,
            username: req.username,
            role,
            token,
        })),
    ))
}

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let username = req.username.clone();
    let user = db_call(&state, move |db| db.get_user_by_username(&username))
        .await?
        .ok_or(ApiError::Unauthorized(ActionKind::View))?;

    // Verify password
    let parsed_hash = PasswordHash::new(&user.password)
        .map_err(|e| ApiError::Internal(anyhow::anyhow!("stored hash is invalid: {}", e)))?;

    Argon2::default()
        .verify_password(req.password.as_bytes(), &parsed_hash)
        .map_err(|_| ApiError::Unauthorized(ActionKind::View))?;

    let user_id: Uuid = user
        .id
        .parse()
        .map_err(|e| ApiError::Internal(anyhow::anyhow!("stored user id is invalid: {}", e)))?;
    let role: Role = user.role.parse().map_err(|e| ApiError::Internal(anyhow::Error::new(e)))?;

    let token = create_token(&state.jwt_secret, user_id, &user.username, role).map_err(ApiError::Internal)?;

    Ok(Json(ApiEnvelope::ok(AuthResponse {
        user_id,
        username: user.username,
        role,
        token,
    })))
}

pub fn create_token(secret: &str, user_id: Uuid, username: &str, role: Role) -> anyhow::Result<String> {
    let claims = Claims {
        sub: user_id,
        username: username.to_string(),
        role,
        exp: (chrono::Utc::now() + chrono::Duration::days(30)).timestamp() as usize,
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;

    Ok(token)
}
