use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use tracing::error;

use beacon_db::QueryError;
use beacon_types::api::{ActionKind, ApiEnvelope};
use beacon_types::query::QueryParamError;

/// Handler failures, rendered as `{ success: false, message }`.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),

    #[error("{}", .0.denied_message())]
    Unauthorized(ActionKind),

    #[error("{}", .0.denied_message())]
    Forbidden(ActionKind),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("{0}")]
    Conflict(String),

    #[error("internal error: {0}")]
    Internal(anyhow::Error),
}

impl ApiError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Rejected list parameters surface as validation errors; everything else
/// from the store is a server fault.
impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast::<QueryError>() {
            Ok(query) => Self::Validation(query.to_string()),
            Err(err) => Self::Internal(err),
        }
    }
}

impl From<QueryParamError> for ApiError {
    fn from(err: QueryParamError) -> Self {
        Self::Validation(err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            Self::Internal(e) => {
                error!("Request failed: {:#}", e);
                "Internal server error".to_string()
            }
            other => other.to_string(),
        };
        (status, Json(ApiEnvelope::error(message))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_errors_become_validation() {
        let err: ApiError = anyhow::Error::from(QueryError::UnknownSort("password".into())).into();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(err.to_string(), "unknown sort field 'password'");

        let err: ApiError = anyhow::anyhow!("disk full").into();
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn denials_carry_the_action_message() {
        let err = ApiError::Forbidden(ActionKind::HardDelete);
        assert_eq!(err.to_string(), ActionKind::HardDelete.denied_message());
        assert_eq!(err.status(), StatusCode::FORBIDDEN);
    }
}
