use thiserror::Error;

use beacon_types::api::ActionKind;

/// Failures of the realtime pipeline itself.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("malformed socket event: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("gateway connection failed: {0}")]
    Connect(String),

    #[error("gateway connection lost: {0}")]
    Transport(String),
}

impl From<tokio_tungstenite::tungstenite::Error> for SyncError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

/// A failed user action, in the categories the UI reports differently.
#[derive(Debug, Error)]
pub enum ActionError {
    #[error("{0}")]
    Validation(String),

    #[error("{}", .0.denied_message())]
    Unauthorized(ActionKind),

    #[error("{}", .0.denied_message())]
    Forbidden(ActionKind),

    #[error("{0}")]
    NotFound(String),

    #[error("{message}")]
    Server { status: u16, message: String },

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
}

impl ActionError {
    /// True for 401/403, which the UI shows as a fixed per-action message.
    pub fn is_permission(&self) -> bool {
        matches!(self, Self::Unauthorized(_) | Self::Forbidden(_))
    }
}
