pub mod auth;
pub mod chat;
pub mod comments;
pub mod contact_requests;
pub mod error;
pub mod middleware;
pub mod routes;
pub mod state;

pub use error::ApiError;
pub use routes::router;
pub use state::{AppState, AppStateInner};
