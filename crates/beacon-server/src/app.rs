use axum::{
    Router,
    extract::{Query, State, WebSocketUpgrade},
    response::{IntoResponse, Response},
    routing::get,
};
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use beacon_api::middleware::decode_token;
use beacon_api::{ApiError, AppStateInner};
use beacon_db::Database;
use beacon_gateway::{Dispatcher, Emitter, connection};
use beacon_types::api::ActionKind;

#[derive(Clone)]
struct GatewayState {
    dispatcher: Dispatcher,
    jwt_secret: String,
}

#[derive(Debug, Deserialize)]
struct GatewayQuery {
    token: Option<String>,
}

/// REST routes plus the `/gateway` websocket, sharing one dispatcher.
pub fn build(db: Database, jwt_secret: String) -> Router {
    let dispatcher = Dispatcher::new();
    let app_state = AppStateInner::new(db, jwt_secret.clone(), Emitter::new(dispatcher.clone()));

    let ws_route = Router::new()
        .route("/gateway", get(ws_upgrade))
        .with_state(GatewayState { dispatcher, jwt_secret });

    Router::new()
        .merge(beacon_api::router(app_state))
        .merge(ws_route)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// A `?token=` is checked before upgrading; without one the socket must
/// send `Identify` first.
async fn ws_upgrade(
    State(state): State<GatewayState>,
    Query(query): Query<GatewayQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    match query.token {
        Some(token) => match decode_token(&token, &state.jwt_secret) {
            Some(claims) => ws
                .on_upgrade(move |socket| connection::handle_connection_authenticated(socket, state.dispatcher, claims))
                .into_response(),
            None => ApiError::Unauthorized(ActionKind::View).into_response(),
        },
        None => ws
            .on_upgrade(move |socket| connection::handle_connection(socket, state.dispatcher, state.jwt_secret))
            .into_response(),
    }
}
