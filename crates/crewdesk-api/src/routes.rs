use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Query, State, WebSocketUpgrade},
    http::HeaderMap,
    middleware,
    response::IntoResponse,
    routing::{delete, get, post, put},
};
use axum_extra::headers::{Authorization, HeaderMapExt, authorization::Bearer};
use serde::Deserialize;

use crewdesk_gateway::{RoomGate, handle_connection};
use crewdesk_types::api::HealthResponse;

use crate::auth::{AppState, verify_caller};
use crate::error::ChatError;
use crate::middleware::require_auth;
use crate::{directory, messages, rooms, unread};

/// Full HTTP surface: authenticated REST routes, the realtime upgrade and
/// the health check. Cross-cutting layers (CORS, tracing) belong to the binary.
pub fn router(state: AppState) -> Router {
    let protected_routes = Router::new()
        .route("/rooms", get(rooms::list_rooms).post(rooms::create_room))
        .route("/rooms/direct", post(rooms::direct_room))
        .route(
            "/rooms/{room_id}/members",
            get(rooms::list_members).post(rooms::add_member),
        )
        .route("/rooms/{room_id}/members/{user_id}", delete(rooms::remove_member))
        .route("/rooms/{room_id}/archive", post(rooms::archive_room))
        .route(
            "/messages",
            get(messages::list_messages)
                .post(messages::post_message)
                .put(messages::edit_message)
                .delete(messages::delete_message),
        )
        .route("/chat/read", post(unread::mark_read))
        .route("/chat/unread-count", get(unread::unread_total))
        .route("/chat/unread", get(unread::unread_by_room))
        .route("/directory/users/{user_id}", put(directory::mirror_user))
        .route(
            "/directory/workspaces/{workspace_id}/members/{user_id}",
            put(directory::set_workspace_role).delete(directory::remove_workspace_member),
        )
        .layer(middleware::from_fn_with_state(state.clone(), require_auth));

    let public_routes = Router::new()
        .route("/gateway", get(ws_upgrade))
        .route("/health", get(health));

    Router::new()
        .merge(protected_routes)
        .merge(public_routes)
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct GatewayQuery {
    token: Option<String>,
}

/// Browsers cannot set headers on a WebSocket handshake, so the token may
/// also arrive as `?token=`.
async fn ws_upgrade(
    State(state): State<AppState>,
    Query(query): Query<GatewayQuery>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Result<impl IntoResponse, ChatError> {
    let token = match query.token {
        Some(token) => token,
        None => headers
            .typed_get::<Authorization<Bearer>>()
            .map(|auth| auth.token().to_string())
            .ok_or(ChatError::Unauthenticated)?,
    };
    let caller = verify_caller(&token, &state.jwt_secret)?;

    let dispatcher = state.dispatcher.clone();
    let gate: Arc<dyn RoomGate> = Arc::new(state.store.authority().clone());
    let heartbeat = state.heartbeat;

    Ok(ws.on_upgrade(move |socket| {
        handle_connection(
            socket,
            dispatcher,
            gate,
            caller.user_id,
            caller.username,
            heartbeat,
        )
    }))
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".into(),
        connections: state.dispatcher.connection_count().await,
    })
}
