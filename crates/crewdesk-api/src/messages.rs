use axum::{
    Extension, Json,
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
};

use crewdesk_types::api::{
    DeleteMessageQuery, EditMessageRequest, ListMessagesQuery, PostMessageRequest,
};

use crate::auth::{AppState, Caller};
use crate::error::ChatError;

// Handlers only persist. Realtime relays are emitted by the client over the
// gateway once the durable write has returned.

pub async fn list_messages(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Query(query): Query<ListMessagesQuery>,
) -> Result<impl IntoResponse, ChatError> {
    let store = state.store.clone();
    let messages = tokio::task::spawn_blocking(move || {
        store.list_messages(&caller, query.room_id, query.limit, query.offset)
    })
    .await??;

    Ok(Json(messages))
}

pub async fn post_message(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Json(req): Json<PostMessageRequest>,
) -> Result<impl IntoResponse, ChatError> {
    let store = state.store.clone();
    let posted = tokio::task::spawn_blocking(move || store.post_message(&caller, &req)).await??;

    Ok((StatusCode::CREATED, Json(posted)))
}

pub async fn edit_message(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Json(req): Json<EditMessageRequest>,
) -> Result<impl IntoResponse, ChatError> {
    let store = state.store.clone();
    let message =
        tokio::task::spawn_blocking(move || store.edit_message(&caller, req.id, &req.content))
            .await??;

    Ok(Json(message))
}

pub async fn delete_message(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Query(query): Query<DeleteMessageQuery>,
) -> Result<impl IntoResponse, ChatError> {
    let store = state.store.clone();
    let deleted =
        tokio::task::spawn_blocking(move || store.delete_message(&caller, query.id)).await??;

    Ok(Json(deleted))
}
