use axum::{
    Extension, Json,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
};

use crewdesk_types::api::{MarkReadRequest, UnreadTotalResponse};

use crate::auth::{AppState, Caller};
use crate::error::ChatError;

pub async fn mark_read(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Json(req): Json<MarkReadRequest>,
) -> Result<impl IntoResponse, ChatError> {
    let store = state.store.clone();
    tokio::task::spawn_blocking(move || store.mark_read(&caller, req.room_id)).await??;

    Ok(StatusCode::NO_CONTENT)
}

pub async fn unread_total(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
) -> Result<impl IntoResponse, ChatError> {
    let store = state.store.clone();
    let total = tokio::task::spawn_blocking(move || store.get_unread_total(&caller)).await??;

    Ok(Json(UnreadTotalResponse { total }))
}

/// Per-room badge counts.
pub async fn unread_by_room(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
) -> Result<impl IntoResponse, ChatError> {
    let store = state.store.clone();
    let counts = tokio::task::spawn_blocking(move || store.get_unread_by_room(&caller)).await??;

    Ok(Json(counts))
}
