use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use uuid::Uuid;

use crewdesk_types::api::{
    AddMemberRequest, CreateRoomRequest, CreateRoomResponse, DirectRoomRequest, ListRoomsQuery,
};
use crewdesk_types::models::RoomId;

use crate::auth::{AppState, Caller};
use crate::error::ChatError;

pub async fn list_rooms(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Query(query): Query<ListRoomsQuery>,
) -> Result<impl IntoResponse, ChatError> {
    let store = state.store.clone();
    let rooms =
        tokio::task::spawn_blocking(move || store.list_rooms(&caller, query.workspace_id)).await??;

    Ok(Json(rooms))
}

pub async fn create_room(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Json(req): Json<CreateRoomRequest>,
) -> Result<impl IntoResponse, ChatError> {
    let store = state.store.clone();
    let id = tokio::task::spawn_blocking(move || store.create_room(&caller, &req)).await??;

    Ok((StatusCode::CREATED, Json(CreateRoomResponse { id })))
}

/// 201 when the room was created, 200 when an existing one was found.
pub async fn direct_room(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Json(req): Json<DirectRoomRequest>,
) -> Result<impl IntoResponse, ChatError> {
    let store = state.store.clone();
    let (id, created) =
        tokio::task::spawn_blocking(move || store.get_or_create_direct_room(&caller, req.user_id))
            .await??;

    let status = if created { StatusCode::CREATED } else { StatusCode::OK };
    Ok((status, Json(CreateRoomResponse { id })))
}

pub async fn list_members(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(room_id): Path<RoomId>,
) -> Result<impl IntoResponse, ChatError> {
    let store = state.store.clone();
    let members =
        tokio::task::spawn_blocking(move || store.list_members(&caller, room_id)).await??;

    Ok(Json(members))
}

pub async fn add_member(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(room_id): Path<RoomId>,
    Json(req): Json<AddMemberRequest>,
) -> Result<impl IntoResponse, ChatError> {
    let store = state.store.clone();
    let added = tokio::task::spawn_blocking(move || store.add_member(&caller, room_id, req.user_id))
        .await??;

    Ok(if added { StatusCode::CREATED } else { StatusCode::NO_CONTENT })
}

pub async fn remove_member(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path((room_id, user_id)): Path<(RoomId, Uuid)>,
) -> Result<impl IntoResponse, ChatError> {
    let store = state.store.clone();
    tokio::task::spawn_blocking(move || store.remove_member(&caller, room_id, user_id)).await??;

    // Fan-out follows membership: the removed user's live tabs stop hearing the room.
    state.dispatcher.evict_user_from_room(user_id, room_id).await;

    Ok(StatusCode::NO_CONTENT)
}

pub async fn archive_room(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(room_id): Path<RoomId>,
) -> Result<impl IntoResponse, ChatError> {
    let store = state.store.clone();
    tokio::task::spawn_blocking(move || store.archive_room(&caller, room_id)).await??;

    state.dispatcher.close_room(room_id).await;

    Ok(StatusCode::NO_CONTENT)
}
