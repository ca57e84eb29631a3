use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use uuid::Uuid;

use crewdesk_types::api::{MirrorUserRequest, WorkspaceRoleRequest};
use crewdesk_types::models::WorkspaceId;

use crate::auth::{AppState, Caller};
use crate::error::ChatError;

pub async fn mirror_user(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(user_id): Path<Uuid>,
    Json(req): Json<MirrorUserRequest>,
) -> Result<impl IntoResponse, ChatError> {
    let store = state.store.clone();
    tokio::task::spawn_blocking(move || store.mirror_user(&caller, user_id, &req)).await??;

    Ok(StatusCode::NO_CONTENT)
}

pub async fn set_workspace_role(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path((workspace_id, user_id)): Path<(WorkspaceId, Uuid)>,
    Json(req): Json<WorkspaceRoleRequest>,
) -> Result<impl IntoResponse, ChatError> {
    let store = state.store.clone();
    tokio::task::spawn_blocking(move || {
        store.set_workspace_role(&caller, workspace_id, user_id, req.role)
    })
    .await??;

    Ok(StatusCode::NO_CONTENT)
}

pub async fn remove_workspace_member(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path((workspace_id, user_id)): Path<(WorkspaceId, Uuid)>,
) -> Result<impl IntoResponse, ChatError> {
    let store = state.store.clone();
    tokio::task::spawn_blocking(move || {
        store.remove_workspace_member(&caller, workspace_id, user_id)
    })
    .await??;

    Ok(StatusCode::NO_CONTENT)
}
