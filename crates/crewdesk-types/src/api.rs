use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{
    ChatMessage, GlobalRole, MessageId, MessageKind, RoomId, RoomKind, WorkspaceId, WorkspaceRole,
};

// -- JWT Claims --

/// JWT claims shared by the REST middleware and the realtime upgrade. Tokens
/// are minted by the external auth service; this crate only verifies them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub username: String,
    #[serde(default)]
    pub role: GlobalRole,
    pub exp: usize,
}

// -- Rooms --

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListRoomsQuery {
    pub workspace_id: Option<WorkspaceId>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CreateRoomRequest {
    pub workspace_id: Option<WorkspaceId>,
    pub name: String,
    pub kind: RoomKind,
    pub description: Option<String>,
    #[serde(default)]
    pub member_ids: Vec<Uuid>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateRoomResponse {
    pub id: RoomId,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct DirectRoomRequest {
    pub user_id: Uuid,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AddMemberRequest {
    pub user_id: Uuid,
}

// -- Messages --

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListMessagesQuery {
    pub room_id: RoomId,
    #[serde(default = "default_limit")]
    pub limit: u32,
    #[serde(default)]
    pub offset: u32,
}

pub fn default_limit() -> u32 {
    50
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PostMessageRequest {
    pub room_id: RoomId,
    pub content: String,
    pub kind: Option<MessageKind>,
    pub attachment_ref: Option<String>,
    pub reply_to_id: Option<MessageId>,
}

/// The persisted message plus the members that should get a `notify-user`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostMessageResponse {
    #[serde(flatten)]
    pub message: ChatMessage,
    pub recipient_ids: Vec<Uuid>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct EditMessageRequest {
    pub id: MessageId,
    pub content: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DeleteMessageQuery {
    pub id: MessageId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeletedMessage {
    pub id: MessageId,
    pub room_id: RoomId,
}

// -- Unread ledger --

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct MarkReadRequest {
    pub room_id: RoomId,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UnreadTotalResponse {
    pub total: i64,
}

// -- Directory mirror --

/// Profile pushed by the identity service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct MirrorUserRequest {
    pub username: String,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WorkspaceRoleRequest {
    pub role: WorkspaceRole,
}

// -- Misc --

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub connections: usize,
}
