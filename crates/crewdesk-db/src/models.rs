//! Database row types. These map directly to SQLite rows.
//! Distinct from crewdesk-types API models to keep the DB layer independent.

use crewdesk_types::models::{MessageKind, RoomKind};

pub struct RoomRow {
    pub id: i64,
    pub workspace_id: Option<i64>,
    pub name: String,
    pub description: Option<String>,
    pub kind: String,
    pub archived: bool,
    pub created_by: String,
    pub created_at: String,
}

pub struct RoomSummaryRow {
    pub room: RoomRow,
    pub unread_count: i64,
    pub last_activity_at: String,
}

pub struct MemberRow {
    pub user_id: String,
    pub username: String,
    pub display_name: Option<String>,
    pub joined_at: String,
}

pub struct MessageRow {
    pub id: i64,
    pub room_id: i64,
    pub sender_id: String,
    pub sender_name: String,
    pub sender_avatar: Option<String>,
    pub content: String,
    pub kind: String,
    pub attachment_ref: Option<String>,
    pub reply_to_id: Option<i64>,
    pub edited: bool,
    pub edited_at: Option<String>,
    pub created_at: String,
}

pub struct UnreadRow {
    pub room_id: i64,
    pub unread_count: i64,
    pub last_read_at: Option<String>,
}

/// Everything the membership authority needs to judge one (user, room) pair.
pub struct AccessRow {
    pub room_id: i64,
    pub workspace_id: Option<i64>,
    pub created_by: String,
    pub kind: String,
    pub archived: bool,
    pub is_member: bool,
    pub workspace_role: Option<String>,
}

// -- Inserts --

pub struct NewRoom<'a> {
    pub workspace_id: Option<i64>,
    pub name: &'a str,
    pub description: Option<&'a str>,
    pub kind: RoomKind,
    pub created_by: &'a str,
    pub member_ids: &'a [String],
}

pub struct NewMessage<'a> {
    pub room_id: i64,
    pub sender_id: &'a str,
    pub sender_name: &'a str,
    pub content: &'a str,
    pub kind: MessageKind,
    pub attachment_ref: Option<&'a str>,
    pub reply_to_id: Option<i64>,
}

/// Result of a message insert: the stored row and the members whose unread
/// counters were bumped.
pub struct PostedMessage {
    pub row: MessageRow,
    pub recipient_ids: Vec<String>,
}
