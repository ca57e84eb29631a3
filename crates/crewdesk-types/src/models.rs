use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type RoomId = i64;
pub type MessageId = i64;
pub type WorkspaceId = i64;

/// A stored enum column held a value this build does not know.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} '{value}'")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

macro_rules! string_enum {
    ($name:ident, $label:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text,)+
                }
            }
        }

        impl FromStr for $name {
            type Err = UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => Err(UnknownVariant { kind: $label, value: other.to_string() }),
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoomKind {
    Direct,
    Group,
    Channel,
}

string_enum!(RoomKind, "room kind", {
    Direct => "direct",
    Group => "group",
    Channel => "channel",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    #[default]
    Text,
    Image,
    File,
    System,
}

string_enum!(MessageKind, "message kind", {
    Text => "text",
    Image => "image",
    File => "file",
    System => "system",
});

impl MessageKind {
    /// Image and file messages point at an uploaded attachment.
    pub fn needs_attachment(&self) -> bool {
        matches!(self, Self::Image | Self::File)
    }
}

/// Role a user holds inside a workspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkspaceRole {
    Owner,
    Admin,
    Manager,
    Member,
}

string_enum!(WorkspaceRole, "workspace role", {
    Owner => "owner",
    Admin => "admin",
    Manager => "manager",
    Member => "member",
});

impl WorkspaceRole {
    pub fn can_manage_rooms(&self) -> bool {
        matches!(self, Self::Owner | Self::Admin | Self::Manager)
    }
}

/// Role carried in the caller's credential, independent of any workspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GlobalRole {
    Admin,
    #[default]
    Member,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Room {
    pub id: RoomId,
    pub workspace_id: Option<WorkspaceId>,
    pub name: String,
    pub description: Option<String>,
    pub kind: RoomKind,
    pub archived: bool,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
}

/// Sidebar entry: a room plus the caller's unread state for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSummary {
    #[serde(flatten)]
    pub room: Room,
    pub unread_count: i64,
    pub last_activity_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomMember {
    pub user_id: Uuid,
    pub username: String,
    pub display_name: Option<String>,
    pub joined_at: DateTime<Utc>,
}

/// A persisted chat message joined with the sender's display fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: MessageId,
    pub room_id: RoomId,
    pub sender_id: Uuid,
    pub sender_name: String,
    pub sender_avatar: Option<String>,
    pub content: String,
    pub kind: MessageKind,
    pub attachment_ref: Option<String>,
    pub reply_to_id: Option<MessageId>,
    pub edited: bool,
    pub edited_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnreadCount {
    pub room_id: RoomId,
    pub unread_count: i64,
    pub last_read_at: Option<DateTime<Utc>>,
}
