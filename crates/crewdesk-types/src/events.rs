use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{ChatMessage, MessageId, RoomId};

/// Realtime channel a connection can be subscribed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelKey {
    Room(RoomId),
    User(Uuid),
}

impl std::fmt::Display for ChannelKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Room(id) => write!(f, "room:{id}"),
            Self::User(id) => write!(f, "user:{id}"),
        }
    }
}

/// Why a user channel is being pinged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NotifyKind {
    /// Something new landed in a room the user may not be viewing.
    NewMessage,
    /// The user read a room from another tab; refresh badges.
    Read,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingUser {
    pub id: Uuid,
    pub name: String,
}

/// Commands sent FROM client TO server over the realtime connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    content = "data",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum ClientCommand {
    JoinRoom { room_id: RoomId },

    LeaveRoom { room_id: RoomId },

    /// Subscribe to the personal notification channel.
    JoinUser { user_id: Uuid },

    /// Relay an already-persisted message to the other viewers of its room.
    SendMessage { message: ChatMessage },

    Typing { room_id: RoomId, is_typing: bool },

    EditMessage { message: ChatMessage },

    DeleteMessage { room_id: RoomId, message_id: MessageId },

    NotifyUser {
        target_user_id: Uuid,
        #[serde(rename = "type")]
        kind: NotifyKind,
        room_id: RoomId,
    },
}

impl ClientCommand {
    pub fn name(&self) -> &'static str {
        match self {
            Self::JoinRoom { .. } => "join-room",
            Self::LeaveRoom { .. } => "leave-room",
            Self::JoinUser { .. } => "join-user",
            Self::SendMessage { .. } => "send-message",
            Self::Typing { .. } => "typing",
            Self::EditMessage { .. } => "edit-message",
            Self::DeleteMessage { .. } => "delete-message",
            Self::NotifyUser { .. } => "notify-user",
        }
    }
}

/// Events sent FROM server TO client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    content = "data",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum ServerEvent {
    /// Server accepted the connection
    Ready {
        user_id: Uuid,
        username: String,
        connection_id: Uuid,
    },

    NewMessage { message: ChatMessage },

    Typing {
        room_id: RoomId,
        user: TypingUser,
        is_typing: bool,
    },

    MessageUpdated { message: ChatMessage },

    MessageDeleted { room_id: RoomId, message_id: MessageId },

    Notify {
        #[serde(rename = "type")]
        kind: NotifyKind,
        room_id: RoomId,
    },

    /// A command was refused; sent only to the issuing connection.
    Rejected { command: String, reason: String },
}

impl ServerEvent {
    /// Room this event concerns, if any.
    pub fn room_id(&self) -> Option<RoomId> {
        match self {
            Self::NewMessage { message } | Self::MessageUpdated { message } => Some(message.room_id),
            Self::Typing { room_id, .. }
            | Self::MessageDeleted { room_id, .. }
            | Self::Notify { room_id, .. } => Some(*room_id),
            Self::Ready { .. } | Self::Rejected { .. } => None,
        }
    }
}
