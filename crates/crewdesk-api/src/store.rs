use std::str::FromStr;
use std::sync::Arc;

use anyhow::Context;
use chrono::{DateTime, Utc};
use tracing::{debug, info};
use uuid::Uuid;

use crewdesk_db::Database;
use crewdesk_db::models::{MemberRow, MessageRow, NewMessage, NewRoom, RoomRow, RoomSummaryRow, UnreadRow};
use crewdesk_types::api::{
    CreateRoomRequest, DeletedMessage, MirrorUserRequest, PostMessageRequest, PostMessageResponse,
};
use crewdesk_types::models::{
    ChatMessage, GlobalRole, MessageId, MessageKind, Room, RoomId, RoomKind, RoomMember,
    RoomSummary, UnreadCount, WorkspaceId, WorkspaceRole,
};

use crate::access::{MembershipAuthority, RoomAccess, RoomFacts};
use crate::auth::Caller;
use crate::error::ChatError;

pub const MAX_CONTENT_CHARS: usize = 4000;
const MAX_ROOM_NAME_CHARS: usize = 100;
const DIRECT_ROOM_NAME: &str = "direct";

/// Message store gateway: every chat read and write, gated by the membership
/// authority. Methods block on SQLite; handlers call them through
/// `spawn_blocking`.
#[derive(Clone)]
pub struct MessageStore {
    db: Arc<Database>,
    authority: MembershipAuthority,
}

impl MessageStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self {
            authority: MembershipAuthority::new(db.clone()),
            db,
        }
    }

    pub fn authority(&self) -> &MembershipAuthority {
        &self.authority
    }

    pub fn database(&self) -> &Arc<Database> {
        &self.db
    }

    /// Existence first, then membership.
    fn require_member(&self, caller: &Caller, room_id: RoomId) -> Result<RoomFacts, ChatError> {
        let facts = self.require_room(caller, room_id)?;
        match facts.access() {
            RoomAccess::Granted { .. } => Ok(facts),
            _ => Err(ChatError::PermissionDenied(format!("not a member of room {room_id}"))),
        }
    }

    fn require_manager(&self, caller: &Caller, room_id: RoomId) -> Result<RoomFacts, ChatError> {
        let facts = self.require_room(caller, room_id)?;
        if facts.manageable_by(caller.user_id, caller.role) {
            Ok(facts)
        } else {
            Err(ChatError::PermissionDenied(format!("cannot manage room {room_id}")))
        }
    }

    fn require_room(&self, caller: &Caller, room_id: RoomId) -> Result<RoomFacts, ChatError> {
        self.authority
            .lookup(caller.user_id, room_id)?
            .ok_or_else(|| ChatError::NotFound(format!("room {room_id}")))
    }

    // -- Messages --

    /// One page in chronological order. Storage pages newest-first so
    /// `offset` walks back in history.
    pub fn list_messages(
        &self,
        caller: &Caller,
        room_id: RoomId,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<ChatMessage>, ChatError> {
        self.require_member(caller, room_id)?;

        let mut rows = self.db.list_messages(room_id, limit, offset)?;
        rows.reverse();

        rows.into_iter()
            .map(|row| message_from_row(row).map_err(ChatError::from))
            .collect()
    }

    pub fn post_message(
        &self,
        caller: &Caller,
        req: &PostMessageRequest,
    ) -> Result<PostMessageResponse, ChatError> {
        let kind = req.kind.unwrap_or_default();
        let attachment_ref = req
            .attachment_ref
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty());
        validate_message(kind, &req.content, attachment_ref)?;

        let facts = self.require_member(caller, req.room_id)?;
        if facts.archived {
            return Err(ChatError::PermissionDenied("room is archived".into()));
        }

        if let Some(reply_to_id) = req.reply_to_id {
            match self.db.get_message(reply_to_id)? {
                Some(target) if target.room_id == req.room_id => {}
                _ => {
                    return Err(ChatError::InvalidInput(format!(
                        "reply target {reply_to_id} is not in room {}",
                        req.room_id
                    )));
                }
            }
        }

        let sender_id = caller.user_id.to_string();
        let posted = self.db.insert_message(&NewMessage {
            room_id: req.room_id,
            sender_id: &sender_id,
            sender_name: &caller.username,
            content: &req.content,
            kind,
            attachment_ref,
            reply_to_id: req.reply_to_id,
        })?;

        let message = message_from_row(posted.row)?;
        let recipient_ids = posted
            .recipient_ids
            .iter()
            .map(|id| parse_uuid(id))
            .collect::<anyhow::Result<Vec<_>>>()?;

        debug!(
            "{} posted message {} to room {} ({} recipients)",
            caller.username,
            message.id,
            message.room_id,
            recipient_ids.len()
        );

        Ok(PostMessageResponse { message, recipient_ids })
    }

    pub fn edit_message(
        &self,
        caller: &Caller,
        message_id: MessageId,
        content: &str,
    ) -> Result<ChatMessage, ChatError> {
        let existing = self.require_own_message(caller, message_id)?;
        let kind = MessageKind::from_str(&existing.kind).map_err(anyhow::Error::from)?;
        validate_content(kind, content)?;

        let row = self
            .db
            .update_message_content(message_id, content)?
            .ok_or_else(|| ChatError::NotFound(format!("message {message_id}")))?;

        Ok(message_from_row(row)?)
    }

    pub fn delete_message(
        &self,
        caller: &Caller,
        message_id: MessageId,
    ) -> Result<DeletedMessage, ChatError> {
        let existing = self.require_own_message(caller, message_id)?;

        if !self.db.delete_message(message_id)? {
            return Err(ChatError::NotFound(format!("message {message_id}")));
        }

        Ok(DeletedMessage {
            id: message_id,
            room_id: existing.room_id,
        })
    }

    fn require_own_message(
        &self,
        caller: &Caller,
        message_id: MessageId,
    ) -> Result<MessageRow, ChatError> {
        let row = self
            .db
            .get_message(message_id)?
            .ok_or_else(|| ChatError::NotFound(format!("message {message_id}")))?;

        if parse_uuid(&row.sender_id)? != caller.user_id {
            return Err(ChatError::PermissionDenied(
                "only the sender may change this message".into(),
            ));
        }

        // Authorship alone is not enough: the sender must still belong to a live room.
        let facts = self.require_member(caller, row.room_id)?;
        if facts.archived {
            return Err(ChatError::PermissionDenied("room is archived".into()));
        }
        Ok(row)
    }

    // -- Unread ledger --

    pub fn mark_read(&self, caller: &Caller, room_id: RoomId) -> Result<(), ChatError> {
        self.require_member(caller, room_id)?;
        self.db.mark_read(&caller.user_id.to_string(), room_id)?;
        Ok(())
    }

    pub fn get_unread_total(&self, caller: &Caller) -> Result<i64, ChatError> {
        Ok(self.db.get_unread_total(&caller.user_id.to_string())?)
    }

    pub fn get_unread_by_room(&self, caller: &Caller) -> Result<Vec<UnreadCount>, ChatError> {
        let rows = self.db.get_unread_by_room(&caller.user_id.to_string())?;
        rows.into_iter()
            .map(|row| unread_from_row(row).map_err(ChatError::from))
            .collect()
    }

    // -- Rooms --

    pub fn list_rooms(
        &self,
        caller: &Caller,
        workspace_id: Option<WorkspaceId>,
    ) -> Result<Vec<RoomSummary>, ChatError> {
        let rows = self
            .db
            .list_rooms_for_user(&caller.user_id.to_string(), workspace_id)?;
        rows.into_iter()
            .map(|row| summary_from_row(row).map_err(ChatError::from))
            .collect()
    }

    /// Create a room with the caller as first member. A direct room is
    /// get-or-create against exactly one other user.
    pub fn create_room(&self, caller: &Caller, req: &CreateRoomRequest) -> Result<RoomId, ChatError> {
        let mut member_ids: Vec<Uuid> = Vec::with_capacity(req.member_ids.len());
        for id in &req.member_ids {
            if *id != caller.user_id && !member_ids.contains(id) {
                member_ids.push(*id);
            }
        }

        if req.kind == RoomKind::Direct {
            let [peer] = member_ids.as_slice() else {
                return Err(ChatError::InvalidInput(
                    "a direct room needs exactly one other member".into(),
                ));
            };
            let (room_id, _) = self.get_or_create_direct_room(caller, *peer)?;
            return Ok(room_id);
        }

        let name = req.name.trim();
        if name.is_empty() || name.chars().count() > MAX_ROOM_NAME_CHARS {
            return Err(ChatError::InvalidInput(format!(
                "room name must be 1..={MAX_ROOM_NAME_CHARS} characters"
            )));
        }

        if let Some(workspace_id) = req.workspace_id {
            let role = self
                .db
                .get_workspace_role(workspace_id, &caller.user_id.to_string())?;
            if role.is_none() {
                return Err(ChatError::PermissionDenied(format!(
                    "not a member of workspace {workspace_id}"
                )));
            }
        }

        let created_by = caller.user_id.to_string();
        let member_ids: Vec<String> = member_ids.iter().map(Uuid::to_string).collect();
        let room_id = self.db.create_room(&NewRoom {
            workspace_id: req.workspace_id,
            name,
            description: req.description.as_deref().map(str::trim).filter(|s| !s.is_empty()),
            kind: req.kind,
            created_by: &created_by,
            member_ids: &member_ids,
        })?;

        info!(
            "{} created {} room {} ({} members)",
            caller.username,
            req.kind,
            room_id,
            member_ids.len() + 1
        );
        Ok(room_id)
    }

    /// Returns `(room_id, created)`.
    pub fn get_or_create_direct_room(
        &self,
        caller: &Caller,
        peer_id: Uuid,
    ) -> Result<(RoomId, bool), ChatError> {
        if peer_id == caller.user_id {
            return Err(ChatError::InvalidInput(
                "a direct room needs two distinct users".into(),
            ));
        }

        let (room_id, created) = self.db.get_or_create_direct_room(
            &caller.user_id.to_string(),
            &peer_id.to_string(),
            DIRECT_ROOM_NAME,
        )?;

        if created {
            info!("{} opened direct room {} with {}", caller.username, room_id, peer_id);
        }
        Ok((room_id, created))
    }

    pub fn get_room(&self, caller: &Caller, room_id: RoomId) -> Result<Room, ChatError> {
        self.require_member(caller, room_id)?;
        let row = self
            .db
            .get_room(room_id)?
            .ok_or_else(|| ChatError::NotFound(format!("room {room_id}")))?;
        Ok(room_from_row(row)?)
    }

    pub fn list_members(&self, caller: &Caller, room_id: RoomId) -> Result<Vec<RoomMember>, ChatError> {
        self.require_member(caller, room_id)?;
        let rows = self.db.list_members(room_id)?;
        rows.into_iter()
            .map(|row| member_from_row(row).map_err(ChatError::from))
            .collect()
    }

    /// Returns false when the user already belonged to the room.
    pub fn add_member(&self, caller: &Caller, room_id: RoomId, user_id: Uuid) -> Result<bool, ChatError> {
        let facts = self.require_manager(caller, room_id)?;
        if facts.kind == RoomKind::Direct {
            return Err(ChatError::InvalidInput("direct rooms have exactly two members".into()));
        }

        let added = self.db.add_member(room_id, &user_id.to_string())?;
        if added {
            info!("{} added {} to room {}", caller.username, user_id, room_id);
        }
        Ok(added)
    }

    /// A member may always remove themself; removing anyone else is manage-gated.
    pub fn remove_member(&self, caller: &Caller, room_id: RoomId, user_id: Uuid) -> Result<(), ChatError> {
        let facts = if user_id == caller.user_id {
            self.require_room(caller, room_id)?
        } else {
            self.require_manager(caller, room_id)?
        };
        if facts.kind == RoomKind::Direct {
            return Err(ChatError::InvalidInput("direct rooms have exactly two members".into()));
        }

        if !self.db.remove_member(room_id, &user_id.to_string())? {
            return Err(ChatError::NotFound(format!("{user_id} is not in room {room_id}")));
        }

        info!("{} removed {} from room {}", caller.username, user_id, room_id);
        Ok(())
    }

    pub fn archive_room(&self, caller: &Caller, room_id: RoomId) -> Result<(), ChatError> {
        self.require_manager(caller, room_id)?;
        self.db.archive_room(room_id)?;
        info!("{} archived room {}", caller.username, room_id);
        Ok(())
    }

    // -- Directory mirror --
    //
    // Profiles and workspace roles belong to the identity service, which
    // pushes them here with an admin credential.

    fn require_admin(caller: &Caller) -> Result<(), ChatError> {
        if caller.role == GlobalRole::Admin {
            Ok(())
        } else {
            Err(ChatError::PermissionDenied("directory updates need an admin credential".into()))
        }
    }

    pub fn mirror_user(
        &self,
        caller: &Caller,
        user_id: Uuid,
        req: &MirrorUserRequest,
    ) -> Result<(), ChatError> {
        Self::require_admin(caller)?;

        let username = req.username.trim();
        if username.is_empty() {
            return Err(ChatError::InvalidInput("username is empty".into()));
        }
        let display_name = req.display_name.as_deref().map(str::trim).filter(|s| !s.is_empty());
        let avatar_url = req.avatar_url.as_deref().map(str::trim).filter(|s| !s.is_empty());

        self.db
            .upsert_user(&user_id.to_string(), username, display_name, avatar_url)?;
        debug!("mirrored profile of {} ({})", username, user_id);
        Ok(())
    }

    pub fn set_workspace_role(
        &self,
        caller: &Caller,
        workspace_id: WorkspaceId,
        user_id: Uuid,
        role: WorkspaceRole,
    ) -> Result<(), ChatError> {
        Self::require_admin(caller)?;
        self.db
            .set_workspace_role(workspace_id, &user_id.to_string(), role.as_str())?;
        info!("{} is now {} of workspace {}", user_id, role, workspace_id);
        Ok(())
    }

    pub fn remove_workspace_member(
        &self,
        caller: &Caller,
        workspace_id: WorkspaceId,
        user_id: Uuid,
    ) -> Result<(), ChatError> {
        Self::require_admin(caller)?;
        if !self
            .db
            .remove_workspace_member(workspace_id, &user_id.to_string())?
        {
            return Err(ChatError::NotFound(format!(
                "{user_id} is not in workspace {workspace_id}"
            )));
        }
        info!("{} left workspace {}", user_id, workspace_id);
        Ok(())
    }
}

// -- Validation --

fn validate_message(
    kind: MessageKind,
    content: &str,
    attachment_ref: Option<&str>,
) -> Result<(), ChatError> {
    if kind.needs_attachment() && attachment_ref.is_none() {
        return Err(ChatError::InvalidInput(format!(
            "{kind} messages need an attachment reference"
        )));
    }
    validate_content(kind, content)
}

/// Text content must be non-blank. Attachments may carry an empty caption.
fn validate_content(kind: MessageKind, content: &str) -> Result<(), ChatError> {
    if !kind.needs_attachment() && content.trim().is_empty() {
        return Err(ChatError::InvalidInput("message content is empty".into()));
    }
    if content.chars().count() > MAX_CONTENT_CHARS {
        return Err(ChatError::InvalidInput(format!(
            "message content exceeds {MAX_CONTENT_CHARS} characters"
        )));
    }
    Ok(())
}

// -- Row conversion --

fn parse_uuid(s: &str) -> anyhow::Result<Uuid> {
    Uuid::parse_str(s).with_context(|| format!("bad uuid in store: {s}"))
}

fn parse_timestamp(s: &str) -> anyhow::Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(s)
        .with_context(|| format!("bad timestamp in store: {s}"))?
        .with_timezone(&Utc))
}

fn message_from_row(row: MessageRow) -> anyhow::Result<ChatMessage> {
    Ok(ChatMessage {
        id: row.id,
        room_id: row.room_id,
        sender_id: parse_uuid(&row.sender_id)?,
        sender_name: row.sender_name,
        sender_avatar: row.sender_avatar,
        content: row.content,
        kind: MessageKind::from_str(&row.kind)?,
        attachment_ref: row.attachment_ref,
        reply_to_id: row.reply_to_id,
        edited: row.edited,
        edited_at: row.edited_at.as_deref().map(parse_timestamp).transpose()?,
        created_at: parse_timestamp(&row.created_at)?,
    })
}

fn room_from_row(row: RoomRow) -> anyhow::Result<Room> {
    Ok(Room {
        id: row.id,
        workspace_id: row.workspace_id,
        name: row.name,
        description: row.description,
        kind: RoomKind::from_str(&row.kind)?,
        archived: row.archived,
        created_by: parse_uuid(&row.created_by)?,
        created_at: parse_timestamp(&row.created_at)?,
    })
}

fn summary_from_row(row: RoomSummaryRow) -> anyhow::Result<RoomSummary> {
    Ok(RoomSummary {
        last_activity_at: parse_timestamp(&row.last_activity_at)?,
        unread_count: row.unread_count,
        room: room_from_row(row.room)?,
    })
}

fn member_from_row(row: MemberRow) -> anyhow::Result<RoomMember> {
    Ok(RoomMember {
        user_id: parse_uuid(&row.user_id)?,
        username: row.username,
        display_name: row.display_name,
        joined_at: parse_timestamp(&row.joined_at)?,
    })
}

fn unread_from_row(row: UnreadRow) -> anyhow::Result<UnreadCount> {
    Ok(UnreadCount {
        room_id: row.room_id,
        unread_count: row.unread_count,
        last_read_at: row.last_read_at.as_deref().map(parse_timestamp).transpose()?,
    })
}
