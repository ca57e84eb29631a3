use std::collections::HashMap;

use uuid::Uuid;

use crewdesk_types::api::PostMessageRequest;
use crewdesk_types::models::{ChatMessage, MessageId, RoomId};

#[derive(Debug, Clone, PartialEq)]
pub enum TimelineEntry {
    Confirmed(ChatMessage),
    /// Optimistic insert still waiting on (or having lost) its durable write.
    Local {
        local_id: Uuid,
        request: PostMessageRequest,
        failed: bool,
    },
}

impl TimelineEntry {
    pub fn server_id(&self) -> Option<MessageId> {
        match self {
            Self::Confirmed(m) => Some(m.id),
            Self::Local { .. } => None,
        }
    }

    pub fn content(&self) -> &str {
        match self {
            Self::Confirmed(m) => &m.content,
            Self::Local { request, .. } => &request.content,
        }
    }
}

/// Ordered view of one room.
///
/// Order is whatever the last full fetch said. Realtime updates append or
/// mutate in place by id; they never reorder.
#[derive(Debug, Default)]
pub struct Timeline {
    room_id: Option<RoomId>,
    entries: Vec<TimelineEntry>,
    reconciled: HashMap<Uuid, MessageId>,
}

impl Timeline {
    pub fn new(room_id: RoomId) -> Self {
        Self {
            room_id: Some(room_id),
            ..Self::default()
        }
    }

    pub fn room_id(&self) -> Option<RoomId> {
        self.room_id
    }

    pub fn entries(&self) -> &[TimelineEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Confirmed messages in display order.
    pub fn messages(&self) -> impl Iterator<Item = &ChatMessage> {
        self.entries.iter().filter_map(|e| match e {
            TimelineEntry::Confirmed(m) => Some(m),
            TimelineEntry::Local { .. } => None,
        })
    }

    pub fn get(&self, message_id: MessageId) -> Option<&ChatMessage> {
        self.messages().find(|m| m.id == message_id)
    }

    /// Server id a local insert was reconciled to.
    pub fn server_id(&self, local_id: Uuid) -> Option<MessageId> {
        self.reconciled.get(&local_id).copied()
    }

    pub fn push_local(&mut self, request: PostMessageRequest) -> Uuid {
        let local_id = Uuid::new_v4();
        self.entries.push(TimelineEntry::Local {
            local_id,
            request,
            failed: false,
        });
        local_id
    }

    /// Swap the optimistic entry for the persisted message. If the message
    /// already arrived by another path, the optimistic entry is just dropped.
    pub fn confirm(&mut self, local_id: Uuid, message: ChatMessage) -> bool {
        let Some(pos) = self.local_position(local_id) else {
            return false;
        };
        self.reconciled.insert(local_id, message.id);

        if self.position(message.id).is_some() {
            self.entries.remove(pos);
        } else {
            self.entries[pos] = TimelineEntry::Confirmed(message);
        }
        true
    }

    pub fn fail(&mut self, local_id: Uuid) -> bool {
        match self.local_mut(local_id) {
            Some(failed) => {
                *failed = true;
                true
            }
            None => false,
        }
    }

    /// Flip a failed entry back to pending and hand back its request.
    pub fn retry(&mut self, local_id: Uuid) -> Option<PostMessageRequest> {
        let pos = self.local_position(local_id)?;
        match &mut self.entries[pos] {
            TimelineEntry::Local { request, failed, .. } if *failed => {
                *failed = false;
                Some(request.clone())
            }
            _ => None,
        }
    }

    pub fn discard(&mut self, local_id: Uuid) -> bool {
        match self.local_position(local_id) {
            Some(pos) => {
                self.entries.remove(pos);
                true
            }
            None => false,
        }
    }

    /// Returns false for other rooms and for ids already present.
    pub fn apply_insert(&mut self, message: ChatMessage) -> bool {
        if Some(message.room_id) != self.room_id || self.position(message.id).is_some() {
            return false;
        }
        self.entries.push(TimelineEntry::Confirmed(message));
        true
    }

    pub fn apply_edit(&mut self, message: ChatMessage) -> bool {
        if Some(message.room_id) != self.room_id {
            return false;
        }
        match self.position(message.id) {
            Some(pos) => {
                self.entries[pos] = TimelineEntry::Confirmed(message);
                true
            }
            None => false,
        }
    }

    pub fn apply_delete(&mut self, room_id: RoomId, message_id: MessageId) -> bool {
        if Some(room_id) != self.room_id {
            return false;
        }
        match self.position(message_id) {
            Some(pos) => {
                self.entries.remove(pos);
                true
            }
            None => false,
        }
    }

    /// Adopt an authoritative page. Unconfirmed local entries stay at the end.
    pub fn replace(&mut self, messages: Vec<ChatMessage>) {
        let locals: Vec<TimelineEntry> = self
            .entries
            .drain(..)
            .filter(|e| matches!(e, TimelineEntry::Local { .. }))
            .collect();

        self.entries = messages.into_iter().map(TimelineEntry::Confirmed).collect();
        self.entries.extend(locals);
    }

    fn position(&self, message_id: MessageId) -> Option<usize> {
        self.entries
            .iter()
            .position(|e| e.server_id() == Some(message_id))
    }

    fn local_position(&self, id: Uuid) -> Option<usize> {
        self.entries
            .iter()
            .position(|e| matches!(e, TimelineEntry::Local { local_id, .. } if *local_id == id))
    }

    fn local_mut(&mut self, id: Uuid) -> Option<&mut bool> {
        self.entries.iter_mut().find_map(|e| match e {
            TimelineEntry::Local { local_id, failed, .. } if *local_id == id => Some(failed),
            _ => None,
        })
    }
}
