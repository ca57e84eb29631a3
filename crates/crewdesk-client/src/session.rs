use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, warn};
use uuid::Uuid;

use crewdesk_types::api::{DeletedMessage, PostMessageRequest, PostMessageResponse};
use crewdesk_types::events::{ClientCommand, NotifyKind, ServerEvent};
use crewdesk_types::models::{ChatMessage, MessageId, MessageKind, RoomId};

use crate::api::ChatApi;
use crate::error::{ClientError, Result};
use crate::link::{LinkEvent, Outbox};
use crate::timeline::Timeline;
use crate::typing::{TypingDebouncer, TypingRoster};

pub const PAGE_SIZE: u32 = 50;

/// Identifies one fetch of the active room. A response whose ticket no
/// longer matches is stale and gets dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchTicket {
    pub room_id: RoomId,
    pub generation: u64,
}

/// An optimistic send waiting on its durable write.
#[derive(Debug, Clone)]
pub struct PendingSend {
    pub local_id: Uuid,
    pub request: PostMessageRequest,
}

impl PendingSend {
    /// Persist the message, retrying once on a transient failure.
    pub async fn post<A: ChatApi + ?Sized>(&self, api: &A) -> Result<PostMessageResponse> {
        match api.post_message(&self.request).await {
            Err(e) if e.is_transient() => {
                warn!("send failed ({}), retrying once", e);
                api.post_message(&self.request).await
            }
            other => other,
        }
    }
}

/// Keeps one open room consistent across REST writes and realtime events.
///
/// REST is the source of truth; the realtime link only speeds things up.
/// With the link down every operation still works and peers' changes show
/// up on the next fetch or unread poll.
pub struct SessionController<A, O> {
    api: Arc<A>,
    outbox: O,
    user_id: Uuid,
    active: Option<RoomId>,
    generation: u64,
    timeline: Timeline,
    debouncer: TypingDebouncer,
    roster: TypingRoster,
    unread_total: i64,
}

impl<A: ChatApi, O: Outbox> SessionController<A, O> {
    pub fn new(api: A, outbox: O, user_id: Uuid) -> Self {
        Self {
            api: Arc::new(api),
            outbox,
            user_id,
            active: None,
            generation: 0,
            timeline: Timeline::default(),
            debouncer: TypingDebouncer::default(),
            roster: TypingRoster::default(),
            unread_total: 0,
        }
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    /// Shared handle for REST calls made while the controller is busy
    /// elsewhere.
    pub fn api_handle(&self) -> Arc<A> {
        self.api.clone()
    }

    pub fn outbox(&self) -> &O {
        &self.outbox
    }

    pub fn active_room(&self) -> Option<RoomId> {
        self.active
    }

    pub fn timeline(&self) -> &Timeline {
        &self.timeline
    }

    pub fn unread_total(&self) -> i64 {
        self.unread_total
    }

    pub fn typing_names(&mut self, now: Instant) -> Vec<String> {
        self.roster.active(now)
    }

    /// Join the personal channel and, if one is open, the active room.
    pub fn open(&self) {
        self.outbox.send(ClientCommand::JoinUser { user_id: self.user_id });
        if let Some(room_id) = self.active {
            self.outbox.send(ClientCommand::JoinRoom { room_id });
        }
    }

    /// Switch rooms. The caller then runs `fetch` + `apply_fetch` (or
    /// `refresh`) with the returned ticket.
    pub fn select_room(&mut self, room_id: RoomId) -> FetchTicket {
        if let Some(stop) = self.debouncer.stop() {
            self.emit_typing_for(self.active, stop);
        }
        if let Some(old) = self.active.replace(room_id).filter(|old| *old != room_id) {
            self.outbox.send(ClientCommand::LeaveRoom { room_id: old });
        }
        self.outbox.send(ClientCommand::JoinRoom { room_id });

        self.timeline = Timeline::new(room_id);
        self.roster.clear();
        self.next_ticket(room_id)
    }

    pub fn close_room(&mut self) {
        if let Some(room_id) = self.active.take() {
            self.outbox.send(ClientCommand::LeaveRoom { room_id });
        }
        self.generation += 1;
        self.timeline = Timeline::default();
        self.roster.clear();
    }

    fn next_ticket(&mut self, room_id: RoomId) -> FetchTicket {
        self.generation += 1;
        FetchTicket {
            room_id,
            generation: self.generation,
        }
    }

    fn is_current(&self, ticket: FetchTicket) -> bool {
        self.active == Some(ticket.room_id) && self.generation == ticket.generation
    }

    pub async fn fetch(&self, ticket: FetchTicket) -> Result<Vec<ChatMessage>> {
        self.api.list_messages(ticket.room_id, PAGE_SIZE, 0).await
    }

    /// Returns false when the ticket was superseded.
    pub fn apply_fetch(&mut self, ticket: FetchTicket, messages: Vec<ChatMessage>) -> bool {
        if !self.is_current(ticket) {
            debug!("dropping stale fetch for room {}", ticket.room_id);
            return false;
        }
        self.timeline.replace(messages);
        true
    }

    /// Refetch the active room and send a read receipt for it.
    pub async fn refresh(&mut self) -> Result<()> {
        let Some(room_id) = self.active else {
            return Ok(());
        };
        let ticket = self.next_ticket(room_id);
        let messages = self.fetch(ticket).await?;
        if self.apply_fetch(ticket, messages) {
            self.mark_active_read().await?;
        }
        Ok(())
    }

    /// Reset the active room's counter and tell our other tabs.
    async fn mark_active_read(&mut self) -> Result<()> {
        let Some(room_id) = self.active else {
            return Ok(());
        };
        self.api.mark_read(room_id).await?;
        self.outbox.send(ClientCommand::NotifyUser {
            target_user_id: self.user_id,
            kind: NotifyKind::Read,
            room_id,
        });
        Ok(())
    }

    pub async fn poll_unread(&mut self) -> Result<i64> {
        self.unread_total = self.api.unread_total().await?;
        Ok(self.unread_total)
    }

    // -- Writes --
    //
    // A durable write is split in three so the controller stays usable while
    // the request is in flight: a synchronous `begin_*`, the REST call made
    // through `api_handle()` without borrowing the controller, then a
    // synchronous `complete_*`. `send`, `resend`, `edit` and `delete` chain
    // the three for callers that don't need the interleaving.

    /// Optimistically insert into the open room's timeline.
    pub fn begin_send(
        &mut self,
        content: &str,
        kind: MessageKind,
        attachment_ref: Option<String>,
        reply_to_id: Option<MessageId>,
    ) -> Result<PendingSend> {
        let room_id = self.active.ok_or(ClientError::NoActiveRoom)?;
        let request = PostMessageRequest {
            room_id,
            content: content.to_string(),
            kind: Some(kind),
            attachment_ref,
            reply_to_id,
        };

        if let Some(stop) = self.debouncer.stop() {
            self.emit_typing_for(Some(room_id), stop);
        }

        let local_id = self.timeline.push_local(request.clone());
        Ok(PendingSend { local_id, request })
    }

    /// Flip a failed entry back to pending for another attempt.
    pub fn begin_resend(&mut self, local_id: Uuid) -> Result<PendingSend> {
        let request = self
            .timeline
            .retry(local_id)
            .ok_or(ClientError::UnknownLocalMessage(local_id))?;
        Ok(PendingSend { local_id, request })
    }

    /// Settle a send. An outcome for a room that is no longer open is
    /// dropped, like a stale fetch; peers pick the message up from the store.
    pub fn complete_send(
        &mut self,
        pending: PendingSend,
        outcome: Result<PostMessageResponse>,
    ) -> Result<()> {
        let room_id = pending.request.room_id;
        let still_open = self.active == Some(room_id);

        let posted = match outcome {
            Ok(posted) => posted,
            Err(e) => {
                warn!("send to room {} failed: {}", room_id, e);
                if still_open {
                    self.timeline.fail(pending.local_id);
                }
                return Err(e);
            }
        };

        let message = posted.message;
        if !still_open {
            debug!("room {} closed before message {} was confirmed", room_id, message.id);
            return Ok(());
        }

        // A reopened room has a fresh timeline without the local entry.
        if !self.timeline.confirm(pending.local_id, message.clone()) {
            self.timeline.apply_insert(message.clone());
        }

        self.outbox.send(ClientCommand::SendMessage { message });
        for target_user_id in posted.recipient_ids {
            self.outbox.send(ClientCommand::NotifyUser {
                target_user_id,
                kind: NotifyKind::NewMessage,
                room_id,
            });
        }
        Ok(())
    }

    /// Optimistically insert, persist, then fan out. Returns the local id;
    /// on failure the entry stays in the timeline marked failed.
    pub async fn send(
        &mut self,
        content: &str,
        kind: MessageKind,
        attachment_ref: Option<String>,
        reply_to_id: Option<MessageId>,
    ) -> Result<Uuid> {
        let pending = self.begin_send(content, kind, attachment_ref, reply_to_id)?;
        let local_id = pending.local_id;
        let outcome = pending.post(self.api.as_ref()).await;
        self.complete_send(pending, outcome)?;
        Ok(local_id)
    }

    /// Try a failed send again.
    pub async fn resend(&mut self, local_id: Uuid) -> Result<()> {
        let pending = self.begin_resend(local_id)?;
        let outcome = pending.post(self.api.as_ref()).await;
        self.complete_send(pending, outcome)
    }

    pub fn complete_edit(&mut self, outcome: Result<ChatMessage>) -> Result<()> {
        let message = outcome?;
        if self.active != Some(message.room_id) {
            return Ok(());
        }
        self.timeline.apply_edit(message.clone());
        self.outbox.send(ClientCommand::EditMessage { message });
        Ok(())
    }

    pub fn complete_delete(&mut self, outcome: Result<DeletedMessage>) -> Result<()> {
        let deleted = outcome?;
        if self.active != Some(deleted.room_id) {
            return Ok(());
        }
        self.timeline.apply_delete(deleted.room_id, deleted.id);
        self.outbox.send(ClientCommand::DeleteMessage {
            room_id: deleted.room_id,
            message_id: deleted.id,
        });
        Ok(())
    }

    pub async fn edit(&mut self, message_id: MessageId, content: &str) -> Result<()> {
        let outcome = self.api.edit_message(message_id, content).await;
        self.complete_edit(outcome)
    }

    pub async fn delete(&mut self, message_id: MessageId) -> Result<()> {
        let outcome = self.api.delete_message(message_id).await;
        self.complete_delete(outcome)
    }

    // -- Typing --

    pub fn on_input(&mut self, now: Instant) {
        if let Some(is_typing) = self.debouncer.on_input(now) {
            self.emit_typing_for(self.active, is_typing);
        }
    }

    /// Drive timers; call a few times per second.
    pub fn tick(&mut self, now: Instant) {
        if let Some(is_typing) = self.debouncer.poll(now) {
            self.emit_typing_for(self.active, is_typing);
        }
    }

    fn emit_typing_for(&self, room_id: Option<RoomId>, is_typing: bool) {
        if let Some(room_id) = room_id {
            self.outbox.send(ClientCommand::Typing { room_id, is_typing });
        }
    }

    // -- Inbound --

    pub async fn handle(&mut self, event: LinkEvent, now: Instant) -> Result<()> {
        match event {
            LinkEvent::Connected => {
                info!("realtime link up, rejoining channels");
                self.open();
                self.refresh().await?;
                self.poll_unread().await?;
            }
            LinkEvent::Disconnected => {
                // Degraded mode: REST keeps working and polling covers badges.
                self.roster.clear();
            }
            LinkEvent::Event(event) => self.apply_event(event, now).await?,
        }
        Ok(())
    }

    async fn apply_event(&mut self, event: ServerEvent, now: Instant) -> Result<()> {
        if let Some(room_id) = event.room_id() {
            let for_active = self.active == Some(room_id);
            if !for_active && !matches!(event, ServerEvent::Notify { .. }) {
                debug!("ignoring event for room {} (not open)", room_id);
                return Ok(());
            }
        }

        match event {
            ServerEvent::NewMessage { message } => {
                if self.timeline.apply_insert(message) {
                    self.mark_active_read().await?;
                }
            }
            ServerEvent::MessageUpdated { message } => {
                self.timeline.apply_edit(message);
            }
            ServerEvent::MessageDeleted { room_id, message_id } => {
                self.timeline.apply_delete(room_id, message_id);
            }
            ServerEvent::Typing { user, is_typing, .. } => {
                if user.id != self.user_id {
                    self.roster.apply(user, is_typing, now);
                }
            }
            ServerEvent::Notify { .. } => {
                self.poll_unread().await?;
            }
            ServerEvent::Ready { connection_id, .. } => {
                debug!("gateway ready as {}", connection_id);
            }
            ServerEvent::Rejected { command, reason } => {
                warn!("gateway rejected {}: {}", command, reason);
            }
        }
        Ok(())
    }
}
