use std::collections::HashMap;
use std::time::{Duration, Instant};

use uuid::Uuid;

use crewdesk_types::events::TypingUser;

pub const TYPING_WINDOW: Duration = Duration::from_secs(2);

/// Decides when the local user's typing state goes on the wire.
///
/// `typing: true` is sent at most once per window while keys keep coming;
/// `typing: false` follows one window after the last keystroke.
#[derive(Debug)]
pub struct TypingDebouncer {
    window: Duration,
    last_announced: Option<Instant>,
    stop_at: Option<Instant>,
}

impl Default for TypingDebouncer {
    fn default() -> Self {
        Self::new(TYPING_WINDOW)
    }
}

impl TypingDebouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_announced: None,
            stop_at: None,
        }
    }

    /// A keystroke. Returns `Some(true)` when a typing event should be sent.
    pub fn on_input(&mut self, now: Instant) -> Option<bool> {
        self.stop_at = Some(now + self.window);

        let recent = self
            .last_announced
            .is_some_and(|at| now.duration_since(at) < self.window);
        if recent {
            return None;
        }
        self.last_announced = Some(now);
        Some(true)
    }

    /// Timer tick. Returns `Some(false)` once the idle deadline has passed.
    pub fn poll(&mut self, now: Instant) -> Option<bool> {
        match self.stop_at {
            Some(deadline) if now >= deadline => self.stop(),
            _ => None,
        }
    }

    /// Message sent or input cleared: stop immediately if we were typing.
    pub fn stop(&mut self) -> Option<bool> {
        self.last_announced = None;
        self.stop_at.take().map(|_| false)
    }
}

/// Peers currently typing in the open room. Entries expire on their own so
/// a lost `typing: false` never leaves a stale indicator.
#[derive(Debug)]
pub struct TypingRoster {
    ttl: Duration,
    peers: HashMap<Uuid, (String, Instant)>,
}

impl Default for TypingRoster {
    fn default() -> Self {
        Self::new(TYPING_WINDOW)
    }
}

impl TypingRoster {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            peers: HashMap::new(),
        }
    }

    pub fn apply(&mut self, user: TypingUser, is_typing: bool, now: Instant) {
        if is_typing {
            self.peers.insert(user.id, (user.name, now + self.ttl));
        } else {
            self.peers.remove(&user.id);
        }
    }

    /// Names of peers still typing, sorted for stable display.
    pub fn active(&mut self, now: Instant) -> Vec<String> {
        self.peers.retain(|_, (_, expires)| *expires > now);
        let mut names: Vec<String> = self.peers.values().map(|(name, _)| name.clone()).collect();
        names.sort();
        names
    }

    pub fn clear(&mut self) {
        self.peers.clear();
    }
}
