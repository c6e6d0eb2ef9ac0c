//! Live session registry
//!
//! The in-memory, process-local authority for real-time routing decisions.
//! Each live session sits behind its own async mutex; holding that lock for
//! the full span of an operation (including persistence awaits) is what
//! serializes accept/reject/end/timeout against each other for one session.
//! Handlers must still re-check terminal status right after locking, because
//! a racer may have torn the session down between map lookup and lock
//! acquisition.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::media::MediaState;
use crate::orchestrator::timer::RingTimer;
use crate::types::{CallKind, CallStatus, ChatId, ConnectionId, ParticipantStatus, SessionId, UserId};

/// Live view of one user inside a session
#[derive(Debug, Clone)]
pub struct LiveParticipant {
    /// The connection the user joined from, once known
    pub connection: Option<ConnectionId>,
    pub status: ParticipantStatus,
}

impl LiveParticipant {
    pub fn ringing() -> Self {
        Self {
            connection: None,
            status: ParticipantStatus::Ringing,
        }
    }

    pub fn joined(connection: ConnectionId) -> Self {
        Self {
            connection: Some(connection),
            status: ParticipantStatus::Joined,
        }
    }
}

/// Ephemeral session state, destroyed on any terminal transition
pub struct LiveSession {
    pub id: SessionId,
    pub chat_id: ChatId,
    pub caller_id: UserId,
    pub kind: CallKind,
    pub status: CallStatus,
    /// Everyone in the session, caller included
    pub participants: HashMap<UserId, LiveParticipant>,
    /// Media feature flags for joined participants
    pub media: HashMap<UserId, MediaState>,
    pub initiated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    /// Whether any invitee ever reached "joined"
    pub any_joined: bool,
    pub ring_timer: Option<RingTimer>,
}

impl LiveSession {
    /// Participants currently joined, caller included
    pub fn live_joined_count(&self) -> usize {
        self.participants
            .values()
            .filter(|p| p.status == ParticipantStatus::Joined)
            .count()
    }

    /// Cancel the ring timer if it is still pending; idempotent
    pub fn cancel_ring_timer(&mut self) {
        if let Some(timer) = self.ring_timer.take() {
            timer.cancel();
        }
    }
}

/// Shared handle to one live session
#[derive(Clone)]
pub struct LiveHandle {
    /// Immutable member list (caller + invitees), cheap to scan without locking
    pub members: Arc<Vec<UserId>>,
    pub inner: Arc<Mutex<LiveSession>>,
}

/// Process-wide registry of live sessions
pub struct LiveSessionRegistry {
    sessions: DashMap<SessionId, LiveHandle>,
    by_chat: DashMap<ChatId, SessionId>,
    chat_locks: DashMap<ChatId, Arc<Mutex<()>>>,
}

impl LiveSessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
            by_chat: DashMap::new(),
            chat_locks: DashMap::new(),
        }
    }

    /// Per-chat initiate lock; held across the conflict check and insert
    pub fn chat_lock(&self, chat_id: &ChatId) -> Arc<Mutex<()>> {
        self.chat_locks
            .entry(chat_id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Register a fresh live session as the active call for its chat
    pub fn insert(&self, session_id: SessionId, chat_id: ChatId, handle: LiveHandle) {
        self.by_chat.insert(chat_id, session_id.clone());
        self.sessions.insert(session_id, handle);
    }

    pub fn get(&self, session_id: &SessionId) -> Option<LiveHandle> {
        self.sessions.get(session_id).map(|entry| entry.clone())
    }

    /// The non-terminal session currently claiming this chat, if any
    pub fn active_in_chat(&self, chat_id: &ChatId) -> Option<SessionId> {
        self.by_chat.get(chat_id).map(|entry| entry.clone())
    }

    /// Drop a session from live tracking after a terminal transition
    pub fn remove(&self, session_id: &SessionId, chat_id: &ChatId) {
        self.sessions.remove(session_id);
        self.by_chat
            .remove_if(chat_id, |_, active| active == session_id);
        // Release the chat's initiate lock unless an in-flight initiate still
        // holds a clone; `chat_lock` recreates the entry on demand.
        self.chat_locks
            .remove_if(chat_id, |_, lock| Arc::strong_count(lock) == 1);
    }

    /// Sessions that count the user among their members
    pub fn sessions_for_user(&self, user_id: &UserId) -> Vec<SessionId> {
        self.sessions
            .iter()
            .filter(|entry| entry.value().members.contains(user_id))
            .map(|entry| entry.key().clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

impl Default for LiveSessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
