//! Call orchestration
//!
//! Owns the session state machine: lifecycle transitions, ring timers,
//! participant bookkeeping, and persistence of the durable call record.
//! Valid session paths are `INITIATED -> ONGOING -> ENDED`,
//! `INITIATED -> MISSED` (ring timer, zero joins) and
//! `INITIATED -> REJECTED` (everyone declined). Every terminal transition
//! cancels the ring timer and drops the live session.
//!
//! Live state is authoritative for routing; the persisted record is
//! authoritative for history. Durable writes are best-effort: a failed
//! write is logged and the call continues unaudited.

mod live;
mod timer;

pub use live::{LiveHandle, LiveParticipant, LiveSession, LiveSessionRegistry};
pub use timer::RingTimer;

use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::database::{CallStore, ChatDirectory};
use crate::error::{CallEngineError, Result};
use crate::events::{CallEvent, EventSink};
use crate::media::MediaState;
use crate::presence::PresenceRegistry;
use crate::types::{
    CallKind, CallSession, CallStatus, ChatId, ConnectionId, EndReason, Participant,
    ParticipantStatus, SessionId, UserId,
};

/// Why a participant dropped out of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaveCause {
    /// Explicit leave request
    Left,
    /// Transport connection terminated without a leave message
    Disconnected,
}

impl LeaveCause {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Left => "left",
            Self::Disconnected => "disconnected",
        }
    }
}

/// The session state machine and its registries
pub struct CallOrchestrator {
    config: EngineConfig,
    presence: Arc<PresenceRegistry>,
    live: Arc<LiveSessionRegistry>,
    store: Arc<CallStore>,
    chats: Arc<dyn ChatDirectory>,
    sink: Arc<dyn EventSink>,
    self_ref: Weak<CallOrchestrator>,
}

impl CallOrchestrator {
    pub fn new(
        config: EngineConfig,
        presence: Arc<PresenceRegistry>,
        live: Arc<LiveSessionRegistry>,
        store: Arc<CallStore>,
        chats: Arc<dyn ChatDirectory>,
        sink: Arc<dyn EventSink>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            config,
            presence,
            live,
            store,
            chats,
            sink,
            self_ref: self_ref.clone(),
        })
    }

    /// Start a call in a chat, inviting `targets`
    ///
    /// Requires the caller to be a chat member and the chat to have no
    /// other non-terminal session. Creates the persisted record and the
    /// live session atomically under the per-chat lock, starts the ring
    /// timer, and dispatches invitations to every target device.
    pub async fn initiate_call(
        &self,
        caller_id: &UserId,
        connection_id: &ConnectionId,
        chat_id: &ChatId,
        kind: CallKind,
        targets: Vec<UserId>,
    ) -> Result<SessionId> {
        if targets.is_empty() {
            return Err(CallEngineError::validation("at least one target is required"));
        }
        if targets.contains(caller_id) {
            return Err(CallEngineError::validation("caller cannot target themselves"));
        }
        let mut seen = HashSet::new();
        let targets: Vec<UserId> = targets
            .into_iter()
            .filter(|t| seen.insert(t.clone()))
            .collect();

        if !self.chats.is_member(chat_id, caller_id).await? {
            return Err(CallEngineError::permission(format!(
                "{caller_id} is not a member of chat {chat_id}"
            )));
        }

        let chat_lock = self.live.chat_lock(chat_id);
        let _guard = chat_lock.lock().await;

        if let Some(active) = self.live.active_in_chat(chat_id) {
            return Err(CallEngineError::conflict(format!(
                "chat {chat_id} already has an active call ({active})"
            )));
        }

        let session_id = SessionId::new();
        let now = Utc::now();

        let record = CallSession {
            id: session_id.clone(),
            chat_id: chat_id.clone(),
            kind,
            caller_id: caller_id.clone(),
            participants: targets.iter().cloned().map(Participant::ringing).collect(),
            status: CallStatus::Initiated,
            initiated_at: now,
            started_at: None,
            ended_at: None,
            end_reason: None,
            last_quality: None,
        };
        self.best_effort(
            &session_id,
            "insert session",
            self.store.insert_session(&record).await,
        );

        let mut participants = HashMap::new();
        participants.insert(
            caller_id.clone(),
            LiveParticipant::joined(connection_id.clone()),
        );
        for target in &targets {
            participants.insert(target.clone(), LiveParticipant::ringing());
        }
        let mut media = HashMap::new();
        media.insert(caller_id.clone(), MediaState::for_kind(kind));

        let session = LiveSession {
            id: session_id.clone(),
            chat_id: chat_id.clone(),
            caller_id: caller_id.clone(),
            kind,
            status: CallStatus::Initiated,
            participants,
            media,
            initiated_at: now,
            started_at: None,
            any_joined: false,
            ring_timer: Some(RingTimer::start(
                self.self_ref.clone(),
                session_id.clone(),
                self.config.ring_timeout,
            )),
        };

        let mut members = Vec::with_capacity(targets.len() + 1);
        members.push(caller_id.clone());
        members.extend(targets.iter().cloned());
        let handle = LiveHandle {
            members: Arc::new(members),
            inner: Arc::new(tokio::sync::Mutex::new(session)),
        };
        self.live.insert(session_id.clone(), chat_id.clone(), handle);
        drop(_guard);

        for target in &targets {
            let connections = self.presence.connections_of(target);
            if connections.is_empty() {
                debug!(session = %session_id, target = %target, "target offline, will ring out");
                continue;
            }
            for conn in &connections {
                self.sink
                    .deliver(
                        conn,
                        CallEvent::Incoming {
                            session_id: session_id.clone(),
                            chat_id: chat_id.clone(),
                            call_kind: kind,
                            caller_id: caller_id.clone(),
                            rtc: self.config.rtc.clone(),
                        },
                    )
                    .await;
            }
            self.sink
                .deliver(
                    connection_id,
                    CallEvent::Ringing {
                        session_id: session_id.clone(),
                        user_id: target.clone(),
                    },
                )
                .await;
        }

        info!(
            session = %session_id,
            chat = %chat_id,
            caller = %caller_id,
            kind = kind.as_str(),
            targets = targets.len(),
            "call initiated"
        );
        Ok(session_id)
    }

    /// Accept an invitation from one of the user's connections
    ///
    /// The first join flips the session to ongoing, stamps started-at and
    /// cancels the ring timer. Accepting again after joining is a no-op.
    pub async fn accept_call(
        &self,
        session_id: &SessionId,
        user_id: &UserId,
        connection_id: &ConnectionId,
    ) -> Result<()> {
        let handle = self.require_live(session_id)?;
        let mut session = handle.inner.lock().await;
        Self::require_not_terminal(&session)?;

        if *user_id == session.caller_id {
            return Err(CallEngineError::invalid_state(
                "the caller is already in the call",
            ));
        }
        let participant = session.participants.get_mut(user_id).ok_or_else(|| {
            CallEngineError::permission(format!("{user_id} was not invited to {session_id}"))
        })?;

        match participant.status {
            ParticipantStatus::Ringing => {}
            ParticipantStatus::Joined => {
                debug!(session = %session_id, user = %user_id, "re-accept ignored");
                return Ok(());
            }
            status => {
                return Err(CallEngineError::invalid_state(format!(
                    "participant {user_id} already {}",
                    status.as_str()
                )));
            }
        }

        let now = Utc::now();
        participant.status = ParticipantStatus::Joined;
        participant.connection = Some(connection_id.clone());
        let kind = session.kind;
        session
            .media
            .insert(user_id.clone(), MediaState::for_kind(kind));

        let first_join = !session.any_joined;
        session.any_joined = true;
        if first_join {
            session.status = CallStatus::Ongoing;
            session.started_at = Some(now);
            session.cancel_ring_timer();
        }

        self.best_effort(
            session_id,
            "participant joined",
            self.store
                .set_participant_status(
                    session_id,
                    user_id,
                    ParticipantStatus::Joined,
                    Some(now),
                    None,
                )
                .await,
        );
        if first_join {
            self.best_effort(
                session_id,
                "mark started",
                self.store.mark_started(session_id, now).await,
            );
        }

        let event = if first_join {
            CallEvent::Accepted {
                session_id: session_id.clone(),
                user_id: user_id.clone(),
            }
        } else {
            CallEvent::ParticipantJoined {
                session_id: session_id.clone(),
                user_id: user_id.clone(),
            }
        };
        drop(session);
        self.notify_members(&handle.members, &event).await;

        info!(session = %session_id, user = %user_id, first_join, "call accepted");
        Ok(())
    }

    /// Decline an invitation
    ///
    /// When the last still-pending invitee declines before anyone joined,
    /// the whole session transitions to rejected.
    pub async fn reject_call(
        &self,
        session_id: &SessionId,
        user_id: &UserId,
        reason: Option<String>,
    ) -> Result<()> {
        let handle = self.require_live(session_id)?;
        let mut session = handle.inner.lock().await;
        Self::require_not_terminal(&session)?;

        if *user_id == session.caller_id {
            return Err(CallEngineError::invalid_state(
                "the caller cannot reject their own call",
            ));
        }
        let participant = session.participants.get_mut(user_id).ok_or_else(|| {
            CallEngineError::permission(format!("{user_id} was not invited to {session_id}"))
        })?;

        match participant.status {
            ParticipantStatus::Ringing => {}
            ParticipantStatus::Rejected => return Ok(()),
            status => {
                return Err(CallEngineError::invalid_state(format!(
                    "participant {user_id} already {}",
                    status.as_str()
                )));
            }
        }
        participant.status = ParticipantStatus::Rejected;

        let everyone_declined = !session.any_joined
            && session
                .participants
                .iter()
                .filter(|(uid, _)| **uid != session.caller_id)
                .all(|(_, p)| p.status.is_declined());

        self.best_effort(
            session_id,
            "participant rejected",
            self.store
                .set_participant_status(
                    session_id,
                    user_id,
                    ParticipantStatus::Rejected,
                    None,
                    None,
                )
                .await,
        );

        self.notify_members(
            &handle.members,
            &CallEvent::Rejected {
                session_id: session_id.clone(),
                user_id: user_id.clone(),
                reason,
            },
        )
        .await;

        if everyone_declined {
            session.status = CallStatus::Rejected;
            session.cancel_ring_timer();
            self.best_effort(
                session_id,
                "mark rejected",
                self.store
                    .mark_ended(session_id, CallStatus::Rejected, EndReason::Rejected, Utc::now())
                    .await,
            );
            let chat_id = session.chat_id.clone();
            drop(session);
            self.live.remove(session_id, &chat_id);
            self.notify_members(
                &handle.members,
                &CallEvent::Ended {
                    session_id: session_id.clone(),
                    reason: EndReason::Rejected,
                },
            )
            .await;
            info!(session = %session_id, "call rejected by all invitees");
        } else {
            info!(session = %session_id, user = %user_id, "invitation rejected");
        }
        Ok(())
    }

    /// Tear the whole session down from any non-terminal status
    ///
    /// Idempotent towards callers: a second invocation finds no live
    /// session and reports NotFound; ended-at is written exactly once.
    pub async fn end_call(
        &self,
        session_id: &SessionId,
        user_id: &UserId,
        reason: Option<EndReason>,
    ) -> Result<()> {
        let handle = self.require_live(session_id)?;
        let mut session = handle.inner.lock().await;
        Self::require_not_terminal(&session)?;

        if !session.participants.contains_key(user_id) {
            return Err(CallEngineError::permission(format!(
                "{user_id} is not part of session {session_id}"
            )));
        }

        let reason = reason.unwrap_or({
            if session.status == CallStatus::Initiated && *user_id == session.caller_id {
                EndReason::Cancelled
            } else {
                EndReason::Completed
            }
        });
        self.finish_session(&handle, &mut session, CallStatus::Ended, reason)
            .await;
        info!(session = %session_id, user = %user_id, reason = reason.as_str(), "call ended");
        Ok(())
    }

    /// Drop one participant; auto-ends the session when nobody is left
    pub async fn participant_left(
        &self,
        session_id: &SessionId,
        user_id: &UserId,
        cause: LeaveCause,
    ) -> Result<()> {
        let handle = self.require_live(session_id)?;
        let mut session = handle.inner.lock().await;
        Self::require_not_terminal(&session)?;

        let participant = session.participants.get_mut(user_id).ok_or_else(|| {
            CallEngineError::permission(format!("{user_id} is not part of session {session_id}"))
        })?;

        match participant.status {
            ParticipantStatus::Joined => {}
            // A still-ringing invitee losing their last connection keeps
            // ringing on the record; the ring timer settles their status.
            _ if cause == LeaveCause::Disconnected => return Ok(()),
            status => {
                return Err(CallEngineError::invalid_state(format!(
                    "participant {user_id} is {} and cannot leave",
                    status.as_str()
                )));
            }
        }

        let now = Utc::now();
        participant.status = ParticipantStatus::Left;
        session.media.remove(user_id);

        if *user_id != session.caller_id {
            self.best_effort(
                session_id,
                "participant left",
                self.store
                    .set_participant_status(
                        session_id,
                        user_id,
                        ParticipantStatus::Left,
                        None,
                        Some(now),
                    )
                    .await,
            );
        }

        if session.live_joined_count() == 0 {
            let reason = if session.status == CallStatus::Initiated {
                EndReason::Cancelled
            } else {
                EndReason::Completed
            };
            self.finish_session(&handle, &mut session, CallStatus::Ended, reason)
                .await;
            info!(session = %session_id, user = %user_id, "last participant left, call completed");
        } else {
            drop(session);
            self.notify_members(
                &handle.members,
                &CallEvent::ParticipantLeft {
                    session_id: session_id.clone(),
                    user_id: user_id.clone(),
                    reason: cause.as_str().to_string(),
                },
            )
            .await;
            info!(session = %session_id, user = %user_id, cause = cause.as_str(), "participant left");
        }
        Ok(())
    }

    /// Ring deadline callback; fires at most once per session
    ///
    /// An accept may have raced this to completion on the same tick, so the
    /// current status is re-checked under the session lock before acting.
    pub async fn on_ring_timeout(&self, session_id: &SessionId) {
        let Some(handle) = self.live.get(session_id) else {
            return;
        };
        let mut session = handle.inner.lock().await;
        if session.status != CallStatus::Initiated || session.any_joined {
            debug!(session = %session_id, "ring timer fired after join, ignoring");
            return;
        }

        session.ring_timer.take();
        let caller_id = session.caller_id.clone();
        let missed: Vec<UserId> = session
            .participants
            .iter_mut()
            .filter(|(uid, p)| **uid != caller_id && p.status == ParticipantStatus::Ringing)
            .map(|(uid, p)| {
                p.status = ParticipantStatus::Missed;
                uid.clone()
            })
            .collect();
        for user in &missed {
            self.best_effort(
                session_id,
                "participant missed",
                self.store
                    .set_participant_status(session_id, user, ParticipantStatus::Missed, None, None)
                    .await,
            );
        }

        session.status = CallStatus::Missed;
        self.best_effort(
            session_id,
            "mark missed",
            self.store
                .mark_ended(session_id, CallStatus::Missed, EndReason::Missed, Utc::now())
                .await,
        );
        let chat_id = session.chat_id.clone();
        drop(session);
        self.live.remove(session_id, &chat_id);
        self.notify_members(
            &handle.members,
            &CallEvent::Missed {
                session_id: session_id.clone(),
            },
        )
        .await;
        info!(session = %session_id, missed = missed.len(), "call rang out");
    }

    /// Presence fail-safe: a user's last connection is gone
    ///
    /// Synthesizes a leave into every live session the user participates
    /// in, so crashed or disconnected clients never orphan a session.
    pub async fn user_went_offline(&self, user_id: &UserId) {
        for session_id in self.live.sessions_for_user(user_id) {
            match self
                .participant_left(&session_id, user_id, LeaveCause::Disconnected)
                .await
            {
                Ok(()) => {}
                Err(CallEngineError::NotFound { .. }) => {}
                Err(e) => {
                    warn!(session = %session_id, user = %user_id, error = %e,
                        "disconnect cleanup failed");
                }
            }
        }
    }

    // Shared terminal transition: statuses, timer, persistence, event, teardown.
    // Caller must hold the session lock and have verified non-terminal status.
    async fn finish_session(
        &self,
        handle: &LiveHandle,
        session: &mut LiveSession,
        status: CallStatus,
        reason: EndReason,
    ) {
        let session_id = session.id.clone();
        let now = Utc::now();

        let mut updates = Vec::new();
        let caller_id = session.caller_id.clone();
        for (uid, p) in session.participants.iter_mut() {
            match p.status {
                ParticipantStatus::Joined => {
                    p.status = ParticipantStatus::Left;
                    if *uid != caller_id {
                        updates.push((uid.clone(), ParticipantStatus::Left, Some(now)));
                    }
                }
                ParticipantStatus::Ringing => {
                    p.status = ParticipantStatus::Missed;
                    if *uid != caller_id {
                        updates.push((uid.clone(), ParticipantStatus::Missed, None));
                    }
                }
                _ => {}
            }
        }
        for (user, status, left_at) in &updates {
            self.best_effort(
                &session_id,
                "participant settled",
                self.store
                    .set_participant_status(&session_id, user, *status, None, *left_at)
                    .await,
            );
        }

        session.status = status;
        session.cancel_ring_timer();
        self.best_effort(
            &session_id,
            "mark ended",
            self.store.mark_ended(&session_id, status, reason, now).await,
        );

        let chat_id = session.chat_id.clone();
        self.live.remove(&session_id, &chat_id);
        self.notify_members(
            &handle.members,
            &CallEvent::Ended {
                session_id: session_id.clone(),
                reason,
            },
        )
        .await;
    }

    fn require_live(&self, session_id: &SessionId) -> Result<LiveHandle> {
        self.live
            .get(session_id)
            .ok_or_else(|| CallEngineError::not_found(format!("no live session {session_id}")))
    }

    fn require_not_terminal(session: &LiveSession) -> Result<()> {
        if session.status.is_terminal() {
            Err(CallEngineError::not_found(format!(
                "session {} already ended",
                session.id
            )))
        } else {
            Ok(())
        }
    }

    async fn notify_members(&self, members: &[UserId], event: &CallEvent) {
        for user in members {
            for conn in self.presence.connections_of(user) {
                self.sink.deliver(&conn, event.clone()).await;
            }
        }
    }

    fn best_effort<T>(&self, session_id: &SessionId, what: &str, result: Result<T>) {
        if let Err(e) = result {
            warn!(session = %session_id, error = %e,
                "durable write failed ({what}), call continues unaudited");
        }
    }
}
