//! Signaling relay
//!
//! Routes peer-handshake payloads (offers, answers, connectivity
//! candidates) between participants of a live session. The payloads are
//! opaque: the router validates WHO may talk to whom within WHICH session
//! and never inspects WHAT they exchange. Delivery is fire-and-forget with
//! no ordering guarantee across connections.

use std::sync::Arc;
use tracing::debug;

use crate::error::{CallEngineError, Result};
use crate::events::{CallEvent, EventSink, SignalKind};
use crate::orchestrator::LiveSessionRegistry;
use crate::presence::PresenceRegistry;
use crate::types::{SessionId, UserId};

/// One handshake payload in flight between two session members
#[derive(Debug, Clone)]
pub struct SignalMessage {
    pub session_id: SessionId,
    pub from_user_id: UserId,
    pub to_user_id: UserId,
    pub kind: SignalKind,
    pub payload: serde_json::Value,
}

/// Relays handshake payloads between members of a live session
pub struct SignalingRouter {
    live: Arc<LiveSessionRegistry>,
    presence: Arc<PresenceRegistry>,
    sink: Arc<dyn EventSink>,
}

impl SignalingRouter {
    pub fn new(
        live: Arc<LiveSessionRegistry>,
        presence: Arc<PresenceRegistry>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            live,
            presence,
            sink,
        }
    }

    /// Relay one payload to every live connection of the target
    ///
    /// Both ends must be members of the session. A signal for a session
    /// that is no longer live is dropped with an error so the sender can
    /// stop negotiating. An offline target is not an error; the payload is
    /// simply lost, which is the documented best-effort contract.
    pub async fn relay(&self, message: SignalMessage) -> Result<()> {
        let SignalMessage {
            session_id,
            from_user_id,
            to_user_id,
            kind,
            payload,
        } = message;

        let handle = self.live.get(&session_id).ok_or_else(|| {
            debug!(session = %session_id, from = %from_user_id, "signal for dead session dropped");
            CallEngineError::not_found(format!("no live session {session_id}"))
        })?;

        if !handle.members.contains(&from_user_id) {
            return Err(CallEngineError::permission(format!(
                "{from_user_id} is not part of session {session_id}"
            )));
        }
        if !handle.members.contains(&to_user_id) {
            return Err(CallEngineError::permission(format!(
                "{to_user_id} is not part of session {session_id}"
            )));
        }

        let connections = self.presence.connections_of(&to_user_id);
        if connections.is_empty() {
            debug!(
                session = %session_id,
                target = %to_user_id,
                "signal target offline, payload dropped"
            );
            return Ok(());
        }

        let event = CallEvent::signal(kind, session_id, from_user_id, payload);
        for connection in &connections {
            self.sink.deliver(connection, event.clone()).await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::{LiveHandle, LiveParticipant, LiveSession};
    use crate::types::{CallKind, CallStatus, ChatId, ConnectionId};
    use async_trait::async_trait;
    use chrono::Utc;
    use std::collections::HashMap;
    use tokio::sync::Mutex;

    struct RecordingSink {
        delivered: Mutex<Vec<(ConnectionId, CallEvent)>>,
    }

    #[async_trait]
    impl EventSink for RecordingSink {
        async fn deliver(&self, connection: &ConnectionId, event: CallEvent) {
            self.delivered
                .lock()
                .await
                .push((connection.clone(), event));
        }
    }

    fn live_session(id: &SessionId, members: &[UserId]) -> LiveHandle {
        let mut participants = HashMap::new();
        for member in members {
            participants.insert(member.clone(), LiveParticipant::ringing());
        }
        LiveHandle {
            members: Arc::new(members.to_vec()),
            inner: Arc::new(Mutex::new(LiveSession {
                id: id.clone(),
                chat_id: ChatId::from("chat-1"),
                caller_id: members[0].clone(),
                kind: CallKind::Voice,
                status: CallStatus::Ongoing,
                participants,
                media: HashMap::new(),
                initiated_at: Utc::now(),
                started_at: Some(Utc::now()),
                any_joined: true,
                ring_timer: None,
            })),
        }
    }

    fn router() -> (
        SignalingRouter,
        Arc<LiveSessionRegistry>,
        Arc<PresenceRegistry>,
        Arc<RecordingSink>,
    ) {
        let live = Arc::new(LiveSessionRegistry::new());
        let presence = Arc::new(PresenceRegistry::new());
        let sink = Arc::new(RecordingSink {
            delivered: Mutex::new(Vec::new()),
        });
        let router = SignalingRouter::new(live.clone(), presence.clone(), sink.clone());
        (router, live, presence, sink)
    }

    #[tokio::test]
    async fn relays_to_every_target_connection() {
        let (router, live, presence, sink) = router();
        let session_id = SessionId::new();
        let alice = UserId::from("alice");
        let bob = UserId::from("bob");
        live.insert(
            session_id.clone(),
            ChatId::from("chat-1"),
            live_session(&session_id, &[alice.clone(), bob.clone()]),
        );
        presence.register(&bob, &ConnectionId::from("bob-phone"));
        presence.register(&bob, &ConnectionId::from("bob-laptop"));

        router
            .relay(SignalMessage {
                session_id: session_id.clone(),
                from_user_id: alice,
                to_user_id: bob,
                kind: SignalKind::Offer,
                payload: serde_json::json!({"sdp": "v=0"}),
            })
            .await
            .unwrap();

        let delivered = sink.delivered.lock().await;
        assert_eq!(delivered.len(), 2);
        assert!(matches!(delivered[0].1, CallEvent::SignalOffer { .. }));
    }

    #[tokio::test]
    async fn rejects_non_members_and_dead_sessions() {
        let (router, live, _presence, sink) = router();
        let session_id = SessionId::new();
        let alice = UserId::from("alice");
        let bob = UserId::from("bob");

        let dead = router
            .relay(SignalMessage {
                session_id: session_id.clone(),
                from_user_id: alice.clone(),
                to_user_id: bob.clone(),
                kind: SignalKind::Candidate,
                payload: serde_json::json!({}),
            })
            .await;
        assert!(matches!(dead, Err(CallEngineError::NotFound { .. })));

        live.insert(
            session_id.clone(),
            ChatId::from("chat-1"),
            live_session(&session_id, &[alice.clone(), bob.clone()]),
        );
        let outsider = router
            .relay(SignalMessage {
                session_id: session_id.clone(),
                from_user_id: UserId::from("mallory"),
                to_user_id: bob,
                kind: SignalKind::Answer,
                payload: serde_json::json!({}),
            })
            .await;
        assert!(matches!(outsider, Err(CallEngineError::Permission { .. })));
        assert!(sink.delivered.lock().await.is_empty());
    }

    #[tokio::test]
    async fn offline_target_drops_payload_without_error() {
        let (router, live, _presence, sink) = router();
        let session_id = SessionId::new();
        let alice = UserId::from("alice");
        let bob = UserId::from("bob");
        live.insert(
            session_id.clone(),
            ChatId::from("chat-1"),
            live_session(&session_id, &[alice.clone(), bob.clone()]),
        );

        router
            .relay(SignalMessage {
                session_id,
                from_user_id: alice,
                to_user_id: bob,
                kind: SignalKind::Offer,
                payload: serde_json::json!({}),
            })
            .await
            .unwrap();
        assert!(sink.delivered.lock().await.is_empty());
    }
}
