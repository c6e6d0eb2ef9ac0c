//! Outbound events and the transport delivery seam
//!
//! The engine emits `CallEvent`s; the transport implements `EventSink` to
//! put them on the wire. Delivery is best-effort with no acknowledgment,
//! retry, or cross-connection ordering guarantee.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::RtcConfig;
use crate::types::{CallKind, ChatId, ConnectionId, EndReason, SessionId, UserId};

/// Which leg of the peer handshake a signaling payload carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalKind {
    Offer,
    Answer,
    Candidate,
}

/// Event pushed from the core to a client connection
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum CallEvent {
    /// An invitation to join a freshly initiated call
    #[serde(rename = "call.incoming")]
    Incoming {
        #[serde(rename = "sessionId")]
        session_id: SessionId,
        #[serde(rename = "chatId")]
        chat_id: ChatId,
        #[serde(rename = "callKind")]
        call_kind: CallKind,
        #[serde(rename = "callerId")]
        caller_id: UserId,
        rtc: RtcConfig,
    },

    /// A target's devices have been invited; sent back to the caller
    #[serde(rename = "call.ringing")]
    Ringing {
        #[serde(rename = "sessionId")]
        session_id: SessionId,
        #[serde(rename = "userId")]
        user_id: UserId,
    },

    /// First participant joined; the session is now ongoing
    #[serde(rename = "call.accepted")]
    Accepted {
        #[serde(rename = "sessionId")]
        session_id: SessionId,
        #[serde(rename = "userId")]
        user_id: UserId,
    },

    /// A participant declined the invitation
    #[serde(rename = "call.rejected")]
    Rejected {
        #[serde(rename = "sessionId")]
        session_id: SessionId,
        #[serde(rename = "userId")]
        user_id: UserId,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },

    /// The ring timer fired with zero joins
    #[serde(rename = "call.missed")]
    Missed {
        #[serde(rename = "sessionId")]
        session_id: SessionId,
    },

    /// The session reached a terminal end
    #[serde(rename = "call.ended")]
    Ended {
        #[serde(rename = "sessionId")]
        session_id: SessionId,
        reason: EndReason,
    },

    /// A further participant joined an already-ongoing session
    #[serde(rename = "call.participantJoined")]
    ParticipantJoined {
        #[serde(rename = "sessionId")]
        session_id: SessionId,
        #[serde(rename = "userId")]
        user_id: UserId,
    },

    /// A participant left while the session stays ongoing
    #[serde(rename = "call.participantLeft")]
    ParticipantLeft {
        #[serde(rename = "sessionId")]
        session_id: SessionId,
        #[serde(rename = "userId")]
        user_id: UserId,
        reason: String,
    },

    /// Relayed session description offer; content is opaque to the core
    #[serde(rename = "signal.offer")]
    SignalOffer {
        #[serde(rename = "sessionId")]
        session_id: SessionId,
        #[serde(rename = "fromUserId")]
        from_user_id: UserId,
        payload: serde_json::Value,
    },

    /// Relayed session description answer
    #[serde(rename = "signal.answer")]
    SignalAnswer {
        #[serde(rename = "sessionId")]
        session_id: SessionId,
        #[serde(rename = "fromUserId")]
        from_user_id: UserId,
        payload: serde_json::Value,
    },

    /// Relayed connectivity candidate
    #[serde(rename = "signal.candidate")]
    SignalCandidate {
        #[serde(rename = "sessionId")]
        session_id: SessionId,
        #[serde(rename = "fromUserId")]
        from_user_id: UserId,
        payload: serde_json::Value,
    },

    /// Connection quality fell below the configured thresholds
    #[serde(rename = "quality.warning")]
    QualityWarning {
        #[serde(rename = "sessionId")]
        session_id: SessionId,
        #[serde(rename = "packetLossPct")]
        packet_loss_pct: f64,
        #[serde(rename = "jitterMs")]
        jitter_ms: f64,
    },
}

impl CallEvent {
    /// Build the relay event for a handshake payload
    pub fn signal(
        kind: SignalKind,
        session_id: SessionId,
        from_user_id: UserId,
        payload: serde_json::Value,
    ) -> Self {
        match kind {
            SignalKind::Offer => Self::SignalOffer {
                session_id,
                from_user_id,
                payload,
            },
            SignalKind::Answer => Self::SignalAnswer {
                session_id,
                from_user_id,
                payload,
            },
            SignalKind::Candidate => Self::SignalCandidate {
                session_id,
                from_user_id,
                payload,
            },
        }
    }
}

/// Transport seam: delivers events to one live connection
///
/// Implementations must not block the caller on slow consumers; queueing
/// or dropping is the implementation's business.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn deliver(&self, connection: &ConnectionId, event: CallEvent);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_serialize_with_wire_names() {
        let event = CallEvent::Ended {
            session_id: SessionId::from("s1"),
            reason: EndReason::Completed,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "call.ended");
        assert_eq!(json["sessionId"], "s1");
        assert_eq!(json["reason"], "completed");
    }

    #[test]
    fn signal_payload_passes_through_opaquely() {
        let payload = serde_json::json!({"sdp": "v=0...", "anything": [1, 2, 3]});
        let event = CallEvent::signal(
            SignalKind::Offer,
            SessionId::from("s1"),
            UserId::from("alice"),
            payload.clone(),
        );
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "signal.offer");
        assert_eq!(json["payload"], payload);
        assert_eq!(json["fromUserId"], "alice");
    }
}
