//! Wire protocol: inbound client requests and the acknowledgment frame
//!
//! Every frame is a JSON text message with a dotted `type` discriminator.
//! Requests may carry a client-chosen `id` that is echoed back on the
//! acknowledgment so clients can correlate replies. Outbound events reuse
//! the engine's `CallEvent` serialization directly.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use huddle_call_engine::media::QualityPreset;
use huddle_call_engine::types::{CallKind, ChatId, EndReason, SessionId, UserId};
use huddle_call_engine::CallEngineError;

/// One inbound frame: optional correlation id plus the request proper
#[derive(Debug, Deserialize)]
pub struct Envelope {
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(flatten)]
    pub request: ClientRequest,
}

/// Everything a client may ask the server to do
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub enum ClientRequest {
    #[serde(rename = "call.initiate")]
    InitiateCall {
        #[serde(rename = "chatId")]
        chat_id: ChatId,
        #[serde(rename = "callKind")]
        call_kind: CallKind,
        targets: Vec<UserId>,
    },

    #[serde(rename = "call.accept")]
    AcceptCall {
        #[serde(rename = "sessionId")]
        session_id: SessionId,
    },

    #[serde(rename = "call.reject")]
    RejectCall {
        #[serde(rename = "sessionId")]
        session_id: SessionId,
        #[serde(default)]
        reason: Option<String>,
    },

    #[serde(rename = "call.end")]
    EndCall {
        #[serde(rename = "sessionId")]
        session_id: SessionId,
        #[serde(default)]
        reason: Option<EndReason>,
    },

    #[serde(rename = "call.leave")]
    LeaveCall {
        #[serde(rename = "sessionId")]
        session_id: SessionId,
    },

    #[serde(rename = "signal.offer")]
    SignalOffer {
        #[serde(rename = "sessionId")]
        session_id: SessionId,
        #[serde(rename = "targetUserId")]
        to_user_id: UserId,
        payload: Value,
    },

    #[serde(rename = "signal.answer")]
    SignalAnswer {
        #[serde(rename = "sessionId")]
        session_id: SessionId,
        #[serde(rename = "targetUserId")]
        to_user_id: UserId,
        payload: Value,
    },

    #[serde(rename = "signal.candidate")]
    SignalCandidate {
        #[serde(rename = "sessionId")]
        session_id: SessionId,
        #[serde(rename = "targetUserId")]
        to_user_id: UserId,
        payload: Value,
    },

    #[serde(rename = "media.camera")]
    SetCamera {
        #[serde(rename = "sessionId")]
        session_id: SessionId,
        enabled: bool,
    },

    #[serde(rename = "media.microphone")]
    SetMicrophone {
        #[serde(rename = "sessionId")]
        session_id: SessionId,
        enabled: bool,
    },

    #[serde(rename = "media.screenShare")]
    SetScreenShare {
        #[serde(rename = "sessionId")]
        session_id: SessionId,
        enabled: bool,
    },

    #[serde(rename = "media.quality")]
    SetQualityPreset {
        #[serde(rename = "sessionId")]
        session_id: SessionId,
        preset: QualityPreset,
    },

    #[serde(rename = "quality.report")]
    ReportQuality {
        #[serde(rename = "sessionId")]
        session_id: SessionId,
        #[serde(rename = "bitrateKbps")]
        bitrate_kbps: u32,
        #[serde(rename = "packetLossPct")]
        packet_loss_pct: f64,
        #[serde(rename = "jitterMs")]
        jitter_ms: f64,
    },

    #[serde(rename = "history.list")]
    ListHistory {
        #[serde(rename = "chatId")]
        chat_id: ChatId,
    },
}

/// Acknowledgment frame sent in reply to every request
#[derive(Debug, Serialize)]
pub struct Ack {
    #[serde(rename = "type")]
    pub kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<AckError>,
    /// Request-specific payload (e.g. the new session id, history rows)
    #[serde(flatten)]
    pub data: Option<Value>,
}

#[derive(Debug, Serialize)]
pub struct AckError {
    pub code: &'static str,
    pub message: String,
}

impl Ack {
    pub fn ok(id: Option<u64>, data: Option<Value>) -> Self {
        Self {
            kind: "ack",
            id,
            success: true,
            error: None,
            data,
        }
    }

    pub fn err(id: Option<u64>, error: &CallEngineError) -> Self {
        Self {
            kind: "ack",
            id,
            success: false,
            error: Some(AckError {
                code: error.code(),
                message: error.to_string(),
            }),
            data: None,
        }
    }
}
