//! Core identifiers and call session data model
//!
//! The persisted types here (`CallSession`, `Participant`, `QualitySample`)
//! are the durable record read by the history/analytics API. The live,
//! routing-authoritative counterparts live in `orchestrator::live`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! string_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            /// Generate a fresh random id
            pub fn new() -> Self {
                Self(Uuid::new_v4().to_string())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }
    };
}

string_id!(
    /// Unique id of one call attempt, from initiation to a terminal outcome
    SessionId
);
string_id!(
    /// Id of the chat a call belongs to
    ChatId
);
string_id!(
    /// Logical user identity (may have several live connections)
    UserId
);
string_id!(
    /// One live transport connection of a user
    ConnectionId
);

/// Kind of media a call was initiated with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallKind {
    Voice,
    Video,
}

impl CallKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Voice => "voice",
            Self::Video => "video",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "voice" => Some(Self::Voice),
            "video" => Some(Self::Video),
            _ => None,
        }
    }
}

/// Session lifecycle status
///
/// Valid paths: `Initiated -> Ongoing -> Ended`, `Initiated -> Missed`,
/// `Initiated -> Rejected`. Transitions are monotonic; nothing ever leaves
/// a terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallStatus {
    Initiated,
    Ongoing,
    Ended,
    Missed,
    Rejected,
}

impl CallStatus {
    /// Whether this status is terminal
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Ended | Self::Missed | Self::Rejected)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initiated => "initiated",
            Self::Ongoing => "ongoing",
            Self::Ended => "ended",
            Self::Missed => "missed",
            Self::Rejected => "rejected",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "initiated" => Some(Self::Initiated),
            "ongoing" => Some(Self::Ongoing),
            "ended" => Some(Self::Ended),
            "missed" => Some(Self::Missed),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }
}

/// Why a session reached a terminal state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EndReason {
    /// Ended normally after at least one participant joined
    Completed,
    /// Caller tore the call down before anyone joined
    Cancelled,
    /// Every invited participant rejected
    Rejected,
    /// Ring timer fired with zero joins
    Missed,
}

impl EndReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Rejected => "rejected",
            Self::Missed => "missed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "completed" => Some(Self::Completed),
            "cancelled" => Some(Self::Cancelled),
            "rejected" => Some(Self::Rejected),
            "missed" => Some(Self::Missed),
            _ => None,
        }
    }
}

/// Per-participant status within one session
///
/// Monotonic per participant: `Ringing -> Joined -> Left`, or
/// `Ringing -> Rejected | Missed`. A participant who wants back in after
/// leaving needs a new session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParticipantStatus {
    Ringing,
    Joined,
    Rejected,
    Missed,
    Left,
}

impl ParticipantStatus {
    /// Terminal per-participant statuses that count toward a session-level
    /// `Rejected` transition
    pub fn is_declined(&self) -> bool {
        matches!(self, Self::Rejected | Self::Missed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ringing => "ringing",
            Self::Joined => "joined",
            Self::Rejected => "rejected",
            Self::Missed => "missed",
            Self::Left => "left",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ringing" => Some(Self::Ringing),
            "joined" => Some(Self::Joined),
            "rejected" => Some(Self::Rejected),
            "missed" => Some(Self::Missed),
            "left" => Some(Self::Left),
            _ => None,
        }
    }
}

/// Persisted view of a non-caller participant
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub user_id: UserId,
    pub status: ParticipantStatus,
    pub joined_at: Option<DateTime<Utc>>,
    pub left_at: Option<DateTime<Utc>>,
}

impl Participant {
    /// A freshly invited participant, still ringing
    pub fn ringing(user_id: UserId) -> Self {
        Self {
            user_id,
            status: ParticipantStatus::Ringing,
            joined_at: None,
            left_at: None,
        }
    }
}

/// One connection-quality measurement attached to a session
///
/// Only the most recent sample is retained; the store overwrites rather
/// than appends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QualitySample {
    pub bitrate_kbps: u32,
    pub packet_loss_pct: f64,
    pub jitter_ms: f64,
    pub sampled_at: DateTime<Utc>,
}

/// Durable record of one call attempt
///
/// Created when the call is initiated, mutated only by the orchestrator,
/// never deleted. The caller holds exactly one `caller_id` slot and is
/// never listed among `participants`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallSession {
    pub id: SessionId,
    pub chat_id: ChatId,
    pub kind: CallKind,
    pub caller_id: UserId,
    pub participants: Vec<Participant>,
    pub status: CallStatus,
    pub initiated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub end_reason: Option<EndReason>,
    pub last_quality: Option<QualitySample>,
}
