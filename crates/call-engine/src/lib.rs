//! Real-time call orchestration for chat products
//!
//! The engine owns everything between "a user taps the call button" and
//! "the call record lands in history": session lifecycle, invitation
//! fan-out to every device, ring timers, peer-handshake relaying, presence
//! tracking, per-participant media flags and quality monitoring. Actual
//! media flows peer-to-peer; this crate only coordinates.
//!
//! Transports embed the engine through two seams:
//! - [`events::EventSink`]: how outbound events reach a client connection.
//! - The [`engine::CallEngine`] methods: one call per inbound client
//!   request, plus `connection_opened`/`connection_closed` notifications.
//!
//! ```no_run
//! use std::sync::Arc;
//! use huddle_call_engine::engine::CallEngine;
//! # use async_trait::async_trait;
//! # use huddle_call_engine::events::{CallEvent, EventSink};
//! # use huddle_call_engine::types::ConnectionId;
//! # struct NullSink;
//! # #[async_trait]
//! # impl EventSink for NullSink {
//! #     async fn deliver(&self, _: &ConnectionId, _: CallEvent) {}
//! # }
//!
//! # async fn run() -> anyhow::Result<()> {
//! let engine = CallEngine::builder()
//!     .with_database_url("sqlite://calls.db")
//!     .with_event_sink(Arc::new(NullSink))
//!     .build()
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod database;
pub mod engine;
pub mod error;
pub mod events;
pub mod media;
pub mod orchestrator;
pub mod presence;
pub mod quality;
pub mod signaling;
pub mod types;

pub use config::{EngineConfig, IceServer, QualityThresholds, RtcConfig};
pub use engine::{CallEngine, CallEngineBuilder};
pub use error::{CallEngineError, Result};
pub use events::{CallEvent, EventSink, SignalKind};
pub use types::{
    CallKind, CallSession, CallStatus, ChatId, ConnectionId, EndReason, Participant,
    ParticipantStatus, QualitySample, SessionId, UserId,
};
