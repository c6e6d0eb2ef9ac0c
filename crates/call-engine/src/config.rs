//! Engine configuration
//!
//! `EngineConfig` covers the orchestration knobs (ring timeout, quality
//! thresholds) plus the `RtcConfig` descriptor handed to clients so their
//! peer-media layer can negotiate a direct path. The engine itself never
//! interprets the RTC fields; they are an opaque collaborator contract.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Degradation thresholds evaluated against incoming quality samples
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QualityThresholds {
    /// Packet loss above this percentage triggers a warning
    pub max_packet_loss_pct: f64,
    /// Jitter above this many milliseconds triggers a warning
    pub max_jitter_ms: f64,
}

impl Default for QualityThresholds {
    fn default() -> Self {
        Self {
            max_packet_loss_pct: 5.0,
            max_jitter_ms: 100.0,
        }
    }
}

/// Connectivity server entry passed through to clients
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceServer {
    pub urls: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

/// Negotiation policy descriptor for the peer-media layer
///
/// Relayed verbatim in `call.incoming`; the engine never touches media.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RtcConfig {
    pub ice_servers: Vec<IceServer>,
    pub bundle_policy: String,
    pub ice_candidate_pool_size: u8,
    pub ice_transport_policy: String,
}

impl Default for RtcConfig {
    fn default() -> Self {
        Self {
            ice_servers: vec![IceServer {
                urls: vec!["stun:stun.l.google.com:19302".to_string()],
                username: None,
                credential: None,
            }],
            bundle_policy: "balanced".to_string(),
            ice_candidate_pool_size: 2,
            ice_transport_policy: "all".to_string(),
        }
    }
}

/// Configuration for the call engine
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// How long invitees may ring before the session is marked missed
    pub ring_timeout: Duration,
    /// Degradation thresholds for quality samples
    pub quality: QualityThresholds,
    /// Descriptor handed to clients for peer-media negotiation
    pub rtc: RtcConfig,
}

impl EngineConfig {
    pub fn new() -> Self {
        Self {
            ring_timeout: Duration::from_secs(45),
            quality: QualityThresholds::default(),
            rtc: RtcConfig::default(),
        }
    }

    /// Set the ring timeout
    pub fn with_ring_timeout(mut self, timeout: Duration) -> Self {
        self.ring_timeout = timeout;
        self
    }

    /// Set the quality degradation thresholds
    pub fn with_quality_thresholds(mut self, thresholds: QualityThresholds) -> Self {
        self.quality = thresholds;
        self
    }

    /// Set the RTC negotiation descriptor
    pub fn with_rtc(mut self, rtc: RtcConfig) -> Self {
        self.rtc = rtc;
        self
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new()
    }
}
