//! Video feature layer
//!
//! Per-participant toggles layered on top of an orchestrated session. Not a
//! state machine of its own; the only cross-participant rule is that at most
//! one participant may screen-share at a time.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

use crate::error::{CallEngineError, Result};
use crate::orchestrator::LiveSessionRegistry;
use crate::types::{CallKind, ParticipantStatus, SessionId, UserId};

/// Rendering quality preset selected by a participant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityPreset {
    Auto,
    Low,
    Standard,
    High,
}

/// Per-participant media feature flags within one session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaState {
    pub video_enabled: bool,
    pub audio_enabled: bool,
    pub screen_sharing: bool,
    pub quality: QualityPreset,
}

impl MediaState {
    /// Initial state for a participant joining a call of the given kind
    pub fn for_kind(kind: CallKind) -> Self {
        Self {
            video_enabled: kind == CallKind::Video,
            audio_enabled: true,
            screen_sharing: false,
            quality: QualityPreset::Auto,
        }
    }
}

/// How the client should arrange participant tiles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LayoutMode {
    Spotlight,
    Grid,
    Sidebar,
}

/// Preferred layout for the current participant count
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallLayout {
    pub mode: LayoutMode,
    pub tiles_per_row: u8,
}

/// Preferred layout as a pure function of live participant count
pub fn layout_for(participant_count: usize) -> CallLayout {
    match participant_count {
        0 | 1 => CallLayout {
            mode: LayoutMode::Spotlight,
            tiles_per_row: 1,
        },
        2..=4 => CallLayout {
            mode: LayoutMode::Grid,
            tiles_per_row: 2,
        },
        5..=9 => CallLayout {
            mode: LayoutMode::Grid,
            tiles_per_row: 3,
        },
        _ => CallLayout {
            mode: LayoutMode::Sidebar,
            tiles_per_row: 4,
        },
    }
}

/// Mutates per-participant media flags under the session lock
pub struct MediaController {
    live: Arc<LiveSessionRegistry>,
}

impl MediaController {
    pub fn new(live: Arc<LiveSessionRegistry>) -> Self {
        Self { live }
    }

    /// Toggle the participant's camera
    pub async fn set_camera(
        &self,
        session_id: &SessionId,
        user_id: &UserId,
        enabled: bool,
    ) -> Result<()> {
        self.with_media(session_id, user_id, |state| {
            state.video_enabled = enabled;
            Ok(())
        })
        .await
    }

    /// Toggle the participant's microphone
    pub async fn set_microphone(
        &self,
        session_id: &SessionId,
        user_id: &UserId,
        enabled: bool,
    ) -> Result<()> {
        self.with_media(session_id, user_id, |state| {
            state.audio_enabled = enabled;
            Ok(())
        })
        .await
    }

    /// Select a quality preset for the participant
    pub async fn set_quality_preset(
        &self,
        session_id: &SessionId,
        user_id: &UserId,
        preset: QualityPreset,
    ) -> Result<()> {
        self.with_media(session_id, user_id, |state| {
            state.quality = preset;
            Ok(())
        })
        .await
    }

    /// Toggle screen share; at most one participant may share at a time
    ///
    /// The check-then-set runs entirely under the session lock, so two
    /// simultaneous toggle-on requests serialize and the loser gets a
    /// Conflict.
    pub async fn set_screen_share(
        &self,
        session_id: &SessionId,
        user_id: &UserId,
        enabled: bool,
    ) -> Result<()> {
        let handle = self
            .live
            .get(session_id)
            .ok_or_else(|| CallEngineError::not_found(format!("no live session {session_id}")))?;
        let mut session = handle.inner.lock().await;
        if session.status.is_terminal() {
            return Err(CallEngineError::not_found(format!(
                "session {session_id} already ended"
            )));
        }
        Self::require_joined(&session.participants, user_id)?;

        if enabled {
            if let Some((holder, _)) = session
                .media
                .iter()
                .find(|(uid, state)| state.screen_sharing && *uid != user_id)
            {
                debug!(session = %session_id, holder = %holder, "screen share already held");
                return Err(CallEngineError::conflict(format!(
                    "screen share already held by {holder}"
                )));
            }
        }

        let kind = session.kind;
        let state = session
            .media
            .entry(user_id.clone())
            .or_insert_with(|| MediaState::for_kind(kind));
        state.screen_sharing = enabled;
        Ok(())
    }

    /// Snapshot of every participant's media flags
    pub async fn media_snapshot(
        &self,
        session_id: &SessionId,
    ) -> Result<Vec<(UserId, MediaState)>> {
        let handle = self
            .live
            .get(session_id)
            .ok_or_else(|| CallEngineError::not_found(format!("no live session {session_id}")))?;
        let session = handle.inner.lock().await;
        Ok(session
            .media
            .iter()
            .map(|(uid, state)| (uid.clone(), *state))
            .collect())
    }

    async fn with_media<F>(&self, session_id: &SessionId, user_id: &UserId, apply: F) -> Result<()>
    where
        F: FnOnce(&mut MediaState) -> Result<()>,
    {
        let handle = self
            .live
            .get(session_id)
            .ok_or_else(|| CallEngineError::not_found(format!("no live session {session_id}")))?;
        let mut session = handle.inner.lock().await;
        if session.status.is_terminal() {
            return Err(CallEngineError::not_found(format!(
                "session {session_id} already ended"
            )));
        }
        Self::require_joined(&session.participants, user_id)?;

        let kind = session.kind;
        let state = session
            .media
            .entry(user_id.clone())
            .or_insert_with(|| MediaState::for_kind(kind));
        apply(state)
    }

    fn require_joined(
        participants: &std::collections::HashMap<UserId, crate::orchestrator::LiveParticipant>,
        user_id: &UserId,
    ) -> Result<()> {
        match participants.get(user_id) {
            Some(p) if p.status == ParticipantStatus::Joined => Ok(()),
            Some(p) => Err(CallEngineError::invalid_state(format!(
                "participant {user_id} is {} and cannot change media state",
                p.status.as_str()
            ))),
            None => Err(CallEngineError::permission(format!(
                "{user_id} is not part of this session"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_breakpoints() {
        assert_eq!(layout_for(1).mode, LayoutMode::Spotlight);
        assert_eq!(layout_for(2), layout_for(4));
        assert_eq!(layout_for(2).tiles_per_row, 2);
        assert_eq!(layout_for(5).mode, LayoutMode::Grid);
        assert_eq!(layout_for(9).tiles_per_row, 3);
        assert_eq!(layout_for(10).mode, LayoutMode::Sidebar);
        assert_eq!(layout_for(25).tiles_per_row, 4);
    }

    #[test]
    fn initial_media_state_follows_call_kind() {
        assert!(!MediaState::for_kind(CallKind::Voice).video_enabled);
        assert!(MediaState::for_kind(CallKind::Video).video_enabled);
        assert!(MediaState::for_kind(CallKind::Voice).audio_enabled);
        assert!(!MediaState::for_kind(CallKind::Video).screen_sharing);
    }
}
