//! Engine facade
//!
//! `CallEngine` wires the subsystems together behind one handle: presence,
//! the live session registry, the orchestrator, the signaling relay, the
//! quality monitor, the media controller and the durable store. Transports
//! construct it once via `CallEngineBuilder` and call into it per request.

use std::sync::Arc;
use tracing::info;

use crate::config::EngineConfig;
use crate::database::{CallStore, ChatDirectory, SqlChatDirectory};
use crate::error::{CallEngineError, Result};
use crate::events::EventSink;
use crate::media::{MediaController, MediaState, QualityPreset};
use crate::orchestrator::{CallOrchestrator, LeaveCause, LiveSessionRegistry};
use crate::presence::PresenceRegistry;
use crate::quality::{QualityMonitor, QualityReport};
use crate::signaling::{SignalMessage, SignalingRouter};
use crate::types::{
    CallKind, CallSession, ChatId, ConnectionId, EndReason, SessionId, UserId,
};

/// Builder for [`CallEngine`]
pub struct CallEngineBuilder {
    config: EngineConfig,
    database_url: Option<String>,
    chats: Option<Arc<dyn ChatDirectory>>,
    sink: Option<Arc<dyn EventSink>>,
}

impl CallEngineBuilder {
    pub fn new() -> Self {
        Self {
            config: EngineConfig::default(),
            database_url: None,
            chats: None,
            sink: None,
        }
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Back the store with a SQLite database file
    pub fn with_database_url(mut self, url: impl Into<String>) -> Self {
        self.database_url = Some(url.into());
        self
    }

    /// Back the store with an in-memory database (tests, ephemeral runs)
    pub fn with_in_memory_database(mut self) -> Self {
        self.database_url = None;
        self
    }

    /// Override the chat membership source
    ///
    /// Defaults to membership rows in the engine's own database.
    pub fn with_chat_directory(mut self, chats: Arc<dyn ChatDirectory>) -> Self {
        self.chats = Some(chats);
        self
    }

    /// The transport seam; required
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub async fn build(self) -> Result<Arc<CallEngine>> {
        let sink = self
            .sink
            .ok_or_else(|| CallEngineError::validation("an event sink is required"))?;

        let store = Arc::new(match &self.database_url {
            Some(url) => CallStore::connect(url).await?,
            None => CallStore::in_memory().await?,
        });
        let chats = self
            .chats
            .unwrap_or_else(|| Arc::new(SqlChatDirectory::new(store.pool().clone())));

        let presence = Arc::new(PresenceRegistry::new());
        let live = Arc::new(LiveSessionRegistry::new());
        let orchestrator = CallOrchestrator::new(
            self.config.clone(),
            presence.clone(),
            live.clone(),
            store.clone(),
            chats,
            sink.clone(),
        );
        let signaling = SignalingRouter::new(live.clone(), presence.clone(), sink.clone());
        let quality = QualityMonitor::new(
            self.config.quality,
            live.clone(),
            store.clone(),
            sink,
        );
        let media = MediaController::new(live.clone());

        info!(
            ring_timeout_secs = self.config.ring_timeout.as_secs(),
            "call engine ready"
        );
        Ok(Arc::new(CallEngine {
            presence,
            live,
            store,
            orchestrator,
            signaling,
            quality,
            media,
        }))
    }
}

impl Default for CallEngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// One handle over the whole call core
pub struct CallEngine {
    presence: Arc<PresenceRegistry>,
    live: Arc<LiveSessionRegistry>,
    store: Arc<CallStore>,
    orchestrator: Arc<CallOrchestrator>,
    signaling: SignalingRouter,
    quality: QualityMonitor,
    media: MediaController,
}

impl CallEngine {
    pub fn builder() -> CallEngineBuilder {
        CallEngineBuilder::new()
    }

    /// An authenticated transport connection came up
    pub fn connection_opened(&self, user_id: &UserId, connection_id: &ConnectionId) {
        self.presence.register(user_id, connection_id);
    }

    /// A transport connection went away, cleanly or not
    ///
    /// When it was the user's last connection, a disconnect-leave is
    /// synthesized into every live session the user participates in.
    pub async fn connection_closed(&self, connection_id: &ConnectionId) {
        let Some(disconnection) = self.presence.unregister(connection_id) else {
            return;
        };
        if disconnection.last_connection {
            self.orchestrator
                .user_went_offline(&disconnection.user_id)
                .await;
        }
    }

    pub async fn initiate_call(
        &self,
        caller_id: &UserId,
        connection_id: &ConnectionId,
        chat_id: &ChatId,
        kind: CallKind,
        targets: Vec<UserId>,
    ) -> Result<SessionId> {
        self.orchestrator
            .initiate_call(caller_id, connection_id, chat_id, kind, targets)
            .await
    }

    pub async fn accept_call(
        &self,
        session_id: &SessionId,
        user_id: &UserId,
        connection_id: &ConnectionId,
    ) -> Result<()> {
        self.orchestrator
            .accept_call(session_id, user_id, connection_id)
            .await
    }

    pub async fn reject_call(
        &self,
        session_id: &SessionId,
        user_id: &UserId,
        reason: Option<String>,
    ) -> Result<()> {
        self.orchestrator
            .reject_call(session_id, user_id, reason)
            .await
    }

    pub async fn end_call(
        &self,
        session_id: &SessionId,
        user_id: &UserId,
        reason: Option<EndReason>,
    ) -> Result<()> {
        self.orchestrator.end_call(session_id, user_id, reason).await
    }

    pub async fn leave_call(&self, session_id: &SessionId, user_id: &UserId) -> Result<()> {
        self.orchestrator
            .participant_left(session_id, user_id, LeaveCause::Left)
            .await
    }

    pub async fn relay_signal(&self, message: SignalMessage) -> Result<()> {
        self.signaling.relay(message).await
    }

    pub async fn report_quality(
        &self,
        session_id: &SessionId,
        user_id: &UserId,
        connection_id: &ConnectionId,
        report: QualityReport,
    ) -> Result<()> {
        self.quality
            .report(session_id, user_id, connection_id, report)
            .await
    }

    pub async fn set_camera(
        &self,
        session_id: &SessionId,
        user_id: &UserId,
        enabled: bool,
    ) -> Result<()> {
        self.media.set_camera(session_id, user_id, enabled).await
    }

    pub async fn set_microphone(
        &self,
        session_id: &SessionId,
        user_id: &UserId,
        enabled: bool,
    ) -> Result<()> {
        self.media.set_microphone(session_id, user_id, enabled).await
    }

    pub async fn set_screen_share(
        &self,
        session_id: &SessionId,
        user_id: &UserId,
        enabled: bool,
    ) -> Result<()> {
        self.media
            .set_screen_share(session_id, user_id, enabled)
            .await
    }

    pub async fn set_quality_preset(
        &self,
        session_id: &SessionId,
        user_id: &UserId,
        preset: QualityPreset,
    ) -> Result<()> {
        self.media
            .set_quality_preset(session_id, user_id, preset)
            .await
    }

    /// Media flags of every participant in a live session
    pub async fn media_snapshot(
        &self,
        session_id: &SessionId,
    ) -> Result<Vec<(UserId, MediaState)>> {
        self.media.media_snapshot(session_id).await
    }

    /// Durable record of one call attempt
    pub async fn call_record(&self, session_id: &SessionId) -> Result<Option<CallSession>> {
        self.store.get_session(session_id).await
    }

    /// Call history of a chat, newest first
    pub async fn call_history(&self, chat_id: &ChatId) -> Result<Vec<CallSession>> {
        self.store.list_sessions_for_chat(chat_id).await
    }

    /// The user behind a live connection, if any
    pub fn user_of(&self, connection_id: &ConnectionId) -> Option<UserId> {
        self.presence.user_of(connection_id)
    }

    pub fn is_online(&self, user_id: &UserId) -> bool {
        self.presence.is_online(user_id)
    }

    /// Number of currently live sessions
    pub fn live_session_count(&self) -> usize {
        self.live.len()
    }

    /// Number of live transport connections
    pub fn connection_count(&self) -> usize {
        self.presence.connection_count()
    }
}
