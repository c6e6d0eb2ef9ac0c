//! HTTP/WebSocket server assembly

use anyhow::Context;
use axum::extract::State;
use axum::response::Json;
use axum::routing::get;
use axum::Router;
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;
use tracing::info;

use huddle_call_engine::config::EngineConfig;
use huddle_call_engine::database::ChatDirectory;
use huddle_call_engine::engine::CallEngine;

use crate::auth::Authenticator;
use crate::config::ServerConfig;
use crate::connection::{ws_handler, ConnectionMap};

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<CallEngine>,
    pub connections: Arc<ConnectionMap>,
    pub auth: Arc<dyn Authenticator>,
    pub config: Arc<ServerConfig>,
}

/// Builder for [`SignalServer`]
pub struct SignalServerBuilder {
    config: ServerConfig,
    auth: Option<Arc<dyn Authenticator>>,
    chats: Option<Arc<dyn ChatDirectory>>,
}

impl SignalServerBuilder {
    pub fn new() -> Self {
        Self {
            config: ServerConfig::default(),
            auth: None,
            chats: None,
        }
    }

    pub fn with_config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_authenticator(mut self, auth: Arc<dyn Authenticator>) -> Self {
        self.auth = Some(auth);
        self
    }

    /// Override the chat membership source; defaults to the engine database
    pub fn with_chat_directory(mut self, chats: Arc<dyn ChatDirectory>) -> Self {
        self.chats = Some(chats);
        self
    }

    pub async fn build(self) -> anyhow::Result<SignalServer> {
        let auth = self
            .auth
            .context("an authenticator is required")?;
        let connections = Arc::new(ConnectionMap::new());

        let mut engine_builder = CallEngine::builder()
            .with_config(
                EngineConfig::default().with_ring_timeout(self.config.ring_timeout),
            )
            .with_event_sink(connections.clone());
        if let Some(url) = &self.config.database_url {
            engine_builder = engine_builder.with_database_url(url);
        }
        if let Some(chats) = self.chats {
            engine_builder = engine_builder.with_chat_directory(chats);
        }
        let engine = engine_builder.build().await?;

        Ok(SignalServer {
            state: AppState {
                engine,
                connections,
                auth,
                config: Arc::new(self.config),
            },
        })
    }
}

impl Default for SignalServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// The assembled signaling server
pub struct SignalServer {
    state: AppState,
}

impl SignalServer {
    pub fn builder() -> SignalServerBuilder {
        SignalServerBuilder::new()
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/ws", get(ws_handler))
            .route("/healthz", get(healthz))
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    /// Bind and serve until ctrl-c
    pub async fn run(self) -> anyhow::Result<()> {
        let addr = self.state.config.bind_addr;
        let router = self.router();
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("binding {addr}"))?;
        info!(%addr, "signaling server listening");

        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .context("server error")?;
        info!("signaling server stopped");
        Ok(())
    }
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        // No signal handler available; fall back to running forever.
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
    // Give in-flight frames a moment to drain.
    tokio::time::sleep(Duration::from_millis(100)).await;
}

async fn healthz(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "connections": state.engine.connection_count(),
        "liveSessions": state.engine.live_session_count(),
    }))
}
