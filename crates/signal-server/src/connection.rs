//! WebSocket connection handling
//!
//! One task pair per connection: the receive loop parses inbound frames
//! and drives the engine, a forward task drains the bounded outbound queue
//! into the socket. The queue is how the engine's fire-and-forget delivery
//! contract is kept: a consumer that stops reading loses events instead of
//! stalling the engine.

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use async_trait::async_trait;
use huddle_call_engine::engine::CallEngine;
use huddle_call_engine::events::{CallEvent, EventSink, SignalKind};
use huddle_call_engine::quality::QualityReport;
use huddle_call_engine::signaling::SignalMessage;
use huddle_call_engine::types::{ConnectionId, UserId};
use huddle_call_engine::Result as EngineResult;

use crate::auth::Authenticator;
use crate::protocol::{Ack, ClientRequest, Envelope};
use crate::server::AppState;

/// Live sockets by connection id; doubles as the engine's event sink
pub struct ConnectionMap {
    senders: DashMap<ConnectionId, mpsc::Sender<String>>,
}

impl ConnectionMap {
    pub fn new() -> Self {
        Self {
            senders: DashMap::new(),
        }
    }

    fn register(&self, connection_id: ConnectionId, sender: mpsc::Sender<String>) {
        self.senders.insert(connection_id, sender);
    }

    fn remove(&self, connection_id: &ConnectionId) {
        self.senders.remove(connection_id);
    }

    pub fn len(&self) -> usize {
        self.senders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.senders.is_empty()
    }
}

impl Default for ConnectionMap {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventSink for ConnectionMap {
    async fn deliver(&self, connection: &ConnectionId, event: CallEvent) {
        let Some(entry) = self.senders.get(connection) else {
            debug!(connection = %connection, "event for vanished connection dropped");
            return;
        };
        let frame = match serde_json::to_string(&event) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(connection = %connection, error = %e, "event serialization failed");
                return;
            }
        };
        if entry.try_send(frame).is_err() {
            warn!(connection = %connection, "outbound queue full, event dropped");
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ConnectQuery {
    token: String,
}

/// Upgrade handler for `GET /ws?token=...`
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<ConnectQuery>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let Some(user_id) = state.auth.authenticate(&query.token).await else {
        debug!("websocket upgrade refused: unknown token");
        return StatusCode::UNAUTHORIZED.into_response();
    };
    ws.on_upgrade(move |socket| handle_socket(socket, state, user_id))
        .into_response()
}

async fn handle_socket(socket: WebSocket, state: AppState, user_id: UserId) {
    let connection_id = ConnectionId::new();
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (tx, mut rx) = mpsc::channel::<String>(state.config.outbound_queue_depth);

    state.connections.register(connection_id.clone(), tx.clone());
    state.engine.connection_opened(&user_id, &connection_id);
    info!(user = %user_id, connection = %connection_id, "connection opened");

    let forward_task = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if ws_sender.send(Message::Text(frame)).await.is_err() {
                break;
            }
        }
    });

    while let Some(message) = ws_receiver.next().await {
        match message {
            Ok(Message::Text(text)) => {
                let (id, reply) = handle_frame(&state, &user_id, &connection_id, &text).await;
                let ack = match reply {
                    Ok(data) => Ack::ok(id, data),
                    Err(ref e) => Ack::err(id, e),
                };
                if let Ok(frame) = serde_json::to_string(&ack) {
                    if tx.send(frame).await.is_err() {
                        break;
                    }
                }
            }
            Ok(Message::Close(_)) => break,
            Ok(Message::Binary(_)) => {
                debug!(connection = %connection_id, "binary frame ignored");
            }
            Ok(Message::Ping(_) | Message::Pong(_)) => {}
            Err(e) => {
                debug!(connection = %connection_id, error = %e, "websocket error");
                break;
            }
        }
    }

    state.connections.remove(&connection_id);
    state.engine.connection_closed(&connection_id).await;
    forward_task.abort();
    info!(user = %user_id, connection = %connection_id, "connection closed");
}

async fn handle_frame(
    state: &AppState,
    user_id: &UserId,
    connection_id: &ConnectionId,
    text: &str,
) -> (Option<u64>, EngineResult<Option<Value>>) {
    let envelope: Envelope = match serde_json::from_str(text) {
        Ok(envelope) => envelope,
        Err(e) => {
            return (
                None,
                Err(huddle_call_engine::CallEngineError::validation(format!(
                    "malformed frame: {e}"
                ))),
            );
        }
    };
    let id = envelope.id;
    let result = dispatch(&state.engine, user_id, connection_id, envelope.request).await;
    (id, result)
}

async fn dispatch(
    engine: &Arc<CallEngine>,
    user_id: &UserId,
    connection_id: &ConnectionId,
    request: ClientRequest,
) -> EngineResult<Option<Value>> {
    match request {
        ClientRequest::InitiateCall {
            chat_id,
            call_kind,
            targets,
        } => {
            let session_id = engine
                .initiate_call(user_id, connection_id, &chat_id, call_kind, targets)
                .await?;
            Ok(Some(serde_json::json!({ "sessionId": session_id })))
        }
        ClientRequest::AcceptCall { session_id } => {
            engine
                .accept_call(&session_id, user_id, connection_id)
                .await?;
            Ok(None)
        }
        ClientRequest::RejectCall { session_id, reason } => {
            engine.reject_call(&session_id, user_id, reason).await?;
            Ok(None)
        }
        ClientRequest::EndCall { session_id, reason } => {
            engine.end_call(&session_id, user_id, reason).await?;
            Ok(None)
        }
        ClientRequest::LeaveCall { session_id } => {
            engine.leave_call(&session_id, user_id).await?;
            Ok(None)
        }
        ClientRequest::SignalOffer {
            session_id,
            to_user_id,
            payload,
        } => relay(engine, user_id, session_id, to_user_id, SignalKind::Offer, payload).await,
        ClientRequest::SignalAnswer {
            session_id,
            to_user_id,
            payload,
        } => relay(engine, user_id, session_id, to_user_id, SignalKind::Answer, payload).await,
        ClientRequest::SignalCandidate {
            session_id,
            to_user_id,
            payload,
        } => {
            relay(
                engine,
                user_id,
                session_id,
                to_user_id,
                SignalKind::Candidate,
                payload,
            )
            .await
        }
        ClientRequest::SetCamera {
            session_id,
            enabled,
        } => {
            engine.set_camera(&session_id, user_id, enabled).await?;
            Ok(None)
        }
        ClientRequest::SetMicrophone {
            session_id,
            enabled,
        } => {
            engine.set_microphone(&session_id, user_id, enabled).await?;
            Ok(None)
        }
        ClientRequest::SetScreenShare {
            session_id,
            enabled,
        } => {
            engine
                .set_screen_share(&session_id, user_id, enabled)
                .await?;
            Ok(None)
        }
        ClientRequest::SetQualityPreset { session_id, preset } => {
            engine
                .set_quality_preset(&session_id, user_id, preset)
                .await?;
            Ok(None)
        }
        ClientRequest::ReportQuality {
            session_id,
            bitrate_kbps,
            packet_loss_pct,
            jitter_ms,
        } => {
            engine
                .report_quality(
                    &session_id,
                    user_id,
                    connection_id,
                    QualityReport {
                        bitrate_kbps,
                        packet_loss_pct,
                        jitter_ms,
                    },
                )
                .await?;
            Ok(None)
        }
        ClientRequest::ListHistory { chat_id } => {
            let sessions = engine.call_history(&chat_id).await?;
            Ok(Some(serde_json::json!({ "sessions": sessions })))
        }
    }
}

async fn relay(
    engine: &Arc<CallEngine>,
    user_id: &UserId,
    session_id: huddle_call_engine::types::SessionId,
    to_user_id: UserId,
    kind: SignalKind,
    payload: Value,
) -> EngineResult<Option<Value>> {
    engine
        .relay_signal(SignalMessage {
            session_id,
            from_user_id: user_id.clone(),
            to_user_id,
            kind,
            payload,
        })
        .await?;
    Ok(None)
}
