//! Connection quality monitoring
//!
//! Accepts client-reported quality samples, persists the latest one on the
//! session record, and warns the reporting device when the sample crosses
//! the configured degradation thresholds. The engine never measures
//! anything itself; it trusts the client's numbers.

use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::config::QualityThresholds;
use crate::database::CallStore;
use crate::error::{CallEngineError, Result};
use crate::events::{CallEvent, EventSink};
use crate::orchestrator::LiveSessionRegistry;
use crate::types::{ConnectionId, QualitySample, SessionId, UserId};

/// A raw sample as reported by a client device
#[derive(Debug, Clone)]
pub struct QualityReport {
    pub bitrate_kbps: u32,
    pub packet_loss_pct: f64,
    pub jitter_ms: f64,
}

/// Evaluates quality samples against thresholds and records the latest
pub struct QualityMonitor {
    thresholds: QualityThresholds,
    live: Arc<LiveSessionRegistry>,
    store: Arc<CallStore>,
    sink: Arc<dyn EventSink>,
}

impl QualityMonitor {
    pub fn new(
        thresholds: QualityThresholds,
        live: Arc<LiveSessionRegistry>,
        store: Arc<CallStore>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            thresholds,
            live,
            store,
            sink,
        }
    }

    /// Ingest one sample from a participant's device
    ///
    /// Persistence is best-effort; a degraded sample warns only the device
    /// that reported it, never the whole session.
    pub async fn report(
        &self,
        session_id: &SessionId,
        user_id: &UserId,
        connection_id: &ConnectionId,
        report: QualityReport,
    ) -> Result<()> {
        Self::validate(&report)?;

        let handle = self.live.get(session_id).ok_or_else(|| {
            CallEngineError::not_found(format!("no live session {session_id}"))
        })?;
        if !handle.members.contains(user_id) {
            return Err(CallEngineError::permission(format!(
                "{user_id} is not part of session {session_id}"
            )));
        }

        let sample = QualitySample {
            bitrate_kbps: report.bitrate_kbps,
            packet_loss_pct: report.packet_loss_pct,
            jitter_ms: report.jitter_ms,
            sampled_at: Utc::now(),
        };
        if let Err(e) = self.store.set_quality(session_id, &sample).await {
            warn!(session = %session_id, error = %e,
                "quality sample not persisted, call continues");
        }

        let degraded = sample.packet_loss_pct > self.thresholds.max_packet_loss_pct
            || sample.jitter_ms > self.thresholds.max_jitter_ms;
        if degraded {
            debug!(
                session = %session_id,
                user = %user_id,
                loss = sample.packet_loss_pct,
                jitter = sample.jitter_ms,
                "quality below thresholds"
            );
            self.sink
                .deliver(
                    connection_id,
                    CallEvent::QualityWarning {
                        session_id: session_id.clone(),
                        packet_loss_pct: sample.packet_loss_pct,
                        jitter_ms: sample.jitter_ms,
                    },
                )
                .await;
        }
        Ok(())
    }

    fn validate(report: &QualityReport) -> Result<()> {
        if !report.packet_loss_pct.is_finite()
            || !(0.0..=100.0).contains(&report.packet_loss_pct)
        {
            return Err(CallEngineError::validation(
                "packet loss must be a percentage between 0 and 100",
            ));
        }
        if !report.jitter_ms.is_finite() || report.jitter_ms < 0.0 {
            return Err(CallEngineError::validation(
                "jitter must be a non-negative number of milliseconds",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::{LiveHandle, LiveParticipant, LiveSession};
    use crate::types::{CallKind, CallStatus, ChatId};
    use async_trait::async_trait;
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

    async fn monitor_with_session(
        session_id: &SessionId,
        members: &[UserId],
    ) -> (QualityMonitor, Arc<CallStore>, Arc<RecordingSink>) {
        let live = Arc::new(LiveSessionRegistry::new());
        let store = Arc::new(CallStore::in_memory().await.unwrap());
        let sink = Arc::new(RecordingSink {
            delivered: Mutex::new(Vec::new()),
        });

        let mut participants = HashMap::new();
        for member in members {
            participants.insert(member.clone(), LiveParticipant::ringing());
        }
        live.insert(
            session_id.clone(),
            ChatId::from("chat-1"),
            LiveHandle {
                members: Arc::new(members.to_vec()),
                inner: Arc::new(Mutex::new(LiveSession {
                    id: session_id.clone(),
                    chat_id: ChatId::from("chat-1"),
                    caller_id: members[0].clone(),
                    kind: CallKind::Video,
                    status: CallStatus::Ongoing,
                    participants,
                    media: HashMap::new(),
                    initiated_at: Utc::now(),
                    started_at: Some(Utc::now()),
                    any_joined: true,
                    ring_timer: None,
                })),
            },
        );

        let monitor = QualityMonitor::new(
            QualityThresholds::default(),
            live,
            store.clone(),
            sink.clone(),
        );
        (monitor, store, sink)
    }

    #[tokio::test]
    async fn healthy_sample_persists_without_warning() {
        let session_id = SessionId::new();
        let alice = UserId::from("alice");
        let (monitor, _store, sink) =
            monitor_with_session(&session_id, &[alice.clone()]).await;

        monitor
            .report(
                &session_id,
                &alice,
                &ConnectionId::from("c1"),
                QualityReport {
                    bitrate_kbps: 1200,
                    packet_loss_pct: 0.3,
                    jitter_ms: 15.0,
                },
            )
            .await
            .unwrap();
        assert!(sink.delivered.lock().await.is_empty());
    }

    #[tokio::test]
    async fn degraded_sample_warns_only_the_reporting_device() {
        let session_id = SessionId::new();
        let alice = UserId::from("alice");
        let conn = ConnectionId::from("alice-phone");
        let (monitor, _store, sink) =
            monitor_with_session(&session_id, &[alice.clone()]).await;

        monitor
            .report(
                &session_id,
                &alice,
                &conn,
                QualityReport {
                    bitrate_kbps: 200,
                    packet_loss_pct: 12.0,
                    jitter_ms: 40.0,
                },
            )
            .await
            .unwrap();

        let delivered = sink.delivered.lock().await;
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].0, conn);
        assert!(matches!(
            delivered[0].1,
            CallEvent::QualityWarning { packet_loss_pct, .. } if packet_loss_pct == 12.0
        ));
    }

    #[tokio::test]
    async fn rejects_invalid_samples_and_outsiders() {
        let session_id = SessionId::new();
        let alice = UserId::from("alice");
        let (monitor, _store, _sink) =
            monitor_with_session(&session_id, &[alice.clone()]).await;

        let invalid = monitor
            .report(
                &session_id,
                &alice,
                &ConnectionId::from("c1"),
                QualityReport {
                    bitrate_kbps: 100,
                    packet_loss_pct: 130.0,
                    jitter_ms: 10.0,
                },
            )
            .await;
        assert!(matches!(invalid, Err(CallEngineError::Validation { .. })));

        let outsider = monitor
            .report(
                &session_id,
                &UserId::from("mallory"),
                &ConnectionId::from("c2"),
                QualityReport {
                    bitrate_kbps: 100,
                    packet_loss_pct: 1.0,
                    jitter_ms: 10.0,
                },
            )
            .await;
        assert!(matches!(outsider, Err(CallEngineError::Permission { .. })));
    }
}
