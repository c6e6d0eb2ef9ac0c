//! Persisted call session records
//!
//! The store is the authority for history and analytics, never for live
//! routing. Writes are issued by the orchestrator on a best-effort basis;
//! a failed write degrades history, not the call.

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Executor, Row, SqlitePool};
use std::str::FromStr;
use tracing::info;

use crate::error::{CallEngineError, Result};
use crate::types::{
    CallKind, CallSession, CallStatus, ChatId, EndReason, Participant, ParticipantStatus,
    QualitySample, SessionId, UserId,
};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS call_sessions (
    session_id              TEXT PRIMARY KEY,
    chat_id                 TEXT NOT NULL,
    kind                    TEXT NOT NULL,
    caller_id               TEXT NOT NULL,
    status                  TEXT NOT NULL,
    initiated_at            TEXT NOT NULL,
    started_at              TEXT,
    ended_at                TEXT,
    end_reason              TEXT,
    quality_bitrate_kbps    INTEGER,
    quality_packet_loss_pct REAL,
    quality_jitter_ms       REAL,
    quality_sampled_at      TEXT
);
CREATE INDEX IF NOT EXISTS idx_call_sessions_chat ON call_sessions(chat_id);

CREATE TABLE IF NOT EXISTS call_participants (
    session_id TEXT NOT NULL,
    user_id    TEXT NOT NULL,
    status     TEXT NOT NULL,
    joined_at  TEXT,
    left_at    TEXT,
    PRIMARY KEY (session_id, user_id)
);

CREATE TABLE IF NOT EXISTS chat_members (
    chat_id TEXT NOT NULL,
    user_id TEXT NOT NULL,
    PRIMARY KEY (chat_id, user_id)
);
"#;

/// Async store for durable call records, backed by SQLite via sqlx
#[derive(Clone)]
pub struct CallStore {
    pool: SqlitePool,
}

impl CallStore {
    /// Connect to a database file, creating it if missing
    pub async fn connect(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(CallEngineError::Database)?
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new().connect_with(options).await?;
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    /// In-memory database for tests and ephemeral deployments
    ///
    /// Pinned to a single pooled connection; SQLite gives every connection
    /// its own private :memory: database otherwise.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<()> {
        self.pool.execute(SCHEMA).await?;
        info!("call store schema ready");
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Insert a freshly initiated session with its ringing participants
    pub async fn insert_session(&self, session: &CallSession) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO call_sessions
                 (session_id, chat_id, kind, caller_id, status, initiated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )
        .bind(session.id.as_str())
        .bind(session.chat_id.as_str())
        .bind(session.kind.as_str())
        .bind(session.caller_id.as_str())
        .bind(session.status.as_str())
        .bind(session.initiated_at)
        .execute(&mut *tx)
        .await?;

        for participant in &session.participants {
            sqlx::query(
                "INSERT INTO call_participants (session_id, user_id, status)
                 VALUES (?1, ?2, ?3)",
            )
            .bind(session.id.as_str())
            .bind(participant.user_id.as_str())
            .bind(participant.status.as_str())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Record the one-time transition to ongoing
    pub async fn mark_started(&self, session_id: &SessionId, at: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            "UPDATE call_sessions SET status = ?1, started_at = ?2
             WHERE session_id = ?3 AND started_at IS NULL",
        )
        .bind(CallStatus::Ongoing.as_str())
        .bind(at)
        .bind(session_id.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Record a terminal transition; ended_at is written exactly once
    pub async fn mark_ended(
        &self,
        session_id: &SessionId,
        status: CallStatus,
        reason: EndReason,
        at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE call_sessions SET status = ?1, ended_at = ?2, end_reason = ?3
             WHERE session_id = ?4 AND ended_at IS NULL",
        )
        .bind(status.as_str())
        .bind(at)
        .bind(reason.as_str())
        .bind(session_id.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Update one participant's status and timestamps
    pub async fn set_participant_status(
        &self,
        session_id: &SessionId,
        user_id: &UserId,
        status: ParticipantStatus,
        joined_at: Option<DateTime<Utc>>,
        left_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE call_participants
             SET status = ?1,
                 joined_at = COALESCE(?2, joined_at),
                 left_at   = COALESCE(?3, left_at)
             WHERE session_id = ?4 AND user_id = ?5",
        )
        .bind(status.as_str())
        .bind(joined_at)
        .bind(left_at)
        .bind(session_id.as_str())
        .bind(user_id.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Overwrite the latest quality sample; no history is kept
    pub async fn set_quality(&self, session_id: &SessionId, sample: &QualitySample) -> Result<()> {
        sqlx::query(
            "UPDATE call_sessions
             SET quality_bitrate_kbps = ?1,
                 quality_packet_loss_pct = ?2,
                 quality_jitter_ms = ?3,
                 quality_sampled_at = ?4
             WHERE session_id = ?5",
        )
        .bind(sample.bitrate_kbps as i64)
        .bind(sample.packet_loss_pct)
        .bind(sample.jitter_ms)
        .bind(sample.sampled_at)
        .bind(session_id.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Fetch one session with its participants
    pub async fn get_session(&self, session_id: &SessionId) -> Result<Option<CallSession>> {
        let row = sqlx::query(
            "SELECT session_id, chat_id, kind, caller_id, status, initiated_at,
                    started_at, ended_at, end_reason,
                    quality_bitrate_kbps, quality_packet_loss_pct,
                    quality_jitter_ms, quality_sampled_at
             FROM call_sessions WHERE session_id = ?1",
        )
        .bind(session_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let mut session = Self::session_from_row(&row)?;
        session.participants = self.participants_of(session_id).await?;
        Ok(Some(session))
    }

    /// All sessions ever recorded for a chat, newest first
    pub async fn list_sessions_for_chat(&self, chat_id: &ChatId) -> Result<Vec<CallSession>> {
        let rows = sqlx::query(
            "SELECT session_id, chat_id, kind, caller_id, status, initiated_at,
                    started_at, ended_at, end_reason,
                    quality_bitrate_kbps, quality_packet_loss_pct,
                    quality_jitter_ms, quality_sampled_at
             FROM call_sessions WHERE chat_id = ?1
             ORDER BY initiated_at DESC",
        )
        .bind(chat_id.as_str())
        .fetch_all(&self.pool)
        .await?;

        let mut sessions = Vec::with_capacity(rows.len());
        for row in &rows {
            let mut session = Self::session_from_row(row)?;
            session.participants = self.participants_of(&session.id).await?;
            sessions.push(session);
        }
        Ok(sessions)
    }

    async fn participants_of(&self, session_id: &SessionId) -> Result<Vec<Participant>> {
        let rows = sqlx::query(
            "SELECT user_id, status, joined_at, left_at
             FROM call_participants WHERE session_id = ?1
             ORDER BY user_id",
        )
        .bind(session_id.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let status: String = row.try_get("status")?;
                Ok(Participant {
                    user_id: UserId::from(row.try_get::<String, _>("user_id")?),
                    status: ParticipantStatus::parse(&status).ok_or_else(|| {
                        CallEngineError::internal(format!("bad participant status: {status}"))
                    })?,
                    joined_at: row.try_get("joined_at")?,
                    left_at: row.try_get("left_at")?,
                })
            })
            .collect()
    }

    fn session_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<CallSession> {
        let kind: String = row.try_get("kind")?;
        let status: String = row.try_get("status")?;
        let end_reason: Option<String> = row.try_get("end_reason")?;

        let last_quality = match (
            row.try_get::<Option<i64>, _>("quality_bitrate_kbps")?,
            row.try_get::<Option<f64>, _>("quality_packet_loss_pct")?,
            row.try_get::<Option<f64>, _>("quality_jitter_ms")?,
            row.try_get::<Option<DateTime<Utc>>, _>("quality_sampled_at")?,
        ) {
            (Some(bitrate), Some(loss), Some(jitter), Some(at)) => Some(QualitySample {
                bitrate_kbps: bitrate as u32,
                packet_loss_pct: loss,
                jitter_ms: jitter,
                sampled_at: at,
            }),
            _ => None,
        };

        Ok(CallSession {
            id: SessionId::from(row.try_get::<String, _>("session_id")?),
            chat_id: ChatId::from(row.try_get::<String, _>("chat_id")?),
            kind: CallKind::parse(&kind)
                .ok_or_else(|| CallEngineError::internal(format!("bad call kind: {kind}")))?,
            caller_id: UserId::from(row.try_get::<String, _>("caller_id")?),
            participants: Vec::new(),
            status: CallStatus::parse(&status)
                .ok_or_else(|| CallEngineError::internal(format!("bad call status: {status}")))?,
            initiated_at: row.try_get("initiated_at")?,
            started_at: row.try_get("started_at")?,
            ended_at: row.try_get("ended_at")?,
            end_reason: end_reason.as_deref().and_then(EndReason::parse),
            last_quality,
        })
    }
}
