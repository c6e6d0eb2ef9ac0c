//! Chat membership reads
//!
//! Chat CRUD lives in another subsystem; the engine only needs to answer
//! "is this user a member of that chat" before letting a call start.

use async_trait::async_trait;
use dashmap::DashMap;
use sqlx::SqlitePool;
use std::collections::HashSet;

use crate::error::Result;
use crate::types::{ChatId, UserId};

/// Read-only membership lookup, injected into the orchestrator
#[async_trait]
pub trait ChatDirectory: Send + Sync {
    async fn is_member(&self, chat_id: &ChatId, user_id: &UserId) -> Result<bool>;
}

/// Membership lookup against the shared SQLite database
pub struct SqlChatDirectory {
    pool: SqlitePool,
}

impl SqlChatDirectory {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Seed helper used by deployments that own the membership table
    pub async fn add_member(&self, chat_id: &ChatId, user_id: &UserId) -> Result<()> {
        sqlx::query("INSERT OR IGNORE INTO chat_members (chat_id, user_id) VALUES (?1, ?2)")
            .bind(chat_id.as_str())
            .bind(user_id.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl ChatDirectory for SqlChatDirectory {
    async fn is_member(&self, chat_id: &ChatId, user_id: &UserId) -> Result<bool> {
        let row: Option<(i64,)> =
            sqlx::query_as("SELECT 1 FROM chat_members WHERE chat_id = ?1 AND user_id = ?2")
                .bind(chat_id.as_str())
                .bind(user_id.as_str())
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.is_some())
    }
}

/// In-memory membership map for tests and embedded use
pub struct InMemoryChatDirectory {
    members: DashMap<ChatId, HashSet<UserId>>,
}

impl InMemoryChatDirectory {
    pub fn new() -> Self {
        Self {
            members: DashMap::new(),
        }
    }

    pub fn add_member(&self, chat_id: &ChatId, user_id: &UserId) {
        self.members
            .entry(chat_id.clone())
            .or_default()
            .insert(user_id.clone());
    }
}

impl Default for InMemoryChatDirectory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChatDirectory for InMemoryChatDirectory {
    async fn is_member(&self, chat_id: &ChatId, user_id: &UserId) -> Result<bool> {
        Ok(self
            .members
            .get(chat_id)
            .map(|entry| entry.contains(user_id))
            .unwrap_or(false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::CallStore;

    #[tokio::test]
    async fn in_memory_membership() {
        let dir = InMemoryChatDirectory::new();
        let chat = ChatId::from("chat-1");
        dir.add_member(&chat, &UserId::from("alice"));

        assert!(dir.is_member(&chat, &UserId::from("alice")).await.unwrap());
        assert!(!dir.is_member(&chat, &UserId::from("bob")).await.unwrap());
    }

    #[tokio::test]
    async fn sql_membership() {
        let store = CallStore::in_memory().await.unwrap();
        let dir = SqlChatDirectory::new(store.pool().clone());
        let chat = ChatId::from("chat-1");

        dir.add_member(&chat, &UserId::from("alice")).await.unwrap();
        assert!(dir.is_member(&chat, &UserId::from("alice")).await.unwrap());
        assert!(!dir.is_member(&chat, &UserId::from("mallory")).await.unwrap());
    }
}
