//! Session and message persistence contracts.
//!
//! The orchestrator only talks to these traits. The API service backs them
//! with Postgres; the in-memory versions serve tests and database-less runs.

use crate::context::SessionContext;
use crate::error::{Result, TutorError};
use crate::phase::Phase;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Assistant,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
        }
    }

    pub fn parse(raw: &str) -> Result<Self> {
        match raw {
            "user" => Ok(MessageRole::User),
            "assistant" => Ok(MessageRole::Assistant),
            other => Err(TutorError::Storage(format!("unknown message role '{}'", other))),
        }
    }
}

/// A message as stored in a session's log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredMessage {
    pub role: MessageRole,
    pub phase: Phase,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl StoredMessage {
    pub fn new(role: MessageRole, phase: Phase, content: impl Into<String>) -> Self {
        Self {
            role,
            phase,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Persists a new session and returns its id.
    async fn create(&self, ctx: &SessionContext) -> Result<Uuid>;

    /// Loads a session. Unknown ids are [`TutorError::NotFound`].
    async fn get(&self, id: Uuid) -> Result<SessionContext>;

    /// Overwrites the stored context of an existing session.
    async fn save(&self, id: Uuid, ctx: &SessionContext) -> Result<()>;

    /// Removes a session and its messages. Returns whether it existed.
    async fn delete(&self, id: Uuid) -> Result<bool>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MessageLog: Send + Sync {
    async fn append(&self, session_id: Uuid, message: StoredMessage) -> Result<()>;

    /// Messages in insertion order.
    async fn list(&self, session_id: Uuid) -> Result<Vec<StoredMessage>>;
}

#[derive(Default)]
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<Uuid, SessionContext>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn create(&self, ctx: &SessionContext) -> Result<Uuid> {
        let id = Uuid::new_v4();
        self.sessions.write().await.insert(id, ctx.clone());
        Ok(id)
    }

    async fn get(&self, id: Uuid) -> Result<SessionContext> {
        self.sessions
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(TutorError::NotFound(id))
    }

    async fn save(&self, id: Uuid, ctx: &SessionContext) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        match sessions.get_mut(&id) {
            Some(stored) => {
                *stored = ctx.clone();
                Ok(())
            }
            None => Err(TutorError::NotFound(id)),
        }
    }

    async fn delete(&self, id: Uuid) -> Result<bool> {
        Ok(self.sessions.write().await.remove(&id).is_some())
    }
}

#[derive(Default)]
pub struct InMemoryMessageLog {
    messages: RwLock<HashMap<Uuid, Vec<StoredMessage>>>,
}

impl InMemoryMessageLog {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MessageLog for InMemoryMessageLog {
    async fn append(&self, session_id: Uuid, message: StoredMessage) -> Result<()> {
        self.messages
            .write()
            .await
            .entry(session_id)
            .or_default()
            .push(message);
        Ok(())
    }

    async fn list(&self, session_id: Uuid) -> Result<Vec<StoredMessage>> {
        Ok(self
            .messages
            .read()
            .await
            .get(&session_id)
            .cloned()
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_session_roundtrip_and_delete() {
        let store = InMemorySessionStore::new();
        let mut ctx = SessionContext::new("user-1", None);
        let id = store.create(&ctx).await.unwrap();

        ctx.set_subject("양자역학이 뭐야?", "양자역학");
        store.save(id, &ctx).await.unwrap();
        assert_eq!(store.get(id).await.unwrap().concept(), "양자역학");

        assert!(store.delete(id).await.unwrap());
        assert!(!store.delete(id).await.unwrap());
        assert!(matches!(store.get(id).await, Err(TutorError::NotFound(found)) if found == id));
    }

    #[tokio::test]
    async fn test_save_unknown_session_fails() {
        let store = InMemorySessionStore::new();
        let ctx = SessionContext::new("user-1", None);
        let err = store.save(Uuid::new_v4(), &ctx).await.unwrap_err();
        assert!(err.is_terminal());
    }

    #[tokio::test]
    async fn test_message_log_keeps_order() {
        let log = InMemoryMessageLog::new();
        let id = Uuid::new_v4();
        log.append(id, StoredMessage::new(MessageRole::User, Phase::Home, "안녕"))
            .await
            .unwrap();
        log.append(id, StoredMessage::new(MessageRole::Assistant, Phase::Home, "반가워요"))
            .await
            .unwrap();

        let messages = log.list(id).await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, MessageRole::User);
        assert_eq!(messages[1].content, "반가워요");
        assert!(log.list(Uuid::new_v4()).await.unwrap().is_empty());
    }

    #[test]
    fn test_role_parse() {
        assert_eq!(MessageRole::parse("assistant").unwrap(), MessageRole::Assistant);
        assert!(MessageRole::parse("system").is_err());
    }
}
