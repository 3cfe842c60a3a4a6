//! Abstract session persistence hooks.
//!
//! The runtime does not persist conversations itself; an agent may carry a
//! [`SessionManager`] that loads prior history before the first turn and
//! receives new messages after each successful invocation. Agents with a
//! session manager cannot participate in a swarm.

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::Result;
use crate::message::Message;

/// Persistence hooks for an agent's conversation.
#[async_trait]
pub trait SessionManager: Send + Sync {
    /// Load previously persisted messages.
    async fn load(&self) -> Result<Vec<Message>>;

    /// Persist newly produced messages.
    async fn append(&self, messages: &[Message]) -> Result<()>;
}

/// A shared, thread-safe [`SessionManager`] trait object.
pub type SharedSessionManager = std::sync::Arc<dyn SessionManager>;

/// In-memory session storage, for tests and single-process use.
#[derive(Debug, Default)]
pub struct InMemorySession {
    messages: Mutex<Vec<Message>>,
}

impl InMemorySession {
    /// Create an empty session.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot the stored messages.
    pub async fn messages(&self) -> Vec<Message> {
        self.messages.lock().await.clone()
    }
}

#[async_trait]
impl SessionManager for InMemorySession {
    async fn load(&self) -> Result<Vec<Message>> {
        Ok(self.messages.lock().await.clone())
    }

    async fn append(&self, messages: &[Message]) -> Result<()> {
        self.messages.lock().await.extend_from_slice(messages);
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn append_then_load_round_trips() {
        let session = InMemorySession::new();
        session
            .append(&[Message::user("hi"), Message::assistant("hello")])
            .await
            .unwrap();

        let loaded = session.load().await.unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].text(), Some("hi".to_owned()));
    }
}
