use crate::models::chat::{
    title_from_message,
    ConversationSession,
    Language,
    Message,
    SessionSummary,
};
use crate::sessions::SessionStore;

use async_trait::async_trait;
use tokio::sync::RwLock;

use std::collections::HashMap;
use std::error::Error;

/// Keeps every session in process memory. Used in tests and wherever
/// persistence across restarts is not wanted.
#[derive(Default)]
pub struct MemorySessionStore {
    sessions: RwLock<HashMap<String, ConversationSession>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn append_turn(
        &self,
        session_id: &str,
        language: Language,
        user: Message,
        assistant: Message
    ) -> Result<(), Box<dyn Error + Send + Sync>> {
        let mut guard = self.sessions.write().await;
        let session = guard
            .entry(session_id.to_string())
            .or_insert_with(|| {
                ConversationSession::new(session_id, &title_from_message(&user.content), language)
            });
        session.append(user);
        session.append(assistant);
        Ok(())
    }

    async fn get(
        &self,
        session_id: &str
    ) -> Result<Option<ConversationSession>, Box<dyn Error + Send + Sync>> {
        Ok(self.sessions.read().await.get(session_id).cloned())
    }

    async fn list(&self) -> Result<Vec<SessionSummary>, Box<dyn Error + Send + Sync>> {
        let guard = self.sessions.read().await;
        let mut summaries: Vec<SessionSummary> = guard
            .values()
            .map(|session| session.summary())
            .collect();
        summaries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(summaries)
    }

    async fn delete(&self, session_id: &str) -> Result<bool, Box<dyn Error + Send + Sync>> {
        Ok(self.sessions.write().await.remove(session_id).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::chat::{ DocumentSource, TokenUsage };

    #[tokio::test]
    async fn round_trip_through_the_memory_store() {
        let store = MemorySessionStore::new();

        let user = Message::user("What is a sloper?");
        let assistant = Message::assistant(
            "The base pattern without seam allowances.",
            Vec::<DocumentSource>::new(),
            TokenUsage::default()
        );
        store.append_turn("visitor-1", Language::En, user, assistant).await.unwrap();

        let session = store.get("visitor-1").await.unwrap().unwrap();
        assert_eq!(session.title, "What is a sloper?");
        assert_eq!(store.list().await.unwrap().len(), 1);

        assert!(store.delete("visitor-1").await.unwrap());
        assert!(store.get("visitor-1").await.unwrap().is_none());
    }
}
