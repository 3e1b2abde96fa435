use crate::models::chat::{
    title_from_message,
    ConversationSession,
    Language,
    Message,
    SessionSummary,
};
use crate::sessions::SessionStore;

use async_trait::async_trait;
use log::warn;
use tokio::sync::Mutex;

use std::error::Error;
use std::fs;
use std::path::PathBuf;

/// One JSON file per session. A single coarse lock serializes all access so
/// a half-written file is never observed.
pub struct FileSessionStore {
    dir: PathBuf,
    lock: Mutex<()>,
}

impl FileSessionStore {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir, lock: Mutex::new(()) }
    }

    // Ids are validated at the API boundary before they reach the store.
    fn path_for(&self, session_id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", session_id))
    }

    fn read_session(
        &self,
        session_id: &str
    ) -> Result<Option<ConversationSession>, Box<dyn Error + Send + Sync>> {
        let path = self.path_for(session_id);
        if !path.exists() {
            return Ok(None);
        }
        let bytes = fs::read(&path)?;
        Ok(Some(serde_json::from_slice(&bytes)?))
    }

    fn write_session(
        &self,
        session: &ConversationSession
    ) -> Result<(), Box<dyn Error + Send + Sync>> {
        fs::create_dir_all(&self.dir)?;
        let path = self.path_for(&session.id);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(session)?)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }
}

#[async_trait]
impl SessionStore for FileSessionStore {
    async fn append_turn(
        &self,
        session_id: &str,
        language: Language,
        user: Message,
        assistant: Message
    ) -> Result<(), Box<dyn Error + Send + Sync>> {
        let _guard = self.lock.lock().await;

        let mut session = self
            .read_session(session_id)?
            .unwrap_or_else(|| {
                ConversationSession::new(session_id, &title_from_message(&user.content), language)
            });
        session.append(user);
        session.append(assistant);
        self.write_session(&session)
    }

    async fn get(
        &self,
        session_id: &str
    ) -> Result<Option<ConversationSession>, Box<dyn Error + Send + Sync>> {
        let _guard = self.lock.lock().await;
        self.read_session(session_id)
    }

    async fn list(&self) -> Result<Vec<SessionSummary>, Box<dyn Error + Send + Sync>> {
        let _guard = self.lock.lock().await;

        if !self.dir.exists() {
            return Ok(Vec::new());
        }

        let mut summaries = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }

            let bytes = match fs::read(&path) {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!("Skipping unreadable session file {}: {}", path.display(), e);
                    continue;
                }
            };
            match serde_json::from_slice::<ConversationSession>(&bytes) {
                Ok(session) => summaries.push(session.summary()),
                Err(e) => warn!("Skipping corrupt session file {}: {}", path.display(), e),
            }
        }

        summaries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(summaries)
    }

    async fn delete(&self, session_id: &str) -> Result<bool, Box<dyn Error + Send + Sync>> {
        let _guard = self.lock.lock().await;

        let path = self.path_for(session_id);
        if !path.exists() {
            return Ok(false);
        }
        fs::remove_file(&path)?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::chat::{ DocumentSource, TokenUsage };
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> FileSessionStore {
        FileSessionStore::new(dir.path().join("sessions"))
    }

    fn turn(question: &str) -> (Message, Message) {
        let usage = TokenUsage {
            prompt_tokens: 10,
            completion_tokens: 20,
            total_tokens: 30,
            estimated_cost: 0.0001,
        };
        (
            Message::user(question),
            Message::assistant("Pin the muslin along the grain first.", Vec::<DocumentSource>::new(), usage),
        )
    }

    #[tokio::test]
    async fn first_turn_creates_the_session_with_a_title() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        let (user, assistant) = turn("How do I start draping a bodice?");
        store.append_turn("visitor-1", Language::En, user, assistant).await.unwrap();

        let session = store.get("visitor-1").await.unwrap().unwrap();
        assert_eq!(session.title, "How do I start draping a bodice?");
        assert_eq!(session.messages.len(), 2);
        assert_eq!(session.total_tokens, 30);
    }

    #[tokio::test]
    async fn later_turns_extend_the_same_file() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        let (user, assistant) = turn("First question?");
        store.append_turn("visitor-1", Language::De, user, assistant).await.unwrap();
        let (user, assistant) = turn("Second question?");
        store.append_turn("visitor-1", Language::De, user, assistant).await.unwrap();

        let session = store.get("visitor-1").await.unwrap().unwrap();
        assert_eq!(session.messages.len(), 4);
        assert_eq!(session.title, "First question?");
        assert_eq!(session.total_tokens, 60);
    }

    #[tokio::test]
    async fn list_skips_corrupt_files_and_sorts_by_activity() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        let (user, assistant) = turn("Older session?");
        store.append_turn("older", Language::De, user, assistant).await.unwrap();
        let (user, assistant) = turn("Newer session?");
        store.append_turn("newer", Language::De, user, assistant).await.unwrap();

        fs::write(dir.path().join("sessions").join("broken.json"), b"not json").unwrap();

        let listed = store.list().await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, "newer");
    }

    #[tokio::test]
    async fn delete_reports_whether_the_session_existed() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        let (user, assistant) = turn("Hello?");
        store.append_turn("visitor-1", Language::De, user, assistant).await.unwrap();

        assert!(store.delete("visitor-1").await.unwrap());
        assert!(store.get("visitor-1").await.unwrap().is_none());
        assert!(!store.delete("visitor-1").await.unwrap());
    }
}
