pub mod export;
pub mod file;
pub mod memory;

use crate::cli::Args;
use crate::models::chat::{ ConversationSession, Language, Message, SessionSummary };

use async_trait::async_trait;
use log::info;

use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;

pub const MAX_SESSION_ID_CHARS: usize = 64;

/// Client-issued session ids travel in URLs and become file names, so the
/// accepted alphabet is strict.
pub fn valid_session_id(id: &str) -> bool {
    !id.is_empty() &&
        id.chars().count() <= MAX_SESSION_ID_CHARS &&
        id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Appends one exchange, creating the session on first use. A new
    /// session takes its title from the user message that opened it.
    async fn append_turn(
        &self,
        session_id: &str,
        language: Language,
        user: Message,
        assistant: Message
    ) -> Result<(), Box<dyn Error + Send + Sync>>;

    async fn get(
        &self,
        session_id: &str
    ) -> Result<Option<ConversationSession>, Box<dyn Error + Send + Sync>>;

    /// Summaries of every session, most recently active first.
    async fn list(&self) -> Result<Vec<SessionSummary>, Box<dyn Error + Send + Sync>>;

    /// Returns whether the session existed.
    async fn delete(&self, session_id: &str) -> Result<bool, Box<dyn Error + Send + Sync>>;
}

pub fn create_session_store(
    args: &Args
) -> Result<Arc<dyn SessionStore>, Box<dyn Error + Send + Sync>> {
    match args.session_store.to_lowercase().as_str() {
        "file" => {
            let dir = PathBuf::from(&args.data_dir).join("sessions");
            info!("Sessions will be stored in: {}", dir.display());
            Ok(Arc::new(file::FileSessionStore::new(dir)))
        }
        "memory" => {
            info!("Sessions will be stored in memory only");
            Ok(Arc::new(memory::MemorySessionStore::new()))
        }
        _ =>
            Err(
                Box::new(
                    std::io::Error::new(
                        std::io::ErrorKind::InvalidInput,
                        format!("Unsupported session store type: {}", args.session_store)
                    )
                )
            ),
    }
}
