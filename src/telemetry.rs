//! JSON-lines interaction log. One dated file per record kind, one record
//! per line, so the files can be tailed and post-processed without tooling.

use crate::cli::Args;

use chrono::{ DateTime, Utc };
use log::warn;
use serde::{ Serialize, Deserialize };

use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatLogRecord {
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub language: String,
    pub provider: String,
    pub model: String,
    pub message_chars: usize,
    pub response_chars: usize,
    pub source_count: usize,
    pub total_tokens: u32,
    pub estimated_cost: f64,
    pub processing_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KnowledgeLogRecord {
    pub timestamp: DateTime<Utc>,
    pub action: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_id: Option<String>,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backup_id: Option<String>,
    pub chunks_added: usize,
    pub chunks_removed: usize,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Appends interaction records without ever failing the request that
/// produced them; a full disk degrades to a warning.
pub struct InteractionLogger {
    dir: PathBuf,
    enabled: bool,
}

impl InteractionLogger {
    pub fn new(dir: PathBuf, enabled: bool) -> Self {
        Self { dir, enabled }
    }

    pub fn from_args(args: &Args) -> Self {
        Self::new(PathBuf::from(&args.log_dir), !args.disable_interaction_log)
    }

    pub async fn log_chat(&self, record: ChatLogRecord) {
        self.append("chat", serde_json::to_string(&record)).await;
    }

    pub async fn log_knowledge(&self, record: KnowledgeLogRecord) {
        self.append("knowledge", serde_json::to_string(&record)).await;
    }

    async fn append(&self, prefix: &str, line: Result<String, serde_json::Error>) {
        if !self.enabled {
            return;
        }

        let line = match line {
            Ok(line) => line,
            Err(e) => {
                warn!("Interaction record could not be serialized: {}", e);
                return;
            }
        };

        let dir = self.dir.clone();
        let path = self.dir.join(format!("{}-{}.jsonl", prefix, Utc::now().format("%Y-%m-%d")));
        let appended = tokio::task::spawn_blocking(move || {
            std::fs::create_dir_all(&dir)?;
            let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
            writeln!(file, "{}", line)
        }).await;

        match appended {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Interaction log append failed: {}", e),
            Err(e) => warn!("Interaction log task failed: {}", e),
        }
    }
}
