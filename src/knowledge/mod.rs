pub mod backup;
pub mod security;

use crate::cli::Args;
use crate::llm::embedding::EmbeddingClient;
use crate::models::api::UpdatePayload;
use crate::rag::chunker::{ chunk_id, split_into_chunks, ChunkerConfig };
use crate::vector::{ ChunkMetadata, VectorRecord, VectorStore };
use backup::{ BackupMetadata, BackupStore };
use security::SecurityValidator;

use chrono::{ DateTime, Utc };
use log::info;
use serde::{ Serialize, Deserialize };
use thiserror::Error;
use tokio::sync::RwLock;

use std::collections::BTreeMap;
use std::fs;
use std::path::{ Path, PathBuf };
use std::sync::Arc;
use std::sync::atomic::{ AtomicBool, Ordering };
use std::time::Instant;

/// One embedded chunk of a source, kept alongside its vector so a restore
/// or a store rebuild never has to re-embed anything.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredChunk {
    pub id: String,
    pub text: String,
    pub embedding: Vec<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceRecord {
    pub id: String,
    pub title: String,
    pub course_number: u32,
    pub module_number: u32,
    pub tags: Vec<String>,
    pub added_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub chunks: Vec<StoredChunk>,
}

/// The whole knowledge base. Sources live in a BTreeMap so serialization is
/// deterministic and backup checksums stay comparable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KnowledgeState {
    pub sources: BTreeMap<String, SourceRecord>,
    pub last_updated: Option<DateTime<Utc>>,
}

impl KnowledgeState {
    pub fn chunk_count(&self) -> usize {
        self.sources
            .values()
            .map(|source| source.chunks.len())
            .sum()
    }

    fn all_chunk_ids(&self) -> Vec<String> {
        self.sources
            .values()
            .flat_map(|source| source.chunks.iter().map(|chunk| chunk.id.clone()))
            .collect()
    }
}

#[derive(Debug, Error)]
pub enum KnowledgeError {
    #[error("submission failed validation")]
    Validation(Vec<String>),
    #[error("submission was rejected by security screening")]
    Security(Vec<String>),
    #[error("another knowledge update is already in progress")]
    UpdateInProgress,
    #[error("no source with id '{id}' exists")]
    UnknownSource {
        id: String,
        suggestion: Option<String>,
    },
    #[error("a source with id '{0}' already exists")]
    DuplicateSource(String),
    #[error("no backup with id '{0}' exists")]
    UnknownBackup(String),
    #[error("backup '{0}' failed its integrity check")]
    BackupIntegrity(String),
    #[error("embedding failed: {0}")]
    Embedding(String),
    #[error("vector store operation failed: {0}")]
    Store(String),
    #[error("knowledge state could not be persisted: {0}")]
    Persistence(String),
}

/// What a completed mutation changed. Returned as the `data` field of the
/// knowledge-update response.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateReport {
    pub action: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_id: Option<String>,
    pub backup_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub restored_from: Option<String>,
    pub chunks_added: usize,
    pub chunks_removed: usize,
    pub vectors_updated: usize,
    pub duration_ms: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KnowledgeStatus {
    pub source_count: usize,
    pub chunk_count: usize,
    pub vector_count: usize,
    pub backend: String,
    pub update_in_progress: bool,
    pub last_updated: Option<DateTime<Utc>>,
}

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseBreakdown {
    pub sources: usize,
    pub chunks: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KnowledgeStatistics {
    pub source_count: usize,
    pub chunk_count: usize,
    pub total_content_chars: usize,
    pub average_chunks_per_source: f64,
    pub courses: BTreeMap<u32, CourseBreakdown>,
    pub last_updated: Option<DateTime<Utc>>,
}

pub struct KnowledgeOptions {
    pub state_path: PathBuf,
    pub backup_dir: PathBuf,
    pub backup_retention: usize,
    pub max_content_chars: usize,
    pub chunker: ChunkerConfig,
}

impl KnowledgeOptions {
    pub fn from_args(args: &Args) -> Self {
        let data_dir = PathBuf::from(&args.data_dir);
        Self {
            state_path: data_dir.join("knowledge.json"),
            backup_dir: data_dir.join("backups"),
            backup_retention: args.backup_retention,
            max_content_chars: args.knowledge_max_content_chars,
            chunker: ChunkerConfig {
                max_chars: args.chunk_max_chars,
                overlap_chars: args.chunk_overlap,
            },
        }
    }
}

/// Owns the knowledge base: every mutation takes a backup first, runs behind
/// a single update flag and leaves the vector store in step with the
/// persisted state.
pub struct KnowledgeService {
    state: RwLock<KnowledgeState>,
    state_path: PathBuf,
    store: Arc<dyn VectorStore>,
    embedding: Arc<dyn EmbeddingClient>,
    backups: BackupStore,
    validator: SecurityValidator,
    chunker: ChunkerConfig,
    updating: AtomicBool,
}

impl KnowledgeService {
    pub async fn new(
        options: KnowledgeOptions,
        store: Arc<dyn VectorStore>,
        embedding: Arc<dyn EmbeddingClient>
    ) -> Result<Self, KnowledgeError> {
        let state = load_state_file(&options.state_path)?;
        let service = Self {
            state: RwLock::new(state),
            state_path: options.state_path,
            store,
            embedding,
            backups: BackupStore::new(options.backup_dir, options.backup_retention),
            validator: SecurityValidator::new(options.max_content_chars),
            chunker: options.chunker,
            updating: AtomicBool::new(false),
        };
        service.sync_store().await?;
        Ok(service)
    }

    pub fn validator(&self) -> &SecurityValidator {
        &self.validator
    }

    /// Re-seeds an empty vector store from the persisted chunks. Covers the
    /// memory backend after a restart; a populated store is left alone.
    async fn sync_store(&self) -> Result<(), KnowledgeError> {
        let state = self.state.read().await;
        if state.sources.is_empty() {
            return Ok(());
        }

        let vector_count = self.store
            .count().await
            .map_err(|e| KnowledgeError::Store(e.to_string()))?;
        if vector_count > 0 {
            return Ok(());
        }

        let records: Vec<VectorRecord> = state.sources
            .values()
            .flat_map(records_for)
            .collect();
        info!("Vector store is empty; reindexing {} persisted chunks", records.len());
        self.store
            .upsert(&records).await
            .map_err(|e| KnowledgeError::Store(e.to_string()))
    }

    pub async fn add_source(&self, payload: &UpdatePayload) -> Result<UpdateReport, KnowledgeError> {
        let started = Instant::now();
        self.check_submission(payload)?;

        let _guard = self.begin_update()?;

        let backup = {
            let state = self.state.read().await;
            if state.sources.contains_key(&payload.id) {
                return Err(KnowledgeError::DuplicateSource(payload.id.clone()));
            }
            self.backups.create(&state, &format!("before add of '{}'", payload.id))?
        };

        let chunks = self.embed_source(payload).await?;
        let now = Utc::now();
        let record = SourceRecord {
            id: payload.id.clone(),
            title: payload.title.clone(),
            course_number: payload.course_number,
            module_number: payload.module_number,
            tags: payload.tags.clone(),
            added_at: now,
            updated_at: now,
            chunks,
        };

        self.store
            .upsert(&records_for(&record)).await
            .map_err(|e| KnowledgeError::Store(e.to_string()))?;

        let chunks_added = record.chunks.len();
        {
            let mut state = self.state.write().await;
            state.sources.insert(payload.id.clone(), record);
            state.last_updated = Some(now);
            save_state_file(&self.state_path, &state)?;
        }

        info!("Added source '{}' with {} chunks", payload.id, chunks_added);
        Ok(UpdateReport {
            action: "add".to_string(),
            source_id: Some(payload.id.clone()),
            backup_id: backup.id,
            restored_from: None,
            chunks_added,
            chunks_removed: 0,
            vectors_updated: chunks_added,
            duration_ms: started.elapsed().as_millis() as u64,
        })
    }

    pub async fn update_source(
        &self,
        payload: &UpdatePayload
    ) -> Result<UpdateReport, KnowledgeError> {
        let started = Instant::now();
        self.check_submission(payload)?;

        let _guard = self.begin_update()?;

        let (backup, old_ids, added_at) = {
            let state = self.state.read().await;
            let existing = state.sources
                .get(&payload.id)
                .ok_or_else(|| unknown_source(&payload.id, &state))?;
            let backup = self.backups.create(
                &state,
                &format!("before update of '{}'", payload.id)
            )?;
            let old_ids: Vec<String> = existing.chunks
                .iter()
                .map(|chunk| chunk.id.clone())
                .collect();
            (backup, old_ids, existing.added_at)
        };

        let chunks = self.embed_source(payload).await?;
        let now = Utc::now();
        let record = SourceRecord {
            id: payload.id.clone(),
            title: payload.title.clone(),
            course_number: payload.course_number,
            module_number: payload.module_number,
            tags: payload.tags.clone(),
            added_at,
            updated_at: now,
            chunks,
        };

        self.store
            .delete(&old_ids).await
            .map_err(|e| KnowledgeError::Store(e.to_string()))?;
        self.store
            .upsert(&records_for(&record)).await
            .map_err(|e| KnowledgeError::Store(e.to_string()))?;

        let chunks_added = record.chunks.len();
        let chunks_removed = old_ids.len();
        {
            let mut state = self.state.write().await;
            state.sources.insert(payload.id.clone(), record);
            state.last_updated = Some(now);
            save_state_file(&self.state_path, &state)?;
        }

        info!(
            "Updated source '{}': {} chunks replaced by {}",
            payload.id,
            chunks_removed,
            chunks_added
        );
        Ok(UpdateReport {
            action: "update".to_string(),
            source_id: Some(payload.id.clone()),
            backup_id: backup.id,
            restored_from: None,
            chunks_added,
            chunks_removed,
            vectors_updated: chunks_added + chunks_removed,
            duration_ms: started.elapsed().as_millis() as u64,
        })
    }

    pub async fn remove_source(&self, source_id: &str) -> Result<UpdateReport, KnowledgeError> {
        let started = Instant::now();
        if source_id.trim().is_empty() {
            return Err(KnowledgeError::Validation(vec!["sourceId must not be empty".to_string()]));
        }

        let _guard = self.begin_update()?;

        let (backup, old_ids) = {
            let state = self.state.read().await;
            let existing = state.sources
                .get(source_id)
                .ok_or_else(|| unknown_source(source_id, &state))?;
            let backup = self.backups.create(
                &state,
                &format!("before remove of '{}'", source_id)
            )?;
            let old_ids: Vec<String> = existing.chunks
                .iter()
                .map(|chunk| chunk.id.clone())
                .collect();
            (backup, old_ids)
        };

        self.store
            .delete(&old_ids).await
            .map_err(|e| KnowledgeError::Store(e.to_string()))?;

        let now = Utc::now();
        {
            let mut state = self.state.write().await;
            state.sources.remove(source_id);
            state.last_updated = Some(now);
            save_state_file(&self.state_path, &state)?;
        }

        info!("Removed source '{}' and its {} chunks", source_id, old_ids.len());
        Ok(UpdateReport {
            action: "remove".to_string(),
            source_id: Some(source_id.to_string()),
            backup_id: backup.id,
            restored_from: None,
            chunks_added: 0,
            chunks_removed: old_ids.len(),
            vectors_updated: old_ids.len(),
            duration_ms: started.elapsed().as_millis() as u64,
        })
    }

    /// Swaps the live state for a backed-up one. The current state gets its
    /// own safety backup first, so a restore is always reversible.
    pub async fn restore_backup(&self, backup_id: &str) -> Result<UpdateReport, KnowledgeError> {
        let started = Instant::now();
        if backup_id.trim().is_empty() {
            return Err(KnowledgeError::Validation(vec!["backupId must not be empty".to_string()]));
        }

        let _guard = self.begin_update()?;

        let restored = self.backups.load(backup_id)?;

        let (safety, current_ids) = {
            let state = self.state.read().await;
            let safety = self.backups.create(
                &state,
                &format!("before restore of '{}'", backup_id)
            )?;
            (safety, state.all_chunk_ids())
        };

        self.store
            .delete(&current_ids).await
            .map_err(|e| KnowledgeError::Store(e.to_string()))?;

        let records: Vec<VectorRecord> = restored.state.sources
            .values()
            .flat_map(records_for)
            .collect();
        self.store
            .upsert(&records).await
            .map_err(|e| KnowledgeError::Store(e.to_string()))?;

        let chunks_added = records.len();
        {
            let mut state = self.state.write().await;
            *state = restored.state;
            save_state_file(&self.state_path, &state)?;
        }

        info!(
            "Restored backup '{}': {} chunks replaced by {}",
            backup_id,
            current_ids.len(),
            chunks_added
        );
        Ok(UpdateReport {
            action: "restore".to_string(),
            source_id: None,
            backup_id: safety.id,
            restored_from: Some(backup_id.to_string()),
            chunks_added,
            chunks_removed: current_ids.len(),
            vectors_updated: chunks_added + current_ids.len(),
            duration_ms: started.elapsed().as_millis() as u64,
        })
    }

    pub async fn status(&self) -> Result<KnowledgeStatus, KnowledgeError> {
        let state = self.state.read().await;
        let vector_count = self.store
            .count().await
            .map_err(|e| KnowledgeError::Store(e.to_string()))?;

        Ok(KnowledgeStatus {
            source_count: state.sources.len(),
            chunk_count: state.chunk_count(),
            vector_count,
            backend: self.store.backend().to_string(),
            update_in_progress: self.updating.load(Ordering::SeqCst),
            last_updated: state.last_updated,
        })
    }

    pub fn list_backups(&self) -> Result<Vec<BackupMetadata>, KnowledgeError> {
        self.backups.list()
    }

    pub async fn statistics(&self) -> KnowledgeStatistics {
        let state = self.state.read().await;

        let mut courses: BTreeMap<u32, CourseBreakdown> = BTreeMap::new();
        let mut total_content_chars = 0;
        for source in state.sources.values() {
            let entry = courses.entry(source.course_number).or_default();
            entry.sources += 1;
            entry.chunks += source.chunks.len();
            total_content_chars += source.chunks
                .iter()
                .map(|chunk| chunk.text.chars().count())
                .sum::<usize>();
        }

        let source_count = state.sources.len();
        let chunk_count = state.chunk_count();
        let average_chunks_per_source = if source_count == 0 {
            0.0
        } else {
            (chunk_count as f64) / (source_count as f64)
        };

        KnowledgeStatistics {
            source_count,
            chunk_count,
            total_content_chars,
            average_chunks_per_source,
            courses,
            last_updated: state.last_updated,
        }
    }

    fn check_submission(&self, payload: &UpdatePayload) -> Result<(), KnowledgeError> {
        let findings = self.validator.validate_fields(payload);
        if !findings.is_empty() {
            return Err(KnowledgeError::Validation(findings));
        }
        let findings = self.validator.screen_source(payload);
        if !findings.is_empty() {
            return Err(KnowledgeError::Security(findings));
        }
        Ok(())
    }

    fn begin_update(&self) -> Result<UpdateGuard<'_>, KnowledgeError> {
        if
            self.updating
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_err()
        {
            return Err(KnowledgeError::UpdateInProgress);
        }
        Ok(UpdateGuard { flag: &self.updating })
    }

    async fn embed_source(&self, payload: &UpdatePayload) -> Result<Vec<StoredChunk>, KnowledgeError> {
        let chunks = split_into_chunks(&payload.content, &self.chunker);
        if chunks.is_empty() {
            return Err(KnowledgeError::Validation(vec!["content produced no chunks".to_string()]));
        }

        let texts: Vec<String> = chunks
            .iter()
            .map(|chunk| chunk.text.clone())
            .collect();
        let embeddings = self.embedding
            .embed_batch(&texts).await
            .map_err(|e| KnowledgeError::Embedding(e.to_string()))?;
        if embeddings.len() != chunks.len() {
            return Err(
                KnowledgeError::Embedding(
                    format!("expected {} embeddings, got {}", chunks.len(), embeddings.len())
                )
            );
        }

        Ok(
            chunks
                .into_iter()
                .zip(embeddings)
                .map(|(chunk, embedding)| StoredChunk {
                    id: chunk_id(&payload.id, chunk.index, &chunk.text),
                    text: chunk.text,
                    embedding,
                })
                .collect()
        )
    }
}

/// Clears the update flag when a mutation finishes, even on an error path.
struct UpdateGuard<'a> {
    flag: &'a AtomicBool,
}

impl Drop for UpdateGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

fn unknown_source(id: &str, state: &KnowledgeState) -> KnowledgeError {
    KnowledgeError::UnknownSource {
        id: id.to_string(),
        suggestion: suggestion_for(id, state.sources.keys()),
    }
}

/// Closest existing id by Jaro-Winkler distance, offered when a lookup
/// misses. Anything under 0.85 is too far off to suggest.
fn suggestion_for<'a>(id: &str, known: impl Iterator<Item = &'a String>) -> Option<String> {
    let mut best: Option<&String> = None;
    let mut best_score = 0.0;
    for candidate in known {
        let score = strsim::jaro_winkler(id, candidate);
        if score > best_score {
            best_score = score;
            best = Some(candidate);
        }
    }
    if best_score >= 0.85 {
        return best.cloned();
    }
    None
}

fn records_for(source: &SourceRecord) -> Vec<VectorRecord> {
    source.chunks
        .iter()
        .enumerate()
        .map(|(position, chunk)| VectorRecord {
            id: chunk.id.clone(),
            embedding: chunk.embedding.clone(),
            document: chunk.text.clone(),
            metadata: ChunkMetadata {
                source_id: source.id.clone(),
                course_number: source.course_number,
                module_number: source.module_number,
                title: source.title.clone(),
                chunk_index: position as u32,
            },
        })
        .collect()
}

fn load_state_file(path: &Path) -> Result<KnowledgeState, KnowledgeError> {
    if !path.exists() {
        return Ok(KnowledgeState::default());
    }
    let bytes = fs
        ::read(path)
        .map_err(|e| KnowledgeError::Persistence(format!("read {}: {}", path.display(), e)))?;
    serde_json
        ::from_slice(&bytes)
        .map_err(|e| KnowledgeError::Persistence(format!("parse {}: {}", path.display(), e)))
}

/// Writes through a temp file and renames so a crash mid-write never leaves
/// a truncated state on disk.
fn save_state_file(path: &Path, state: &KnowledgeState) -> Result<(), KnowledgeError> {
    if let Some(parent) = path.parent() {
        fs
            ::create_dir_all(parent)
            .map_err(|e| {
                KnowledgeError::Persistence(format!("create {}: {}", parent.display(), e))
            })?;
    }
    let bytes = serde_json
        ::to_vec_pretty(state)
        .map_err(|e| KnowledgeError::Persistence(format!("serialize state: {}", e)))?;
    let tmp = path.with_extension("json.tmp");
    fs
        ::write(&tmp, &bytes)
        .map_err(|e| KnowledgeError::Persistence(format!("write {}: {}", tmp.display(), e)))?;
    fs
        ::rename(&tmp, path)
        .map_err(|e| KnowledgeError::Persistence(format!("rename {}: {}", path.display(), e)))
}
