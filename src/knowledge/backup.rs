use super::{ KnowledgeError, KnowledgeState };

use chrono::{ DateTime, Utc };
use log::warn;
use serde::{ Serialize, Deserialize };
use sha2::{ Digest, Sha256 };
use uuid::Uuid;

use std::fs;
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupMetadata {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub reason: String,
    pub source_count: usize,
    pub chunk_count: usize,
    pub checksum: String,
}

/// On-disk layout of one backup: the metadata header followed by the full
/// state it snapshots.
#[derive(Debug, Serialize, Deserialize)]
pub struct BackupFile {
    pub metadata: BackupMetadata,
    pub state: KnowledgeState,
}

/// Used when only the header is needed; the state field is left unparsed.
#[derive(Debug, Deserialize)]
struct BackupHeader {
    metadata: BackupMetadata,
}

pub struct BackupStore {
    dir: PathBuf,
    retention: usize,
}

impl BackupStore {
    pub fn new(dir: PathBuf, retention: usize) -> Self {
        Self { dir, retention }
    }

    pub fn create(
        &self,
        state: &KnowledgeState,
        reason: &str
    ) -> Result<BackupMetadata, KnowledgeError> {
        fs
            ::create_dir_all(&self.dir)
            .map_err(|e| {
                KnowledgeError::Persistence(format!("create {}: {}", self.dir.display(), e))
            })?;

        let now = Utc::now();
        let suffix = Uuid::new_v4().simple().to_string();
        let id = format!("backup-{}-{}", now.format("%Y%m%dT%H%M%S"), &suffix[..8]);

        let metadata = BackupMetadata {
            id: id.clone(),
            created_at: now,
            reason: reason.to_string(),
            source_count: state.sources.len(),
            chunk_count: state.chunk_count(),
            checksum: state_checksum(state)?,
        };

        let file = BackupFile { metadata: metadata.clone(), state: state.clone() };
        let bytes = serde_json
            ::to_vec_pretty(&file)
            .map_err(|e| KnowledgeError::Persistence(format!("serialize backup: {}", e)))?;
        let path = self.path_for(&id);
        fs
            ::write(&path, &bytes)
            .map_err(|e| KnowledgeError::Persistence(format!("write {}: {}", path.display(), e)))?;

        self.prune();
        Ok(metadata)
    }

    /// Newest first.
    pub fn list(&self) -> Result<Vec<BackupMetadata>, KnowledgeError> {
        Ok(
            self.entries()?
                .into_iter()
                .map(|(_, metadata)| metadata)
                .collect()
        )
    }

    /// Loads a backup and re-verifies its checksum against the state it
    /// carries. A mismatch means the file was edited or truncated since it
    /// was written.
    pub fn load(&self, id: &str) -> Result<BackupFile, KnowledgeError> {
        if !valid_backup_id(id) {
            return Err(KnowledgeError::UnknownBackup(id.to_string()));
        }

        let path = self.path_for(id);
        if !path.exists() {
            return Err(KnowledgeError::UnknownBackup(id.to_string()));
        }

        let bytes = fs
            ::read(&path)
            .map_err(|e| KnowledgeError::Persistence(format!("read {}: {}", path.display(), e)))?;
        let file: BackupFile = serde_json
            ::from_slice(&bytes)
            .map_err(|_| KnowledgeError::BackupIntegrity(id.to_string()))?;

        if state_checksum(&file.state)? != file.metadata.checksum {
            return Err(KnowledgeError::BackupIntegrity(id.to_string()));
        }
        Ok(file)
    }

    fn path_for(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", id))
    }

    fn entries(&self) -> Result<Vec<(PathBuf, BackupMetadata)>, KnowledgeError> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }

        let dir = fs
            ::read_dir(&self.dir)
            .map_err(|e| {
                KnowledgeError::Persistence(format!("read {}: {}", self.dir.display(), e))
            })?;

        let mut entries = Vec::new();
        for entry in dir {
            let entry = entry.map_err(|e| {
                KnowledgeError::Persistence(format!("read {}: {}", self.dir.display(), e))
            })?;
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }

            let bytes = match fs::read(&path) {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!("Skipping unreadable backup {}: {}", path.display(), e);
                    continue;
                }
            };
            match serde_json::from_slice::<BackupHeader>(&bytes) {
                Ok(header) => entries.push((path, header.metadata)),
                Err(e) => warn!("Skipping corrupt backup {}: {}", path.display(), e),
            }
        }

        entries.sort_by(|(_, a), (_, b)| (b.created_at, &b.id).cmp(&(a.created_at, &a.id)));
        Ok(entries)
    }

    /// Deletes backups beyond the retention window, oldest first. Pruning
    /// failures are logged and never fail the mutation that triggered them.
    fn prune(&self) {
        let entries = match self.entries() {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Backup pruning skipped: {}", e);
                return;
            }
        };

        for (path, metadata) in entries.into_iter().skip(self.retention) {
            if let Err(e) = fs::remove_file(&path) {
                warn!("Could not prune backup '{}': {}", metadata.id, e);
            }
        }
    }
}

fn valid_backup_id(id: &str) -> bool {
    !id.is_empty() &&
        id.len() <= 80 &&
        id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
}

pub fn state_checksum(state: &KnowledgeState) -> Result<String, KnowledgeError> {
    let bytes = serde_json
        ::to_vec(state)
        .map_err(|e| {
            KnowledgeError::Persistence(format!("serialize state for checksum: {}", e))
        })?;
    Ok(hex::encode(Sha256::digest(&bytes)))
}
