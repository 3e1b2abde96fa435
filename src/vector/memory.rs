use async_trait::async_trait;
use std::collections::HashMap;
use std::error::Error as StdError;
use tokio::sync::RwLock;

use super::{ScoredChunk, VectorRecord, VectorStore};

/// Process-local store with exact cosine search. Used by tests and for
/// running the service without a ChromaDB instance; contents are lost on
/// shutdown.
#[derive(Default)]
pub struct MemoryVectorStore {
    records: RwLock<HashMap<String, VectorRecord>>,
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

impl MemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VectorStore for MemoryVectorStore {
    async fn ensure_ready(&self) -> Result<(), Box<dyn StdError + Send + Sync>> {
        Ok(())
    }

    async fn upsert(&self, records: &[VectorRecord]) -> Result<(), Box<dyn StdError + Send + Sync>> {
        let mut guard = self.records.write().await;
        for record in records {
            guard.insert(record.id.clone(), record.clone());
        }
        Ok(())
    }

    async fn delete(&self, ids: &[String]) -> Result<(), Box<dyn StdError + Send + Sync>> {
        let mut guard = self.records.write().await;
        for id in ids {
            guard.remove(id);
        }
        Ok(())
    }

    async fn query(
        &self,
        embedding: &[f32],
        limit: usize
    ) -> Result<Vec<ScoredChunk>, Box<dyn StdError + Send + Sync>> {
        let guard = self.records.read().await;
        let mut scored: Vec<ScoredChunk> = guard
            .values()
            .map(|record| ScoredChunk {
                id: record.id.clone(),
                document: record.document.clone(),
                metadata: record.metadata.clone(),
                score: cosine_similarity(embedding, &record.embedding).clamp(0.0, 1.0),
            })
            .collect();

        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(limit);
        Ok(scored)
    }

    async fn count(&self) -> Result<usize, Box<dyn StdError + Send + Sync>> {
        Ok(self.records.read().await.len())
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}
