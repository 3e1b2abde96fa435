pub mod chroma;
pub mod memory;

use async_trait::async_trait;
use log::info;
use serde::{ Serialize, Deserialize };
use std::error::Error;
use std::sync::Arc;
use crate::cli::Args;

/// Flat per-chunk metadata. Values stay scalar so every backend can store
/// them verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub source_id: String,
    pub course_number: u32,
    pub module_number: u32,
    pub title: String,
    pub chunk_index: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorRecord {
    pub id: String,
    pub embedding: Vec<f32>,
    pub document: String,
    pub metadata: ChunkMetadata,
}

/// A query hit with its relevance score, already mapped to `[0, 1]` where
/// 1 is an exact match.
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub id: String,
    pub document: String,
    pub metadata: ChunkMetadata,
    pub score: f32,
}

#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn ensure_ready(&self) -> Result<(), Box<dyn Error + Send + Sync>>;

    async fn upsert(&self, records: &[VectorRecord]) -> Result<(), Box<dyn Error + Send + Sync>>;

    async fn delete(&self, ids: &[String]) -> Result<(), Box<dyn Error + Send + Sync>>;

    async fn query(
        &self,
        embedding: &[f32],
        limit: usize
    ) -> Result<Vec<ScoredChunk>, Box<dyn Error + Send + Sync>>;

    async fn count(&self) -> Result<usize, Box<dyn Error + Send + Sync>>;

    fn backend(&self) -> &'static str;
}

pub async fn create_vector_store(
    args: &Args
) -> Result<Arc<dyn VectorStore>, Box<dyn Error + Send + Sync>> {
    let store: Arc<dyn VectorStore> = match args.vector_type.to_lowercase().as_str() {
        "chroma" => {
            info!("Knowledge vectors will be stored in ChromaDB at {}", args.chroma_url);
            let store = chroma::ChromaVectorStore::new(args)?;
            Arc::new(store)
        }
        "memory" => {
            info!("Knowledge vectors will be stored in process memory (non-persistent)");
            Arc::new(memory::MemoryVectorStore::new())
        }
        _ => {
            return Err(
                Box::new(
                    std::io::Error::new(
                        std::io::ErrorKind::InvalidInput,
                        format!("Unsupported vector store type: {}", args.vector_type)
                    )
                )
            );
        }
    };
    store.ensure_ready().await?;
    Ok(store)
}
