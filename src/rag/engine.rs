use crate::llm::embedding::EmbeddingClient;
use crate::models::chat::DocumentSource;
use crate::vector::{ ScoredChunk, VectorStore };

use log::info;

use std::{ error::Error as StdError, sync::Arc };
use std::fmt;

/// Upper bound on the excerpt carried back to the client per source.
pub const EXCERPT_CHARS: usize = 200;

#[derive(Debug)]
pub struct RagEngineError(pub String);

impl fmt::Display for RagEngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RagEngine Error: {}", self.0)
    }
}

impl StdError for RagEngineError {}

/// Outcome of a retrieval pass: the formatted context block that goes into
/// the system prompt, and the per-chunk attributions returned to the client.
#[derive(Debug, Clone)]
pub struct Retrieval {
    pub context: String,
    pub sources: Vec<DocumentSource>,
}

impl Retrieval {
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

#[derive(Clone)]
pub struct RagEngine {
    embedding_client: Arc<dyn EmbeddingClient>,
    vector_store: Arc<dyn VectorStore>,
    limit: usize,
    score_threshold: f32,
}

impl RagEngine {
    pub fn new(
        embedding_client: Arc<dyn EmbeddingClient>,
        vector_store: Arc<dyn VectorStore>,
        limit: usize,
        score_threshold: f32
    ) -> Self {
        Self {
            embedding_client,
            vector_store,
            limit,
            score_threshold,
        }
    }

    /// Embeds the query, searches the vector store and keeps every hit at or
    /// above the score threshold. An empty result is not an error; the caller
    /// falls back to its no-context prompt.
    pub async fn retrieve(
        &self,
        query: &str
    ) -> Result<Retrieval, Box<dyn StdError + Send + Sync>> {
        let embedding = self.embedding_client
            .embed(query).await
            .map_err(|e| Box::new(RagEngineError(format!("Embedding failed: {}", e))))?;

        let hits = self.vector_store
            .query(&embedding, self.limit).await
            .map_err(|e| Box::new(RagEngineError(format!("Vector search failed: {}", e))))?;

        let candidates = hits.len();
        let kept: Vec<ScoredChunk> = hits
            .into_iter()
            .filter(|hit| hit.score >= self.score_threshold)
            .collect();

        info!(
            "Retrieval kept {} of {} hits (threshold {:.2})",
            kept.len(),
            candidates,
            self.score_threshold
        );

        let context = Self::format_context(&kept);
        let sources = kept.iter().map(source_from_hit).collect();

        Ok(Retrieval { context, sources })
    }

    /// Renders the kept chunks as a numbered block for the system prompt.
    fn format_context(hits: &[ScoredChunk]) -> String {
        if hits.is_empty() {
            return String::new();
        }

        let mut context = String::new();
        for (position, hit) in hits.iter().enumerate() {
            context.push_str(
                &format!(
                    "[{}] Course {}, Module {}: {} (relevance {:.2})\n",
                    position + 1,
                    hit.metadata.course_number,
                    hit.metadata.module_number,
                    hit.metadata.title,
                    hit.score
                )
            );
            context.push_str(hit.document.trim());
            context.push_str("\n\n");
        }

        context.trim_end().to_string()
    }
}

fn source_from_hit(hit: &ScoredChunk) -> DocumentSource {
    DocumentSource {
        source_id: hit.metadata.source_id.clone(),
        course_number: hit.metadata.course_number,
        module_number: hit.metadata.module_number,
        title: hit.metadata.title.clone(),
        excerpt: excerpt_of(&hit.document, EXCERPT_CHARS),
        score: hit.score,
    }
}

/// First `max_chars` characters of the text, cut on a char boundary with a
/// trailing ellipsis when anything was dropped.
pub fn excerpt_of(text: &str, max_chars: usize) -> String {
    let trimmed = text.trim();
    if trimmed.chars().count() <= max_chars {
        return trimmed.to_string();
    }
    let cut: String = trimmed.chars().take(max_chars).collect();
    format!("{}...", cut.trim_end())
}
