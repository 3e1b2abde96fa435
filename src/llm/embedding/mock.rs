use async_trait::async_trait;
use std::error::Error as StdError;

use super::super::ProviderConfig;
use super::EmbeddingClient;

const DIMENSION: usize = 64;

/// Deterministic offline embedder: a hashed bag-of-words vector, L2
/// normalized. Texts sharing vocabulary land close together under cosine
/// similarity, which is enough for local runs and the test suite.
pub struct MockEmbeddingClient {
    model: String,
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for byte in bytes {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

pub fn hashed_embedding(text: &str) -> Vec<f32> {
    let mut vector = vec![0.0f32; DIMENSION];
    for word in text.split(|c: char| !c.is_alphanumeric()) {
        if word.is_empty() {
            continue;
        }
        let lowered = word.to_lowercase();
        let bucket = (fnv1a(lowered.as_bytes()) % (DIMENSION as u64)) as usize;
        vector[bucket] += 1.0;
    }

    let norm = vector
        .iter()
        .map(|v| v * v)
        .sum::<f32>()
        .sqrt();
    if norm > 0.0 {
        for value in vector.iter_mut() {
            *value /= norm;
        }
    }
    vector
}

impl MockEmbeddingClient {
    pub fn new(model: Option<String>) -> Self {
        Self {
            model: model.unwrap_or_else(|| "mock-hash-64".to_string()),
        }
    }

    pub fn from_config(config: &ProviderConfig) -> Self {
        Self::new(config.embedding_model.clone())
    }
}

#[async_trait]
impl EmbeddingClient for MockEmbeddingClient {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, Box<dyn StdError + Send + Sync>> {
        Ok(hashed_embedding(text))
    }

    async fn embed_batch(
        &self,
        texts: &[String]
    ) -> Result<Vec<Vec<f32>>, Box<dyn StdError + Send + Sync>> {
        Ok(texts.iter().map(|text| hashed_embedding(text)).collect())
    }

    fn model(&self) -> String {
        self.model.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cosine(a: &[f32], b: &[f32]) -> f32 {
        a.iter()
            .zip(b.iter())
            .map(|(x, y)| x * y)
            .sum()
    }

    #[test]
    fn identical_texts_embed_identically() {
        let a = hashed_embedding("Moulage am Stoff drapieren");
        let b = hashed_embedding("Moulage am Stoff drapieren");
        assert_eq!(a, b);
        assert!((cosine(&a, &b) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn shared_vocabulary_scores_higher_than_disjoint() {
        let chunk = hashed_embedding("Der Grundschnitt wird am Schnittpapier konstruiert");
        let related = hashed_embedding("Wie wird der Grundschnitt konstruiert?");
        let unrelated = hashed_embedding("completely different topic entirely");
        assert!(cosine(&chunk, &related) > cosine(&chunk, &unrelated));
    }

    #[test]
    fn empty_text_embeds_to_zero_vector() {
        let empty = hashed_embedding("   ");
        assert_eq!(empty.len(), DIMENSION);
        assert!(empty.iter().all(|v| *v == 0.0));
    }
}
