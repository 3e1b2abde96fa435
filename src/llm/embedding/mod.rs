pub mod openai;
pub mod mock;

use async_trait::async_trait;
use std::error::Error as StdError;
use std::sync::Arc;

use super::{ Provider, ProviderConfig };
use self::openai::OpenAIEmbeddingClient;
use self::mock::MockEmbeddingClient;

#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, Box<dyn StdError + Send + Sync>>;

    /// Embeds several texts in one request. Re-indexing a source embeds all
    /// of its chunks through this path.
    async fn embed_batch(
        &self,
        texts: &[String]
    ) -> Result<Vec<Vec<f32>>, Box<dyn StdError + Send + Sync>>;

    fn model(&self) -> String;
}

pub fn new_client(
    config: &ProviderConfig
) -> Result<Arc<dyn EmbeddingClient>, Box<dyn StdError + Send + Sync>> {
    let client: Arc<dyn EmbeddingClient> = match config.provider {
        Provider::OpenAI => {
            let specific_client = OpenAIEmbeddingClient::from_config(config)?;
            Arc::new(specific_client)
        }
        Provider::Mock => {
            let specific_client = MockEmbeddingClient::from_config(config);
            Arc::new(specific_client)
        }
        other => {
            return Err(
                format!("Provider '{}' does not offer an embedding endpoint here; use 'openai' or 'mock'", other).into()
            );
        }
    };
    Ok(client)
}
