use async_trait::async_trait;
use reqwest::{Client as HttpClient, header::{HeaderMap, HeaderValue, CONTENT_TYPE, AUTHORIZATION}};
use serde::{Deserialize, Serialize};
use std::error::Error as StdError;

use super::super::ProviderConfig;
use super::EmbeddingClient;

pub struct OpenAIEmbeddingClient {
    http: HttpClient,
    model: String,
    base_url: String,
}

#[derive(Serialize)]
struct EmbeddingRequest {
    model: String,
    input: Vec<String>,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingRow>,
}

#[derive(Deserialize)]
struct EmbeddingRow {
    index: usize,
    embedding: Vec<f32>,
}

impl OpenAIEmbeddingClient {
    pub fn new(
        api_key: String,
        model: Option<String>,
        base_url: Option<String>
    ) -> Result<Self, Box<dyn StdError + Send + Sync>> {
        let model_name = model.unwrap_or_else(|| "text-embedding-3-small".to_string());
        let api_url = base_url.unwrap_or_else(|| "https://api.openai.com".to_string());

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", api_key))
                .map_err(|e| format!("Invalid API key format: {}", e))?
        );

        let http = HttpClient::builder()
            .default_headers(headers)
            .build()
            .map_err(|e| Box::new(e) as Box<dyn StdError + Send + Sync>)?;

        Ok(Self {
            http,
            model: model_name,
            base_url: api_url,
        })
    }

    pub fn from_config(config: &ProviderConfig) -> Result<Self, Box<dyn StdError + Send + Sync>> {
        let api_key = config.api_key
            .clone()
            .ok_or_else(|| "OpenAI API key is required for OpenAIEmbeddingClient".to_string())?;

        Self::new(api_key, config.embedding_model.clone(), config.base_url.clone())
    }
}

#[async_trait]
impl EmbeddingClient for OpenAIEmbeddingClient {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, Box<dyn StdError + Send + Sync>> {
        let mut embeddings = self.embed_batch(&[text.to_string()]).await?;
        embeddings
            .pop()
            .ok_or_else(|| "OpenAI embedding generation returned no results".to_string().into())
    }

    async fn embed_batch(
        &self,
        texts: &[String]
    ) -> Result<Vec<Vec<f32>>, Box<dyn StdError + Send + Sync>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let url = format!("{}/v1/embeddings", self.base_url.trim_end_matches('/'));
        let req = EmbeddingRequest {
            model: self.model.clone(),
            input: texts.to_vec(),
        };

        let resp = self.http.post(&url)
            .json(&req)
            .send()
            .await?
            .error_for_status()?
            .json::<EmbeddingResponse>()
            .await?;

        if resp.data.len() != texts.len() {
            return Err(
                format!(
                    "OpenAI returned {} embeddings for {} inputs",
                    resp.data.len(),
                    texts.len()
                ).into()
            );
        }

        // Rows carry their input index; order them explicitly.
        let mut rows = resp.data;
        rows.sort_by_key(|row| row.index);
        Ok(rows.into_iter().map(|row| row.embedding).collect())
    }

    fn model(&self) -> String {
        self.model.clone()
    }
}
