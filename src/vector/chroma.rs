use async_trait::async_trait;
use log::info;
use reqwest::{Client as HttpClient, header::{HeaderMap, HeaderValue, CONTENT_TYPE}};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::error::Error as StdError;
use tokio::sync::RwLock;
use url::Url;

use super::{ChunkMetadata, ScoredChunk, VectorRecord, VectorStore};
use crate::cli::Args;

/// ChromaDB backend speaking the v2 REST API. The collection is resolved
/// once via get-or-create and its id cached for the tenant/database pair.
pub struct ChromaVectorStore {
    http: HttpClient,
    base_url: String,
    tenant: String,
    database: String,
    collection_name: String,
    collection_id: RwLock<Option<String>>,
}

#[derive(Deserialize)]
struct ChromaCollection {
    id: String,
}

#[derive(Serialize)]
struct ChromaUpsertRequest {
    ids: Vec<String>,
    embeddings: Vec<Vec<f32>>,
    documents: Vec<String>,
    metadatas: Vec<ChunkMetadata>,
}

#[derive(Serialize)]
struct ChromaQueryRequest {
    query_embeddings: Vec<Vec<f32>>,
    n_results: usize,
    include: Vec<&'static str>,
}

#[derive(Deserialize)]
struct ChromaQueryResponse {
    ids: Vec<Vec<String>>,
    #[serde(default)]
    documents: Option<Vec<Vec<Option<String>>>>,
    #[serde(default)]
    metadatas: Option<Vec<Vec<Option<ChunkMetadata>>>>,
    #[serde(default)]
    distances: Option<Vec<Vec<Option<f32>>>>,
}

/// Chroma reports cosine distance; the service works with relevance scores.
fn distance_to_score(distance: f32) -> f32 {
    (1.0 - distance).clamp(0.0, 1.0)
}

fn parse_query_response(resp: ChromaQueryResponse) -> Vec<ScoredChunk> {
    let Some(ids) = resp.ids.into_iter().next() else {
        return Vec::new();
    };
    let documents = resp.documents.and_then(|d| d.into_iter().next()).unwrap_or_default();
    let metadatas = resp.metadatas.and_then(|m| m.into_iter().next()).unwrap_or_default();
    let distances = resp.distances.and_then(|d| d.into_iter().next()).unwrap_or_default();

    let mut chunks = Vec::with_capacity(ids.len());
    for (position, id) in ids.into_iter().enumerate() {
        let Some(metadata) = metadatas.get(position).cloned().flatten() else {
            continue;
        };
        let document = documents
            .get(position)
            .cloned()
            .flatten()
            .unwrap_or_default();
        let distance = distances
            .get(position)
            .copied()
            .flatten()
            .unwrap_or(1.0);
        chunks.push(ScoredChunk {
            id,
            document,
            metadata,
            score: distance_to_score(distance),
        });
    }
    chunks
}

impl ChromaVectorStore {
    pub fn new(args: &Args) -> Result<Self, Box<dyn StdError + Send + Sync>> {
        Url::parse(&args.chroma_url).map_err(|e|
            format!("Invalid ChromaDB URL '{}': {}", args.chroma_url, e)
        )?;

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if !args.chroma_api_key.is_empty() {
            headers.insert(
                "X-Chroma-Token",
                HeaderValue::from_str(&args.chroma_api_key)
                    .map_err(|e| format!("Invalid ChromaDB API key format: {}", e))?
            );
        }

        let http = HttpClient::builder()
            .default_headers(headers)
            .build()
            .map_err(|e| Box::new(e) as Box<dyn StdError + Send + Sync>)?;

        Ok(Self {
            http,
            base_url: args.chroma_url.trim_end_matches('/').to_string(),
            tenant: args.chroma_tenant.clone(),
            database: args.chroma_database.clone(),
            collection_name: args.collection.clone(),
            collection_id: RwLock::new(None),
        })
    }

    fn collections_url(&self) -> String {
        format!(
            "{}/api/v2/tenants/{}/databases/{}/collections",
            self.base_url,
            self.tenant,
            self.database
        )
    }

    async fn collection_id(&self) -> Result<String, Box<dyn StdError + Send + Sync>> {
        if let Some(id) = self.collection_id.read().await.clone() {
            return Ok(id);
        }

        let resp = self.http.post(self.collections_url())
            .json(
                &json!({
                    "name": self.collection_name,
                    "get_or_create": true,
                    "configuration": { "hnsw": { "space": "cosine" } },
                })
            )
            .send()
            .await?
            .error_for_status()?
            .json::<ChromaCollection>()
            .await?;

        info!(
            "ChromaDB collection '{}' ready (id {})",
            self.collection_name,
            resp.id
        );
        let mut cached = self.collection_id.write().await;
        *cached = Some(resp.id.clone());
        Ok(resp.id)
    }
}

#[async_trait]
impl VectorStore for ChromaVectorStore {
    async fn ensure_ready(&self) -> Result<(), Box<dyn StdError + Send + Sync>> {
        self.collection_id().await?;
        Ok(())
    }

    async fn upsert(&self, records: &[VectorRecord]) -> Result<(), Box<dyn StdError + Send + Sync>> {
        if records.is_empty() {
            return Ok(());
        }
        let collection = self.collection_id().await?;
        let req = ChromaUpsertRequest {
            ids: records.iter().map(|r| r.id.clone()).collect(),
            embeddings: records.iter().map(|r| r.embedding.clone()).collect(),
            documents: records.iter().map(|r| r.document.clone()).collect(),
            metadatas: records.iter().map(|r| r.metadata.clone()).collect(),
        };

        self.http.post(format!("{}/{}/upsert", self.collections_url(), collection))
            .json(&req)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn delete(&self, ids: &[String]) -> Result<(), Box<dyn StdError + Send + Sync>> {
        if ids.is_empty() {
            return Ok(());
        }
        let collection = self.collection_id().await?;

        self.http.post(format!("{}/{}/delete", self.collections_url(), collection))
            .json(&json!({ "ids": ids }))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn query(
        &self,
        embedding: &[f32],
        limit: usize
    ) -> Result<Vec<ScoredChunk>, Box<dyn StdError + Send + Sync>> {
        let collection = self.collection_id().await?;
        let req = ChromaQueryRequest {
            query_embeddings: vec![embedding.to_vec()],
            n_results: limit.max(1),
            include: vec!["documents", "metadatas", "distances"],
        };

        let resp = self.http.post(format!("{}/{}/query", self.collections_url(), collection))
            .json(&req)
            .send()
            .await?
            .error_for_status()?
            .json::<ChromaQueryResponse>()
            .await?;

        Ok(parse_query_response(resp))
    }

    async fn count(&self) -> Result<usize, Box<dyn StdError + Send + Sync>> {
        let collection = self.collection_id().await?;

        let count = self.http.get(format!("{}/{}/count", self.collections_url(), collection))
            .send()
            .await?
            .error_for_status()?
            .json::<usize>()
            .await?;
        Ok(count)
    }

    fn backend(&self) -> &'static str {
        "chroma"
    }
}
