use log::{ info, warn };
use std::error::Error as StdError;
use std::sync::Arc;
use thiserror::Error;

use crate::cli::Args;
use crate::config::prompt::{ self, PromptConfig };
use crate::llm::chat::{
    new_client as new_chat_client,
    prompt_chars,
    GenerationOptions,
    ModelService,
    PromptMessage,
};
use crate::llm::embedding::{ new_client as new_embedding_client, EmbeddingClient };
use crate::llm::{ parse_provider, Provider, ProviderConfig };
use crate::models::api::ModelConfigPayload;
use crate::models::chat::{ DocumentSource, Language, TokenUsage };
use crate::pricing;
use crate::rag::engine::RagEngine;
use crate::vector::VectorStore;

const MIN_TEMPERATURE: f32 = 0.0;
const MAX_TEMPERATURE: f32 = 2.0;
const MAX_COMPLETION_TOKENS: u32 = 8192;
const MAX_MODEL_NAME_CHARS: usize = 80;

#[derive(Debug, Error)]
pub enum AssistantError {
    #[error("{0}")]
    UnknownProvider(String),
    #[error("provider '{0}' has no API key configured")]
    ProviderNotConfigured(String),
    #[error("temperature must be between {MIN_TEMPERATURE} and {MAX_TEMPERATURE}, got {0}")]
    InvalidTemperature(f32),
    #[error("maxTokens must be between 1 and {MAX_COMPLETION_TOKENS}, got {0}")]
    InvalidMaxTokens(u32),
    #[error("invalid model name: '{0}'")]
    InvalidModel(String),
    #[error("retrieval failed: {0}")]
    Retrieval(String),
    #[error("prompt assembly failed: {0}")]
    Prompt(String),
    #[error("model call failed: {0}")]
    Completion(String),
}

impl AssistantError {
    /// True when the request itself was at fault rather than a backend.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            AssistantError::UnknownProvider(_) |
                AssistantError::ProviderNotConfigured(_) |
                AssistantError::InvalidTemperature(_) |
                AssistantError::InvalidMaxTokens(_) |
                AssistantError::InvalidModel(_)
        )
    }
}

/// Generation knobs for one chat turn with all defaults already applied.
#[derive(Debug, Clone)]
pub struct ResolvedModelConfig {
    pub provider: Provider,
    pub model: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
}

/// One answered chat turn, ready to be shaped into the wire response.
#[derive(Debug, Clone)]
pub struct ChatOutcome {
    pub content: String,
    pub sources: Vec<DocumentSource>,
    pub usage: TokenUsage,
    pub provider: Provider,
    pub model: String,
}

/// Ties retrieval, prompt assembly and the chat providers together. One
/// instance is shared across all requests.
#[derive(Clone)]
pub struct CourseAssistant {
    models: ModelService,
    rag: RagEngine,
    prompts: Arc<PromptConfig>,
    default_provider: Provider,
    default_model: Option<String>,
    default_temperature: f32,
    default_max_tokens: u32,
}

impl CourseAssistant {
    fn initialize_model_service(args: &Args) -> Result<ModelService, Box<dyn StdError + Send + Sync>> {
        let mut models = ModelService::new();

        if !args.openai_api_key.is_empty() {
            let config = ProviderConfig {
                provider: Provider::OpenAI,
                api_key: Some(args.openai_api_key.clone()),
                chat_model: None,
                embedding_model: None,
                base_url: args.openai_base_url.clone(),
            };
            models.register(new_chat_client(&config)?);
            info!(
                "Chat provider registered: openai, BaseURL={:?}",
                args.openai_base_url.as_deref().unwrap_or("adapter default")
            );
        }

        if !args.anthropic_api_key.is_empty() {
            let config = ProviderConfig {
                provider: Provider::Anthropic,
                api_key: Some(args.anthropic_api_key.clone()),
                chat_model: None,
                embedding_model: None,
                base_url: args.anthropic_base_url.clone(),
            };
            models.register(new_chat_client(&config)?);
            info!(
                "Chat provider registered: anthropic, BaseURL={:?}",
                args.anthropic_base_url.as_deref().unwrap_or("adapter default")
            );
        }

        if !args.gemini_api_key.is_empty() {
            let config = ProviderConfig {
                provider: Provider::Gemini,
                api_key: Some(args.gemini_api_key.clone()),
                chat_model: None,
                embedding_model: None,
                base_url: args.gemini_base_url.clone(),
            };
            models.register(new_chat_client(&config)?);
            info!(
                "Chat provider registered: gemini, BaseURL={:?}",
                args.gemini_base_url.as_deref().unwrap_or("adapter default")
            );
        }

        // The mock provider needs no key and keys the offline and test paths.
        let mock_config = ProviderConfig {
            provider: Provider::Mock,
            api_key: None,
            chat_model: None,
            embedding_model: None,
            base_url: None,
        };
        models.register(new_chat_client(&mock_config)?);

        Ok(models)
    }

    pub async fn new(
        args: &Args,
        embedding_client: Arc<dyn EmbeddingClient>,
        vector_store: Arc<dyn VectorStore>
    ) -> Result<Self, Box<dyn StdError + Send + Sync>> {
        let models = Self::initialize_model_service(args)?;

        let default_provider = parse_provider(&args.default_provider)?;
        if models.client_for(default_provider).is_none() {
            return Err(
                format!(
                    "Default provider '{}' has no API key configured; set one or pick another provider",
                    args.default_provider
                ).into()
            );
        }
        if default_provider == Provider::Mock {
            warn!("Default chat provider is 'mock'; answers are canned echoes");
        }

        let prompts = prompt::load_prompts(&args.prompts_path)?;
        let rag = RagEngine::new(
            embedding_client,
            vector_store,
            args.rag_limit,
            args.score_threshold
        );

        Ok(Self {
            models,
            rag,
            prompts,
            default_provider,
            default_model: args.default_model.clone(),
            default_temperature: args.default_temperature,
            default_max_tokens: args.default_max_tokens,
        })
    }

    /// Test constructor with the collaborators assembled by the caller.
    pub fn from_parts(
        models: ModelService,
        rag: RagEngine,
        prompts: Arc<PromptConfig>,
        default_provider: Provider,
        default_temperature: f32,
        default_max_tokens: u32
    ) -> Self {
        Self {
            models,
            rag,
            prompts,
            default_provider,
            default_model: None,
            default_temperature,
            default_max_tokens,
        }
    }

    pub fn resolve_model_config(
        &self,
        payload: Option<&ModelConfigPayload>
    ) -> Result<ResolvedModelConfig, AssistantError> {
        let provider = match payload.and_then(|p| p.provider.as_deref()) {
            Some(name) => parse_provider(name).map_err(AssistantError::UnknownProvider)?,
            None => self.default_provider,
        };

        let temperature = payload
            .and_then(|p| p.temperature)
            .unwrap_or(self.default_temperature);
        if !(MIN_TEMPERATURE..=MAX_TEMPERATURE).contains(&temperature) {
            return Err(AssistantError::InvalidTemperature(temperature));
        }

        let max_tokens = payload.and_then(|p| p.max_tokens).unwrap_or(self.default_max_tokens);
        if max_tokens == 0 || max_tokens > MAX_COMPLETION_TOKENS {
            return Err(AssistantError::InvalidMaxTokens(max_tokens));
        }

        let model = match payload.and_then(|p| p.model.clone()) {
            Some(name) => {
                if !valid_model_name(&name) {
                    return Err(AssistantError::InvalidModel(name));
                }
                Some(name)
            }
            // The configured default model only applies to its own provider.
            None if provider == self.default_provider => self.default_model.clone(),
            None => None,
        };

        Ok(ResolvedModelConfig { provider, model, temperature, max_tokens })
    }

    /// Runs a single chat turn: retrieve course material, build the prompt
    /// and call the selected provider.
    pub async fn answer(
        &self,
        message: &str,
        language: Language,
        config: &ResolvedModelConfig
    ) -> Result<ChatOutcome, AssistantError> {
        let client = self.models
            .client_for(config.provider)
            .ok_or_else(|| AssistantError::ProviderNotConfigured(config.provider.to_string()))?;

        let retrieval = self.rag
            .retrieve(message).await
            .map_err(|e| AssistantError::Retrieval(e.to_string()))?;
        if retrieval.is_empty() {
            info!("No course material matched; answering from the base prompt alone");
        }

        let system = prompt
            ::system_prompt(&self.prompts, language, &retrieval.context)
            .map_err(|e| AssistantError::Prompt(e.to_string()))?;
        let messages = vec![PromptMessage::system(system), PromptMessage::user(message)];

        let options = GenerationOptions {
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            model: config.model.clone(),
        };
        let response = client
            .complete(&messages, &options).await
            .map_err(|e| AssistantError::Completion(e.to_string()))?;

        // Providers that omit usage get a chars/4 estimate instead.
        let prompt_tokens = response.prompt_tokens
            .unwrap_or_else(|| pricing::estimate_tokens(prompt_chars(&messages)));
        let completion_tokens = response.completion_tokens
            .unwrap_or_else(|| pricing::estimate_tokens(response.content.chars().count()));
        let usage = TokenUsage {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
            estimated_cost: pricing::estimate_cost(
                &response.model,
                prompt_tokens,
                completion_tokens
            ),
        };

        Ok(ChatOutcome {
            content: response.content,
            sources: retrieval.sources,
            usage,
            provider: response.provider,
            model: response.model,
        })
    }
}

pub fn initialize_embedding_client(
    args: &Args
) -> Result<Arc<dyn EmbeddingClient>, Box<dyn StdError + Send + Sync>> {
    let provider = parse_provider(&args.embedding_provider)?;
    let api_key = if !args.embedding_api_key.is_empty() {
        Some(args.embedding_api_key.clone())
    } else if provider == Provider::OpenAI && !args.openai_api_key.is_empty() {
        Some(args.openai_api_key.clone())
    } else {
        None
    };
    let config = ProviderConfig {
        provider,
        api_key,
        chat_model: None,
        embedding_model: args.embedding_model.clone(),
        base_url: None,
    };
    let client = new_embedding_client(&config)?;
    info!(
        "Embedding client configured: Type={}, Model={:?}",
        args.embedding_provider,
        args.embedding_model.as_deref().unwrap_or("adapter default")
    );
    Ok(client)
}

/// Model names end up in provider URLs, so the charset is kept tight.
fn valid_model_name(name: &str) -> bool {
    !name.is_empty() &&
        name.chars().count() <= MAX_MODEL_NAME_CHARS &&
        name.chars().all(|c| (c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_' | ':' | '/')))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::chat::mock::MockChatClient;
    use crate::llm::embedding::mock::MockEmbeddingClient;
    use crate::vector::memory::MemoryVectorStore;
    use crate::vector::{ ChunkMetadata, VectorRecord };

    fn test_prompts() -> Arc<PromptConfig> {
        let json =
            r#"{
            "languages": {
                "de": {
                    "system": "Du bist die Kursassistenz. {context}",
                    "context_header": "Relevantes Kursmaterial:",
                    "no_context": "Es liegt kein Kursmaterial vor."
                },
                "en": {
                    "system": "You are the course assistant. {context}",
                    "context_header": "Relevant course material:",
                    "no_context": "No course material available."
                }
            }
        }"#;
        Arc::new(serde_json::from_str(json).unwrap())
    }

    async fn test_assistant() -> CourseAssistant {
        let embedding: Arc<dyn EmbeddingClient> = Arc::new(MockEmbeddingClient::new(None));
        let store: Arc<dyn VectorStore> = Arc::new(MemoryVectorStore::new());
        let record = VectorRecord {
            id: "kurs-1-drapieren:000:abcd1234".to_string(),
            embedding: embedding.embed("Moulage ist das Drapieren am Stoff").await.unwrap(),
            document: "Moulage ist das Drapieren am Stoff".to_string(),
            metadata: ChunkMetadata {
                source_id: "kurs-1-drapieren".to_string(),
                course_number: 1,
                module_number: 2,
                title: "Drapieren".to_string(),
                chunk_index: 0,
            },
        };
        store.upsert(&[record]).await.unwrap();

        let mut models = ModelService::new();
        models.register(Arc::new(MockChatClient::new(None)));
        let rag = RagEngine::new(embedding, store, 3, 0.0);
        CourseAssistant::from_parts(models, rag, test_prompts(), Provider::Mock, 0.7, 256)
    }

    #[tokio::test]
    async fn answer_carries_sources_and_usage() {
        let assistant = test_assistant().await;
        let config = assistant.resolve_model_config(None).unwrap();

        let outcome = assistant
            .answer("Was ist Moulage?", Language::De, &config).await
            .unwrap();
        assert!(outcome.content.starts_with("Mock answer to:"));
        assert_eq!(outcome.provider, Provider::Mock);
        assert_eq!(outcome.sources.len(), 1);
        assert_eq!(outcome.sources[0].source_id, "kurs-1-drapieren");
        assert!(outcome.usage.total_tokens > 0);
    }

    #[tokio::test]
    async fn resolve_applies_defaults_and_overrides() {
        let assistant = test_assistant().await;

        let resolved = assistant.resolve_model_config(None).unwrap();
        assert_eq!(resolved.provider, Provider::Mock);
        assert!((resolved.temperature - 0.7).abs() < f32::EPSILON);
        assert_eq!(resolved.max_tokens, 256);
        assert!(resolved.model.is_none());

        let payload = ModelConfigPayload {
            provider: Some("mock".to_string()),
            model: Some("mock-echo-2".to_string()),
            temperature: Some(0.2),
            max_tokens: Some(512),
        };
        let resolved = assistant.resolve_model_config(Some(&payload)).unwrap();
        assert_eq!(resolved.model.as_deref(), Some("mock-echo-2"));
        assert!((resolved.temperature - 0.2).abs() < f32::EPSILON);
        assert_eq!(resolved.max_tokens, 512);
    }

    #[tokio::test]
    async fn resolve_rejects_bad_requests() {
        let assistant = test_assistant().await;

        let unknown = ModelConfigPayload {
            provider: Some("grok".to_string()),
            ..ModelConfigPayload::default()
        };
        assert!(matches!(
            assistant.resolve_model_config(Some(&unknown)),
            Err(AssistantError::UnknownProvider(_))
        ));

        let too_hot = ModelConfigPayload {
            temperature: Some(3.5),
            ..ModelConfigPayload::default()
        };
        assert!(matches!(
            assistant.resolve_model_config(Some(&too_hot)),
            Err(AssistantError::InvalidTemperature(_))
        ));

        let zero_budget = ModelConfigPayload {
            max_tokens: Some(0),
            ..ModelConfigPayload::default()
        };
        assert!(matches!(
            assistant.resolve_model_config(Some(&zero_budget)),
            Err(AssistantError::InvalidMaxTokens(_))
        ));

        let weird_model = ModelConfigPayload {
            model: Some("gpt 4o; rm -rf".to_string()),
            ..ModelConfigPayload::default()
        };
        assert!(matches!(
            assistant.resolve_model_config(Some(&weird_model)),
            Err(AssistantError::InvalidModel(_))
        ));
    }

    #[tokio::test]
    async fn unconfigured_provider_is_a_client_error() {
        let assistant = test_assistant().await;
        let payload = ModelConfigPayload {
            provider: Some("anthropic".to_string()),
            ..ModelConfigPayload::default()
        };
        let config = assistant.resolve_model_config(Some(&payload)).unwrap();

        let err = assistant
            .answer("Hallo", Language::De, &config).await
            .unwrap_err();
        assert!(matches!(err, AssistantError::ProviderNotConfigured(_)));
        assert!(err.is_client_error());
    }
}
