pub mod openai;
pub mod anthropic;
pub mod gemini;
pub mod mock;

use async_trait::async_trait;
use serde::{ Deserialize, Serialize };
use std::collections::HashMap;
use std::error::Error as StdError;
use std::sync::Arc;
use super::{ Provider, ProviderConfig };
use self::openai::OpenAIChatClient;
use self::anthropic::AnthropicChatClient;
use self::gemini::GeminiChatClient;
use self::mock::MockChatClient;

/// One turn of a normalized prompt. Roles are the lowercase wire names
/// ("system", "user", "assistant") every adapter understands.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PromptMessage {
    pub role: String,
    pub content: String,
}

impl PromptMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: "system".to_string(), content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: "user".to_string(), content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: "assistant".to_string(), content: content.into() }
    }
}

/// Per-request generation knobs. `model` overrides the adapter's configured
/// default for this one call.
#[derive(Debug, Clone, Default)]
pub struct GenerationOptions {
    pub temperature: f32,
    pub max_tokens: u32,
    pub model: Option<String>,
}

/// Normalized completion result. Token counts are the provider-reported
/// values; `None` means the provider omitted them and the caller estimates.
#[derive(Debug, Clone)]
pub struct ModelResponse {
    pub content: String,
    pub model: String,
    pub provider: Provider,
    pub prompt_tokens: Option<u32>,
    pub completion_tokens: Option<u32>,
}

#[async_trait]
pub trait ChatClient: Send + Sync {
    async fn complete(
        &self,
        messages: &[PromptMessage],
        options: &GenerationOptions
    ) -> Result<ModelResponse, Box<dyn StdError + Send + Sync>>;

    fn model(&self) -> String;
    fn provider(&self) -> Provider;
}

pub fn new_client(
    config: &ProviderConfig
) -> Result<Arc<dyn ChatClient>, Box<dyn StdError + Send + Sync>> {
    let client: Arc<dyn ChatClient> = match config.provider {
        Provider::OpenAI => {
            let specific_client = OpenAIChatClient::from_config(config)?;
            Arc::new(specific_client)
        }
        Provider::Anthropic => {
            let specific_client = AnthropicChatClient::from_config(config)?;
            Arc::new(specific_client)
        }
        Provider::Gemini => {
            let specific_client = GeminiChatClient::from_config(config)?;
            Arc::new(specific_client)
        }
        Provider::Mock => {
            let specific_client = MockChatClient::from_config(config);
            Arc::new(specific_client)
        }
    };
    Ok(client)
}

/// Registry of the chat clients that were configured at startup, keyed by
/// provider. Requests pick one per call; unconfigured providers are absent.
#[derive(Clone, Default)]
pub struct ModelService {
    clients: HashMap<Provider, Arc<dyn ChatClient>>,
}

impl ModelService {
    pub fn new() -> Self {
        Self { clients: HashMap::new() }
    }

    pub fn register(&mut self, client: Arc<dyn ChatClient>) {
        self.clients.insert(client.provider(), client);
    }

    pub fn client_for(&self, provider: Provider) -> Option<Arc<dyn ChatClient>> {
        self.clients.get(&provider).cloned()
    }

    pub fn providers(&self) -> Vec<Provider> {
        self.clients.keys().copied().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

/// Flattens a prompt back to plain text, used when estimating token counts
/// for providers that do not report usage.
pub fn prompt_chars(messages: &[PromptMessage]) -> usize {
    messages
        .iter()
        .map(|m| m.content.chars().count())
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_returns_registered_clients_only() {
        let mut service = ModelService::new();
        assert!(service.is_empty());

        service.register(Arc::new(MockChatClient::new(Some("mock-mini".to_string()))));
        let client = service.client_for(Provider::Mock).unwrap();
        assert_eq!(client.model(), "mock-mini");
        assert!(service.client_for(Provider::OpenAI).is_none());
    }

    #[test]
    fn prompt_chars_counts_all_turns() {
        let messages = vec![PromptMessage::system("abc"), PromptMessage::user("de")];
        assert_eq!(prompt_chars(&messages), 5);
    }
}
