use async_trait::async_trait;
use std::error::Error as StdError;

use super::{prompt_chars, ChatClient, GenerationOptions, ModelResponse, PromptMessage};
use crate::llm::{Provider, ProviderConfig};

/// Offline stand-in for the hosted providers. Echoes the last user turn with
/// deterministic, length-derived token counts, which keeps local runs and the
/// test suite independent of any API key.
pub struct MockChatClient {
    model: String,
}

impl MockChatClient {
    pub fn new(model: Option<String>) -> Self {
        Self {
            model: model.unwrap_or_else(|| "mock-echo-1".to_string()),
        }
    }

    pub fn from_config(config: &ProviderConfig) -> Self {
        Self::new(config.chat_model.clone())
    }
}

#[async_trait]
impl ChatClient for MockChatClient {
    async fn complete(
        &self,
        messages: &[PromptMessage],
        options: &GenerationOptions
    ) -> Result<ModelResponse, Box<dyn StdError + Send + Sync>> {
        let last_user = messages
            .iter()
            .rev()
            .find(|m| m.role == "user")
            .map(|m| m.content.as_str())
            .unwrap_or("");

        let content = format!("Mock answer to: {}", last_user);
        let prompt_tokens = (prompt_chars(messages) / 4).max(1) as u32;
        let completion_tokens = (content.chars().count() / 4).max(1) as u32;
        let model = options.model.clone().unwrap_or_else(|| self.model.clone());

        Ok(ModelResponse {
            content,
            model,
            provider: Provider::Mock,
            prompt_tokens: Some(prompt_tokens),
            completion_tokens: Some(completion_tokens),
        })
    }

    fn model(&self) -> String {
        self.model.clone()
    }

    fn provider(&self) -> Provider {
        Provider::Mock
    }
}
