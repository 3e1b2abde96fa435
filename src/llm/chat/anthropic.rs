use async_trait::async_trait;
use reqwest::{Client as HttpClient, header::{HeaderMap, HeaderValue, CONTENT_TYPE}};
use serde::{Deserialize, Serialize};
use std::error::Error as StdError;

use super::{ChatClient, GenerationOptions, ModelResponse, PromptMessage};
use crate::llm::{Provider, ProviderConfig};

const ANTHROPIC_VERSION: &str = "2023-06-01";

pub struct AnthropicChatClient {
    http: HttpClient,
    model: String,
    base_url: String,
}

#[derive(Serialize)]
struct AnthropicRequest {
    model: String,
    max_tokens: u32,
    messages: Vec<PromptMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicContentBlock>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    usage: Option<AnthropicUsage>,
}

#[derive(Deserialize)]
struct AnthropicContentBlock {
    #[serde(rename = "type")]
    block_type: String,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Deserialize)]
struct AnthropicUsage {
    input_tokens: Option<u32>,
    output_tokens: Option<u32>,
}

/// The messages endpoint takes the system prompt as a top-level field, so
/// system turns are lifted out of the message list and joined.
fn split_system(messages: &[PromptMessage]) -> (Option<String>, Vec<PromptMessage>) {
    let mut system_parts = Vec::new();
    let mut rest = Vec::new();
    for message in messages {
        if message.role == "system" {
            system_parts.push(message.content.clone());
        } else {
            rest.push(message.clone());
        }
    }
    let system = if system_parts.is_empty() {
        None
    } else {
        Some(system_parts.join("\n\n"))
    };
    (system, rest)
}

impl AnthropicChatClient {
    pub fn new(
        api_key: String,
        model: Option<String>,
        base_url: Option<String>
    ) -> Result<Self, Box<dyn StdError + Send + Sync>> {
        let chat_model = model.unwrap_or_else(|| "claude-3-5-sonnet-20241022".to_string());
        let api_url = base_url.unwrap_or_else(|| "https://api.anthropic.com".to_string());

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert("anthropic-version", HeaderValue::from_static(ANTHROPIC_VERSION));
        headers.insert(
            "x-api-key",
            HeaderValue::from_str(&api_key)
                .map_err(|e| format!("Invalid API key format: {}", e))?
        );

        let http = HttpClient::builder()
            .default_headers(headers)
            .build()
            .map_err(|e| Box::new(e) as Box<dyn StdError + Send + Sync>)?;

        Ok(Self {
            http,
            model: chat_model,
            base_url: api_url,
        })
    }

    pub fn from_config(config: &ProviderConfig) -> Result<Self, Box<dyn StdError + Send + Sync>> {
        let api_key = config.api_key
            .clone()
            .ok_or_else(|| "Anthropic API key is required".to_string())?;

        Self::new(api_key, config.chat_model.clone(), config.base_url.clone())
    }

    fn build_request(
        &self,
        messages: &[PromptMessage],
        options: &GenerationOptions
    ) -> AnthropicRequest {
        let (system, rest) = split_system(messages);
        AnthropicRequest {
            model: options.model.clone().unwrap_or_else(|| self.model.clone()),
            max_tokens: options.max_tokens,
            messages: rest,
            system,
            temperature: Some(options.temperature),
        }
    }
}

fn extract_response(
    resp: AnthropicResponse,
    fallback_model: &str
) -> Result<ModelResponse, Box<dyn StdError + Send + Sync>> {
    let content = resp.content
        .iter()
        .filter(|block| block.block_type == "text")
        .filter_map(|block| block.text.as_deref())
        .collect::<Vec<_>>()
        .join("");

    if content.is_empty() {
        return Err("No text content in Anthropic response".to_string().into());
    }

    let (prompt_tokens, completion_tokens) = match &resp.usage {
        Some(usage) => (usage.input_tokens, usage.output_tokens),
        None => (None, None),
    };

    Ok(ModelResponse {
        content,
        model: resp.model.unwrap_or_else(|| fallback_model.to_string()),
        provider: Provider::Anthropic,
        prompt_tokens,
        completion_tokens,
    })
}

#[async_trait]
impl ChatClient for AnthropicChatClient {
    async fn complete(
        &self,
        messages: &[PromptMessage],
        options: &GenerationOptions
    ) -> Result<ModelResponse, Box<dyn StdError + Send + Sync>> {
        let url = format!("{}/v1/messages", self.base_url.trim_end_matches('/'));
        let req = self.build_request(messages, options);
        let requested_model = req.model.clone();

        let resp = self.http.post(&url)
            .json(&req)
            .send()
            .await?
            .error_for_status()?
            .json::<AnthropicResponse>()
            .await?;

        extract_response(resp, &requested_model)
    }

    fn model(&self) -> String {
        self.model.clone()
    }

    fn provider(&self) -> Provider {
        Provider::Anthropic
    }
}
