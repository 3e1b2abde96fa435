use async_trait::async_trait;
use reqwest::{Client as HttpClient, header::{HeaderMap, HeaderValue, CONTENT_TYPE, AUTHORIZATION}};
use serde::{Deserialize, Serialize};
use std::error::Error as StdError;

use super::{ChatClient, GenerationOptions, ModelResponse, PromptMessage};
use crate::llm::{Provider, ProviderConfig};

pub struct OpenAIChatClient {
    http: HttpClient,
    model: String,
    base_url: String,
}

#[derive(Serialize)]
struct OpenAIChatRequest {
    model: String,
    messages: Vec<PromptMessage>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Deserialize)]
struct OpenAIResponse {
    choices: Vec<OpenAIChoice>,
    #[serde(default)]
    usage: Option<OpenAIUsage>,
    #[serde(default)]
    model: Option<String>,
}

#[derive(Deserialize)]
struct OpenAIChoice {
    message: OpenAIResponseMessage,
}

#[derive(Deserialize)]
struct OpenAIResponseMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct OpenAIUsage {
    prompt_tokens: Option<u32>,
    completion_tokens: Option<u32>,
}

impl OpenAIChatClient {
    pub fn new(
        api_key: String,
        model: Option<String>,
        base_url: Option<String>
    ) -> Result<Self, Box<dyn StdError + Send + Sync>> {
        let chat_model = model.unwrap_or_else(|| "gpt-4o-mini".to_string());
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
            model: chat_model,
            base_url: api_url,
        })
    }

    pub fn from_config(config: &ProviderConfig) -> Result<Self, Box<dyn StdError + Send + Sync>> {
        let api_key = config.api_key
            .clone()
            .ok_or_else(|| "OpenAI API key is required".to_string())?;

        Self::new(api_key, config.chat_model.clone(), config.base_url.clone())
    }

    fn build_request(
        &self,
        messages: &[PromptMessage],
        options: &GenerationOptions
    ) -> OpenAIChatRequest {
        OpenAIChatRequest {
            model: options.model.clone().unwrap_or_else(|| self.model.clone()),
            messages: messages.to_vec(),
            temperature: options.temperature,
            max_tokens: Some(options.max_tokens),
        }
    }
}

fn extract_response(
    resp: OpenAIResponse,
    fallback_model: &str
) -> Result<ModelResponse, Box<dyn StdError + Send + Sync>> {
    let content = resp.choices
        .first()
        .and_then(|choice| choice.message.content.clone())
        .ok_or_else(|| "No response from OpenAI API".to_string())?;

    let (prompt_tokens, completion_tokens) = match &resp.usage {
        Some(usage) => (usage.prompt_tokens, usage.completion_tokens),
        None => (None, None),
    };

    Ok(ModelResponse {
        content,
        model: resp.model.unwrap_or_else(|| fallback_model.to_string()),
        provider: Provider::OpenAI,
        prompt_tokens,
        completion_tokens,
    })
}

#[async_trait]
impl ChatClient for OpenAIChatClient {
    async fn complete(
        &self,
        messages: &[PromptMessage],
        options: &GenerationOptions
    ) -> Result<ModelResponse, Box<dyn StdError + Send + Sync>> {
        let url = format!("{}/v1/chat/completions", self.base_url.trim_end_matches('/'));
        let req = self.build_request(messages, options);
        let requested_model = req.model.clone();

        let resp = self.http.post(&url)
            .json(&req)
            .send()
            .await?
            .error_for_status()?
            .json::<OpenAIResponse>()
            .await?;

        extract_response(resp, &requested_model)
    }

    fn model(&self) -> String {
        self.model.clone()
    }

    fn provider(&self) -> Provider {
        Provider::OpenAI
    }
}
