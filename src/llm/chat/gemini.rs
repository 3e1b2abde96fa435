use async_trait::async_trait;
use reqwest::Client as HttpClient;
use serde::{Deserialize, Serialize};
use std::error::Error as StdError;

use super::{ChatClient, GenerationOptions, ModelResponse, PromptMessage};
use crate::llm::{Provider, ProviderConfig};

pub struct GeminiChatClient {
    http: HttpClient,
    api_key: String,
    model: String,
    base_url: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GeminiSystemInstruction>,
    generation_config: GeminiGenerationConfig,
}

#[derive(Serialize, Deserialize)]
struct GeminiContent {
    role: String,
    parts: Vec<GeminiPart>,
}

#[derive(Serialize, Deserialize)]
struct GeminiPart {
    text: String,
}

#[derive(Serialize)]
struct GeminiSystemInstruction {
    parts: Vec<GeminiPart>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiGenerationConfig {
    temperature: f32,
    max_output_tokens: u32,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    #[serde(default)]
    usage_metadata: Option<GeminiUsageMetadata>,
    #[serde(default)]
    model_version: Option<String>,
}

#[derive(Deserialize)]
struct GeminiCandidate {
    #[serde(default)]
    content: Option<GeminiContent>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiUsageMetadata {
    prompt_token_count: Option<u32>,
    candidates_token_count: Option<u32>,
}

impl GeminiChatClient {
    pub fn new(
        api_key: String,
        model: Option<String>,
        base_url: Option<String>
    ) -> Result<Self, Box<dyn StdError + Send + Sync>> {
        let chat_model = model.unwrap_or_else(|| "gemini-1.5-flash".to_string());
        let api_url = base_url.unwrap_or_else(||
            "https://generativelanguage.googleapis.com".to_string()
        );

        let http = HttpClient::builder()
            .build()
            .map_err(|e| Box::new(e) as Box<dyn StdError + Send + Sync>)?;

        Ok(Self {
            http,
            api_key,
            model: chat_model,
            base_url: api_url,
        })
    }

    pub fn from_config(config: &ProviderConfig) -> Result<Self, Box<dyn StdError + Send + Sync>> {
        let api_key = config.api_key
            .clone()
            .ok_or_else(|| "Gemini API key is required".to_string())?;

        Self::new(api_key, config.chat_model.clone(), config.base_url.clone())
    }

    fn build_request(
        &self,
        messages: &[PromptMessage],
        options: &GenerationOptions
    ) -> GeminiRequest {
        let mut system_parts = Vec::new();
        let mut contents = Vec::new();

        for message in messages {
            match message.role.as_str() {
                "system" => system_parts.push(GeminiPart { text: message.content.clone() }),
                role => {
                    // Gemini names the assistant role "model".
                    let mapped = if role == "assistant" { "model" } else { "user" };
                    contents.push(GeminiContent {
                        role: mapped.to_string(),
                        parts: vec![GeminiPart { text: message.content.clone() }],
                    });
                }
            }
        }

        let system_instruction = if system_parts.is_empty() {
            None
        } else {
            Some(GeminiSystemInstruction { parts: system_parts })
        };

        GeminiRequest {
            contents,
            system_instruction,
            generation_config: GeminiGenerationConfig {
                temperature: options.temperature,
                max_output_tokens: options.max_tokens,
            },
        }
    }
}

fn extract_response(
    resp: GeminiResponse,
    fallback_model: &str
) -> Result<ModelResponse, Box<dyn StdError + Send + Sync>> {
    let content = resp.candidates
        .first()
        .and_then(|candidate| candidate.content.as_ref())
        .map(|content| {
            content.parts
                .iter()
                .map(|part| part.text.as_str())
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default();

    if content.is_empty() {
        return Err("No candidates in Gemini response".to_string().into());
    }

    let (prompt_tokens, completion_tokens) = match &resp.usage_metadata {
        Some(usage) => (usage.prompt_token_count, usage.candidates_token_count),
        None => (None, None),
    };

    Ok(ModelResponse {
        content,
        model: resp.model_version.unwrap_or_else(|| fallback_model.to_string()),
        provider: Provider::Gemini,
        prompt_tokens,
        completion_tokens,
    })
}

#[async_trait]
impl ChatClient for GeminiChatClient {
    async fn complete(
        &self,
        messages: &[PromptMessage],
        options: &GenerationOptions
    ) -> Result<ModelResponse, Box<dyn StdError + Send + Sync>> {
        let model = options.model.as_deref().unwrap_or(&self.model);
        let url = format!(
            "{}/v1beta/models/{}:generateContent?key={}",
            self.base_url.trim_end_matches('/'),
            model,
            self.api_key
        );
        let req = self.build_request(messages, options);

        let resp = self.http.post(&url)
            .json(&req)
            .send()
            .await?
            .error_for_status()?
            .json::<GeminiResponse>()
            .await?;

        extract_response(resp, model)
    }

    fn model(&self) -> String {
        self.model.clone()
    }

    fn provider(&self) -> Provider {
        Provider::Gemini
    }
}
