use serde::{ Serialize, Deserialize };
use serde_json::Value as JsonValue;

use super::chat::{ DocumentSource, Language, TokenUsage };

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub language: Language,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub model_config: Option<ModelConfigPayload>,
}

/// Per-request model overrides. Anything left out falls back to the
/// configured defaults.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelConfigPayload {
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatResponse {
    pub content: String,
    pub sources: Vec<DocumentSource>,
    /// Wall-clock handling time in milliseconds.
    pub processing_time: u64,
    pub token_usage: TokenUsage,
    pub provider: String,
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KnowledgeAction {
    Add,
    Update,
    Remove,
    Restore,
}

impl KnowledgeAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            KnowledgeAction::Add => "add",
            KnowledgeAction::Update => "update",
            KnowledgeAction::Remove => "remove",
            KnowledgeAction::Restore => "restore",
        }
    }
}

/// A course transcript (or other source document) submitted through the
/// knowledge-update endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePayload {
    pub id: String,
    pub title: String,
    pub course_number: u32,
    pub module_number: u32,
    pub content: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KnowledgeUpdateRequest {
    pub action: KnowledgeAction,
    #[serde(default)]
    pub source: Option<UpdatePayload>,
    #[serde(default)]
    pub source_id: Option<String>,
    #[serde(default)]
    pub backup_id: Option<String>,
}

/// Uniform envelope for every knowledge-update reply, success or not.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeUpdateResponse {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<JsonValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<String>>,
}

impl KnowledgeUpdateResponse {
    pub fn ok(message: impl Into<String>, data: Option<JsonValue>) -> Self {
        Self {
            success: true,
            message: message.into(),
            data,
            errors: None,
        }
    }

    pub fn failure(message: impl Into<String>, errors: Option<Vec<String>>) -> Self {
        Self {
            success: false,
            message: message.into(),
            data: None,
            errors,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct KnowledgeInfoQuery {
    #[serde(default)]
    pub info: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExportQuery {
    #[serde(default)]
    pub format: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub uptime_seconds: u64,
}
