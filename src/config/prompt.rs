use crate::models::chat::Language;

use serde::Deserialize;
use std::collections::HashMap;
use std::error::Error;
use std::fmt;
use std::fs;
use std::sync::Arc;

#[derive(Debug)]
pub enum PromptError {
    LanguageNotFound(String),
    PlaceholderMissing(String),
    IoError(std::io::Error),
    JsonError(serde_json::Error),
}

impl fmt::Display for PromptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PromptError::LanguageNotFound(code) => {
                write!(f, "Prompt set for language '{}' not found", code)
            }
            PromptError::PlaceholderMissing(key) => {
                write!(f, "Prompt template is missing the '{}' placeholder", key)
            }
            PromptError::IoError(e) => write!(f, "Prompt file IO error: {}", e),
            PromptError::JsonError(e) => write!(f, "Prompt JSON parsing error: {}", e),
        }
    }
}

impl Error for PromptError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            PromptError::IoError(e) => Some(e),
            PromptError::JsonError(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for PromptError {
    fn from(err: std::io::Error) -> Self {
        PromptError::IoError(err)
    }
}

impl From<serde_json::Error> for PromptError {
    fn from(err: serde_json::Error) -> Self {
        PromptError::JsonError(err)
    }
}

#[derive(Deserialize, Debug, Clone)]
pub struct LanguagePrompts {
    pub system: String,
    pub context_header: String,
    pub no_context: String,
}

#[derive(Deserialize, Debug, Clone)]
pub struct PromptConfig {
    pub languages: HashMap<String, LanguagePrompts>,
}

impl PromptConfig {
    /// Both supported languages must be present and every system prompt
    /// needs a `{context}` slot for the retrieved material.
    fn validate(&self) -> Result<(), PromptError> {
        for code in ["de", "en"] {
            let Some(prompts) = self.languages.get(code) else {
                return Err(PromptError::LanguageNotFound(code.to_string()));
            };
            if !prompts.system.contains("{context}") {
                return Err(
                    PromptError::PlaceholderMissing(format!("{}:system:{{context}}", code))
                );
            }
        }
        Ok(())
    }
}

pub fn load_prompts(path: &str) -> Result<Arc<PromptConfig>, Box<dyn Error + Send + Sync>> {
    let file_content = fs
        ::read_to_string(path)
        .map_err(|e| format!("Failed to read prompts file '{}': {}", path, e))?;
    let config: PromptConfig = serde_json
        ::from_str(&file_content)
        .map_err(|e| format!("Failed to parse prompts file '{}': {}", path, e))?;
    config.validate()?;
    Ok(Arc::new(config))
}

fn prompts_for(config: &PromptConfig, language: Language) -> Result<&LanguagePrompts, PromptError> {
    config.languages
        .get(language.code())
        .ok_or_else(|| PromptError::LanguageNotFound(language.code().to_string()))
}

/// The system prompt with the retrieved context substituted in. When nothing
/// was retrieved the language's no-context note fills the slot instead, so
/// the model knows to answer from general course framing only.
pub fn system_prompt(
    config: &PromptConfig,
    language: Language,
    context: &str
) -> Result<String, PromptError> {
    let prompts = prompts_for(config, language)?;

    if context.trim().is_empty() {
        return Ok(prompts.system.replace("{context}", &prompts.no_context));
    }

    let block = format!("{}\n\n{}", prompts.context_header, context);
    Ok(prompts.system.replace("{context}", &block))
}
