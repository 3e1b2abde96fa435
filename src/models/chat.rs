use chrono::{ DateTime, Utc };
use serde::{ Serialize, Deserialize };
use std::fmt;
use uuid::Uuid;

const TITLE_MAX_CHARS: usize = 60;

/// Languages the assistant answers in. The course material is German-first,
/// so `de` is the default when a request omits the field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    De,
    En,
}

impl Language {
    pub fn code(&self) -> &'static str {
        match self {
            Language::De => "de",
            Language::En => "en",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
        }
    }
}

/// Token counts and the derived cost for one model call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
    pub estimated_cost: f64,
}

/// A cited course excerpt attached to an assistant reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentSource {
    pub source_id: String,
    pub course_number: u32,
    pub module_number: u32,
    pub title: String,
    pub excerpt: String,
    pub score: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub role: MessageRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<DocumentSource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
}

impl Message {
    pub fn user(content: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role: MessageRole::User,
            content: content.to_string(),
            timestamp: Utc::now(),
            sources: Vec::new(),
            usage: None,
        }
    }

    pub fn assistant(content: &str, sources: Vec<DocumentSource>, usage: TokenUsage) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role: MessageRole::Assistant,
            content: content.to_string(),
            timestamp: Utc::now(),
            sources,
            usage: Some(usage),
        }
    }
}

/// One stored conversation. Messages are append-only; the aggregate token and
/// cost counters grow with every assistant turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSession {
    pub id: String,
    pub title: String,
    pub language: Language,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub messages: Vec<Message>,
    #[serde(default)]
    pub total_tokens: u64,
    #[serde(default)]
    pub total_cost: f64,
}

impl ConversationSession {
    pub fn new(id: &str, title: &str, language: Language) -> Self {
        let now = Utc::now();
        Self {
            id: id.to_string(),
            title: title.to_string(),
            language,
            created_at: now,
            updated_at: now,
            messages: Vec::new(),
            total_tokens: 0,
            total_cost: 0.0,
        }
    }

    pub fn append(&mut self, message: Message) {
        if let Some(usage) = &message.usage {
            self.total_tokens += usage.total_tokens as u64;
            self.total_cost += usage.estimated_cost;
        }
        self.updated_at = message.timestamp.max(self.updated_at);
        self.messages.push(message);
    }

    pub fn stats(&self) -> SessionStats {
        let user_messages = self.messages
            .iter()
            .filter(|m| m.role == MessageRole::User)
            .count();
        let assistant_messages = self.messages.len() - user_messages;

        let assistant_chars: usize = self.messages
            .iter()
            .filter(|m| m.role == MessageRole::Assistant)
            .map(|m| m.content.chars().count())
            .sum();
        let average_assistant_chars = if assistant_messages > 0 {
            assistant_chars / assistant_messages
        } else {
            0
        };

        let duration_seconds = match (self.messages.first(), self.messages.last()) {
            (Some(first), Some(last)) =>
                (last.timestamp - first.timestamp).num_seconds().max(0) as u64,
            _ => 0,
        };

        SessionStats {
            session_id: self.id.clone(),
            message_count: self.messages.len(),
            user_messages,
            assistant_messages,
            total_tokens: self.total_tokens,
            estimated_cost: (self.total_cost * 1e6).round() / 1e6,
            duration_seconds,
            average_assistant_chars,
        }
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            id: self.id.clone(),
            title: self.title.clone(),
            language: self.language,
            created_at: self.created_at,
            updated_at: self.updated_at,
            message_count: self.messages.len(),
        }
    }
}

/// Listing row for the session index, without the message bodies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub id: String,
    pub title: String,
    pub language: Language,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub message_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStats {
    pub session_id: String,
    pub message_count: usize,
    pub user_messages: usize,
    pub assistant_messages: usize,
    pub total_tokens: u64,
    pub estimated_cost: f64,
    pub duration_seconds: u64,
    pub average_assistant_chars: usize,
}

/// Derives a session title from the first user message.
pub fn title_from_message(message: &str) -> String {
    let trimmed = message.trim();
    if trimmed.chars().count() <= TITLE_MAX_CHARS {
        return trimmed.to_string();
    }
    let cut: String = trimmed.chars().take(TITLE_MAX_CHARS).collect();
    format!("{}...", cut.trim_end())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn usage(total: u32, cost: f64) -> TokenUsage {
        TokenUsage {
            prompt_tokens: total / 2,
            completion_tokens: total - total / 2,
            total_tokens: total,
            estimated_cost: cost,
        }
    }

    #[test]
    fn append_accumulates_tokens_and_cost() {
        let mut session = ConversationSession::new("s1", "Drapieren", Language::De);
        session.append(Message::user("Was ist Moulage?"));
        session.append(Message::assistant("Moulage ist ...", Vec::new(), usage(120, 0.0004)));
        session.append(Message::user("Und Drapieren?"));
        session.append(Message::assistant("Drapieren bedeutet ...", Vec::new(), usage(80, 0.0002)));

        assert_eq!(session.total_tokens, 200);
        assert!((session.total_cost - 0.0006).abs() < 1e-9);

        let stats = session.stats();
        assert_eq!(stats.message_count, 4);
        assert_eq!(stats.user_messages, 2);
        assert_eq!(stats.assistant_messages, 2);
        assert_eq!(stats.total_tokens, 200);
    }

    #[test]
    fn stats_on_empty_session_are_zeroed() {
        let session = ConversationSession::new("s2", "Leer", Language::En);
        let stats = session.stats();
        assert_eq!(stats.message_count, 0);
        assert_eq!(stats.duration_seconds, 0);
        assert_eq!(stats.average_assistant_chars, 0);
    }

    #[test]
    fn title_is_truncated_on_char_boundary() {
        let long = "ü".repeat(100);
        let title = title_from_message(&long);
        assert!(title.ends_with("..."));
        assert!(title.chars().count() <= 63);

        assert_eq!(title_from_message("  kurz  "), "kurz");
    }

    #[test]
    fn wire_format_uses_camel_case() {
        let source = DocumentSource {
            source_id: "kurs-1-drapieren".into(),
            course_number: 1,
            module_number: 2,
            title: "Drapieren am Stoff".into(),
            excerpt: "…".into(),
            score: 0.9,
        };
        let value = serde_json::to_value(&source).unwrap();
        assert!(value.get("sourceId").is_some());
        assert!(value.get("courseNumber").is_some());
        assert!(value.get("source_id").is_none());
    }
}
