use crate::models::chat::{ ConversationSession, MessageRole };

use std::error::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    Csv,
    Text,
}

impl ExportFormat {
    /// `pdf` is accepted as an alias for the plain-text transcript, which is
    /// what that export renders to here.
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_lowercase().as_str() {
            "json" => Some(Self::Json),
            "csv" => Some(Self::Csv),
            "text" | "txt" | "pdf" => Some(Self::Text),
            _ => None,
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            Self::Json => "application/json",
            Self::Csv => "text/csv; charset=utf-8",
            Self::Text => "text/plain; charset=utf-8",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Csv => "csv",
            Self::Text => "txt",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExportedDocument {
    pub filename: String,
    pub content_type: &'static str,
    pub body: String,
}

pub fn export_session(
    session: &ConversationSession,
    format: ExportFormat
) -> Result<ExportedDocument, Box<dyn Error + Send + Sync>> {
    let body = match format {
        ExportFormat::Json => serde_json::to_string_pretty(session)?,
        ExportFormat::Csv => to_csv(session),
        ExportFormat::Text => to_text(session),
    };

    Ok(ExportedDocument {
        filename: format!("session-{}.{}", session.id, format.extension()),
        content_type: format.content_type(),
        body,
    })
}

fn to_csv(session: &ConversationSession) -> String {
    let mut out = String::from("timestamp,role,content,totalTokens,estimatedCost\n");
    for message in &session.messages {
        let (tokens, cost) = message.usage
            .map(|usage| (usage.total_tokens, usage.estimated_cost))
            .unwrap_or((0, 0.0));
        out.push_str(
            &format!(
                "{},{},{},{},{}\n",
                message.timestamp.to_rfc3339(),
                message.role.as_str(),
                csv_escape(&message.content),
                tokens,
                cost
            )
        );
    }
    out
}

fn csv_escape(field: &str) -> String {
    if field.contains(',') || field.contains('"') || field.contains('\n') || field.contains('\r') {
        return format!("\"{}\"", field.replace('"', "\"\""));
    }
    field.to_string()
}

fn to_text(session: &ConversationSession) -> String {
    let mut out = format!(
        "Conversation: {}\nSession: {}\nLanguage: {}\nStarted: {}\nMessages: {}\n\n",
        session.title,
        session.id,
        session.language,
        session.created_at.to_rfc3339(),
        session.messages.len()
    );

    for message in &session.messages {
        let role = match message.role {
            MessageRole::User => "User",
            MessageRole::Assistant => "Assistant",
        };
        out.push_str(&format!("[{}] {}:\n{}\n\n", message.timestamp.to_rfc3339(), role, message.content));
    }

    out.push_str(
        &format!(
            "Total tokens: {} | Estimated cost: ${:.6}\n",
            session.total_tokens,
            session.total_cost
        )
    );
    out
}
