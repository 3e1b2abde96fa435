use crate::assistant::AssistantError;
use crate::knowledge::KnowledgeError;
use crate::models::api::{
    ChatRequest,
    ChatResponse,
    ExportQuery,
    HealthResponse,
    KnowledgeAction,
    KnowledgeInfoQuery,
    KnowledgeUpdateRequest,
    KnowledgeUpdateResponse,
};
use crate::models::chat::{ConversationSession, Message, SessionStats, SessionSummary};
use crate::sessions::export::{self, ExportFormat};
use crate::sessions::valid_session_id;
use crate::telemetry::{ChatLogRecord, KnowledgeLogRecord};
use super::AppState;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use governor::{RateLimiter, Quota, state::{InMemoryState, NotKeyed}, clock::DefaultClock};
use lazy_static::lazy_static;
use log::{error, warn};
use serde_json::{json, Value as JsonValue};

use std::num::NonZeroU32;
use std::time::Instant;

lazy_static! {
    static ref REQUEST_LIMITER: RateLimiter<NotKeyed, InMemoryState, DefaultClock> = RateLimiter::direct(Quota::per_second(NonZeroU32::new(50).unwrap()));
}

/// Error half of every JSON handler: a status code plus `{"error": ...}`.
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self { status, message: message.into() }
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }

    fn from_assistant(err: AssistantError) -> Self {
        if err.is_client_error() {
            Self::bad_request(err.to_string())
        } else {
            error!("Chat turn failed: {}", err);
            Self::internal("The assistant could not complete the request")
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        uptime_seconds: state.started_at.elapsed().as_secs(),
    })
}

pub async fn chat(
    State(state): State<AppState>,
    payload: Result<Json<ChatRequest>, JsonRejection>
) -> Result<Json<ChatResponse>, ApiError> {
    let started = Instant::now();
    let Json(request) = payload.map_err(|e|
        ApiError::bad_request(format!("Invalid request body: {}", e))
    )?;

    if REQUEST_LIMITER.check().is_err() {
        warn!("Request rate limit exceeded; rejecting chat request");
        return Err(ApiError::new(StatusCode::TOO_MANY_REQUESTS, "Too many requests"));
    }

    let message = request.message.trim();
    if message.is_empty() {
        return Err(ApiError::bad_request("message must not be empty"));
    }
    let message_chars = message.chars().count();
    if message_chars > state.max_message_chars {
        return Err(
            ApiError::bad_request(
                format!("message exceeds the {} character limit", state.max_message_chars)
            )
        );
    }

    let findings = state.knowledge.validator().screen_message(message);
    if !findings.is_empty() {
        warn!("Chat message rejected by security screening: {}", findings.join("; "));
        return Err(
            ApiError::new(StatusCode::FORBIDDEN, "Message was rejected by security screening")
        );
    }

    if let Some(session_id) = request.session_id.as_deref() {
        if !valid_session_id(session_id) {
            return Err(
                ApiError::bad_request(
                    "sessionId may only contain letters, digits, '-' and '_' (64 max)"
                )
            );
        }
    }

    let config = state.assistant
        .resolve_model_config(request.model_config.as_ref())
        .map_err(ApiError::from_assistant)?;
    let outcome = match state.assistant.answer(message, request.language, &config).await {
        Ok(outcome) => outcome,
        Err(e) => {
            state.telemetry.log_chat(ChatLogRecord {
                timestamp: Utc::now(),
                session_id: request.session_id.clone(),
                language: request.language.to_string(),
                provider: config.provider.to_string(),
                model: config.model.clone().unwrap_or_default(),
                message_chars,
                response_chars: 0,
                source_count: 0,
                total_tokens: 0,
                estimated_cost: 0.0,
                processing_ms: started.elapsed().as_millis() as u64,
                error: Some(e.to_string()),
            }).await;
            return Err(ApiError::from_assistant(e));
        }
    };

    let processing_time = started.elapsed().as_millis() as u64;

    // The answer is already made; a session or log failure only warns.
    if let Some(session_id) = request.session_id.as_deref() {
        let user = Message::user(message);
        let reply = Message::assistant(&outcome.content, outcome.sources.clone(), outcome.usage);
        if let Err(e) = state.sessions.append_turn(session_id, request.language, user, reply).await {
            warn!("Session '{}' could not be persisted: {}", session_id, e);
        }
    }

    state.telemetry.log_chat(ChatLogRecord {
        timestamp: Utc::now(),
        session_id: request.session_id.clone(),
        language: request.language.to_string(),
        provider: outcome.provider.to_string(),
        model: outcome.model.clone(),
        message_chars,
        response_chars: outcome.content.chars().count(),
        source_count: outcome.sources.len(),
        total_tokens: outcome.usage.total_tokens,
        estimated_cost: outcome.usage.estimated_cost,
        processing_ms: processing_time,
        error: None,
    }).await;

    Ok(
        Json(ChatResponse {
            content: outcome.content,
            sources: outcome.sources,
            processing_time,
            token_usage: outcome.usage,
            provider: outcome.provider.to_string(),
            model: outcome.model,
            session_id: request.session_id,
        })
    )
}

pub async fn knowledge_update(
    State(state): State<AppState>,
    payload: Result<Json<KnowledgeUpdateRequest>, JsonRejection>
) -> Response {
    let request = match payload {
        Ok(Json(request)) => request,
        Err(e) => {
            return knowledge_failure(
                StatusCode::BAD_REQUEST,
                format!("Invalid request body: {}", e),
                None
            );
        }
    };

    if REQUEST_LIMITER.check().is_err() {
        warn!("Request rate limit exceeded; rejecting knowledge update");
        return knowledge_failure(StatusCode::TOO_MANY_REQUESTS, "Too many requests".to_string(), None);
    }

    let started = Instant::now();
    let outcome = match request.action {
        KnowledgeAction::Add => {
            match request.source.as_ref() {
                Some(source) => state.knowledge.add_source(source).await,
                None => {
                    return knowledge_failure(
                        StatusCode::BAD_REQUEST,
                        "action 'add' requires a source document".to_string(),
                        None
                    );
                }
            }
        }
        KnowledgeAction::Update => {
            match request.source.as_ref() {
                Some(source) => state.knowledge.update_source(source).await,
                None => {
                    return knowledge_failure(
                        StatusCode::BAD_REQUEST,
                        "action 'update' requires a source document".to_string(),
                        None
                    );
                }
            }
        }
        KnowledgeAction::Remove => {
            match request.source_id.as_deref() {
                Some(source_id) => state.knowledge.remove_source(source_id).await,
                None => {
                    return knowledge_failure(
                        StatusCode::BAD_REQUEST,
                        "action 'remove' requires sourceId".to_string(),
                        None
                    );
                }
            }
        }
        KnowledgeAction::Restore => {
            match request.backup_id.as_deref() {
                Some(backup_id) => state.knowledge.restore_backup(backup_id).await,
                None => {
                    return knowledge_failure(
                        StatusCode::BAD_REQUEST,
                        "action 'restore' requires backupId".to_string(),
                        None
                    );
                }
            }
        }
    };

    match outcome {
        Ok(report) => {
            state.telemetry.log_knowledge(KnowledgeLogRecord {
                timestamp: Utc::now(),
                action: report.action.clone(),
                source_id: report.source_id.clone(),
                success: true,
                backup_id: Some(report.backup_id.clone()),
                chunks_added: report.chunks_added,
                chunks_removed: report.chunks_removed,
                duration_ms: report.duration_ms,
                error: None,
            }).await;

            let message = format!("Action '{}' completed", report.action);
            let data = serde_json::to_value(&report).ok();
            (StatusCode::OK, Json(KnowledgeUpdateResponse::ok(message, data))).into_response()
        }
        Err(err) => {
            state.telemetry.log_knowledge(KnowledgeLogRecord {
                timestamp: Utc::now(),
                action: request.action.as_str().to_string(),
                source_id: request.source_id
                    .clone()
                    .or_else(|| request.source.as_ref().map(|s| s.id.clone())),
                success: false,
                backup_id: None,
                chunks_added: 0,
                chunks_removed: 0,
                duration_ms: started.elapsed().as_millis() as u64,
                error: Some(err.to_string()),
            }).await;

            let status = knowledge_status_code(&err);
            if status == StatusCode::INTERNAL_SERVER_ERROR {
                error!("Knowledge action '{}' failed: {}", request.action.as_str(), err);
            }
            knowledge_failure(status, err.to_string(), knowledge_error_details(err))
        }
    }
}

fn knowledge_status_code(err: &KnowledgeError) -> StatusCode {
    match err {
        KnowledgeError::Validation(_) | KnowledgeError::DuplicateSource(_) => {
            StatusCode::BAD_REQUEST
        }
        KnowledgeError::Security(_) => StatusCode::FORBIDDEN,
        KnowledgeError::UpdateInProgress => StatusCode::CONFLICT,
        KnowledgeError::UnknownSource { .. } | KnowledgeError::UnknownBackup(_) => {
            StatusCode::NOT_FOUND
        }
        KnowledgeError::BackupIntegrity(_) |
        KnowledgeError::Embedding(_) |
        KnowledgeError::Store(_) |
        KnowledgeError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn knowledge_error_details(err: KnowledgeError) -> Option<Vec<String>> {
    match err {
        KnowledgeError::Validation(findings) | KnowledgeError::Security(findings) => {
            Some(findings)
        }
        KnowledgeError::UnknownSource { suggestion: Some(suggestion), .. } => {
            Some(vec![format!("did you mean '{}'?", suggestion)])
        }
        _ => None,
    }
}

fn knowledge_failure(status: StatusCode, message: String, errors: Option<Vec<String>>) -> Response {
    (status, Json(KnowledgeUpdateResponse::failure(message, errors))).into_response()
}

pub async fn knowledge_info(
    State(state): State<AppState>,
    Query(query): Query<KnowledgeInfoQuery>
) -> Result<Json<JsonValue>, ApiError> {
    let view = query.info.as_deref().unwrap_or("status");
    let value = match view {
        "status" => {
            let status = state.knowledge.status().await.map_err(|e| {
                error!("Knowledge status query failed: {}", e);
                ApiError::internal("Could not read the knowledge base status")
            })?;
            serde_json::to_value(status)
        }
        "backups" => {
            let backups = state.knowledge.list_backups().map_err(|e| {
                error!("Backup listing failed: {}", e);
                ApiError::internal("Could not list backups")
            })?;
            serde_json::to_value(backups)
        }
        "statistics" => serde_json::to_value(state.knowledge.statistics().await),
        other => {
            return Err(
                ApiError::bad_request(
                    format!("Unknown info view '{}'; use status, backups or statistics", other)
                )
            );
        }
    };

    value
        .map(Json)
        .map_err(|e| ApiError::internal(format!("Could not serialize the {} view: {}", view, e)))
}

pub async fn list_sessions(
    State(state): State<AppState>
) -> Result<Json<Vec<SessionSummary>>, ApiError> {
    let sessions = state.sessions.list().await.map_err(|e| {
        error!("Session listing failed: {}", e);
        ApiError::internal("Could not list sessions")
    })?;
    Ok(Json(sessions))
}

pub async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<String>
) -> Result<Json<ConversationSession>, ApiError> {
    Ok(Json(fetch_session(&state, &id).await?))
}

pub async fn session_stats(
    State(state): State<AppState>,
    Path(id): Path<String>
) -> Result<Json<SessionStats>, ApiError> {
    let session = fetch_session(&state, &id).await?;
    Ok(Json(session.stats()))
}

pub async fn delete_session(
    State(state): State<AppState>,
    Path(id): Path<String>
) -> Result<StatusCode, ApiError> {
    if !valid_session_id(&id) {
        return Err(ApiError::bad_request("session id may only contain letters, digits, '-' and '_'"));
    }

    let existed = state.sessions.delete(&id).await.map_err(|e| {
        error!("Session delete failed: {}", e);
        ApiError::internal("Could not delete the session")
    })?;
    if existed {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::not_found(format!("No session with id '{}'", id)))
    }
}

pub async fn export_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<ExportQuery>
) -> Result<Response, ApiError> {
    let format_name = query.format.as_deref().unwrap_or("json");
    let format = ExportFormat::parse(format_name).ok_or_else(||
        ApiError::bad_request(
            format!("Unknown export format '{}'; use json, csv or pdf", format_name)
        )
    )?;

    let session = fetch_session(&state, &id).await?;
    let document = export::export_session(&session, format).map_err(|e| {
        error!("Session '{}' export failed: {}", id, e);
        ApiError::internal("Could not export the session")
    })?;

    let headers = [
        (header::CONTENT_TYPE, document.content_type.to_string()),
        (
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", document.filename),
        ),
    ];
    Ok((headers, document.body).into_response())
}

async fn fetch_session(state: &AppState, id: &str) -> Result<ConversationSession, ApiError> {
    if !valid_session_id(id) {
        return Err(ApiError::bad_request("session id may only contain letters, digits, '-' and '_'"));
    }

    state.sessions
        .get(id).await
        .map_err(|e| {
            error!("Session lookup failed: {}", e);
            ApiError::internal("Could not read the session")
        })?
        .ok_or_else(|| ApiError::not_found(format!("No session with id '{}'", id)))
}
