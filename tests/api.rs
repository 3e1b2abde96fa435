use std::sync::Arc;
use std::time::Instant;

use axum::body::{ to_bytes, Body };
use axum::http::{ header, Request, StatusCode };
use axum::Router;
use serde_json::{ json, Value as JsonValue };
use tempfile::TempDir;
use tower::ServiceExt;

use ellu_assistant::assistant::CourseAssistant;
use ellu_assistant::config::prompt::PromptConfig;
use ellu_assistant::knowledge::{ KnowledgeOptions, KnowledgeService };
use ellu_assistant::llm::chat::mock::MockChatClient;
use ellu_assistant::llm::chat::ModelService;
use ellu_assistant::llm::embedding::mock::MockEmbeddingClient;
use ellu_assistant::llm::embedding::EmbeddingClient;
use ellu_assistant::llm::Provider;
use ellu_assistant::rag::chunker::ChunkerConfig;
use ellu_assistant::rag::engine::RagEngine;
use ellu_assistant::server::{ build_router, AppState };
use ellu_assistant::sessions::memory::MemorySessionStore;
use ellu_assistant::telemetry::InteractionLogger;
use ellu_assistant::vector::memory::MemoryVectorStore;
use ellu_assistant::vector::VectorStore;

fn prompts() -> Arc<PromptConfig> {
    let json =
        r#"{
        "languages": {
            "de": {
                "system": "Du bist die ELLU Kursassistenz. {context}",
                "context_header": "Relevantes Kursmaterial:",
                "no_context": "Es liegt kein Kursmaterial vor."
            },
            "en": {
                "system": "You are the ELLU course assistant. {context}",
                "context_header": "Relevant course material:",
                "no_context": "No course material available."
            }
        }
    }"#;
    Arc::new(serde_json::from_str(json).unwrap())
}

async fn app(dir: &TempDir) -> Router {
    let embedding: Arc<dyn EmbeddingClient> = Arc::new(MockEmbeddingClient::new(None));
    let store: Arc<dyn VectorStore> = Arc::new(MemoryVectorStore::new());

    let options = KnowledgeOptions {
        state_path: dir.path().join("knowledge.json"),
        backup_dir: dir.path().join("backups"),
        backup_retention: 10,
        max_content_chars: 20000,
        chunker: ChunkerConfig { max_chars: 200, overlap_chars: 40 },
    };
    let knowledge = KnowledgeService::new(options, store.clone(), embedding.clone()).await.unwrap();

    let mut models = ModelService::new();
    models.register(Arc::new(MockChatClient::new(None)));
    let rag = RagEngine::new(embedding, store, 3, 0.0);
    let assistant = CourseAssistant::from_parts(models, rag, prompts(), Provider::Mock, 0.7, 256);

    build_router(AppState {
        assistant,
        knowledge: Arc::new(knowledge),
        sessions: Arc::new(MemorySessionStore::new()),
        telemetry: Arc::new(InteractionLogger::new(dir.path().join("logs"), false)),
        max_message_chars: 2000,
        started_at: Instant::now(),
    })
}

async fn read_json(response: axum::response::Response) -> (StatusCode, JsonValue) {
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        JsonValue::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

async fn post_json(app: &Router, uri: &str, body: JsonValue) -> (StatusCode, JsonValue) {
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap()
        ).await
        .unwrap();
    read_json(response).await
}

async fn get_json(app: &Router, uri: &str) -> (StatusCode, JsonValue) {
    let response = app
        .clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap()).await
        .unwrap();
    read_json(response).await
}

async fn get_raw(app: &Router, uri: &str) -> (StatusCode, Option<String>, String) {
    let response = app
        .clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap()).await
        .unwrap();
    let status = response.status();
    let content_type = response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, content_type, String::from_utf8(bytes.to_vec()).unwrap())
}

fn draping_source() -> JsonValue {
    json!({
        "action": "add",
        "source": {
            "id": "kurs-1-drapieren",
            "title": "Drapieren an der Schneiderpuppe",
            "courseNumber": 1,
            "moduleNumber": 2,
            "content": "Moulage bezeichnet das Drapieren von Stoff direkt an der Schneiderpuppe. \
                Die Nadeln fixieren den Stoff entlang der Körperlinien. Danach werden die Bahnen \
                abgenommen und auf Schnittpapier übertragen. So entsteht ein Schnitt, der die \
                Körperform exakt wiedergibt.",
            "tags": ["drapieren", "moulage"]
        }
    })
}

fn pattern_source() -> JsonValue {
    json!({
        "action": "add",
        "source": {
            "id": "kurs-2-schnitt",
            "title": "Grundschnitt konstruieren",
            "courseNumber": 2,
            "moduleNumber": 1,
            "content": "Der Grundschnitt wird aus den Körpermaßen konstruiert. Brustumfang, \
                Taillenumfang und Rückenlänge bestimmen das Grundgerüst. Abnäher formen die \
                Flächen an Brust und Taille aus.",
            "tags": ["schnittkonstruktion"]
        }
    })
}

#[tokio::test]
async fn health_reports_ok() {
    let dir = TempDir::new().unwrap();
    let app = app(&dir).await;

    let (status, body) = get_json(&app, "/api/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert!(body["uptimeSeconds"].is_u64());
}

#[tokio::test]
async fn chat_answers_with_content_sources_and_usage() {
    let dir = TempDir::new().unwrap();
    let app = app(&dir).await;

    let (status, _) = post_json(&app, "/api/knowledge-update", draping_source()).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = post_json(
        &app,
        "/api/chat",
        json!({ "message": "Was ist Moulage und wie wird drapiert?", "language": "de" })
    ).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["content"].as_str().unwrap().starts_with("Mock answer to:"));
    assert_eq!(body["provider"], "mock");
    assert_eq!(body["model"], "mock-echo-1");
    assert!(body["processingTime"].is_u64());
    assert!(body["tokenUsage"]["totalTokens"].as_u64().unwrap() > 0);

    let sources = body["sources"].as_array().unwrap();
    assert!(!sources.is_empty());
    assert_eq!(sources[0]["sourceId"], "kurs-1-drapieren");
    assert_eq!(sources[0]["courseNumber"], 1);
    assert!(sources[0]["excerpt"].as_str().unwrap().len() > 0);
}

#[tokio::test]
async fn chat_rejects_blank_messages() {
    let dir = TempDir::new().unwrap();
    let app = app(&dir).await;

    let (status, body) = post_json(&app, "/api/chat", json!({ "message": "" })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("empty"));

    let (status, _) = post_json(&app, "/api/chat", json!({ "message": "   " })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn chat_rejects_oversized_messages() {
    let dir = TempDir::new().unwrap();
    let app = app(&dir).await;

    let long = "ü".repeat(2001);
    let (status, body) = post_json(&app, "/api/chat", json!({ "message": long })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("2000"));

    // Exactly at the limit is still fine.
    let exact = "a".repeat(2000);
    let (status, _) = post_json(&app, "/api/chat", json!({ "message": exact })).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn chat_rejects_malformed_json() {
    let dir = TempDir::new().unwrap();
    let app = app(&dir).await;

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/chat")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from("{not json"))
                .unwrap()
        ).await
        .unwrap();
    let (status, body) = read_json(response).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("Invalid request body"));
}

#[tokio::test]
async fn chat_screens_out_markup_injection() {
    let dir = TempDir::new().unwrap();
    let app = app(&dir).await;

    let (status, _) = post_json(
        &app,
        "/api/chat",
        json!({ "message": "Hallo <script>alert('x')</script>" })
    ).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn chat_rejects_bad_model_config() {
    let dir = TempDir::new().unwrap();
    let app = app(&dir).await;

    let (status, body) = post_json(
        &app,
        "/api/chat",
        json!({ "message": "Hallo", "modelConfig": { "provider": "grok" } })
    ).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("grok"));

    let (status, _) = post_json(
        &app,
        "/api/chat",
        json!({ "message": "Hallo", "modelConfig": { "temperature": 3.5 } })
    ).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Recognized provider without a configured client fails past validation.
    let (status, body) = post_json(
        &app,
        "/api/chat",
        json!({ "message": "Hallo", "modelConfig": { "provider": "anthropic" } })
    ).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("anthropic"));
}

#[tokio::test]
async fn chat_rejects_malformed_session_ids() {
    let dir = TempDir::new().unwrap();
    let app = app(&dir).await;

    let (status, _) = post_json(
        &app,
        "/api/chat",
        json!({ "message": "Hallo", "sessionId": "../escape" })
    ).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn chat_with_session_id_persists_the_conversation() {
    let dir = TempDir::new().unwrap();
    let app = app(&dir).await;

    let (status, _) = post_json(
        &app,
        "/api/chat",
        json!({ "message": "Wie nehme ich Maß?", "sessionId": "visitor-1" })
    ).await;
    assert_eq!(status, StatusCode::OK);

    let (status, session) = get_json(&app, "/api/sessions/visitor-1").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(session["id"], "visitor-1");
    assert_eq!(session["title"], "Wie nehme ich Maß?");
    assert_eq!(session["messages"].as_array().unwrap().len(), 2);

    let (status, listing) = get_json(&app, "/api/sessions").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listing.as_array().unwrap().len(), 1);
    assert_eq!(listing[0]["messageCount"], 2);

    let (status, stats) = get_json(&app, "/api/sessions/visitor-1/stats").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stats["messageCount"], 2);
    assert_eq!(stats["userMessages"], 1);
    assert_eq!(stats["assistantMessages"], 1);
    assert!(stats["totalTokens"].as_u64().unwrap() > 0);

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri("/api/sessions/visitor-1")
                .body(Body::empty())
                .unwrap()
        ).await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let (status, _) = get_json(&app, "/api/sessions/visitor-1").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn unknown_session_lookups_are_not_found() {
    let dir = TempDir::new().unwrap();
    let app = app(&dir).await;

    let (status, _) = get_json(&app, "/api/sessions/never-seen").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = get_json(&app, "/api/sessions/never-seen/stats").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn session_export_serves_json_csv_and_text() {
    let dir = TempDir::new().unwrap();
    let app = app(&dir).await;

    let (status, _) = post_json(
        &app,
        "/api/chat",
        json!({ "message": "Was ist ein Abnäher?", "sessionId": "visitor-2" })
    ).await;
    assert_eq!(status, StatusCode::OK);

    let (status, content_type, body) = get_raw(
        &app,
        "/api/sessions/visitor-2/export?format=json"
    ).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(content_type.as_deref(), Some("application/json"));
    let parsed: JsonValue = serde_json::from_str(&body).unwrap();
    assert_eq!(parsed["id"], "visitor-2");

    let (status, content_type, body) = get_raw(
        &app,
        "/api/sessions/visitor-2/export?format=csv"
    ).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(content_type.as_deref(), Some("text/csv; charset=utf-8"));
    assert!(body.starts_with("timestamp,role,content,totalTokens,estimatedCost\n"));

    // The pdf export renders as a plain-text transcript.
    let (status, content_type, body) = get_raw(
        &app,
        "/api/sessions/visitor-2/export?format=pdf"
    ).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(content_type.as_deref(), Some("text/plain; charset=utf-8"));
    assert!(body.contains("Was ist ein Abnäher?"));

    let (status, _, _) = get_raw(&app, "/api/sessions/visitor-2/export?format=xlsx").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn knowledge_add_reports_counts_and_status_reflects_them() {
    let dir = TempDir::new().unwrap();
    let app = app(&dir).await;

    let (status, body) = post_json(&app, "/api/knowledge-update", draping_source()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);

    let data = &body["data"];
    assert_eq!(data["action"], "add");
    assert_eq!(data["sourceId"], "kurs-1-drapieren");
    let chunks_added = data["chunksAdded"].as_u64().unwrap();
    assert!(chunks_added >= 1);
    assert_eq!(data["vectorsUpdated"], data["chunksAdded"]);
    assert!(!data["backupId"].as_str().unwrap().is_empty());

    let (status, info) = get_json(&app, "/api/knowledge-update?info=status").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(info["sourceCount"], 1);
    assert_eq!(info["chunkCount"].as_u64().unwrap(), chunks_added);
    assert_eq!(info["vectorCount"].as_u64().unwrap(), chunks_added);
    assert_eq!(info["backend"], "memory");
    assert_eq!(info["updateInProgress"], false);
}

#[tokio::test]
async fn add_then_remove_returns_the_chunk_count_to_zero() {
    let dir = TempDir::new().unwrap();
    let app = app(&dir).await;

    let (status, _) = post_json(&app, "/api/knowledge-update", draping_source()).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = post_json(
        &app,
        "/api/knowledge-update",
        json!({ "action": "remove", "sourceId": "kurs-1-drapieren" })
    ).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["data"]["chunksRemoved"].as_u64().unwrap() >= 1);

    let (_, info) = get_json(&app, "/api/knowledge-update?info=status").await;
    assert_eq!(info["sourceCount"], 0);
    assert_eq!(info["chunkCount"], 0);
    assert_eq!(info["vectorCount"], 0);
}

#[tokio::test]
async fn update_replaces_the_chunks_of_a_source() {
    let dir = TempDir::new().unwrap();
    let app = app(&dir).await;

    let (status, add_body) = post_json(&app, "/api/knowledge-update", draping_source()).await;
    assert_eq!(status, StatusCode::OK);
    let old_chunks = add_body["data"]["chunksAdded"].as_u64().unwrap();

    let mut updated = draping_source();
    updated["action"] = json!("update");
    updated["source"]["content"] = json!(
        "Die Moulage beginnt mit dem Aufstecken des Fadenlaufs. Der Stoff wird an der Puppe \
        ausgerichtet und mit Nadeln fixiert. Mehrweiten werden in Falten gelegt oder \
        weggebügelt. Anschließend markiert man Nahtlinien mit Kreide, nimmt die Teile ab \
        und überträgt sie auf Schnittpapier. Zum Schluss wird ein Probeteil aus Nessel \
        genäht und die Passform geprüft."
    );
    let (status, body) = post_json(&app, "/api/knowledge-update", updated).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["action"], "update");
    assert_eq!(body["data"]["chunksRemoved"].as_u64().unwrap(), old_chunks);
    let new_chunks = body["data"]["chunksAdded"].as_u64().unwrap();
    assert!(new_chunks >= 1);

    let (_, info) = get_json(&app, "/api/knowledge-update?info=status").await;
    assert_eq!(info["sourceCount"], 1);
    assert_eq!(info["chunkCount"].as_u64().unwrap(), new_chunks);
    assert_eq!(info["vectorCount"].as_u64().unwrap(), new_chunks);
}

#[tokio::test]
async fn removing_an_unknown_source_suggests_the_nearest_id() {
    let dir = TempDir::new().unwrap();
    let app = app(&dir).await;

    let (status, _) = post_json(&app, "/api/knowledge-update", draping_source()).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = post_json(
        &app,
        "/api/knowledge-update",
        json!({ "action": "remove", "sourceId": "kurs-1-drapiere" })
    ).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["success"], false);
    let errors = body["errors"].as_array().unwrap();
    assert!(errors[0].as_str().unwrap().contains("kurs-1-drapieren"));
}

#[tokio::test]
async fn adding_a_duplicate_source_is_rejected() {
    let dir = TempDir::new().unwrap();
    let app = app(&dir).await;

    let (status, _) = post_json(&app, "/api/knowledge-update", draping_source()).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = post_json(&app, "/api/knowledge-update", draping_source()).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
    assert!(body["message"].as_str().unwrap().contains("already exists"));
}

#[tokio::test]
async fn invalid_submissions_return_field_errors() {
    let dir = TempDir::new().unwrap();
    let app = app(&dir).await;

    let (status, body) = post_json(
        &app,
        "/api/knowledge-update",
        json!({
            "action": "add",
            "source": {
                "id": "Bad Id!",
                "title": "",
                "courseNumber": 0,
                "moduleNumber": 1,
                "content": "kurz"
            }
        })
    ).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
    assert!(body["errors"].as_array().unwrap().len() >= 2);
}

#[tokio::test]
async fn malicious_source_content_is_forbidden() {
    let dir = TempDir::new().unwrap();
    let app = app(&dir).await;

    let mut payload = draping_source();
    payload["source"]["content"] = json!("Normaler Text <script>steal()</script> und mehr Text.");
    let (status, body) = post_json(&app, "/api/knowledge-update", payload).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["success"], false);
    assert!(!body["errors"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn missing_source_document_is_rejected() {
    let dir = TempDir::new().unwrap();
    let app = app(&dir).await;

    let (status, body) = post_json(&app, "/api/knowledge-update", json!({ "action": "add" })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["message"].as_str().unwrap().contains("requires a source"));
}

#[tokio::test]
async fn restore_returns_the_knowledge_base_to_the_backed_up_state() {
    let dir = TempDir::new().unwrap();
    let app = app(&dir).await;

    let (status, first) = post_json(&app, "/api/knowledge-update", draping_source()).await;
    assert_eq!(status, StatusCode::OK);
    let first_chunks = first["data"]["chunksAdded"].as_u64().unwrap();

    // The backup taken before the second add snapshots the one-source state.
    let (status, second) = post_json(&app, "/api/knowledge-update", pattern_source()).await;
    assert_eq!(status, StatusCode::OK);
    let snapshot_id = second["data"]["backupId"].as_str().unwrap().to_string();

    let (status, restored) = post_json(
        &app,
        "/api/knowledge-update",
        json!({ "action": "restore", "backupId": snapshot_id })
    ).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(restored["data"]["action"], "restore");
    assert_eq!(restored["data"]["restoredFrom"].as_str().unwrap(), snapshot_id);

    let (_, info) = get_json(&app, "/api/knowledge-update?info=status").await;
    assert_eq!(info["sourceCount"], 1);
    assert_eq!(info["chunkCount"].as_u64().unwrap(), first_chunks);
    assert_eq!(info["vectorCount"].as_u64().unwrap(), first_chunks);

    let (status, backups) = get_json(&app, "/api/knowledge-update?info=backups").await;
    assert_eq!(status, StatusCode::OK);
    let backups = backups.as_array().unwrap();
    assert!(!backups.is_empty());
    assert!(backups[0]["reason"].as_str().unwrap().contains("before restore"));

    let (status, body) = post_json(
        &app,
        "/api/knowledge-update",
        json!({ "action": "restore", "backupId": "backup-20000101T000000-deadbeef" })
    ).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn statistics_break_down_by_course() {
    let dir = TempDir::new().unwrap();
    let app = app(&dir).await;

    let (status, _) = post_json(&app, "/api/knowledge-update", draping_source()).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = post_json(&app, "/api/knowledge-update", pattern_source()).await;
    assert_eq!(status, StatusCode::OK);

    let (status, stats) = get_json(&app, "/api/knowledge-update?info=statistics").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stats["sourceCount"], 2);
    assert!(stats["totalContentChars"].as_u64().unwrap() > 0);
    assert_eq!(stats["courses"]["1"]["sources"], 1);
    assert_eq!(stats["courses"]["2"]["sources"], 1);
}

#[tokio::test]
async fn unknown_info_view_is_rejected() {
    let dir = TempDir::new().unwrap();
    let app = app(&dir).await;

    let (status, body) = get_json(&app, "/api/knowledge-update?info=bogus").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("bogus"));
}
