pub mod api;

use crate::assistant::CourseAssistant;
use crate::cli::Args;
use crate::knowledge::KnowledgeService;
use crate::sessions::SessionStore;
use crate::telemetry::InteractionLogger;

use axum::routing::{ get, post };
use axum::Router;
use log::{ error, info };
use tower_http::cors::{ Any, CorsLayer };

use std::error::Error;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

#[derive(Clone)]
pub struct AppState {
    pub assistant: CourseAssistant,
    pub knowledge: Arc<KnowledgeService>,
    pub sessions: Arc<dyn SessionStore>,
    pub telemetry: Arc<InteractionLogger>,
    pub max_message_chars: usize,
    pub started_at: Instant,
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    Router::new()
        .route("/api/health", get(api::health))
        .route("/api/chat", post(api::chat))
        .route("/api/knowledge-update", post(api::knowledge_update).get(api::knowledge_info))
        .route("/api/sessions", get(api::list_sessions))
        .route("/api/sessions/{id}", get(api::get_session).delete(api::delete_session))
        .route("/api/sessions/{id}/stats", get(api::session_stats))
        .route("/api/sessions/{id}/export", get(api::export_session))
        .layer(cors)
        .with_state(state)
}

pub async fn serve(args: &Args, state: AppState) -> Result<(), Box<dyn Error + Send + Sync>> {
    let addr = args.server_addr
        .parse::<SocketAddr>()
        .map_err(|e| format!("Invalid server address '{}': {}", args.server_addr, e))?;
    let app = build_router(state);

    if args.enable_tls {
        let (cert_path, key_path) = match (&args.tls_cert_path, &args.tls_key_path) {
            (Some(cert_path), Some(key_path)) => (cert_path.clone(), key_path.clone()),
            _ => {
                error!("Both --tls-cert-path and --tls-key-path must be provided to enable TLS.");
                return Err("TLS enabled without certificate or key path".into());
            }
        };

        info!("TLS enabled. Loading certificate from '{}' and key from '{}'", cert_path, key_path);
        let tls_config = axum_server::tls_rustls::RustlsConfig
            ::from_pem_file(&cert_path, &key_path).await
            .map_err(|e| format!("Failed to load TLS certificate or key: {}", e))?;

        info!("HTTPS server listening on: https://{}", addr);
        axum_server::bind_rustls(addr, tls_config).serve(app.into_make_service()).await?;
    } else {
        info!("HTTP server listening on: http://{}", addr);
        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, app.into_make_service()).await?;
    }

    Ok(())
}
