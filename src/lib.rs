pub mod assistant;
pub mod cli;
pub mod config;
pub mod knowledge;
pub mod llm;
pub mod models;
pub mod pricing;
pub mod rag;
pub mod server;
pub mod sessions;
pub mod telemetry;
pub mod vector;

use assistant::{ initialize_embedding_client, CourseAssistant };
use cli::Args;
use knowledge::{ KnowledgeOptions, KnowledgeService };
use log::info;
use server::AppState;
use sessions::create_session_store;
use telemetry::InteractionLogger;
use vector::create_vector_store;

use std::error::Error;
use std::sync::Arc;
use std::time::Instant;

pub async fn run(args: Args) -> Result<(), Box<dyn Error + Send + Sync>> {
    info!("--- Core Configuration ---");
    info!("Server Address: {}", args.server_addr);
    info!("Default Chat Provider: {}", args.default_provider);
    info!("Embedding Provider: {}", args.embedding_provider);
    info!("Vector Store Type: {}", args.vector_type);
    info!("Session Store Type: {}", args.session_store);
    info!("Data Directory: {}", args.data_dir);
    info!("Prompts Path: {}", args.prompts_path);
    info!("Interaction Log: {}", if args.disable_interaction_log {
        "disabled"
    } else {
        "enabled"
    });
    info!("-------------------------");

    let embedding_client = initialize_embedding_client(&args)?;
    let vector_store = create_vector_store(&args).await?;

    let assistant = CourseAssistant::new(
        &args,
        embedding_client.clone(),
        vector_store.clone()
    ).await?;
    let knowledge = KnowledgeService::new(
        KnowledgeOptions::from_args(&args),
        vector_store,
        embedding_client
    ).await?;
    let sessions = create_session_store(&args)?;
    let telemetry = Arc::new(InteractionLogger::from_args(&args));

    let state = AppState {
        assistant,
        knowledge: Arc::new(knowledge),
        sessions,
        telemetry,
        max_message_chars: args.chat_max_message_chars,
        started_at: Instant::now(),
    };

    server::serve(&args, state).await
}
