use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    // --- Server Args ---
    /// Host address and port for the HTTP server to listen on.
    #[arg(long, env = "SERVER_ADDR", default_value = "127.0.0.1:4000")]
    pub server_addr: String,

    /// Enable HTTPS. Requires --tls-cert-path and --tls-key-path.
    #[arg(long, env = "ENABLE_TLS", default_value = "false")]
    pub enable_tls: bool,

    /// Path to the TLS certificate file (PEM format).
    #[arg(long, env = "TLS_CERT_PATH")]
    pub tls_cert_path: Option<String>,

    /// Path to the TLS private key file (PEM format).
    #[arg(long, env = "TLS_KEY_PATH")]
    pub tls_key_path: Option<String>,

    /// Maximum accepted chat message length in characters.
    #[arg(long, env = "CHAT_MAX_MESSAGE_CHARS", default_value = "2000")]
    pub chat_max_message_chars: usize,

    // --- Chat Model Provider Args ---
    /// Provider used when a request names none (openai, anthropic, gemini, mock).
    #[arg(long, env = "DEFAULT_PROVIDER", default_value = "openai")]
    pub default_provider: String,

    /// Model used when a request names none (e.g., gpt-4o-mini, claude-3-5-haiku-20241022).
    #[arg(long, env = "DEFAULT_MODEL")] // No default, rely on adapter defaults if None
    pub default_model: Option<String>,

    /// Sampling temperature used when a request names none.
    #[arg(long, env = "DEFAULT_TEMPERATURE", default_value = "0.7")]
    pub default_temperature: f32,

    /// Completion token ceiling used when a request names none.
    #[arg(long, env = "DEFAULT_MAX_TOKENS", default_value = "1024")]
    pub default_max_tokens: u32,

    /// API key for OpenAI. The provider is only registered when a key is set.
    #[arg(long, env = "OPENAI_API_KEY", default_value = "")]
    pub openai_api_key: String,

    /// Base URL override for the OpenAI API.
    #[arg(long, env = "OPENAI_BASE_URL")]
    pub openai_base_url: Option<String>,

    /// API key for Anthropic. The provider is only registered when a key is set.
    #[arg(long, env = "ANTHROPIC_API_KEY", default_value = "")]
    pub anthropic_api_key: String,

    /// Base URL override for the Anthropic API.
    #[arg(long, env = "ANTHROPIC_BASE_URL")]
    pub anthropic_base_url: Option<String>,

    /// API key for Google Gemini. The provider is only registered when a key is set.
    #[arg(long, env = "GEMINI_API_KEY", default_value = "")]
    pub gemini_api_key: String,

    /// Base URL override for the Gemini API.
    #[arg(long, env = "GEMINI_BASE_URL")]
    pub gemini_base_url: Option<String>,

    // --- Embedding Provider Args ---
    /// Provider for text embeddings (openai, mock).
    #[arg(long, env = "EMBEDDING_PROVIDER", default_value = "openai")]
    pub embedding_provider: String,

    /// Model name for text embeddings (e.g., text-embedding-3-small).
    #[arg(long, env = "EMBEDDING_MODEL")] // No default, rely on adapter defaults if None
    pub embedding_model: Option<String>,

    /// API key for the embedding provider. Defaults to the matching chat key if empty.
    #[arg(long, env = "EMBEDDING_API_KEY", default_value = "")]
    pub embedding_api_key: String,

    // --- Retrieval Args ---
    /// Number of chunks retrieved per chat query.
    #[arg(long, env = "RAG_LIMIT", default_value = "5")]
    pub rag_limit: usize,

    /// Minimum relevance score for a retrieved chunk to be cited (0.0 to 1.0).
    #[arg(long, env = "SCORE_THRESHOLD", default_value = "0.35")]
    pub score_threshold: f32,

    /// Path to the prompt configuration file.
    #[arg(long, env = "PROMPTS_PATH", default_value = "json/prompts.json")]
    pub prompts_path: String,

    // --- Vector Store Args ---
    /// Vector database type (chroma, memory).
    #[arg(short = 't', long, env = "VECTOR_TYPE", default_value = "chroma")]
    pub vector_type: String,

    /// ChromaDB endpoint.
    #[arg(long, env = "CHROMA_URL", default_value = "http://localhost:8000")]
    pub chroma_url: String,

    /// API key/token for ChromaDB authentication.
    #[arg(short = 'k', long, env = "CHROMA_API_KEY", default_value = "")]
    pub chroma_api_key: String,

    /// Tenant name for multi-tenant ChromaDB deployments.
    #[arg(long, env = "CHROMA_TENANT", default_value = "default_tenant")]
    pub chroma_tenant: String,

    /// Target database name inside ChromaDB.
    #[arg(long, env = "CHROMA_DATABASE", default_value = "default_database")]
    pub chroma_database: String,

    /// Collection name for the course material vectors.
    #[arg(long, env = "VECTOR_COLLECTION", default_value = "course_material")]
    pub collection: String,

    // --- Knowledge Base Args ---
    /// Directory for persisted state (knowledge base, backups, sessions).
    #[arg(long, env = "DATA_DIR", default_value = "data")]
    pub data_dir: String,

    /// Number of knowledge backups kept before the oldest are pruned.
    #[arg(long, env = "BACKUP_RETENTION", default_value = "10")]
    pub backup_retention: usize,

    /// Maximum accepted source document length in characters.
    #[arg(long, env = "KNOWLEDGE_MAX_CONTENT_CHARS", default_value = "200000")]
    pub knowledge_max_content_chars: usize,

    /// Chunk size ceiling in characters.
    #[arg(long, env = "CHUNK_MAX_CHARS", default_value = "1200")]
    pub chunk_max_chars: usize,

    /// Characters of trailing context carried into the next chunk.
    #[arg(long, env = "CHUNK_OVERLAP", default_value = "200")]
    pub chunk_overlap: usize,

    // --- Session Store Args ---
    /// Conversation store type (file, memory).
    #[arg(long, env = "SESSION_STORE", default_value = "file")]
    pub session_store: String,

    // --- Logging Args ---
    /// Directory for the daily JSON-lines interaction logs.
    #[arg(long, env = "LOG_DIR", default_value = "logs")]
    pub log_dir: String,

    /// Turn off the chat and knowledge-update interaction logs.
    #[arg(long, env = "DISABLE_INTERACTION_LOG", default_value = "false")]
    pub disable_interaction_log: bool,
}
