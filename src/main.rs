//! Agora - philosopher chat for the classroom
//!
//! A Rust backend where students converse with AI philosopher personas,
//! get follow-up question suggestions, and export the transcript to PDF.

mod api;
mod conversation;
mod export;
mod llm;
mod prefs;
mod runtime;
mod session;
mod suggestions;
mod topics;

#[cfg(test)]
mod testing;

use api::{router, AppState};
use llm::{ChatBackend, GeminiConfig};
use prefs::PrefsStore;
use runtime::ConversationManager;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use suggestions::SuggestionGenerator;
use topics::TopicCatalog;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "agora=info,tower_http=debug".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_span_list(false),
        )
        .init();

    // Configuration
    let db_path = std::env::var("AGORA_DB_PATH").unwrap_or_else(|_| {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
        format!("{home}/.agora/agora.db")
    });

    let port: u16 = std::env::var("AGORA_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8000);

    // Ensure database directory exists
    if let Some(parent) = PathBuf::from(&db_path).parent() {
        std::fs::create_dir_all(parent)?;
    }

    tracing::info!(path = %db_path, "Opening preference database");
    let prefs = PrefsStore::open(&PathBuf::from(&db_path))?;

    // Gemini backend, or None when no credential is configured. The server
    // still runs; turns answer with setup instructions instead.
    let gemini = GeminiConfig::from_env();
    let backend: Option<Arc<dyn ChatBackend>> = match gemini.client() {
        Some(client) => {
            tracing::info!(model = client.model_id(), "Gemini backend initialized");
            Some(Arc::new(client))
        }
        None => {
            tracing::warn!("No Gemini API key configured. Set GEMINI_API_KEY.");
            None
        }
    };

    let topics = Arc::new(TopicCatalog::builtin());
    tracing::info!(topics = topics.all().len(), "Topic catalog loaded");

    let state = AppState {
        conversations: Arc::new(ConversationManager::new(
            backend.clone(),
            Arc::new(SuggestionGenerator::new(backend)),
        )),
        topics,
        prefs,
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let compression = CompressionLayer::new()
        .gzip(true)
        .br(true)
        .deflate(true)
        .zstd(true);

    let app = router(state).layer(cors).layer(compression);

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("Agora server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
