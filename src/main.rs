//! Archer server
//!
//! Wires the model registry, capability registry, checkpoint store and
//! preference store into the orchestrator and serves the HTTP transport.

use archer::api::{create_router, AppState};
use archer::checkpoint::SqliteCheckpointStore;
use archer::config::ArcherConfig;
use archer::llm::ModelRegistry;
use archer::orchestrator::{AgentRegistry, Orchestrator};
use archer::preferences::FileUserPreferences;
use archer::tools::{CapabilityRegistry, InMemoryAuthorizer};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "archer=info,tower_http=info".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_span_list(false),
        )
        .init();

    let config = ArcherConfig::from_env();

    if let Some(parent) = config.db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    tracing::info!(path = %config.db_path.display(), "Opening checkpoint store");
    let checkpoints = Arc::new(SqliteCheckpointStore::open(&config.db_path)?);

    let models = ModelRegistry::new(&config.llm);
    if models.has_models() {
        tracing::info!(
            models = ?models.available_models(),
            default = %models.default_model_id(),
            "LLM registry initialized"
        );
    } else {
        tracing::warn!("No LLM API keys configured. Set OPENAI_API_KEY or MISTRAL_API_KEY.");
    }

    let authorizer = Arc::new(InMemoryAuthorizer::new(&config.auth_base_url)?);
    let capabilities = Arc::new(CapabilityRegistry::standard(authorizer.clone()));
    tracing::info!(tools = ?capabilities.tool_names(), "Capability registry initialized");

    let agents = AgentRegistry::new(models, capabilities, checkpoints, config.engine.clone());
    let preferences = Arc::new(FileUserPreferences::new(&config.data_dir));
    let orchestrator = Arc::new(Orchestrator::new(agents, preferences));

    if config.auth_complete_token.is_none() {
        tracing::warn!(
            "ARCHER_AUTH_COMPLETE_TOKEN not set; POST /auth/complete accepts any caller"
        );
    }
    let state = AppState::new(orchestrator, authorizer)
        .with_completion_token(config.auth_complete_token.as_deref());
    let app = create_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!(%addr, "Archer listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
