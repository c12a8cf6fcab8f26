//! Main Entrypoint for the Feynman Tutor API Service
//!
//! This binary is responsible for:
//! 1. Loading configuration from the environment.
//! 2. Initializing the database connection pool and running migrations.
//! 3. Wiring the generation and retrieval clients into the turn orchestrator.
//! 4. Constructing the Axum router and applying middleware.
//! 5. Starting the web server and handling graceful shutdown.

use anyhow::Context;
use async_openai::config::OpenAIConfig;
use feynman_tutor_api::{
    config::{Config, Provider},
    db::Db,
    router::create_router,
    state::AppState,
};
use feynman_tutor_core::{
    TurnOrchestrator,
    llm_client::{GenerationClient, OllamaClient, OpenAICompatibleClient},
    retrieval::{HttpRetrievalClient, NoRetrieval, RetrievalService},
};
use sqlx::PgPool;
use std::{collections::HashMap, fs, net::SocketAddr, path::Path, sync::Arc};
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

/// Listens for the `Ctrl+C` signal to gracefully shut down the server.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
    info!("Received shutdown signal. Shutting down gracefully...");
}

/// Loads `*.md` prompt overrides from a directory. A missing directory means no overrides.
fn load_prompts(prompts_path: &Path) -> anyhow::Result<HashMap<String, String>> {
    let mut prompts = HashMap::new();
    if !prompts_path.is_dir() {
        return Ok(prompts);
    }
    for entry in fs::read_dir(prompts_path)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_file() && path.extension().and_then(|s| s.to_str()) == Some("md") {
            let prompt_key = path
                .file_stem()
                .and_then(|s| s.to_str())
                .context("Could not get file stem")?
                .to_string();
            let content = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read prompt {}", path.display()))?;
            prompts.insert(prompt_key, content);
        }
    }
    Ok(prompts)
}

fn generation_client(config: &Config) -> anyhow::Result<Arc<dyn GenerationClient>> {
    let client: Arc<dyn GenerationClient> = match &config.provider {
        Provider::Ollama => {
            info!(base_url = %config.ollama_base_url, "Using Ollama provider.");
            Arc::new(OllamaClient::new(
                config.ollama_base_url.clone(),
                config.chat_model.clone(),
            ))
        }
        Provider::OpenAI => {
            info!("Using OpenAI provider.");
            let api_key = config
                .openai_api_key
                .as_ref()
                .context("OPENAI_API_KEY is required for the openai provider")?;
            let openai_config = OpenAIConfig::new()
                .with_api_key(api_key)
                .with_api_base("https://api.openai.com/v1");
            Arc::new(OpenAICompatibleClient::new(
                openai_config,
                config.chat_model.clone(),
            ))
        }
        Provider::Gemini => {
            info!("Using Gemini provider.");
            let api_key = config
                .gemini_api_key
                .as_ref()
                .context("GEMINI_API_KEY is required for the gemini provider")?;
            let openai_config = OpenAIConfig::new()
                .with_api_key(api_key)
                .with_api_base("https://generativelanguage.googleapis.com/v1beta/openai");
            Arc::new(OpenAICompatibleClient::new(
                openai_config,
                config.chat_model.clone(),
            ))
        }
    };
    Ok(client)
}

fn retrieval_service(config: &Config) -> Arc<dyn RetrievalService> {
    match &config.retrieval_url {
        Some(url) => {
            info!(%url, "Grounding turns with the retrieval service.");
            Arc::new(HttpRetrievalClient::new(url.clone()))
        }
        None => {
            warn!("RETRIEVAL_URL not set. Sessions will never be grounded in a corpus.");
            Arc::new(NoRetrieval)
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // --- 1. Load Configuration ---
    let config = Config::from_env().context("Failed to load configuration")?;

    // --- 2. Initialize Logging ---
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .init();
    info!("Configuration loaded. Initializing application state...");

    // --- 3. Initialize Database ---
    let pool = PgPool::connect(&config.database_url)
        .await
        .context("Failed to connect to database")?;
    let db = Arc::new(Db::new(pool));
    db.run_migrations().await?;
    info!("Database connection established and migrations are up-to-date.");

    // --- 4. Initialize the Orchestrator ---
    let prompts = load_prompts(&config.prompts_path)?;
    let mut orchestrator = TurnOrchestrator::new(
        generation_client(&config)?,
        retrieval_service(&config),
        db.clone(),
        db.clone(),
        config.tutor_settings(),
    );
    if let Some(policy) = prompts.get("tutor_policy") {
        info!(path = %config.prompts_path.display(), "Using tutor policy override.");
        orchestrator = orchestrator.with_base_policy(policy.clone());
    }

    let app_state = Arc::new(AppState {
        db,
        orchestrator: Arc::new(orchestrator),
        config: Arc::new(config.clone()),
    });

    // --- 5. Create Router and Apply Middleware ---
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = create_router(app_state).layer(cors);

    // --- 6. Start Server ---
    info!(
        provider = ?config.provider,
        model = %config.chat_model,
        bind_address = %config.bind_address,
        "Service configured. Starting server..."
    );
    let listener = tokio::net::TcpListener::bind(config.bind_address).await?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("Server has shut down.");
    Ok(())
}
