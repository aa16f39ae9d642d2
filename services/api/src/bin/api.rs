//! services/api/src/bin/api.rs

use api_lib::{
    adapters::{
        DbAdapter, FsBlobStore, HttpShortener, OpenAiImportAdapter, OpenAiTitleAdapter,
    },
    config::Config,
    error::ApiError,
    web::{router, state::AppState},
};
use async_openai::{config::OpenAIConfig, Client};
use axum::http::{
    header::{ACCEPT, CONTENT_TYPE},
    HeaderValue, Method,
};
use lesson_hub_core::{default_profile, LinkShortener, ScheduleProfile, SeedProfile};
use sqlx::postgres::PgPoolOptions;
use std::path::Path;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// The seed file if one is configured, otherwise the built-in default.
async fn load_seed_profile(path: Option<&Path>) -> Result<ScheduleProfile, ApiError> {
    let Some(path) = path else {
        return Ok(default_profile());
    };
    let json = tokio::fs::read_to_string(path).await?;
    let seed = SeedProfile::from_json(&json).map_err(|e| {
        ApiError::Internal(format!("Invalid seed profile {}: {}", path.display(), e))
    })?;
    info!("Loaded seed profile from {}", path.display());
    Ok(seed.into_profile())
}

#[tokio::main]
async fn main() -> Result<(), ApiError> {
    // --- 1. Load Configuration & Set Up Logging ---
    let config = Arc::new(Config::from_env()?);
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.log_level.to_string()))
        .with(tracing_subscriber::fmt::layer())
        .init();
    info!("Configuration loaded. Starting server...");

    // --- 2. Connect to Database & Run Migrations ---
    info!("Connecting to database...");
    let db_pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await?;
    let db_adapter = Arc::new(DbAdapter::new(db_pool));
    info!("Running database migrations...");
    db_adapter.run_migrations().await?;
    info!("Database migrations complete.");

    // --- 3. Initialize Service Adapters ---
    let ai_client = match &config.ai_api_key {
        Some(key) => Some(Client::with_config(
            OpenAIConfig::new()
                .with_api_key(key)
                .with_api_base(&config.ai_api_base),
        )),
        None => {
            info!("No AI API key configured; import and title suggestions are disabled.");
            None
        }
    };
    let importer = Arc::new(OpenAiImportAdapter::new(
        ai_client.clone(),
        config.import_model.clone(),
    ));
    let titles = Arc::new(OpenAiTitleAdapter::new(
        ai_client,
        config.title_model.clone(),
    ));
    let blobs = Arc::new(FsBlobStore::new(
        config.media_dir.clone(),
        &config.public_base_url,
    ));
    let shortener = config.shortener_url.clone().map(|template| {
        Arc::new(HttpShortener::new(reqwest::Client::new(), template)) as Arc<dyn LinkShortener>
    });
    let default_profile = load_seed_profile(config.seed_profile_path.as_deref()).await?;

    // --- 4. Build the Shared AppState ---
    let app_state = Arc::new(AppState {
        gateway: db_adapter.clone(),
        sessions: db_adapter,
        blobs,
        importer,
        titles,
        shortener,
        config: config.clone(),
        default_profile,
    });

    // --- 5. Create the Web Router ---
    let origin = config.allowed_origin.parse::<HeaderValue>().map_err(|e| {
        ApiError::Internal(format!("Invalid ALLOWED_ORIGIN '{}': {}", config.allowed_origin, e))
    })?;
    let cors = CorsLayer::new()
        .allow_origin(origin)
        .allow_credentials(true)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE, ACCEPT]);
    let app = router(app_state).layer(cors);

    // --- 6. Start the Server ---
    info!("Starting server on {}", config.bind_address);
    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
