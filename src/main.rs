use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tower::make::Shared;
use tracing_subscriber::EnvFilter;

use project_chat::auth::jwt::JwtService;
use project_chat::config::AppConfig;
use project_chat::db;
use project_chat::genai::GeminiClient;
use project_chat::routes::create_router;
use project_chat::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    let config = AppConfig::from_env()?;
    tracing::info!(
        database_url = %config.redacted_database_url(),
        pool_size = config.database_max_pool_size,
        server_host = %config.server_host,
        server_port = config.server_port,
        gemini_model = %config.gemini_model,
        staging_dir = %config.upload_staging_dir.display(),
        google_oauth_enabled = config.google_oauth.is_some(),
        "loaded configuration"
    );

    let pool = db::init_pool_with_size(&config.database_url, config.database_max_pool_size)?;
    let applied = db::run_migrations(&pool)?;
    tracing::info!(applied, "database migrations up to date");

    tokio::fs::create_dir_all(&config.upload_staging_dir)
        .await
        .with_context(|| {
            format!(
                "failed to create upload staging dir {}",
                config.upload_staging_dir.display()
            )
        })?;

    let gemini = Arc::new(GeminiClient::from_config(&config)?);
    let jwt = JwtService::from_config(&config)?;
    let listen_addr: SocketAddr =
        format!("{}:{}", config.server_host, config.server_port).parse()?;

    let state = AppState::new(pool, config, gemini.clone(), gemini, jwt);
    let router = create_router(state);

    let listener = TcpListener::bind(listen_addr).await?;
    tracing::info!("listening on {}", listen_addr);

    axum::serve(listener, Shared::new(router)).await?;
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}
