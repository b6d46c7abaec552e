pub mod api; // HTTP adapter
pub mod config;
pub mod core_state; // Immutable shared cascade context
pub mod pipeline;

use std::sync::Arc;

use thiserror::Error;
use tracing_subscriber::EnvFilter;

/// Anything that stops the server from starting.
#[derive(Error, Debug)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] config::ConfigError),
    #[error(transparent)]
    Library(#[from] pipeline::library::LibraryError),
    #[error(transparent)]
    Core(#[from] core_state::CoreError),
    #[error(transparent)]
    Server(#[from] api::ServerError),
    #[error("Model loading task failed: {0}")]
    Loading(#[from] tokio::task::JoinError),
    #[error("Cannot listen for shutdown signal: {0}")]
    Signal(#[source] std::io::Error),
}

/// Load configuration and models, then serve until Ctrl-C.
pub async fn run() -> Result<(), StartupError> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config::default_log_filter())),
        )
        .init();

    tracing::info!("{} starting v{}", config::APP_NAME, config::APP_VERSION);

    let config = config::CascadeConfig::load()?;
    let bind = config.bind_address;
    let library = pipeline::library::default_library()?;

    // Model loading reads every stage checkpoint; keep it off the runtime threads.
    let state = tokio::task::spawn_blocking(move || core_state::CoreState::initialize(config, library))
        .await??;

    let mut server = api::start_server_on(Arc::new(state), bind).await?;
    tracing::info!(addr = %server.session.server_addr, "Serving cascade");

    tokio::signal::ctrl_c().await.map_err(StartupError::Signal)?;
    server.shutdown();
    server.stopped().await;
    Ok(())
}
