// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Meeting-Archiver Server
//!
//! Listens for meeting events and archives finished recordings to the
//! shared storage tree.

use meeting_archiver::{
    config::Config,
    db::JsonFileStore,
    services::{OwnerLookup, TokioScheduler},
    AppState,
};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize structured JSON logging
    init_logging();

    // Load configuration from environment
    let config = Config::from_env()?;
    tracing::info!(port = config.port, "Starting Meeting-Archiver");

    // Credential store
    let store = JsonFileStore::open(&config.token_file).await?;
    tracing::info!(path = %store.path().display(), "Credential store opened");

    tokio::fs::create_dir_all(&config.download_dir).await?;
    if !config.archive_root.is_dir() {
        tracing::warn!(
            path = %config.archive_root.display(),
            "Archive root not found; recordings will stay in the download directory"
        );
    }

    let state = Arc::new(AppState::new(
        config.clone(),
        Arc::new(store),
        Arc::new(TokioScheduler),
        owner_lookup(),
    ));

    // Build router
    let app = meeting_archiver::routes::create_router(state);

    // Start server
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(address = %addr, "Server listening");

    axum::serve(listener, app).await?;
    Ok(())
}

#[cfg(unix)]
fn owner_lookup() -> Option<Arc<dyn OwnerLookup>> {
    Some(Arc::new(meeting_archiver::services::archive::SystemOwners))
}

#[cfg(not(unix))]
fn owner_lookup() -> Option<Arc<dyn OwnerLookup>> {
    None
}

/// Initialize structured JSON logging.
fn init_logging() {
    let format = tracing_subscriber::fmt::layer()
        .json()
        .with_target(false)
        .with_current_span(true)
        .flatten_event(true);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("meeting_archiver=debug,info")),
        )
        .with(format)
        .init();
}
