//! Warden API server binary.

use std::net::SocketAddr;

use anyhow::Context;
use tracing::info;
use tracing_subscriber::EnvFilter;

use warden_api::{AppState, create_router};
use warden_core::RuntimeConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = RuntimeConfig::from_env();
    info!(
        bind_addr = %config.bind_addr,
        storage_path = %config.storage_path,
        "starting warden"
    );

    let state = AppState::build(&config)
        .await
        .context("failed to initialize application state")?;
    let router = create_router(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;
    info!(addr = %config.bind_addr, "listening");

    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .context("server error")?;

    Ok(())
}
