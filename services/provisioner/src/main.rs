//! Remote execution deployment API.
//!
//! Provisions per-group worker deployments on demand and tells clients how
//! to reach the shared broker.

use std::sync::Arc;

use anyhow::{Context, Result};
use rexec_provisioner::{
    api, auth::IdentityClient, cluster::KubeConnector, config, state::AppState, Provisioner,
};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let config = config::Config::from_env()?;

    // Prefer RUST_LOG, fall back to REXEC_LOG_LEVEL
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting rexec deployment API");
    info!(
        listen_addr = %config.listen_addr,
        assets_dir = %config.provisioner.assets_dir.display(),
        namespace_prefix = %config.provisioner.namespace_prefix,
        "Configuration loaded"
    );

    let identity = match &config.auth.api_url {
        Some(url) => {
            info!(url = %url, "Token validation enabled");
            Some(IdentityClient::new(url.clone()).context("failed to build identity client")?)
        }
        None => {
            warn!("AUTH_API_URL not set; callers are trusted to supply user_id");
            None
        }
    };

    let provisioner = Provisioner::new(config.provisioner.clone(), Arc::new(KubeConnector));
    let state = AppState::new(provisioner, identity, config.auth.clone(), config.root_path.clone());
    let app = api::create_router(state);

    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    info!(addr = %config.listen_addr, "Listening for connections");

    let server = axum::serve(listener, app).with_graceful_shutdown(async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for shutdown signal");
        }
        info!("Received shutdown signal");
    });

    if let Err(e) = server.await {
        error!(error = %e, "Server error");
        return Err(e.into());
    }

    info!("Deployment API shutdown complete");
    Ok(())
}
