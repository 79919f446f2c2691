use anyhow::{Context, Result};
use quotaguard::api::{create_admin_router, AdminAppState};
use quotaguard::config::{load_config, QuotaguardConfig};
use quotaguard::QuotaService;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "quotaguard=info".into()),
        )
        .init();

    info!("quotaguard starting...");

    let config = match std::env::var("QUOTAGUARD_CONFIG") {
        Ok(path) => {
            info!(path = %path, "Loading configuration");
            load_config(&path)?
        }
        Err(_) => {
            info!("QUOTAGUARD_CONFIG not set, using defaults");
            QuotaguardConfig::default()
        }
    }
    .with_env_overrides();

    let service = QuotaService::new(
        &config.quota,
        Duration::from_secs(config.watcher.poll_interval_seconds.max(1)),
    );
    info!(
        enabled = config.quota.enabled,
        admin_token = config.api.admin_token.is_some(),
        "Quota service initialized"
    );

    let watcher = service.spawn_watcher();

    let app = create_admin_router(AdminAppState {
        tree: Arc::clone(service.tree()),
        store: service.store().clone(),
        admin_token: config.api.admin_token.clone(),
    });

    let listener = tokio::net::TcpListener::bind(&config.api.listen_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.api.listen_addr))?;
    info!(addr = %config.api.listen_addr, "Admin API listening");

    axum::serve(listener, app).await.context("Admin API server failed")?;

    watcher.abort();
    Ok(())
}
