//! Fedgate binary entry point

use std::time::Duration;

use fedgate::{AppState, config};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = config::AppConfig::load()?;
    init_tracing(&config.logging);

    tracing::info!(
        domain = %config.server.domain,
        protocol = %config.server.protocol,
        key_cache = ?config.key_cache.backend,
        "Starting Fedgate"
    );

    fedgate::metrics::init_metrics();

    let state = AppState::new(config.clone()).await?;
    let app = fedgate::build_router(state.clone());

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, public_url = %config.server.base_url(), "Listening");

    if state.key_cache.is_some() {
        spawn_key_cache_prune_task(state);
    }

    axum::serve(listener, app).await?;

    Ok(())
}

/// `RUST_LOG` wins over `logging.level`; `logging.format` picks pretty or json.
fn init_tracing(logging: &config::LoggingConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!("fedgate={},tower_http=debug", logging.level).into()
    });
    let registry = tracing_subscriber::registry().with(filter);

    if logging.format == "json" {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer().pretty()).init();
    }
}

/// Periodically drop expired entries from the shared key cache.
fn spawn_key_cache_prune_task(state: AppState) {
    let period = Duration::from_secs(state.config.key_cache.prune_interval_seconds.max(1));

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        // First tick fires immediately.
        interval.tick().await;

        loop {
            interval.tick().await;
            match state.prune_key_cache().await {
                Ok(removed) => tracing::debug!(removed, "Key cache pruned"),
                Err(error) => tracing::error!(%error, "Key cache pruning failed"),
            }
        }
    });

    tracing::info!(?period, "Key cache prune task spawned");
}
