//! Fedgate - Federated request authentication and identity resolution
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      API Layer (Axum)                        │
//! │  - Signed ActivityPub inboxes                               │
//! │  - Account lookup endpoints                                 │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//! ┌──────────────────────────────┬──────────────────────────────┐
//! │          Federation          │           Identity           │
//! │  - Signature parsing         │  - Handle parsing            │
//! │  - Remote key resolution     │  - Identifier resolution     │
//! │  - Signature verification    │  - Local id generation       │
//! └──────────────────────────────┴──────────────────────────────┘
//!                              │
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Data Layer                              │
//! │  - SQLite (sqlx): actors, public key cache                  │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - `api`: HTTP handlers
//! - `federation`: HTTP Signatures and remote keys
//! - `identity`: Identifier translation and id allocation
//! - `data`: Database layer
//! - `config`: Configuration management
//! - `error`: Error types
//! - `metrics`: Prometheus instruments

pub mod api;
pub mod config;
pub mod data;
pub mod error;
pub mod federation;
pub mod identity;
pub mod metrics;

use std::sync::Arc;
use std::time::Duration;

use federation::{
    Authenticator, CryptoProvider, HttpFetch, KeyCache, KeyResolver, MemoryKeyCache,
    ReqwestFetcher, RsaCrypto,
};
use identity::{IdGenerator, IdentityResolver, SystemClock};

/// Application state shared across all handlers
///
/// This struct is cloned for each request and contains
/// shared resources like the database pool and key cache.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration
    pub config: Arc<config::AppConfig>,

    /// Database connection pool
    pub db: Arc<data::Database>,

    /// Account identifier resolution
    pub identity: IdentityResolver,

    /// Inbound HTTP Signature authentication
    pub authenticator: Authenticator,

    /// Public key cache (absent when disabled)
    pub key_cache: Option<Arc<dyn KeyCache>>,
}

impl AppState {
    /// Initialize application state with the production HTTP transport
    ///
    /// # Errors
    /// Returns error if any initialization step fails
    pub async fn new(config: config::AppConfig) -> Result<Self, error::AppError> {
        let fetcher = Arc::new(ReqwestFetcher::from_config(&config)?);
        Self::with_fetcher(config, fetcher).await
    }

    /// Initialize application state with a caller-supplied transport
    ///
    /// # Steps
    /// 1. Connect to SQLite database
    /// 2. Initialize key cache
    /// 3. Wire key resolver and authenticator
    /// 4. Record the local admin actor
    pub async fn with_fetcher(
        config: config::AppConfig,
        fetcher: Arc<dyn HttpFetch>,
    ) -> Result<Self, error::AppError> {
        tracing::info!("Initializing application state...");

        let crypto: Arc<dyn CryptoProvider> = Arc::new(RsaCrypto);

        // 1. Connect to SQLite database
        let ids = IdGenerator::new(Arc::new(SystemClock), crypto.clone());
        let db = Arc::new(
            data::Database::connect(&config.database.path, &config.server.domain, ids).await?,
        );
        tracing::info!("Database connected");

        // 2. Initialize key cache
        let key_cache = build_key_cache(&config.key_cache, &db);
        tracing::info!(backend = ?config.key_cache.backend, "Key cache initialized");

        // 3. Wire key resolver and authenticator
        let user_agent = federation::federation_user_agent(&config.admin_contact());
        let keys = KeyResolver::new(fetcher, crypto.clone(), key_cache.clone(), &user_agent)?;
        let authenticator = Authenticator::new(keys, crypto, db.clone(), &config.federation);
        let identity = IdentityResolver::new(db.clone(), config.server.domain.clone());

        // 4. Record the local admin actor
        let admin = db
            .ensure_local_actor(
                &config.admin.username,
                &config.server.actor_url(&config.admin.username),
            )
            .await?;
        tracing::info!(
            username = %config.admin.username,
            local_id = %admin.local_id,
            "Admin actor ready"
        );

        tracing::info!("Application state initialized successfully");

        Ok(Self {
            config: Arc::new(config),
            db,
            identity,
            authenticator,
            key_cache,
        })
    }

    /// Drop expired key cache entries. Returns how many were removed.
    pub async fn prune_key_cache(&self) -> Result<u64, error::AppError> {
        match &self.key_cache {
            Some(cache) => cache.prune_expired().await,
            None => Ok(0),
        }
    }
}

fn build_key_cache(
    config: &config::KeyCacheConfig,
    db: &data::Database,
) -> Option<Arc<dyn KeyCache>> {
    let cache: Arc<dyn KeyCache> = match config.backend {
        config::KeyCacheBackend::Sqlite => {
            let ttl = chrono::Duration::seconds(config.ttl_seconds as i64);
            Arc::new(data::SqliteKeyCache::new(db.pool().clone(), ttl))
        }
        config::KeyCacheBackend::Memory => {
            Arc::new(MemoryKeyCache::new(Duration::from_secs(config.ttl_seconds)))
        }
        config::KeyCacheBackend::None => return None,
    };
    Some(cache)
}

/// Maximum accepted request body (inbound activities).
const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Build the Axum router with all routes.
///
/// This is shared by the binary and integration tests to keep route
/// composition consistent across environments.
pub fn build_router(state: AppState) -> axum::Router {
    use axum::Router;
    use tower_http::{limit::RequestBodyLimitLayer, trace::TraceLayer};

    Router::new()
        .route("/health", axum::routing::get(health_check))
        .merge(api::activitypub_router())
        .merge(api::accounts_router())
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
        .merge(api::metrics_router())
}

async fn health_check() -> &'static str {
    "OK"
}
