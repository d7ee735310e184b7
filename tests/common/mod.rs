//! Common test utilities for E2E tests

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};
use fedgate::federation::{RsaCrypto, SignatureHeaders, sign_request};
use fedgate::{AppState, config};
use rsa::pkcs8::{EncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::{RsaPrivateKey, RsaPublicKey};
use tempfile::TempDir;
use tokio::net::TcpListener;

pub const LOCAL_DOMAIN: &str = "test.example.com";
pub const ADMIN: &str = "testuser";

/// Test server instance
pub struct TestServer {
    pub addr: String,
    pub state: AppState,
    pub _temp_dir: TempDir,
    pub client: reqwest::Client,
}

/// Build a configuration pointing at `db_path`
pub fn test_config(
    db_path: std::path::PathBuf,
    backend: config::KeyCacheBackend,
) -> config::AppConfig {
    config::AppConfig {
        server: config::ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0, // Let OS assign port
            domain: LOCAL_DOMAIN.to_string(),
            protocol: "https".to_string(),
        },
        database: config::DatabaseConfig { path: db_path },
        instance: config::InstanceConfig {
            admin_contact: Some("https://test.example.com/about".to_string()),
        },
        admin: config::AdminConfig {
            username: ADMIN.to_string(),
        },
        federation: config::FederationConfig {
            fetch_timeout_ms: 2000,
            fetch_retries: 1,
            max_clock_skew_secs: 300,
            required_signed_headers: vec![
                "(request-target)".to_string(),
                "host".to_string(),
                "date".to_string(),
            ],
            // The remote actor fixture listens on loopback.
            allow_private_hosts: true,
        },
        key_cache: config::KeyCacheConfig {
            backend,
            ttl_seconds: 3600,
            prune_interval_seconds: 600,
        },
        logging: config::LoggingConfig {
            level: "info".to_string(),
            format: "pretty".to_string(),
        },
    }
}

impl TestServer {
    /// Create a new test server instance with the SQLite key cache
    pub async fn new() -> Self {
        Self::with_key_cache(config::KeyCacheBackend::Sqlite).await
    }

    pub async fn with_key_cache(backend: config::KeyCacheBackend) -> Self {
        // Create temporary directory for test database
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");

        // Initialize app state
        let state = AppState::new(test_config(db_path, backend)).await.unwrap();

        // Create HTTP client
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .unwrap();

        // Bind to random port
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let addr_str = format!("http://{}", addr);

        // Build router
        let app = fedgate::build_router(state.clone());

        // Spawn server in background
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            addr: addr_str,
            state,
            _temp_dir: temp_dir,
            client,
        }
    }

    /// Get base URL for API requests
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.addr, path)
    }

    /// Local admin actor URI
    pub fn admin_uri(&self) -> String {
        format!("https://{}/ap/users/{}", LOCAL_DOMAIN, ADMIN)
    }

    /// POST `body` to `path`, signed by `signer`
    pub async fn signed_post(
        &self,
        path: &str,
        body: &[u8],
        signer: &RemoteActor,
    ) -> reqwest::Response {
        let signed = signer.sign("POST", &self.url(path), body);
        self.client
            .post(self.url(path))
            .header("content-type", "application/activity+json")
            .header("date", &signed.date)
            .header("digest", signed.digest.as_deref().unwrap_or_default())
            .header("signature", &signed.signature)
            .body(body.to_vec())
            .send()
            .await
            .unwrap()
    }
}

/// A remote ActivityPub actor served from loopback
pub struct RemoteActor {
    pub actor_uri: String,
    pub key_id: String,
    pub private_pem: String,
    /// Number of times the actor document was fetched
    pub fetches: Arc<AtomicUsize>,
}

#[derive(Clone)]
struct RemoteState {
    base: String,
    public_pem: Arc<String>,
    fetches: Arc<AtomicUsize>,
}

fn generate_keypair() -> (String, String) {
    let mut rng = rand::thread_rng();
    let private_key = RsaPrivateKey::new(&mut rng, 1024).unwrap();
    let public_key = RsaPublicKey::from(&private_key);
    (
        private_key.to_pkcs8_pem(LineEnding::LF).unwrap().to_string(),
        public_key.to_public_key_pem(LineEnding::LF).unwrap(),
    )
}

impl RemoteActor {
    /// Serve `alice` at `http://127.0.0.1:<port>/users/alice`
    pub async fn spawn() -> Self {
        let (private_pem, public_pem) = generate_keypair();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let fetches = Arc::new(AtomicUsize::new(0));

        let remote = RemoteState {
            base: base.clone(),
            public_pem: Arc::new(public_pem),
            fetches: fetches.clone(),
        };
        let app = Router::new()
            .route("/users/:name", get(actor_document))
            .with_state(remote);

        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let actor_uri = format!("{}/users/alice", base);
        Self {
            key_id: format!("{}#main-key", actor_uri),
            actor_uri,
            private_pem,
            fetches,
        }
    }

    /// Sign a request with this actor's key
    pub fn sign(&self, method: &str, url: &str, body: &[u8]) -> SignatureHeaders {
        sign_request(
            method,
            url,
            Some(body),
            &self.private_pem,
            &self.key_id,
            &RsaCrypto,
        )
        .unwrap()
    }

    /// A `Follow` of `object` by this actor
    pub fn follow(&self, object: &str) -> Vec<u8> {
        serde_json::to_vec(&serde_json::json!({
            "@context": "https://www.w3.org/ns/activitystreams",
            "type": "Follow",
            "actor": self.actor_uri,
            "object": object,
        }))
        .unwrap()
    }

    /// Same actor URI, but signing with a key the document does not advertise
    pub fn impostor(&self) -> Self {
        let (private_pem, _) = generate_keypair();
        Self {
            actor_uri: self.actor_uri.clone(),
            key_id: self.key_id.clone(),
            private_pem,
            fetches: self.fetches.clone(),
        }
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

async fn actor_document(
    State(remote): State<RemoteState>,
    Path(name): Path<String>,
) -> Json<serde_json::Value> {
    remote.fetches.fetch_add(1, Ordering::SeqCst);
    let actor = format!("{}/users/{}", remote.base, name);

    Json(serde_json::json!({
        "@context": [
            "https://www.w3.org/ns/activitystreams",
            "https://w3id.org/security/v1"
        ],
        "id": actor,
        "type": "Person",
        "preferredUsername": name,
        "inbox": format!("{}/inbox", actor),
        "publicKey": {
            "id": format!("{}#main-key", actor),
            "owner": actor,
            "publicKeyPem": remote.public_pem.as_str(),
        }
    }))
}
