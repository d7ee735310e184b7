//! Remote public key retrieval
//!
//! Fetches the actor document behind a signature's `keyId` and imports
//! `publicKey.publicKeyPem`. The transport is injected through [`HttpFetch`]
//! so the resolver can be exercised without a network.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use http::{HeaderMap, HeaderValue, StatusCode, header};
use serde::Deserialize;
use url::Url;

use super::crypto::{CryptoProvider, ImportedKey};
use super::key_cache::{CachedKey, KeyCache};
use super::signature::ParsedSignature;
use crate::config::AppConfig;
use crate::error::AppError;
use crate::metrics::{
    CACHE_HITS_TOTAL, CACHE_MISSES_TOTAL, KEY_FETCH_DURATION_SECONDS, KEY_FETCHES_TOTAL,
};

/// Product name advertised to remote peers.
pub const PRODUCT_NAME: &str = "Fedgate";
/// Mastodon API version this server is compatible with.
pub const MASTODON_COMPAT_VERSION: &str = "4.0.2";

const ACTIVITY_JSON: &str = "application/activity+json";

/// Largest actor document accepted from a peer.
pub const MAX_DOCUMENT_BYTES: usize = 1024 * 1024;
/// Redirects followed before a fetch is abandoned.
const MAX_REDIRECTS: usize = 3;

/// Build the federation User-Agent:
/// `"<product>/<version> (<compat-name>/<compat-version>; +<admin-contact>)"`.
pub fn federation_user_agent(admin_contact: &str) -> String {
    format!(
        "{}/{} (Mastodon/{}; +{})",
        PRODUCT_NAME,
        env!("CARGO_PKG_VERSION"),
        MASTODON_COMPAT_VERSION,
        admin_contact
    )
}

/// Response of an outbound fetch.
#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub status: StatusCode,
    pub body: Vec<u8>,
}

/// Generic outbound GET capability.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait HttpFetch: Send + Sync {
    /// GET `url` with `headers`. Transport failures are errors; any HTTP
    /// status (including 4xx/5xx) is a successful fetch.
    async fn get(&self, url: &Url, headers: &HeaderMap) -> Result<FetchResponse, AppError>;
}

/// Production transport backed by `reqwest`.
///
/// Bounds each attempt with a timeout, retries at most `retries` times on
/// transport errors or 5xx, and refuses loopback/private destinations.
/// Redirects are followed here rather than by `reqwest` so every hop passes
/// the destination check.
pub struct ReqwestFetcher {
    client: reqwest::Client,
    timeout: Duration,
    retries: u32,
    allow_private_hosts: bool,
}

impl ReqwestFetcher {
    pub fn new(
        timeout: Duration,
        retries: u32,
        allow_private_hosts: bool,
    ) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()?;

        Ok(Self {
            client,
            timeout,
            retries,
            allow_private_hosts,
        })
    }

    pub fn from_config(config: &AppConfig) -> Result<Self, AppError> {
        Self::new(
            Duration::from_millis(config.federation.fetch_timeout_ms),
            config.federation.fetch_retries,
            config.federation.allow_private_hosts,
        )
    }

    /// Refuse loopback/private destinations, literally or after DNS.
    async fn check_destination(&self, url: &Url) -> Result<(), AppError> {
        if self.allow_private_hosts {
            return Ok(());
        }

        let host = extract_actor_domain(url)?;
        let port = url
            .port_or_known_default()
            .ok_or_else(|| AppError::Validation("Missing port in actor URL".to_string()))?;

        // Hosts that look public may still resolve internally.
        validate_resolved_host_ips(&host, port).await
    }

    async fn attempt(&self, url: &Url, headers: &HeaderMap) -> Result<Hop, AppError> {
        let response = self
            .client
            .get(url.clone())
            .headers(headers.clone())
            .timeout(self.timeout)
            .send()
            .await?;

        let status = response.status();
        if status.is_redirection() {
            if let Some(location) = response.headers().get(header::LOCATION) {
                return Ok(Hop::Redirect(redirect_target(url, location)?));
            }
        }

        let body = read_capped(response, MAX_DOCUMENT_BYTES).await?;
        Ok(Hop::Done(FetchResponse { status, body }))
    }

    /// One hop, retried on transport errors or 5xx.
    async fn fetch_hop(&self, url: &Url, headers: &HeaderMap) -> Result<Hop, AppError> {
        let mut attempt = 0;
        loop {
            match self.attempt(url, headers).await {
                Ok(Hop::Done(response))
                    if response.status.is_server_error() && attempt < self.retries =>
                {
                    tracing::debug!(%url, status = %response.status, attempt, "Retrying key fetch");
                }
                Ok(hop) => return Ok(hop),
                Err(AppError::HttpClient(error)) if attempt < self.retries => {
                    tracing::debug!(%url, %error, attempt, "Retrying key fetch");
                }
                Err(error) => return Err(error),
            }
            attempt += 1;
        }
    }
}

/// Outcome of a single request.
#[derive(Debug)]
enum Hop {
    Done(FetchResponse),
    Redirect(Url),
}

#[async_trait]
impl HttpFetch for ReqwestFetcher {
    async fn get(&self, url: &Url, headers: &HeaderMap) -> Result<FetchResponse, AppError> {
        let mut target = url.clone();

        for _ in 0..=MAX_REDIRECTS {
            self.check_destination(&target).await?;

            match self.fetch_hop(&target, headers).await? {
                Hop::Done(response) => return Ok(response),
                Hop::Redirect(next) => {
                    tracing::debug!(from = %target, to = %next, "Following redirect");
                    target = next;
                }
            }
        }

        Err(AppError::KeyFetchFailure(format!(
            "Too many redirects fetching {}",
            url
        )))
    }
}

/// Resolve a `Location` header against the URL that returned it.
fn redirect_target(current: &Url, location: &HeaderValue) -> Result<Url, AppError> {
    let location = location
        .to_str()
        .map_err(|_| AppError::KeyFetchFailure("Non-ASCII redirect Location".to_string()))?;
    let next = current
        .join(location)
        .map_err(|e| AppError::KeyFetchFailure(format!("Invalid redirect Location: {}", e)))?;

    match next.scheme() {
        "http" | "https" => Ok(next),
        scheme => Err(AppError::KeyFetchFailure(format!(
            "Refusing redirect to {} URL",
            scheme
        ))),
    }
}

/// Read the body, failing once it grows past `limit` bytes.
async fn read_capped(mut response: reqwest::Response, limit: usize) -> Result<Vec<u8>, AppError> {
    let too_large = || AppError::KeyFetchFailure(format!("Actor document exceeds {} bytes", limit));

    if response
        .content_length()
        .is_some_and(|length| length > limit as u64)
    {
        return Err(too_large());
    }

    let mut body = Vec::new();
    while let Some(chunk) = response.chunk().await? {
        if body.len() + chunk.len() > limit {
            return Err(too_large());
        }
        body.extend_from_slice(&chunk);
    }

    Ok(body)
}

fn is_disallowed_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_multicast()
                || v4.is_unspecified()
        }
        IpAddr::V6(v6) => {
            v6.is_loopback()
                || v6.is_unique_local()
                || v6.is_unicast_link_local()
                || v6.is_multicast()
                || v6.is_unspecified()
        }
    }
}

fn is_disallowed_host(host: &str) -> bool {
    let normalized = host
        .trim_start_matches('[')
        .trim_end_matches(']')
        .trim_end_matches('.')
        .to_ascii_lowercase();
    if normalized == "localhost" || normalized.ends_with(".localhost") {
        return true;
    }

    normalized
        .parse::<IpAddr>()
        .map(is_disallowed_ip)
        .unwrap_or(false)
}

async fn validate_resolved_host_ips(host: &str, port: u16) -> Result<(), AppError> {
    let normalized = host.trim_end_matches('.').to_ascii_lowercase();

    let mut resolved_any = false;
    let lookup = tokio::net::lookup_host((normalized.as_str(), port))
        .await
        .map_err(|e| AppError::KeyFetchFailure(format!("Failed to resolve actor host: {}", e)))?;

    for addr in lookup {
        resolved_any = true;
        if is_disallowed_ip(addr.ip()) {
            return Err(AppError::Forbidden);
        }
    }

    if !resolved_any {
        return Err(AppError::KeyFetchFailure(
            "No DNS records for actor host".to_string(),
        ));
    }

    Ok(())
}

/// Extract and validate the remote actor host from a key ID URL.
///
/// This rejects non-HTTP(S) URLs and obvious local/private hosts.
pub fn extract_actor_domain(key_id: &Url) -> Result<String, AppError> {
    match key_id.scheme() {
        "http" | "https" => {}
        scheme => {
            return Err(AppError::Validation(format!(
                "Unsupported actor URL scheme: {}",
                scheme
            )));
        }
    }

    let host = key_id
        .host_str()
        .ok_or_else(|| AppError::Validation("Missing host in actor URL".to_string()))?
        .to_ascii_lowercase();

    if is_disallowed_host(&host) {
        return Err(AppError::Forbidden);
    }

    Ok(host)
}

/// The owner a document declares must be the one the key was fetched from.
///
/// A `#fragment` key lives inside its owner's document, so the owner is that
/// document. A standalone key document may name an owner on the same origin.
fn check_owner(key_id: &Url, document_url: &Url, owner: &Url) -> Result<(), AppError> {
    let bound = if key_id.fragment().is_some() {
        owner == document_url
    } else {
        owner.origin() == key_id.origin()
    };

    if bound {
        Ok(())
    } else {
        tracing::warn!(%key_id, %owner, "Key document names a foreign owner");
        Err(AppError::KeyImportFailure(format!(
            "Key {} cannot speak for {}",
            key_id, owner
        )))
    }
}

/// A resolved, imported public key.
#[derive(Debug, Clone)]
pub struct PublicKeyRecord {
    /// keyId the key was resolved for
    pub key_id: Url,
    /// Actor that owns the key (`publicKey.owner`)
    pub owner: Url,
    /// PEM-encoded public key
    pub pem: String,
    /// Imported key ready for verification
    pub key: ImportedKey,
    /// `preferredUsername` of the owning actor, when the fetched document
    /// was the actor itself
    pub preferred_username: Option<String>,
}

/// Where a resolved key came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeySource {
    Cache,
    Network,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ActorProfile {
    id: Option<String>,
    preferred_username: Option<String>,
    public_key: Option<ProfileKey>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProfileKey {
    id: Option<String>,
    owner: Option<String>,
    public_key_pem: Option<String>,
}

/// Resolves signature key ids to imported public keys.
///
/// Consults the key cache (when configured) before going to the network.
#[derive(Clone)]
pub struct KeyResolver {
    fetcher: Arc<dyn HttpFetch>,
    crypto: Arc<dyn CryptoProvider>,
    cache: Option<Arc<dyn KeyCache>>,
    request_headers: HeaderMap,
}

impl KeyResolver {
    /// Create a new resolver
    ///
    /// # Arguments
    /// * `fetcher` - Outbound transport
    /// * `crypto` - Key import capability
    /// * `cache` - Optional shared key cache
    /// * `user_agent` - Federation User-Agent (see [`federation_user_agent`])
    pub fn new(
        fetcher: Arc<dyn HttpFetch>,
        crypto: Arc<dyn CryptoProvider>,
        cache: Option<Arc<dyn KeyCache>>,
        user_agent: &str,
    ) -> Result<Self, AppError> {
        let mut request_headers = HeaderMap::new();
        request_headers.insert(header::ACCEPT, HeaderValue::from_static(ACTIVITY_JSON));
        request_headers.insert(
            header::USER_AGENT,
            HeaderValue::from_str(user_agent)
                .map_err(|e| AppError::Config(format!("Invalid User-Agent: {}", e)))?,
        );

        Ok(Self {
            fetcher,
            crypto,
            cache,
            request_headers,
        })
    }

    /// Resolve the key for a signature, preferring a fresh cache entry.
    pub async fn resolve(
        &self,
        parsed: &ParsedSignature,
    ) -> Result<(PublicKeyRecord, KeySource), AppError> {
        let key_id = parsed.key_id.as_str();

        if let Some(cache) = &self.cache {
            match cache.get(key_id).await {
                Ok(Some(cached)) => match self.record_from_cache(&parsed.key_id, cached) {
                    Ok(record) => {
                        CACHE_HITS_TOTAL.with_label_values(&["public_key"]).inc();
                        tracing::debug!(key_id, "Public key cache hit");
                        return Ok((record, KeySource::Cache));
                    }
                    Err(error) => {
                        tracing::warn!(key_id, %error, "Discarding unusable cached key");
                        self.invalidate(key_id).await;
                    }
                },
                Ok(None) => {}
                Err(error) => {
                    tracing::warn!(key_id, %error, "Key cache lookup failed; fetching");
                }
            }
            CACHE_MISSES_TOTAL.with_label_values(&["public_key"]).inc();
        }

        let record = self.fetch_key(parsed).await?;

        if let Some(cache) = &self.cache {
            let entry = CachedKey {
                key_id: key_id.to_string(),
                owner: record.owner.to_string(),
                pem: record.pem.clone(),
                preferred_username: record.preferred_username.clone(),
                cached_at: chrono::Utc::now(),
            };
            if let Err(error) = cache.put(entry).await {
                tracing::warn!(key_id, %error, "Failed to cache public key");
            }
        }

        Ok((record, KeySource::Network))
    }

    /// Drop a cached key (e.g. after a verification mismatch).
    pub async fn invalidate(&self, key_id: &str) {
        if let Some(cache) = &self.cache {
            if let Err(error) = cache.invalidate(key_id).await {
                tracing::warn!(key_id, %error, "Failed to invalidate cached key");
            }
        }
    }

    fn record_from_cache(&self, key_id: &Url, cached: CachedKey) -> Result<PublicKeyRecord, AppError> {
        let key = self.crypto.import_public_key(&cached.pem)?;
        let owner = Url::parse(&cached.owner)
            .map_err(|e| AppError::KeyImportFailure(format!("Invalid cached owner: {}", e)))?;

        Ok(PublicKeyRecord {
            key_id: key_id.clone(),
            owner,
            pem: cached.pem,
            key,
            preferred_username: cached.preferred_username,
        })
    }

    /// Fetch the key for a signature from the network, bypassing the cache.
    ///
    /// # Errors
    /// - `KeyFetchFailure` if the actor is unreachable or answers non-2xx
    /// - `KeyImportFailure` if the document lacks a usable key
    pub async fn fetch_key(&self, parsed: &ParsedSignature) -> Result<PublicKeyRecord, AppError> {
        let started = Instant::now();
        let result = self.fetch_key_inner(&parsed.key_id).await;

        let status = match &result {
            Ok(_) => "success",
            Err(AppError::KeyImportFailure(_)) => "import_failure",
            Err(_) => "fetch_failure",
        };
        KEY_FETCHES_TOTAL.with_label_values(&[status]).inc();
        KEY_FETCH_DURATION_SECONDS
            .with_label_values(&[status])
            .observe(started.elapsed().as_secs_f64());

        result
    }

    async fn fetch_key_inner(&self, key_id: &Url) -> Result<PublicKeyRecord, AppError> {
        let mut document_url = key_id.clone();
        document_url.set_fragment(None);

        let response = self
            .fetcher
            .get(&document_url, &self.request_headers)
            .await
            .map_err(|error| match error {
                AppError::KeyFetchFailure(_) => error,
                other => AppError::KeyFetchFailure(format!(
                    "Failed to fetch {}: {}",
                    document_url, other
                )),
            })?;

        if !response.status.is_success() {
            tracing::warn!(
                url = %document_url,
                status = %response.status,
                "Failed to fetch public key"
            );
            return Err(AppError::KeyFetchFailure(format!(
                "Fetching {} returned HTTP {}",
                document_url, response.status
            )));
        }

        let profile: ActorProfile = serde_json::from_slice(&response.body)
            .map_err(|e| AppError::KeyImportFailure(format!("Invalid actor document: {}", e)))?;

        let public_key = profile
            .public_key
            .ok_or_else(|| AppError::KeyImportFailure("Missing publicKey in actor".to_string()))?;

        let advertised_key_id = public_key.id.as_deref().ok_or_else(|| {
            AppError::KeyImportFailure("Missing publicKey.id in actor".to_string())
        })?;
        if advertised_key_id != key_id.as_str() {
            return Err(AppError::KeyImportFailure(
                "Signature keyId does not match actor public key id".to_string(),
            ));
        }

        if let Some(id) = profile.id.as_deref() {
            if id != document_url.as_str() {
                return Err(AppError::KeyImportFailure(format!(
                    "Document fetched from {} claims id {}",
                    document_url, id
                )));
            }
        }

        let pem = public_key.public_key_pem.ok_or_else(|| {
            AppError::KeyImportFailure("Missing publicKeyPem in actor".to_string())
        })?;

        let owner = match public_key.owner.as_deref().or(profile.id.as_deref()) {
            Some(owner) => Url::parse(owner)
                .map_err(|e| AppError::KeyImportFailure(format!("Invalid key owner: {}", e)))?,
            None => document_url.clone(),
        };
        check_owner(key_id, &document_url, &owner)?;

        let key = self.crypto.import_public_key(&pem)?;

        let preferred_username = profile
            .preferred_username
            .filter(|_| profile.id.as_deref() == Some(owner.as_str()));

        Ok(PublicKeyRecord {
            key_id: key_id.clone(),
            owner,
            pem,
            key,
            preferred_username,
        })
    }
}
