//! Inbound request authentication
//!
//! Runs parse → key resolution → verification for one request, then records
//! the proven signer. Any failure leaves the request unauthenticated and
//! nothing recorded.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use url::Url;

use super::crypto::CryptoProvider;
use super::key_fetch::{KeyResolver, KeySource, PublicKeyRecord};
use super::signature::{
    ParsedSignature, SignedRequest, digest_matches, key_id_matches_actor, signature_from_request,
};
use super::verifier::{self, VerificationOutcome};
use crate::config::FederationConfig;
use crate::error::AppError;
use crate::identity::{ActorStore, Handle, LocalId};

/// A request whose signature verified, before the signer is recorded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedSigner {
    /// Owner of the verifying key
    pub actor_uri: Url,
    pub key_id: Url,
    handle: Handle,
}

impl VerifiedSigner {
    /// Whether an activity naming `actor` may have been sent by this signer.
    ///
    /// Compared against the signature's keyId, not a document-declared owner.
    pub fn speaks_for(&self, actor: &str) -> bool {
        key_id_matches_actor(self.key_id.as_str(), actor)
    }
}

/// A request whose signer has been proven and recorded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedActor {
    /// Owner of the verifying key
    pub actor_uri: Url,
    pub key_id: Url,
    pub local_id: LocalId,
}

/// Authenticates signed inbound requests.
#[derive(Clone)]
pub struct Authenticator {
    keys: KeyResolver,
    crypto: Arc<dyn CryptoProvider>,
    store: Arc<dyn ActorStore>,
    required_headers: Vec<String>,
    max_clock_skew: chrono::Duration,
}

impl Authenticator {
    pub fn new(
        keys: KeyResolver,
        crypto: Arc<dyn CryptoProvider>,
        store: Arc<dyn ActorStore>,
        config: &FederationConfig,
    ) -> Self {
        Self {
            keys,
            crypto,
            store,
            required_headers: config
                .required_signed_headers
                .iter()
                .map(|name| name.to_ascii_lowercase())
                .collect(),
            max_clock_skew: chrono::Duration::seconds(config.max_clock_skew_secs),
        }
    }

    /// Authenticate one request and record its signer.
    ///
    /// # Errors
    /// Any error is an authentication failure except `Database`, which means
    /// the signer was proven but could not be recorded.
    pub async fn authenticate(
        &self,
        request: SignedRequest<'_>,
        body: &[u8],
    ) -> Result<AuthenticatedActor, AppError> {
        let signer = self.verify_request(request, body).await?;
        self.record(signer).await
    }

    /// Prove the signer without touching storage.
    pub async fn verify_request(
        &self,
        request: SignedRequest<'_>,
        body: &[u8],
    ) -> Result<VerifiedSigner, AppError> {
        let parsed = signature_from_request(request)?;
        self.check_coverage(&parsed, body)?;

        if parsed.covers("date") {
            self.check_date(request, Utc::now())?;
        }

        if !body.is_empty() {
            let digest = request
                .headers
                .get("digest")
                .and_then(|value| value.to_str().ok())
                .ok_or_else(|| AppError::MalformedSignatureHeader("missing Digest".to_string()))?;
            if !digest_matches(digest, body) {
                tracing::warn!(key_id = %parsed.key_id, "Digest does not match body");
                return Err(AppError::VerificationMismatch);
            }
        }

        let record = self.verified_key(&parsed).await?;

        Ok(VerifiedSigner {
            handle: actor_handle(&record),
            actor_uri: record.owner,
            key_id: parsed.key_id,
        })
    }

    /// Record a verified signer, allocating a local id on first contact.
    pub async fn record(&self, signer: VerifiedSigner) -> Result<AuthenticatedActor, AppError> {
        let actor = self
            .store
            .ensure_actor(&signer.actor_uri, &signer.handle)
            .await?;

        tracing::info!(
            actor = %signer.actor_uri,
            key_id = %signer.key_id,
            local_id = %actor.local_id,
            "Authenticated federation request"
        );

        Ok(AuthenticatedActor {
            actor_uri: signer.actor_uri,
            key_id: signer.key_id,
            local_id: actor.local_id,
        })
    }

    fn check_coverage(&self, parsed: &ParsedSignature, body: &[u8]) -> Result<(), AppError> {
        if let Some(missing) = self
            .required_headers
            .iter()
            .find(|name| !parsed.covers(name))
        {
            return Err(AppError::MalformedSignatureHeader(format!(
                "signature must cover {}",
                missing
            )));
        }

        if !body.is_empty() && !parsed.covers("digest") {
            return Err(AppError::MalformedSignatureHeader(
                "signature must cover digest when a body is present".to_string(),
            ));
        }

        Ok(())
    }

    fn check_date(&self, request: SignedRequest<'_>, now: DateTime<Utc>) -> Result<(), AppError> {
        let raw = request
            .headers
            .get("date")
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| AppError::MalformedSignatureHeader("missing Date".to_string()))?;

        let date = DateTime::parse_from_rfc2822(raw.trim())
            .map_err(|e| AppError::MalformedSignatureHeader(format!("invalid Date: {}", e)))?
            .with_timezone(&Utc);

        let skew = (now - date).abs();
        if skew > self.max_clock_skew {
            tracing::info!(date = raw, skew_secs = skew.num_seconds(), "Signed Date outside window");
            return Err(AppError::Unauthorized);
        }

        Ok(())
    }

    /// Resolve and verify, retrying once with a fresh key when a cached key
    /// no longer matches (the remote actor may have rotated it).
    async fn verified_key(&self, parsed: &ParsedSignature) -> Result<PublicKeyRecord, AppError> {
        let (record, source) = self.keys.resolve(parsed).await?;

        match verifier::check(parsed, &record.key, self.crypto.as_ref()) {
            VerificationOutcome::Verified => Ok(record),
            VerificationOutcome::Rejected(_) if source == KeySource::Cache => {
                tracing::debug!(key_id = %parsed.key_id, "Cached key rejected; refetching");
                self.keys.invalidate(parsed.key_id.as_str()).await;

                let (fresh, _) = self.keys.resolve(parsed).await?;
                if verifier::verify(parsed, &fresh.key, self.crypto.as_ref()) {
                    Ok(fresh)
                } else {
                    Err(AppError::VerificationMismatch)
                }
            }
            VerificationOutcome::Rejected(_) => Err(AppError::VerificationMismatch),
        }
    }
}

/// Handle of the key owner: its preferredUsername when known, else the
/// last path segment of its URI.
fn actor_handle(record: &PublicKeyRecord) -> Handle {
    let local_part = record.preferred_username.clone().unwrap_or_else(|| {
        record
            .owner
            .path_segments()
            .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
            .unwrap_or_default()
            .to_string()
    });
    let domain = record.owner.host_str().unwrap_or_default().to_ascii_lowercase();

    Handle::remote(local_part, domain)
}
