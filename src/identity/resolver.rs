//! Identifier resolution against the actor store

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use url::Url;

use super::account_id::{AccountIdentifier, classify};
use super::handle::Handle;
use super::local_id::LocalId;
use crate::error::AppError;
use crate::metrics::IDENTIFIER_RESOLUTIONS_TOTAL;

/// The three names of one actor, as recorded by storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActorIdentity {
    pub local_id: LocalId,
    pub uri: Url,
    pub handle: Handle,
}

/// Storage collaborator for actor identities.
///
/// "Not found" is `Ok(None)`; errors are reserved for genuine failures.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ActorStore: Send + Sync {
    async fn find_actor_by_local_id(&self, id: LocalId)
    -> Result<Option<ActorIdentity>, AppError>;

    async fn find_actor_by_uri(&self, uri: &Url) -> Result<Option<ActorIdentity>, AppError>;

    /// `domain` is always concrete here; local accounts are looked up under
    /// the instance's own domain.
    async fn find_actor_by_handle(
        &self,
        local_part: &str,
        domain: &str,
    ) -> Result<Option<ActorIdentity>, AppError>;

    async fn find_local_id_by_uri(&self, uri: &Url) -> Result<Option<LocalId>, AppError>;

    /// Return the stored identity for `uri`, recording it with a freshly
    /// allocated local id when it is new.
    async fn ensure_actor(&self, uri: &Url, handle: &Handle) -> Result<ActorIdentity, AppError>;
}

/// Resolves client-supplied identifiers to stored actors.
#[derive(Clone)]
pub struct IdentityResolver {
    store: Arc<dyn ActorStore>,
    local_domain: String,
}

impl IdentityResolver {
    pub fn new(store: Arc<dyn ActorStore>, local_domain: impl Into<String>) -> Self {
        Self {
            store,
            local_domain: local_domain.into(),
        }
    }

    pub fn local_domain(&self) -> &str {
        &self.local_domain
    }

    /// Resolve a numeric id, actor URI or handle to the stored actor.
    ///
    /// # Errors
    /// - `InvalidHandle` if the input is neither numeric, a URL nor a valid handle
    /// - `UnknownIdentifier` if nothing matches
    /// - `Database` on storage failure
    pub async fn resolve_account_identifier(&self, input: &str) -> Result<ActorIdentity, AppError> {
        let identifier = match classify(input) {
            Ok(identifier) => identifier,
            Err(error) => {
                record("unclassified", &Err(&error));
                return Err(error);
            }
        };
        let kind = identifier.kind();

        let result = self.lookup(&identifier).await.and_then(|found| {
            found.ok_or_else(|| AppError::UnknownIdentifier(input.to_string()))
        });

        record(kind, &result.as_ref().map(|_| ()));
        tracing::debug!(kind, input, found = result.is_ok(), "Resolved account identifier");
        result
    }

    async fn lookup(
        &self,
        identifier: &AccountIdentifier,
    ) -> Result<Option<ActorIdentity>, AppError> {
        match identifier {
            AccountIdentifier::Mastodon(id) => self.store.find_actor_by_local_id(*id).await,
            AccountIdentifier::ActivityPub(uri) => self.store.find_actor_by_uri(uri).await,
            AccountIdentifier::Handle(handle) => {
                let domain = handle.domain.as_deref().unwrap_or(&self.local_domain);
                self.store
                    .find_actor_by_handle(&handle.local_part, &domain.to_ascii_lowercase())
                    .await
            }
        }
    }

    /// Numeric id to actor URI.
    ///
    /// A non-numeric id is reported as `UnknownIdentifier`, the same as a
    /// numeric id with no row.
    pub async fn find_activity_pub_id_using_mastodon_id(
        &self,
        mastodon_id: &str,
    ) -> Result<Url, AppError> {
        let id: LocalId = mastodon_id.parse()?;
        let result = self
            .store
            .find_actor_by_local_id(id)
            .await
            .and_then(|found| {
                found
                    .map(|actor| actor.uri)
                    .ok_or_else(|| AppError::UnknownIdentifier(mastodon_id.to_string()))
            });

        record("mastodon", &result.as_ref().map(|_| ()));
        result
    }

    /// Actor URI to numeric id.
    pub async fn find_mastodon_id_using_activity_pub_id(
        &self,
        uri: &Url,
    ) -> Result<LocalId, AppError> {
        let result = self
            .store
            .find_local_id_by_uri(uri)
            .await
            .and_then(|found| found.ok_or_else(|| AppError::UnknownIdentifier(uri.to_string())));

        record("activitypub", &result.as_ref().map(|_| ()));
        result
    }
}

fn record(kind: &str, result: &Result<(), &AppError>) {
    let outcome = match result {
        Ok(()) => "found",
        Err(AppError::UnknownIdentifier(_)) => "unknown",
        Err(AppError::InvalidHandle(_)) => "invalid",
        Err(_) => "error",
    };
    IDENTIFIER_RESOLUTIONS_TOTAL
        .with_label_values(&[kind, outcome])
        .inc();
}
