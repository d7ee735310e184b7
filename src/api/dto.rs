//! Mastodon API response DTOs
//!
//! Data Transfer Objects for Mastodon-compatible API responses.

use serde::{Deserialize, Serialize};

use crate::identity::{ActorIdentity, LocalId};

/// Account response (Mastodon API compatible subset)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountResponse {
    /// Local id as a decimal string
    pub id: LocalId,
    pub username: String,
    /// `username` for local accounts, `username@domain` for remote ones
    pub acct: String,
    /// Actor URI
    pub url: String,
}

impl AccountResponse {
    pub fn from_identity(actor: ActorIdentity, local_domain: &str) -> Self {
        Self {
            id: actor.local_id,
            acct: actor.handle.acct(local_domain),
            username: actor.handle.local_part,
            url: actor.uri.to_string(),
        }
    }
}

/// Query of `GET /api/v1/accounts/lookup`
#[derive(Debug, Deserialize)]
pub struct LookupQuery {
    pub acct: Option<String>,
}
