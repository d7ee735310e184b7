//! Data models
//!
//! Row types for the `actors` and `public_key_cache` tables.

use chrono::{DateTime, TimeZone, Utc};
use url::Url;

use crate::error::AppError;
use crate::federation::CachedKey;
use crate::identity::{ActorIdentity, Handle, LocalId};

/// Row of the `actors` table
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ActorRow {
    pub local_id: i64,
    pub uri: String,
    pub local_part: String,
    /// `None` for local accounts
    pub domain: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<ActorRow> for ActorIdentity {
    type Error = AppError;

    fn try_from(row: ActorRow) -> Result<Self, Self::Error> {
        let local_id = u64::try_from(row.local_id).map_err(|_| {
            AppError::Internal(anyhow::anyhow!("negative local id {}", row.local_id))
        })?;
        let uri = Url::parse(&row.uri).map_err(|e| {
            AppError::Internal(anyhow::anyhow!("stored actor URI {} is invalid: {}", row.uri, e))
        })?;

        Ok(ActorIdentity {
            local_id: LocalId::new(local_id),
            uri,
            handle: Handle {
                local_part: row.local_part,
                domain: row.domain,
            },
        })
    }
}

/// Row of the `public_key_cache` table
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PublicKeyCacheRow {
    pub key_id: String,
    pub owner: String,
    pub pem: String,
    pub preferred_username: Option<String>,
    /// Unix milliseconds
    pub cached_at: i64,
}

impl From<PublicKeyCacheRow> for CachedKey {
    fn from(row: PublicKeyCacheRow) -> Self {
        CachedKey {
            key_id: row.key_id,
            owner: row.owner,
            pem: row.pem,
            preferred_username: row.preferred_username,
            cached_at: Utc
                .timestamp_millis_opt(row.cached_at)
                .single()
                .unwrap_or_default(),
        }
    }
}
