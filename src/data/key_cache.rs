//! SQLite-backed public key cache
//!
//! Shared by every worker using the same database file.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use sqlx::SqlitePool;

use super::models::PublicKeyCacheRow;
use crate::error::AppError;
use crate::federation::{CachedKey, KeyCache};

/// Key cache manager
#[derive(Clone)]
pub struct SqliteKeyCache {
    db: SqlitePool,
    ttl: Duration,
}

impl SqliteKeyCache {
    pub fn new(db: SqlitePool, ttl: Duration) -> Self {
        Self { db, ttl }
    }

    fn cutoff_millis(&self) -> i64 {
        (Utc::now() - self.ttl).timestamp_millis()
    }
}

#[async_trait]
impl KeyCache for SqliteKeyCache {
    async fn get(&self, key_id: &str) -> Result<Option<CachedKey>, AppError> {
        let row = sqlx::query_as::<_, PublicKeyCacheRow>(
            r#"
            SELECT key_id, owner, pem, preferred_username, cached_at
            FROM public_key_cache
            WHERE key_id = ?1
            "#,
        )
        .bind(key_id)
        .fetch_optional(&self.db)
        .await?;

        match row {
            Some(row) if row.cached_at > self.cutoff_millis() => Ok(Some(row.into())),
            Some(_) => {
                // Cache expired, delete it
                self.invalidate(key_id).await?;
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn put(&self, entry: CachedKey) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO public_key_cache (key_id, owner, pem, preferred_username, cached_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(key_id) DO UPDATE SET
                owner = excluded.owner,
                pem = excluded.pem,
                preferred_username = excluded.preferred_username,
                cached_at = excluded.cached_at
            "#,
        )
        .bind(&entry.key_id)
        .bind(&entry.owner)
        .bind(&entry.pem)
        .bind(&entry.preferred_username)
        .bind(entry.cached_at.timestamp_millis())
        .execute(&self.db)
        .await?;

        Ok(())
    }

    async fn invalidate(&self, key_id: &str) -> Result<(), AppError> {
        sqlx::query("DELETE FROM public_key_cache WHERE key_id = ?1")
            .bind(key_id)
            .execute(&self.db)
            .await?;

        Ok(())
    }

    async fn prune_expired(&self) -> Result<u64, AppError> {
        let result = sqlx::query("DELETE FROM public_key_cache WHERE cached_at <= ?1")
            .bind(self.cutoff_millis())
            .execute(&self.db)
            .await?;

        let removed = result.rows_affected();
        if removed > 0 {
            tracing::info!("Pruned {} expired public key cache entries", removed);
        }
        Ok(removed)
    }
}
