//! SQLite database operations
//!
//! All database access goes through this module.

use std::path::Path;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Pool, Sqlite};
use url::Url;

use super::models::ActorRow;
use crate::error::AppError;
use crate::identity::{ActorIdentity, ActorStore, Handle, IdGenerator, LocalId};

/// Attempts at allocating a free local id before giving up.
const MAX_ID_ATTEMPTS: usize = 4;

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: Pool<Sqlite>,
    local_domain: String,
    ids: IdGenerator,
}

impl Database {
    /// Connect to SQLite database
    ///
    /// Creates the database file if it doesn't exist.
    /// Runs pending migrations automatically.
    ///
    /// # Arguments
    /// * `path` - Path to SQLite database file
    /// * `local_domain` - Domain of this instance; handles on it are stored as local
    /// * `ids` - Allocator for new actors' local ids
    ///
    /// # Errors
    /// Returns error if connection or migration fails
    pub async fn connect(
        path: &Path,
        local_domain: &str,
        ids: IdGenerator,
    ) -> Result<Self, AppError> {
        // Create parent directory if it doesn't exist
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| AppError::Database(sqlx::Error::Io(e)))?;
        }

        // Create connection string
        let connection_string = format!("sqlite:{}?mode=rwc", path.display());

        // Create connection pool
        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect(&connection_string)
            .await?;

        // Run migrations
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| {
                tracing::error!("Migration failed: {}", e);
                AppError::Internal(anyhow::anyhow!("Migration failed: {}", e))
            })?;

        tracing::info!(path = %path.display(), "Database connected and migrated successfully");

        Ok(Self {
            pool,
            local_domain: local_domain.to_ascii_lowercase(),
            ids,
        })
    }

    /// Get the underlying pool
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    fn stored_domain(&self, domain: Option<&str>) -> Option<String> {
        domain
            .map(str::to_ascii_lowercase)
            .filter(|domain| *domain != self.local_domain)
    }

    /// Record a local account and return its identity.
    pub async fn ensure_local_actor(
        &self,
        username: &str,
        actor_uri: &str,
    ) -> Result<ActorIdentity, AppError> {
        let uri = Url::parse(actor_uri)
            .map_err(|e| AppError::Config(format!("Invalid local actor URI {}: {}", actor_uri, e)))?;
        self.ensure_actor(&uri, &Handle::local(username)).await
    }

    /// Number of recorded actors.
    pub async fn count_actors(&self) -> Result<i64, AppError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM actors")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    async fn insert_actor(
        &self,
        id: LocalId,
        uri: &Url,
        handle: &Handle,
    ) -> Result<(), sqlx::Error> {
        let local_id = i64::try_from(id.value()).map_err(|_| {
            sqlx::Error::Protocol(format!("local id {} does not fit in INTEGER", id))
        })?;

        sqlx::query(
            r#"
            INSERT INTO actors (local_id, uri, local_part, domain, created_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(uri) DO NOTHING
            "#,
        )
        .bind(local_id)
        .bind(uri.as_str())
        .bind(&handle.local_part)
        .bind(self.stored_domain(handle.domain.as_deref()))
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl ActorStore for Database {
    async fn find_actor_by_local_id(
        &self,
        id: LocalId,
    ) -> Result<Option<ActorIdentity>, AppError> {
        let Ok(local_id) = i64::try_from(id.value()) else {
            return Ok(None);
        };

        let row = sqlx::query_as::<_, ActorRow>("SELECT * FROM actors WHERE local_id = ?")
            .bind(local_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(ActorIdentity::try_from).transpose()
    }

    async fn find_actor_by_uri(&self, uri: &Url) -> Result<Option<ActorIdentity>, AppError> {
        let row = sqlx::query_as::<_, ActorRow>("SELECT * FROM actors WHERE uri = ?")
            .bind(uri.as_str())
            .fetch_optional(&self.pool)
            .await?;

        row.map(ActorIdentity::try_from).transpose()
    }

    async fn find_actor_by_handle(
        &self,
        local_part: &str,
        domain: &str,
    ) -> Result<Option<ActorIdentity>, AppError> {
        let row = match self.stored_domain(Some(domain)) {
            None => {
                sqlx::query_as::<_, ActorRow>(
                    r#"
                    SELECT * FROM actors
                    WHERE local_part = ? COLLATE NOCASE AND domain IS NULL
                    ORDER BY local_id
                    LIMIT 1
                    "#,
                )
                .bind(local_part)
                .fetch_optional(&self.pool)
                .await?
            }
            Some(domain) => {
                sqlx::query_as::<_, ActorRow>(
                    r#"
                    SELECT * FROM actors
                    WHERE local_part = ? COLLATE NOCASE AND domain = ?
                    ORDER BY local_id
                    LIMIT 1
                    "#,
                )
                .bind(local_part)
                .bind(domain)
                .fetch_optional(&self.pool)
                .await?
            }
        };

        row.map(ActorIdentity::try_from).transpose()
    }

    async fn find_local_id_by_uri(&self, uri: &Url) -> Result<Option<LocalId>, AppError> {
        let id: Option<i64> = sqlx::query_scalar("SELECT local_id FROM actors WHERE uri = ?")
            .bind(uri.as_str())
            .fetch_optional(&self.pool)
            .await?;

        Ok(id.and_then(|id| u64::try_from(id).ok()).map(LocalId::new))
    }

    async fn ensure_actor(&self, uri: &Url, handle: &Handle) -> Result<ActorIdentity, AppError> {
        if let Some(existing) = self.find_actor_by_uri(uri).await? {
            return Ok(existing);
        }

        for attempt in 1..=MAX_ID_ATTEMPTS {
            let id = self.ids.create_id(uri.as_str());
            match self.insert_actor(id, uri, handle).await {
                Ok(()) => break,
                Err(sqlx::Error::Database(error)) if error.is_unique_violation() => {
                    tracing::debug!(%uri, %id, attempt, "Local id collision; retrying");
                }
                Err(error) => return Err(error.into()),
            }
        }

        let actor = self.find_actor_by_uri(uri).await?.ok_or_else(|| {
            AppError::Internal(anyhow::anyhow!("could not allocate a local id for {}", uri))
        })?;
        tracing::debug!(uri = %actor.uri, local_id = %actor.local_id, "Actor recorded");
        Ok(actor)
    }
}
