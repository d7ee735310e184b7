//! Database tests

use super::*;
use crate::federation::{CachedKey, KeyCache, RsaCrypto};
use crate::identity::{ActorStore, Handle, IdGenerator, LocalId, SystemClock};
use chrono::Utc;
use std::sync::Arc;
use tempfile::TempDir;
use url::Url;

const LOCAL_DOMAIN: &str = "social.example";

/// Helper to create a test database
async fn create_test_db() -> (Database, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("test.db");
    let ids = IdGenerator::new(Arc::new(SystemClock), Arc::new(RsaCrypto));
    let db = Database::connect(&db_path, LOCAL_DOMAIN, ids).await.unwrap();
    (db, temp_dir)
}

fn alice_uri() -> Url {
    Url::parse("https://remote.example/users/alice").unwrap()
}

#[tokio::test]
async fn test_database_connection() {
    let (db, _temp_dir) = create_test_db().await;
    assert_eq!(db.count_actors().await.unwrap(), 0);
}

#[tokio::test]
async fn test_ensure_actor_is_idempotent() {
    let (db, _temp_dir) = create_test_db().await;
    let handle = Handle::remote("alice", "remote.example");

    let first = db.ensure_actor(&alice_uri(), &handle).await.unwrap();
    let second = db.ensure_actor(&alice_uri(), &handle).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(first.handle, handle);
    assert_eq!(db.count_actors().await.unwrap(), 1);

    let now = Utc::now().timestamp_millis() as u64;
    assert!(first.local_id.timestamp_millis() <= now);
}

#[tokio::test]
async fn test_lookups_agree_on_identity() {
    let (db, _temp_dir) = create_test_db().await;
    let actor = db
        .ensure_actor(&alice_uri(), &Handle::remote("alice", "Remote.Example"))
        .await
        .unwrap();

    let by_id = db.find_actor_by_local_id(actor.local_id).await.unwrap();
    let by_uri = db.find_actor_by_uri(&alice_uri()).await.unwrap();
    let by_handle = db
        .find_actor_by_handle("ALICE", "remote.example")
        .await
        .unwrap();

    assert_eq!(by_id.as_ref(), Some(&actor));
    assert_eq!(by_uri.as_ref(), Some(&actor));
    assert_eq!(by_handle.as_ref(), Some(&actor));
    assert_eq!(
        db.find_local_id_by_uri(&alice_uri()).await.unwrap(),
        Some(actor.local_id)
    );
}

#[tokio::test]
async fn test_local_actor_has_no_domain() {
    let (db, _temp_dir) = create_test_db().await;
    let admin = db
        .ensure_local_actor("admin", "https://social.example/ap/users/admin")
        .await
        .unwrap();
    assert_eq!(admin.handle, Handle::local("admin"));

    let found = db
        .find_actor_by_handle("admin", LOCAL_DOMAIN)
        .await
        .unwrap();
    assert_eq!(found, Some(admin));
}

#[tokio::test]
async fn test_local_domain_handles_are_stored_as_local() {
    let (db, _temp_dir) = create_test_db().await;
    let uri = Url::parse("https://social.example/ap/users/bob").unwrap();
    let bob = db
        .ensure_actor(&uri, &Handle::remote("bob", "social.example"))
        .await
        .unwrap();
    assert_eq!(bob.handle.domain, None);
}

#[tokio::test]
async fn test_missing_rows_are_none() {
    let (db, _temp_dir) = create_test_db().await;

    assert!(db.find_actor_by_local_id(LocalId::new(1)).await.unwrap().is_none());
    assert!(db.find_actor_by_uri(&alice_uri()).await.unwrap().is_none());
    assert!(
        db.find_actor_by_handle("alice", "remote.example")
            .await
            .unwrap()
            .is_none()
    );
    assert!(db.find_local_id_by_uri(&alice_uri()).await.unwrap().is_none());
    assert!(
        db.find_actor_by_local_id(LocalId::new(u64::MAX))
            .await
            .unwrap()
            .is_none()
    );
}

fn cached(key_id: &str, pem: &str) -> CachedKey {
    CachedKey {
        key_id: key_id.to_string(),
        owner: "https://remote.example/users/alice".to_string(),
        pem: pem.to_string(),
        preferred_username: Some("alice".to_string()),
        cached_at: Utc::now(),
    }
}

#[tokio::test]
async fn test_key_cache_round_trip_and_invalidate() {
    let (db, _temp_dir) = create_test_db().await;
    let cache = SqliteKeyCache::new(db.pool().clone(), chrono::Duration::hours(1));
    let key_id = "https://remote.example/users/alice#main-key";

    assert!(cache.get(key_id).await.unwrap().is_none());

    cache.put(cached(key_id, "pem-1")).await.unwrap();
    cache.put(cached(key_id, "pem-2")).await.unwrap();
    let entry = cache.get(key_id).await.unwrap().unwrap();
    assert_eq!(entry.pem, "pem-2");
    assert_eq!(entry.preferred_username.as_deref(), Some("alice"));

    cache.invalidate(key_id).await.unwrap();
    assert!(cache.get(key_id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_key_cache_expiry_and_prune() {
    let (db, _temp_dir) = create_test_db().await;
    let cache = SqliteKeyCache::new(db.pool().clone(), chrono::Duration::hours(1));

    let stale = CachedKey {
        cached_at: Utc::now() - chrono::Duration::hours(2),
        ..cached("stale#key", "old")
    };
    cache.put(stale.clone()).await.unwrap();
    cache.put(cached("fresh#key", "new")).await.unwrap();

    assert_eq!(cache.prune_expired().await.unwrap(), 1);
    assert!(cache.get("fresh#key").await.unwrap().is_some());

    cache.put(stale).await.unwrap();
    assert!(cache.get("stale#key").await.unwrap().is_none());
    assert_eq!(cache.prune_expired().await.unwrap(), 0);
}

#[tokio::test]
async fn test_key_cache_is_shared_between_handles() {
    let (db, _temp_dir) = create_test_db().await;
    let writer = SqliteKeyCache::new(db.pool().clone(), chrono::Duration::hours(1));
    let reader = SqliteKeyCache::new(db.pool().clone(), chrono::Duration::hours(1));

    writer.put(cached("shared#key", "pem")).await.unwrap();
    assert!(reader.get("shared#key").await.unwrap().is_some());
}
