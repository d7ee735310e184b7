//! Data layer module
//!
//! Handles all data persistence:
//! - SQLite actor store
//! - Shared public key cache

mod database;
mod key_cache;
mod models;

pub use database::Database;
pub use key_cache::SqliteKeyCache;
pub use models::*;

#[cfg(test)]
mod database_test;
