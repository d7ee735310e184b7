//! API layer
//!
//! HTTP handlers for:
//! - Account lookup (Mastodon API subset)
//! - ActivityPub inboxes
//! - Metrics (Prometheus)

mod accounts;
mod activitypub;
mod dto;
pub mod metrics;

pub use dto::*;

pub use accounts::accounts_router;
pub use activitypub::activitypub_router;
pub use metrics::metrics_router;
