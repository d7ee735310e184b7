//! Identity resolution
//!
//! Translates between the three names an actor goes by: the numeric
//! client-facing id, the dereferenceable actor URI and the `local@domain`
//! handle.

mod account_id;
mod handle;
mod local_id;
mod resolver;

pub use account_id::{AccountIdentifier, classify};
pub use handle::{Handle, parse_handle};
pub use local_id::{Clock, IdGenerator, LocalId, SystemClock};
pub use resolver::{ActorIdentity, ActorStore, IdentityResolver};

#[cfg(test)]
pub use resolver::MockActorStore;

/// Path segment that precedes the username in local actor URIs.
pub const ACTOR_PATH_MARKER: &str = "/ap/users/";
