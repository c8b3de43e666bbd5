//! Mend Store - cooldown and history persistence
//!
//! Two narrow storage seams used by the recovery orchestrator:
//! - [`CooldownStore`]: last execution per `kind:target`, with an atomic
//!   check-and-set so overlapping runs cannot double-fire an action
//! - [`HistoryStore`]: append-only report history with bounded retention
//!
//! Any durable key-value or relational backend can implement either trait.
//! In-memory implementations back tests and single-process deployments;
//! [`JsonFileCooldownStore`] keeps cooldowns across process restarts.

#![warn(missing_docs)]
#![warn(unreachable_pub)]

pub mod cooldown;
pub mod error;
pub mod history;

pub use cooldown::{
    default_record_ttl, is_eligible, Claim, CooldownStore, JsonFileCooldownStore,
    MemoryCooldownStore,
};
pub use error::StoreError;
pub use history::{default_retention, HistoryQuery, HistoryStore, MemoryHistoryStore};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
