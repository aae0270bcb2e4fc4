//! Diff-based synchronization engine for the catalog store.
//!
//! [`EntityStore::save_or_update`] is the only write path for catalog
//! entities. It looks the entity up by primary key, inserts it or writes
//! exactly the fields that differ, records the audit trail, and applies
//! the kind's hook cascades, all inside one backend transaction.
//!
//! # Modules
//!
//! - [`engine`] -- The store, its work queue and per-entity outcomes
//! - [`diff`] -- Record normalization and field-level comparison
//! - [`hooks`] -- Per-kind insert/update/checkout cascades
//! - [`clock`] -- Time source used for batches and timestamps
//! - [`error`] -- Sync error types

pub mod clock;
pub mod diff;
pub mod engine;
pub mod error;
pub mod hooks;

pub use clock::{Clock, ManualClock, SystemClock};
pub use engine::{DEFAULT_PARALLELISM, EntityChange, EntityStore, SyncOutcome};
pub use error::SyncError;
pub use hooks::{Cascade, EntityHooks, HookContext, hooks_for};
