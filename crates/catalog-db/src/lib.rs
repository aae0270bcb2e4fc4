//! Persistence layer for the catalog store and its audit trail.
//!
//! The sync engine talks to storage only through the [`CatalogBackend`]
//! and [`CatalogTx`] traits. One synchronization pass runs inside one
//! transaction: entity writes, cascades, and audit rows commit together
//! or not at all.
//!
//! # Backends
//!
//! ```text
//! CatalogBackend
//!     |
//!     +-- PgBackend      (PostgreSQL via sqlx, one table per kind,
//!     |                   join tables for collections, advisory locks
//!     |                   around batch creation)
//!     |
//!     +-- MemoryBackend  (in-process, whole-store transactions;
//!                         tests and dry runs)
//! ```
//!
//! # Modules
//!
//! - [`backend`] -- The backend and transaction traits
//! - [`postgres`] -- `PostgreSQL` connection pool and configuration
//! - [`pg_backend`] -- Descriptor-driven SQL backend
//! - [`audit_store`] -- Audit trail queries and row types
//! - [`memory`] -- In-process backend
//! - [`error`] -- Shared error types

pub mod audit_store;
pub mod backend;
pub mod error;
pub mod memory;
pub mod pg_backend;
pub mod postgres;
mod sql;

pub use audit_store::{AuditStore, BatchRow, EventRow};
pub use backend::{CatalogBackend, CatalogTx};
pub use error::DbError;
pub use memory::{MemoryBackend, MemoryTx};
pub use pg_backend::{PgBackend, PgTx};
pub use postgres::{CatalogPool, PoolConfig};
