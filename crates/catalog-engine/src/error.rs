//! Error types for the catalog engine binary.
//!
//! [`EngineError`] wraps every failure that can stop a polling pass
//! before per-entity work begins. Per-entity failures never surface here;
//! they are logged and counted.

use crate::config::ConfigError;
use crate::producer::ProduceError;

/// Top-level error for the catalog engine binary.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Configuration loading failed.
    #[error("config error: {source}")]
    Config {
        /// The underlying config error.
        #[from]
        source: ConfigError,
    },

    /// The entity descriptor table is malformed.
    #[error("descriptor error: {source}")]
    Descriptor {
        /// The underlying descriptor error.
        #[from]
        source: catalog_types::DescriptorError,
    },

    /// Template registration failed.
    #[error("audit error: {source}")]
    Audit {
        /// The underlying audit error.
        #[from]
        source: catalog_audit::AuditError,
    },

    /// A request that the whole pass depends on failed.
    #[error("fetch error: {source}")]
    Fetch {
        /// The underlying fetch error.
        #[from]
        source: catalog_fetch::FetchError,
    },

    /// Connecting to or migrating the store failed.
    #[error("database error: {source}")]
    Db {
        /// The underlying database error.
        #[from]
        source: catalog_db::DbError,
    },

    /// A payload could not be turned into records.
    #[error("producer error: {source}")]
    Produce {
        /// The underlying producer error.
        #[from]
        source: ProduceError,
    },
}
