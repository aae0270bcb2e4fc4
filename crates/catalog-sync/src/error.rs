//! Error types for the sync engine.

use catalog_audit::AuditError;
use catalog_db::DbError;
use catalog_types::{EntityHandle, EntityKind};

/// Errors that can occur while synchronizing one entity.
///
/// Any error aborts the entity's transaction: none of its writes, audit
/// events or cascades are committed.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// The record lacks a primary-key field.
    #[error("{kind} record is missing primary key field {field}")]
    MissingPrimaryKey {
        /// Kind being synchronized.
        kind: EntityKind,
        /// First missing key field.
        field: &'static str,
    },

    /// A record passed to `update` carries a key that differs from the
    /// handle it is applied to.
    #[error("record for {handle} changes primary key field {field}")]
    PrimaryKeyMismatch {
        /// Entity being updated.
        handle: EntityHandle,
        /// Offending key field.
        field: &'static str,
    },

    /// The record names a field the kind does not declare.
    #[error("{kind} has no field {field}")]
    UnknownField {
        /// Kind being synchronized.
        kind: EntityKind,
        /// Undeclared field name.
        field: String,
    },

    /// A value does not fit the declared field kind.
    #[error("{kind}.{field} expects {expected}, got {found}")]
    FieldType {
        /// Kind being synchronized.
        kind: EntityKind,
        /// Offending field.
        field: &'static str,
        /// What the descriptor declares.
        expected: String,
        /// What the record carried.
        found: String,
    },

    /// A new entity lacks a mandatory field.
    #[error("new {kind} is missing mandatory field {field}")]
    MissingField {
        /// Kind being inserted.
        kind: EntityKind,
        /// Missing field.
        field: &'static str,
    },

    /// `update` was called for an entity that is not stored.
    #[error("{0} does not exist")]
    EntityMissing(EntityHandle),

    /// A reference points at an entity that is not stored.
    #[error("{from}.{field} references missing entity {target}")]
    DanglingReference {
        /// Entity holding the reference.
        from: EntityHandle,
        /// Reference field.
        field: &'static str,
        /// Missing target.
        target: EntityHandle,
    },

    /// Recording the audit trail failed.
    #[error(transparent)]
    Audit(#[from] AuditError),

    /// The backend failed.
    #[error(transparent)]
    Db(#[from] DbError),
}

impl SyncError {
    /// True for errors caused by a malformed record or call rather than
    /// by stored state or the backend. Retrying these cannot succeed.
    pub const fn is_contract_violation(&self) -> bool {
        matches!(
            self,
            Self::MissingPrimaryKey { .. }
                | Self::PrimaryKeyMismatch { .. }
                | Self::UnknownField { .. }
                | Self::FieldType { .. }
                | Self::MissingField { .. }
                | Self::EntityMissing(_)
        )
    }
}
