//! Error types for the audit recorder.

use catalog_db::DbError;

/// Errors raised while registering templates or recording events.
#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    /// A template's format string does not fit its declared slots.
    #[error("template {name} is malformed: {reason}")]
    TemplateFormat {
        /// Template name.
        name: String,
        /// What is wrong with it.
        reason: String,
    },

    /// A template with this name is already registered.
    #[error("template {0} is already registered")]
    DuplicateTemplate(String),

    /// No template with this name is registered.
    #[error("unknown template: {0}")]
    UnknownTemplate(String),

    /// The placeholder pattern failed to compile.
    #[error("placeholder pattern error: {0}")]
    Pattern(#[from] regex::Error),

    /// Writing the audit trail failed.
    #[error(transparent)]
    Db(#[from] DbError),
}
