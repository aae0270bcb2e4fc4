//! The fetch layer's closed error taxonomy.
//!
//! Callers pattern-match on [`FetchError`]. Transient failures never show
//! up here directly: they are retried inside the client and surface as
//! [`FetchError::Network`] only once the retry budget is spent.

/// Every way a fetch can fail.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    /// Malformed URL or request. A caller bug; never retried.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Connection-level or transient server failure, after the retry
    /// budget was exhausted.
    #[error("network error after {attempts} attempts: {cause}")]
    Network {
        /// Total attempts made, including the first.
        attempts: u32,
        /// Description of the last failure.
        cause: String,
    },

    /// The provider answered 404.
    #[error("not found: {url}")]
    NotFound {
        /// Requested URL.
        url: String,
    },

    /// The provider does not know the requested entity.
    #[error("entity not found: {0}")]
    EntityNotFound(String),

    /// Anything else: unexpected status, undecodable body, unclassified
    /// transport failure.
    #[error("unknown error: {0}")]
    Unknown(String),
}

impl FetchError {
    /// Attach an entity id to a not-found error.
    ///
    /// Other variants pass through unchanged.
    #[must_use]
    pub fn for_entity(self, id: impl ToString) -> Self {
        match self {
            Self::NotFound { .. } => Self::EntityNotFound(id.to_string()),
            other => other,
        }
    }

    /// True for not-found outcomes, which are expected business results.
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. } | Self::EntityNotFound(_))
    }
}
