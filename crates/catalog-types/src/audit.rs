//! Audit trail rows.
//!
//! A [`ChangeBatch`] groups the events recorded for one root entity inside
//! a time window. A [`ChangeEvent`] is immutable once written: an ordinal,
//! the rendered argument strings, and optionally the template that
//! renders them.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::BatchId;
use crate::kind::EntityKind;

/// Names of the built-in templates.
pub mod templates {
    /// A root entity was created. Args: `[product_id]`.
    pub const PRODUCT_ADD: &str = "product_add";
    /// A product's `initialized` flag was set. Args: `[product_id]`.
    pub const PRODUCT_INIT: &str = "product_init";
    /// A product was hidden from the catalog. Args: `[product_id]`.
    pub const PRODUCT_INVISIBLE: &str = "product_invisible";
    /// A scalar field changed. Args: `[product_id, attr_name, old, new]`.
    pub const DETAIL_CHANGE: &str = "detail_change";
    /// Members were added to a collection. Args: `[product_id, attr_name, added]`.
    pub const SET_ADD: &str = "set_add";
    /// Members were removed from a collection. Args: `[product_id, attr_name, removed]`.
    pub const SET_REMOVE: &str = "set_remove";
    /// A base price changed.
    /// Args: `[product_id, attr_name, country, old, new, currency]`.
    pub const BASEPRICE_CHANGE: &str = "baseprice_change";
}

/// Classification of a change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    /// Something appeared.
    Added,
    /// Something changed value.
    Changed,
    /// Something disappeared.
    Removed,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Added => "added",
            Self::Changed => "changed",
            Self::Removed => "removed",
        })
    }
}

/// Groups the change events of one root entity within a time window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeBatch {
    /// Batch identifier.
    pub id: BatchId,
    /// Kind of the root entity.
    pub root_kind: EntityKind,
    /// Key of the root entity, as rendered by [`crate::EntityHandle::key_string`].
    pub root_key: String,
    /// When the batch was opened.
    pub created_at: DateTime<Utc>,
}

/// One recorded change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// Owning batch.
    pub batch_id: BatchId,
    /// Position within the batch, starting at 0.
    pub ordinal: u32,
    /// Template used to render the event, if any.
    pub template: Option<String>,
    /// Arguments, already converted to display strings.
    pub args: Vec<String>,
}
