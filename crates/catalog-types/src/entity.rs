//! Entity handles and diff results.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::descriptor::FieldDescriptor;
use crate::kind::EntityKind;
use crate::value::{FieldValue, Scalar};

/// Separator between key columns in [`EntityHandle::key_string`].
const KEY_SEPARATOR: &str = "/";

/// Identifies one persisted entity: its kind plus its primary-key values
/// in descriptor order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityHandle {
    /// Kind of the entity.
    pub kind: EntityKind,
    /// Primary-key values, one per key field, in descriptor order.
    pub key: Vec<Scalar>,
}

impl EntityHandle {
    /// Handle with a composite key.
    pub const fn new(kind: EntityKind, key: Vec<Scalar>) -> Self {
        Self { kind, key }
    }

    /// Handle with a single-column key.
    pub fn single(kind: EntityKind, key: Scalar) -> Self {
        Self {
            kind,
            key: vec![key],
        }
    }

    /// Key rendered as text, columns joined by `/`.
    ///
    /// Used as the audit trail's root entity id.
    pub fn key_string(&self) -> String {
        self.key
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(KEY_SEPARATOR)
    }
}

impl fmt::Display for EntityHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.key_string())
    }
}

/// One field proven to differ from stored state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldChange {
    /// Descriptor of the changed field.
    pub field: &'static FieldDescriptor,
    /// Stored value before the write.
    pub old: FieldValue,
    /// Value being written.
    pub new: FieldValue,
}

/// Previous values of exactly the fields that changed in one update.
///
/// Returned by the diff step and passed straight to the update hook.
/// Never stored on the entity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreviousValues(BTreeMap<String, FieldValue>);

impl PreviousValues {
    /// Previous value of `field`, if it changed.
    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.0.get(field)
    }

    /// True if `field` changed.
    pub fn contains(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }

    /// Names of the changed fields, in name order.
    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// Number of changed fields.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True if nothing changed.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&[FieldChange]> for PreviousValues {
    fn from(changes: &[FieldChange]) -> Self {
        Self(
            changes
                .iter()
                .map(|c| (c.field.name.to_owned(), c.old.clone()))
                .collect(),
        )
    }
}
