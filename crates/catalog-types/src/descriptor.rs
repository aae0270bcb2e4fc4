//! Static entity descriptors.
//!
//! Every entity kind declares its shape once, as a `static` table of
//! [`FieldDescriptor`]s. The generic store, the persistence layer, and the
//! audit recorder all walk this table instead of introspecting values at
//! runtime.

use crate::entity::EntityHandle;
use crate::kind::EntityKind;
use crate::record::Record;
use crate::value::{FieldValue, Scalar, ScalarType};

/// What a collection holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberKind {
    /// Plain scalars (names, tags, language codes).
    Scalar(ScalarType),
    /// References to entities of the given kind.
    Reference(EntityKind),
}

/// Shape of one field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// A single scalar column.
    Scalar(ScalarType),
    /// A foreign key to an entity of the given kind, compared by key.
    Reference(EntityKind),
    /// An unordered collection, compared as a multiset.
    Collection(MemberKind),
}

impl FieldKind {
    /// Kind-aware equality.
    ///
    /// Scalars compare by value, references by the referenced key (either
    /// side may be a bare key or a handle), collections as multisets.
    pub fn values_equal(self, a: &FieldValue, b: &FieldValue) -> bool {
        match self {
            Self::Scalar(_) => a == b,
            Self::Reference(_) => a.reference_key() == b.reference_key(),
            Self::Collection(_) => a.member_keys() == b.member_keys(),
        }
    }

    /// Kind referenced by this field or by its collection members.
    pub const fn reference_target(self) -> Option<EntityKind> {
        match self {
            Self::Reference(kind) | Self::Collection(MemberKind::Reference(kind)) => Some(kind),
            Self::Scalar(_) | Self::Collection(MemberKind::Scalar(_)) => None,
        }
    }

    /// True for collection fields.
    pub const fn is_collection(self) -> bool {
        matches!(self, Self::Collection(_))
    }
}

/// A boolean field whose transition away from `default` gets its own
/// audit template instead of the generic scalar-changed one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlagRule {
    /// Value assumed when a new entity does not carry the field.
    pub default: bool,
    /// Template recorded when the flag leaves its default.
    pub template: &'static str,
}

/// One field of an entity kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldDescriptor {
    /// Field (and column) name.
    pub name: &'static str,
    /// Shape of the field.
    pub kind: FieldKind,
    /// Part of the primary key. Immutable after insert.
    pub primary_key: bool,
    /// May be stored as `NULL`.
    pub nullable: bool,
    /// Changes to this field appear in the audit trail.
    pub audited: bool,
    /// Dedicated transition template, for boolean flags.
    pub flag: Option<FlagRule>,
}

impl FieldDescriptor {
    /// A primary-key field.
    pub const fn key(name: &'static str, kind: FieldKind) -> Self {
        Self {
            name,
            kind,
            primary_key: true,
            nullable: false,
            audited: false,
            flag: None,
        }
    }

    /// A field that must be present when the entity is created.
    pub const fn required(name: &'static str, kind: FieldKind) -> Self {
        Self {
            name,
            kind,
            primary_key: false,
            nullable: false,
            audited: true,
            flag: None,
        }
    }

    /// A field that may be absent or `NULL`.
    pub const fn optional(name: &'static str, kind: FieldKind) -> Self {
        Self {
            name,
            kind,
            primary_key: false,
            nullable: true,
            audited: true,
            flag: None,
        }
    }

    /// Exclude this field from the audit trail.
    #[must_use]
    pub const fn unaudited(mut self) -> Self {
        self.audited = false;
        self
    }

    /// Attach a flag transition rule.
    #[must_use]
    pub const fn flag(mut self, default: bool, template: &'static str) -> Self {
        self.flag = Some(FlagRule { default, template });
        self
    }

    /// Value stored for this field when a new entity does not carry it.
    ///
    /// `None` means the field is mandatory on insert.
    pub fn insert_default(&self) -> Option<FieldValue> {
        if let Some(rule) = self.flag {
            return Some(FieldValue::Scalar(Scalar::Bool(rule.default)));
        }
        if self.kind.is_collection() {
            return Some(FieldValue::Set(Vec::new()));
        }
        if self.nullable {
            return Some(FieldValue::Null);
        }
        None
    }
}

/// Where an entity's changes land in the audit trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditScope {
    /// Not audited.
    None,
    /// The entity is its own audit root; creation is recorded.
    Root,
    /// Changes are recorded under the root referenced by `root_field`.
    Child {
        /// Reference field pointing at the root entity.
        root_field: &'static str,
    },
}

/// Static description of one entity kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntityDescriptor {
    /// Kind described.
    pub kind: EntityKind,
    /// Table holding the entity's scalar and reference columns.
    pub table: &'static str,
    /// All fields, key fields first.
    pub fields: &'static [FieldDescriptor],
    /// Audit placement.
    pub audit: AuditScope,
}

/// A descriptor table that breaks one of the structural rules.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DescriptorError {
    /// The kind declares no primary-key field.
    #[error("{kind} declares no primary key")]
    NoPrimaryKey {
        /// Offending kind.
        kind: EntityKind,
    },

    /// Two fields share a name.
    #[error("{kind} declares field {field} twice")]
    DuplicateField {
        /// Offending kind.
        kind: EntityKind,
        /// Duplicated name.
        field: &'static str,
    },

    /// A key field is nullable or a collection.
    #[error("{kind}.{field} cannot be part of the primary key")]
    InvalidKeyField {
        /// Offending kind.
        kind: EntityKind,
        /// Offending field.
        field: &'static str,
    },

    /// The audit root field is missing or not a reference.
    #[error("{kind}.{field} is not a reference and cannot be the audit root")]
    InvalidRootField {
        /// Offending kind.
        kind: EntityKind,
        /// Offending field.
        field: &'static str,
    },

    /// A reference targets a kind with a composite key.
    #[error("{kind}.{field} references {target}, which has a composite key")]
    CompositeReference {
        /// Offending kind.
        kind: EntityKind,
        /// Offending field.
        field: &'static str,
        /// Referenced kind.
        target: EntityKind,
    },

    /// A flag rule is attached to a non-boolean field.
    #[error("{kind}.{field} has a flag rule but is not a boolean")]
    InvalidFlag {
        /// Offending kind.
        kind: EntityKind,
        /// Offending field.
        field: &'static str,
    },
}

impl EntityDescriptor {
    /// Look up a field by name.
    pub fn field(&self, name: &str) -> Option<&'static FieldDescriptor> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Primary-key fields in declaration order.
    pub fn key_fields(&self) -> impl Iterator<Item = &'static FieldDescriptor> + use<> {
        self.fields.iter().filter(|f| f.primary_key)
    }

    /// Non-key fields in declaration order.
    pub fn value_fields(&self) -> impl Iterator<Item = &'static FieldDescriptor> + use<> {
        self.fields.iter().filter(|f| !f.primary_key)
    }

    /// First key field `record` does not carry (or carries as `NULL`).
    pub fn missing_key_field(&self, record: &Record) -> Option<&'static str> {
        self.key_fields()
            .find(|f| record.get(f.name).is_none_or(FieldValue::is_null))
            .map(|f| f.name)
    }

    /// Build the handle identifying the entity `record` describes.
    ///
    /// Reference key columns accept either a bare key or a handle.
    /// Returns `None` if any key field is missing or not a single value.
    pub fn handle_of(&self, record: &Record) -> Option<EntityHandle> {
        let key = self
            .key_fields()
            .map(|f| record.get(f.name).and_then(single_key))
            .collect::<Option<Vec<_>>>()?;
        Some(EntityHandle::new(self.kind, key))
    }

    /// Audit root of an entity whose current state is `current`.
    pub fn audit_root(&self, handle: &EntityHandle, current: &Record) -> Option<EntityHandle> {
        match self.audit {
            AuditScope::None => None,
            AuditScope::Root => Some(handle.clone()),
            AuditScope::Child { root_field } => {
                let target = self.field(root_field)?.kind.reference_target()?;
                let key = current.get(root_field)?.reference_key()?;
                Some(EntityHandle::new(target, key))
            }
        }
    }

    /// Check the structural rules that only involve this descriptor.
    pub fn validate(&self) -> Result<(), DescriptorError> {
        let kind = self.kind;
        if self.key_fields().next().is_none() {
            return Err(DescriptorError::NoPrimaryKey { kind });
        }
        for (i, field) in self.fields.iter().enumerate() {
            if self.fields.iter().skip(i.saturating_add(1)).any(|f| f.name == field.name) {
                return Err(DescriptorError::DuplicateField {
                    kind,
                    field: field.name,
                });
            }
            if field.primary_key && (field.nullable || field.kind.is_collection()) {
                return Err(DescriptorError::InvalidKeyField {
                    kind,
                    field: field.name,
                });
            }
            if field.flag.is_some() && field.kind != FieldKind::Scalar(ScalarType::Bool) {
                return Err(DescriptorError::InvalidFlag {
                    kind,
                    field: field.name,
                });
            }
        }
        if let AuditScope::Child { root_field } = self.audit {
            let is_reference = self
                .field(root_field)
                .is_some_and(|f| matches!(f.kind, FieldKind::Reference(_)));
            if !is_reference {
                return Err(DescriptorError::InvalidRootField {
                    kind,
                    field: root_field,
                });
            }
        }
        Ok(())
    }
}

/// The single scalar key carried by a key or reference value.
fn single_key(value: &FieldValue) -> Option<Scalar> {
    let mut key = value.reference_key()?;
    if key.len() == 1 { key.pop() } else { None }
}
