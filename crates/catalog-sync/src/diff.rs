//! Record normalization and field-level comparison.
//!
//! Records arrive from producers loosely typed: a reference may be a bare
//! key or a handle, an integer may stand in for a decimal, a collection
//! may be absent. [`prepare`] checks a record against its descriptor and
//! rewrites every value into canonical form, so stored state and incoming
//! records always compare like with like.

use catalog_types::{
    EntityDescriptor, EntityHandle, EntityKind, FieldChange, FieldDescriptor, FieldKind,
    FieldValue, MemberKind, Record, Scalar,
};

use crate::error::SyncError;

/// A record in canonical form, with the handle its key resolves to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prepared {
    /// Entity the record describes.
    pub handle: EntityHandle,
    /// Canonical field values.
    pub record: Record,
}

/// Check `record` against `kind` and resolve its handle.
///
/// # Errors
///
/// Returns [`SyncError::MissingPrimaryKey`] before looking at anything
/// else, then [`SyncError::UnknownField`] or [`SyncError::FieldType`] for
/// the first offending field.
pub fn prepare(kind: EntityKind, record: &Record) -> Result<Prepared, SyncError> {
    let desc = kind.descriptor();
    if let Some(field) = desc.missing_key_field(record) {
        return Err(SyncError::MissingPrimaryKey { kind, field });
    }
    let record = normalize(desc, record)?;
    let handle = desc.handle_of(&record).ok_or_else(|| SyncError::MissingPrimaryKey {
        kind,
        field: desc.key_fields().next().map_or("", |f| f.name),
    })?;
    Ok(Prepared { handle, record })
}

/// Canonical form of every field in `record`.
///
/// # Errors
///
/// See [`prepare`].
pub fn normalize(desc: &EntityDescriptor, record: &Record) -> Result<Record, SyncError> {
    let mut out = Record::new();
    for (name, value) in record.iter() {
        let field = desc.field(name).ok_or_else(|| SyncError::UnknownField {
            kind: desc.kind,
            field: name.to_owned(),
        })?;
        out.set(field.name, normalize_value(desc.kind, field, value)?);
    }
    Ok(out)
}

/// Canonical form of one value.
///
/// References become handles of the declared target, scalars are coerced
/// to the declared type, and a missing collection is the empty one.
///
/// # Errors
///
/// Returns [`SyncError::FieldType`] if the value does not fit the field.
pub fn normalize_value(
    kind: EntityKind,
    field: &'static FieldDescriptor,
    value: &FieldValue,
) -> Result<FieldValue, SyncError> {
    let mismatch = |expected: String| SyncError::FieldType {
        kind,
        field: field.name,
        expected,
        found: describe(value),
    };

    match field.kind {
        FieldKind::Scalar(ty) => match value {
            FieldValue::Null if field.nullable => Ok(FieldValue::Null),
            FieldValue::Scalar(s) => ty
                .coerce(s.clone())
                .map(FieldValue::Scalar)
                .ok_or_else(|| mismatch(ty.as_str().to_owned())),
            _ => Err(mismatch(ty.as_str().to_owned())),
        },
        FieldKind::Reference(target) => match value {
            FieldValue::Null if field.nullable => Ok(FieldValue::Null),
            other => reference(target, other)
                .map(FieldValue::Ref)
                .ok_or_else(|| mismatch(format!("reference to {target}"))),
        },
        FieldKind::Collection(member) => match value {
            FieldValue::Null => Ok(FieldValue::Set(Vec::new())),
            FieldValue::Set(items) => items
                .iter()
                .map(|item| normalize_member(member, item))
                .collect::<Option<Vec<_>>>()
                .map(FieldValue::Set)
                .ok_or_else(|| mismatch(describe_member(member))),
            _ => Err(mismatch(describe_member(member))),
        },
    }
}

/// `record` completed with the insert default of every field it omits.
///
/// # Errors
///
/// Returns [`SyncError::MissingField`] for a mandatory field with no
/// default.
pub fn fill_defaults(desc: &EntityDescriptor, record: &Record) -> Result<Record, SyncError> {
    let mut full = record.clone();
    for field in desc.value_fields() {
        if full.contains(field.name) {
            continue;
        }
        let default = field.insert_default().ok_or(SyncError::MissingField {
            kind: desc.kind,
            field: field.name,
        })?;
        full.set(field.name, default);
    }
    Ok(full)
}

/// Fields of `candidate` that differ from `stored`, with their stored
/// values. Key fields and fields `candidate` omits are never compared.
pub fn diff(desc: &EntityDescriptor, stored: &Record, candidate: &Record) -> Vec<FieldChange> {
    let mut changes = Vec::new();
    for field in desc.value_fields() {
        let Some(new) = candidate.get(field.name) else {
            continue;
        };
        let old = stored.get(field.name).cloned().unwrap_or(FieldValue::Null);
        if !field.kind.values_equal(&old, new) {
            changes.push(FieldChange {
                field,
                old,
                new: new.clone(),
            });
        }
    }
    changes
}

/// Reject a record whose key fields disagree with `handle`.
///
/// Key fields the record omits are fine.
///
/// # Errors
///
/// Returns [`SyncError::PrimaryKeyMismatch`] for the first differing key.
pub fn check_key(handle: &EntityHandle, record: &Record) -> Result<(), SyncError> {
    let desc = handle.kind.descriptor();
    for (field, key) in desc.key_fields().zip(&handle.key) {
        let Some(value) = record.get(field.name) else {
            continue;
        };
        if value.reference_key() != Some(vec![key.clone()]) {
            return Err(SyncError::PrimaryKeyMismatch {
                handle: handle.clone(),
                field: field.name,
            });
        }
    }
    Ok(())
}

/// Handle of `target` named by a bare key or by a handle of that kind.
fn reference(target: EntityKind, value: &FieldValue) -> Option<EntityHandle> {
    if value.as_ref_handle().is_some_and(|h| h.kind != target) {
        return None;
    }
    let mut key = value.reference_key()?;
    if key.len() != 1 {
        return None;
    }
    let scalar = coerce_key(target, key.pop()?)?;
    Some(EntityHandle::single(target, scalar))
}

/// Coerce a bare key to the type of `target`'s single key column.
fn coerce_key(target: EntityKind, key: Scalar) -> Option<Scalar> {
    match target.descriptor().key_fields().next()?.kind {
        FieldKind::Scalar(ty) => ty.coerce(key),
        FieldKind::Reference(next) => coerce_key(next, key),
        FieldKind::Collection(_) => None,
    }
}

fn normalize_member(member: MemberKind, value: &FieldValue) -> Option<FieldValue> {
    match (member, value) {
        (MemberKind::Scalar(ty), FieldValue::Scalar(s)) => {
            ty.coerce(s.clone()).map(FieldValue::Scalar)
        }
        (MemberKind::Reference(target), other) => reference(target, other).map(FieldValue::Ref),
        (MemberKind::Scalar(_), _) => None,
    }
}

fn describe(value: &FieldValue) -> String {
    match value {
        FieldValue::Null => "null".to_owned(),
        FieldValue::Scalar(s) => s.scalar_type().as_str().to_owned(),
        FieldValue::Ref(h) => format!("reference to {}", h.kind),
        FieldValue::Set(_) => "collection".to_owned(),
    }
}

fn describe_member(member: MemberKind) -> String {
    match member {
        MemberKind::Scalar(ty) => format!("collection of {ty}"),
        MemberKind::Reference(target) => format!("collection of {target} references"),
    }
}
