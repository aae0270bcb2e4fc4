//! Descriptor-driven SQL fragments.
//!
//! Table and column names come from the static descriptors, never from
//! input. Every value is bound as a parameter with the column's type, so
//! `NULL`s are typed too.

use catalog_types::{
    EntityDescriptor, EntityHandle, EntityKind, FieldDescriptor, FieldKind, FieldValue,
    MemberKind, Scalar, ScalarType,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::PgRow;
use sqlx::{Postgres, QueryBuilder, Row};

use crate::error::DbError;

/// Column holding collection members in a join table.
pub(crate) const MEMBER_COLUMN: &str = "value";

pub(crate) type Builder<'a> = QueryBuilder<'a, Postgres>;

/// Fields stored as columns of the entity table.
pub(crate) fn column_fields(
    desc: &EntityDescriptor,
) -> impl Iterator<Item = &'static FieldDescriptor> + use<> {
    desc.fields.iter().filter(|f| !f.kind.is_collection())
}

/// Fields stored in join tables.
pub(crate) fn collection_fields(
    desc: &EntityDescriptor,
) -> impl Iterator<Item = &'static FieldDescriptor> + use<> {
    desc.fields.iter().filter(|f| f.kind.is_collection())
}

/// Join table of a collection field: `{table}_{field}`.
pub(crate) fn join_table(desc: &EntityDescriptor, field: &FieldDescriptor) -> String {
    format!("{}_{}", desc.table, field.name)
}

/// Comma-separated key column names.
pub(crate) fn key_columns(desc: &EntityDescriptor) -> String {
    desc.key_fields()
        .map(|f| f.name)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Type of the single key column of `kind`.
pub(crate) fn key_type(kind: EntityKind) -> Result<ScalarType, DbError> {
    let mut keys = kind.descriptor().key_fields();
    match (keys.next().map(|f| f.kind), keys.next()) {
        (Some(FieldKind::Scalar(ty)), None) => Ok(ty),
        (Some(FieldKind::Reference(target)), None) => key_type(target),
        _ => Err(DbError::Constraint(format!(
            "{kind} cannot be referenced: key is not a single column"
        ))),
    }
}

pub(crate) fn push_scalar(qb: &mut Builder<'_>, value: &Scalar) {
    match value {
        Scalar::Bool(b) => {
            qb.push_bind(*b);
        }
        Scalar::Int(i) => {
            qb.push_bind(*i);
        }
        Scalar::Decimal(d) => {
            qb.push_bind(*d);
        }
        Scalar::Text(s) => {
            qb.push_bind(s.clone());
        }
        Scalar::Timestamp(ts) => {
            qb.push_bind(*ts);
        }
    }
}

fn push_null(qb: &mut Builder<'_>, ty: ScalarType) {
    match ty {
        ScalarType::Bool => {
            qb.push_bind(None::<bool>);
        }
        ScalarType::Int => {
            qb.push_bind(None::<i64>);
        }
        ScalarType::Decimal => {
            qb.push_bind(None::<Decimal>);
        }
        ScalarType::Text => {
            qb.push_bind(None::<String>);
        }
        ScalarType::Timestamp => {
            qb.push_bind(None::<DateTime<Utc>>);
        }
    }
}

/// The single key a reference value points at.
fn reference_scalar(value: &FieldValue) -> Result<Scalar, DbError> {
    let mut key = value
        .reference_key()
        .ok_or_else(|| DbError::Constraint(format!("not a reference: {value:?}")))?;
    match (key.pop(), key.is_empty()) {
        (Some(scalar), true) => Ok(scalar),
        _ => Err(DbError::Constraint(format!(
            "reference key must be a single column: {value:?}"
        ))),
    }
}

/// Bind the value of a column field.
pub(crate) fn push_column_value(
    qb: &mut Builder<'_>,
    field: &FieldDescriptor,
    value: &FieldValue,
) -> Result<(), DbError> {
    match (field.kind, value) {
        (FieldKind::Scalar(ty), FieldValue::Null) => push_null(qb, ty),
        (FieldKind::Scalar(_), FieldValue::Scalar(s)) => push_scalar(qb, s),
        (FieldKind::Reference(target), FieldValue::Null) => push_null(qb, key_type(target)?),
        (FieldKind::Reference(_), value) => push_scalar(qb, &reference_scalar(value)?),
        (kind, value) => {
            return Err(DbError::Constraint(format!(
                "{} ({kind:?}) cannot store {value:?}",
                field.name
            )));
        }
    }
    Ok(())
}

/// Bind one collection member.
pub(crate) fn push_member(
    qb: &mut Builder<'_>,
    member: MemberKind,
    value: &FieldValue,
) -> Result<(), DbError> {
    match (member, value) {
        (MemberKind::Scalar(_), FieldValue::Scalar(s)) => push_scalar(qb, s),
        (MemberKind::Reference(_), value) => push_scalar(qb, &reference_scalar(value)?),
        (_, value) => {
            return Err(DbError::Constraint(format!(
                "collection member must be a scalar: {value:?}"
            )));
        }
    }
    Ok(())
}

/// ` WHERE k1 = $n AND k2 = $m` for the handle's key.
pub(crate) fn push_key_filter(
    qb: &mut Builder<'_>,
    desc: &EntityDescriptor,
    handle: &EntityHandle,
) -> Result<(), DbError> {
    if desc.key_fields().count() != handle.key.len() {
        return Err(DbError::Constraint(format!(
            "{handle} does not match the key of {}",
            desc.kind
        )));
    }
    qb.push(" WHERE ");
    for (i, (field, value)) in desc.key_fields().zip(&handle.key).enumerate() {
        if i > 0 {
            qb.push(" AND ");
        }
        qb.push(field.name);
        qb.push(" = ");
        push_scalar(qb, value);
    }
    Ok(())
}

fn decode_scalar(row: &PgRow, column: &str, ty: ScalarType) -> Result<Option<Scalar>, DbError> {
    Ok(match ty {
        ScalarType::Bool => row.try_get::<Option<bool>, _>(column)?.map(Scalar::Bool),
        ScalarType::Int => row.try_get::<Option<i64>, _>(column)?.map(Scalar::Int),
        ScalarType::Decimal => row
            .try_get::<Option<Decimal>, _>(column)?
            .map(Scalar::Decimal),
        ScalarType::Text => row.try_get::<Option<String>, _>(column)?.map(Scalar::Text),
        ScalarType::Timestamp => row
            .try_get::<Option<DateTime<Utc>>, _>(column)?
            .map(Scalar::Timestamp),
    })
}

/// Read a column field back into the value model.
pub(crate) fn decode_column(row: &PgRow, field: &FieldDescriptor) -> Result<FieldValue, DbError> {
    match field.kind {
        FieldKind::Scalar(ty) => Ok(decode_scalar(row, field.name, ty)?
            .map_or(FieldValue::Null, FieldValue::Scalar)),
        FieldKind::Reference(target) => Ok(decode_scalar(row, field.name, key_type(target)?)?
            .map_or(FieldValue::Null, |key| {
                FieldValue::Ref(EntityHandle::single(target, key))
            })),
        FieldKind::Collection(_) => Err(DbError::Decode(format!(
            "{} is a collection, not a column",
            field.name
        ))),
    }
}

/// Read one join-table row back into a collection member.
pub(crate) fn decode_member(row: &PgRow, member: MemberKind) -> Result<FieldValue, DbError> {
    let (ty, target) = match member {
        MemberKind::Scalar(ty) => (ty, None),
        MemberKind::Reference(target) => (key_type(target)?, Some(target)),
    };
    let scalar = decode_scalar(row, MEMBER_COLUMN, ty)?
        .ok_or_else(|| DbError::Decode("NULL collection member".to_owned()))?;
    Ok(match target {
        Some(kind) => FieldValue::Ref(EntityHandle::single(kind, scalar)),
        None => FieldValue::Scalar(scalar),
    })
}

#[cfg(test)]
mod tests {
    use catalog_types::EntityKind;

    use super::*;

    #[test]
    fn references_resolve_to_the_target_key_type() {
        assert!(matches!(key_type(EntityKind::Product), Ok(ScalarType::Int)));
        assert!(matches!(key_type(EntityKind::Installer), Ok(ScalarType::Text)));
        assert!(key_type(EntityKind::Price).is_err());
    }

    #[test]
    fn key_filter_binds_every_key_column() {
        let desc = EntityKind::Price.descriptor();
        let handle = EntityHandle::new(EntityKind::Price, vec![
            Scalar::Int(1),
            Scalar::Text("US".to_owned()),
            Scalar::Int(0),
        ]);
        let mut qb = Builder::new("SELECT 1 FROM prices");
        assert!(push_key_filter(&mut qb, desc, &handle).is_ok());
        assert_eq!(
            qb.sql(),
            "SELECT 1 FROM prices WHERE product = $1 AND country = $2 AND priority = $3"
        );
    }

    #[test]
    fn short_key_is_rejected() {
        let desc = EntityKind::Price.descriptor();
        let handle = EntityHandle::single(EntityKind::Price, Scalar::Int(1));
        let mut qb = Builder::new("SELECT 1 FROM prices");
        assert!(push_key_filter(&mut qb, desc, &handle).is_err());
    }

    #[test]
    fn collection_join_tables_are_prefixed() {
        let desc = EntityKind::Product.descriptor();
        let field = desc.field("developers").map(|f| join_table(desc, f));
        assert_eq!(field.as_deref(), Some("products_developers"));
        assert_eq!(key_columns(EntityKind::Price.descriptor()), "product, country, priority");
    }
}
