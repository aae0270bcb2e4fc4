//! Typed field values.
//!
//! A [`FieldValue`] is what a record carries for one field: a scalar, a
//! reference to another entity, or an unordered collection. Equality is
//! kind-aware and lives on [`crate::FieldKind`]; this module provides the
//! building blocks (reference keys and multiset keys).

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::entity::EntityHandle;

/// Format used when a timestamp is rendered into an audit argument.
pub const TIMESTAMP_DISPLAY_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// A single typed scalar value.
///
/// Money is always [`Decimal`], never a float.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Scalar {
    /// Boolean flag.
    Bool(bool),
    /// Signed integer (ids, sizes, counters).
    Int(i64),
    /// Exact decimal number (prices, ratings).
    Decimal(Decimal),
    /// Free text.
    Text(String),
    /// UTC timestamp.
    Timestamp(DateTime<Utc>),
}

impl Scalar {
    /// The type tag of this value.
    pub const fn scalar_type(&self) -> ScalarType {
        match self {
            Self::Bool(_) => ScalarType::Bool,
            Self::Int(_) => ScalarType::Int,
            Self::Decimal(_) => ScalarType::Decimal,
            Self::Text(_) => ScalarType::Text,
            Self::Timestamp(_) => ScalarType::Timestamp,
        }
    }

    /// Return the boolean value, if this is a [`Scalar::Bool`].
    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Return the integer value, if this is a [`Scalar::Int`].
    pub const fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Return the text value, if this is a [`Scalar::Text`].
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Decimal(d) => write!(f, "{d}"),
            Self::Text(s) => f.write_str(s),
            Self::Timestamp(ts) => write!(f, "{}", ts.format(TIMESTAMP_DISPLAY_FORMAT)),
        }
    }
}

/// Type tag of a scalar field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalarType {
    /// Boolean.
    Bool,
    /// 64-bit signed integer.
    Int,
    /// Exact decimal.
    Decimal,
    /// Text.
    Text,
    /// UTC timestamp.
    Timestamp,
}

impl ScalarType {
    /// Coerce `value` into this type.
    ///
    /// Identity for matching types. Integers widen to decimals; nothing
    /// else converts.
    pub fn coerce(self, value: Scalar) -> Option<Scalar> {
        match (self, value) {
            (Self::Decimal, Scalar::Int(i)) => Some(Scalar::Decimal(Decimal::from(i))),
            (ty, value) if value.scalar_type() == ty => Some(value),
            _ => None,
        }
    }

    /// Lowercase name used in error messages.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Bool => "bool",
            Self::Int => "int",
            Self::Decimal => "decimal",
            Self::Text => "text",
            Self::Timestamp => "timestamp",
        }
    }
}

impl fmt::Display for ScalarType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The value of one field in a record or stored entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldValue {
    /// No value.
    Null,
    /// A scalar value.
    Scalar(Scalar),
    /// A reference to another entity, by handle.
    Ref(EntityHandle),
    /// An unordered collection of scalars or references.
    Set(Vec<Self>),
}

impl FieldValue {
    /// True for [`FieldValue::Null`].
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Return the scalar, if this is a [`FieldValue::Scalar`].
    pub const fn as_scalar(&self) -> Option<&Scalar> {
        match self {
            Self::Scalar(s) => Some(s),
            _ => None,
        }
    }

    /// Return the referenced handle, if this is a [`FieldValue::Ref`].
    pub const fn as_ref_handle(&self) -> Option<&EntityHandle> {
        match self {
            Self::Ref(h) => Some(h),
            _ => None,
        }
    }

    /// Return the collection members, if this is a [`FieldValue::Set`].
    pub fn as_set(&self) -> Option<&[Self]> {
        match self {
            Self::Set(items) => Some(items),
            _ => None,
        }
    }

    /// The key identifying this value when it is used as a reference.
    ///
    /// A bare scalar is treated as a single-column key; a handle yields
    /// its own key. Both sides of a comparison may use either form.
    pub fn reference_key(&self) -> Option<Vec<Scalar>> {
        match self {
            Self::Scalar(s) => Some(vec![s.clone()]),
            Self::Ref(h) => Some(h.key.clone()),
            Self::Null | Self::Set(_) => None,
        }
    }

    /// Sorted member keys of a collection. `Null` is the empty collection.
    ///
    /// Two collections are equal as multisets exactly when their member
    /// keys are equal.
    pub fn member_keys(&self) -> Vec<Vec<Scalar>> {
        let mut keys: Vec<Vec<Scalar>> = match self {
            Self::Set(items) => items.iter().filter_map(Self::reference_key).collect(),
            Self::Null => Vec::new(),
            other => other.reference_key().into_iter().collect(),
        };
        keys.sort();
        keys
    }

    /// Members of `self` not matched by a member of `other`, counting
    /// duplicates.
    ///
    /// `{a, a, b} - {a}` is `{a, b}`.
    pub fn set_difference(&self, other: &Self) -> Vec<Self> {
        let mut remaining: BTreeMap<Vec<Scalar>, usize> = BTreeMap::new();
        for key in other.member_keys() {
            let count = remaining.entry(key).or_default();
            *count = count.saturating_add(1);
        }

        let members = self.as_set().unwrap_or_default();
        let mut out = Vec::new();
        for member in members {
            let Some(key) = member.reference_key() else {
                continue;
            };
            match remaining.get_mut(&key) {
                Some(count) if *count > 0 => *count = count.saturating_sub(1),
                _ => out.push(member.clone()),
            }
        }
        out
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => Ok(()),
            Self::Scalar(s) => write!(f, "{s}"),
            Self::Ref(h) => f.write_str(&h.key_string()),
            Self::Set(items) => {
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                Ok(())
            }
        }
    }
}

impl From<Scalar> for FieldValue {
    fn from(value: Scalar) -> Self {
        Self::Scalar(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        Self::Scalar(Scalar::Bool(value))
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        Self::Scalar(Scalar::Int(value))
    }
}

impl From<i32> for FieldValue {
    fn from(value: i32) -> Self {
        Self::Scalar(Scalar::Int(i64::from(value)))
    }
}

impl From<Decimal> for FieldValue {
    fn from(value: Decimal) -> Self {
        Self::Scalar(Scalar::Decimal(value))
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        Self::Scalar(Scalar::Text(value.to_owned()))
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        Self::Scalar(Scalar::Text(value))
    }
}

impl From<DateTime<Utc>> for FieldValue {
    fn from(value: DateTime<Utc>) -> Self {
        Self::Scalar(Scalar::Timestamp(value))
    }
}

impl From<EntityHandle> for FieldValue {
    fn from(value: EntityHandle) -> Self {
        Self::Ref(value)
    }
}

impl<T: Into<Self>> From<Option<T>> for FieldValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

impl<T: Into<Self>> From<Vec<T>> for FieldValue {
    fn from(value: Vec<T>) -> Self {
        Self::Set(value.into_iter().map(Into::into).collect())
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::EntityKind;

    fn texts(items: &[&str]) -> FieldValue {
        FieldValue::from(items.to_vec())
    }

    #[test]
    fn integers_widen_to_decimal() {
        assert_eq!(
            ScalarType::Decimal.coerce(Scalar::Int(5)),
            Some(Scalar::Decimal(Decimal::from(5)))
        );
        assert_eq!(ScalarType::Int.coerce(Scalar::Text("5".to_owned())), None);
    }

    #[test]
    fn display_renders_collections_joined() {
        assert_eq!(texts(&["Windows", "Linux"]).to_string(), "Windows, Linux");
        assert_eq!(FieldValue::Null.to_string(), "");
    }

    #[test]
    fn display_renders_timestamps_without_offset() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).single();
        assert_eq!(FieldValue::from(ts).to_string(), "2024-03-01 12:30:00");
    }

    #[test]
    fn scalar_and_handle_share_a_reference_key() {
        let handle = EntityHandle::single(EntityKind::Product, Scalar::Int(7));
        assert_eq!(
            FieldValue::from(7_i64).reference_key(),
            FieldValue::Ref(handle).reference_key()
        );
    }

    #[test]
    fn member_keys_ignore_order_but_keep_duplicates() {
        assert_eq!(
            texts(&["b", "a", "a"]).member_keys(),
            texts(&["a", "b", "a"]).member_keys()
        );
        assert_ne!(
            texts(&["a", "b"]).member_keys(),
            texts(&["a", "b", "b"]).member_keys()
        );
    }

    #[test]
    fn set_difference_counts_duplicates() {
        let left = texts(&["a", "a", "b"]);
        let right = texts(&["a"]);
        assert_eq!(left.set_difference(&right), vec![
            FieldValue::from("a"),
            FieldValue::from("b")
        ]);
        assert!(right.set_difference(&left).is_empty());
    }

    #[test]
    fn set_difference_is_symmetric_per_side() {
        let old = texts(&["a", "b", "c"]);
        let new = texts(&["b", "c", "d"]);
        assert_eq!(new.set_difference(&old), vec![FieldValue::from("d")]);
        assert_eq!(old.set_difference(&new), vec![FieldValue::from("a")]);
    }
}
