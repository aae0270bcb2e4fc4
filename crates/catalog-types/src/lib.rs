//! Shared types for the catalog sync workspace.
//!
//! This crate is the leaf of the dependency graph. It defines the value
//! model every other crate speaks: typed scalars, field values, flat
//! records, entity handles, and the static descriptor table that tells
//! the generic store how each entity kind is shaped.
//!
//! # Modules
//!
//! - [`ids`] -- Type-safe UUID wrappers
//! - [`value`] -- Scalars, references, collections, and kind-aware equality
//! - [`record`] -- Flat field maps produced upstream of the store
//! - [`kind`] -- The closed set of entity kinds
//! - [`descriptor`] -- Static per-kind field tables
//! - [`catalog`] -- The descriptor table for every entity kind
//! - [`entity`] -- Handles, field changes, and previous-value maps
//! - [`audit`] -- Change batches, change events, and template names

pub mod audit;
pub mod catalog;
pub mod descriptor;
pub mod entity;
pub mod ids;
pub mod kind;
pub mod record;
pub mod value;

pub use audit::{ChangeBatch, ChangeEvent, Operation};
pub use descriptor::{
    AuditScope, DescriptorError, EntityDescriptor, FieldDescriptor, FieldKind, FlagRule,
    MemberKind,
};
pub use entity::{EntityHandle, FieldChange, PreviousValues};
pub use ids::BatchId;
pub use kind::{EntityKind, UnknownKind};
pub use record::Record;
pub use value::{FieldValue, Scalar, ScalarType};
