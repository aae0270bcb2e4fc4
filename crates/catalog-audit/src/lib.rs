//! Change-audit recorder.
//!
//! Turns the field-level diffs produced by the sync engine into a durable,
//! human-legible trail. Events for one root entity are grouped into a
//! [`ChangeBatch`](catalog_types::ChangeBatch) per time window, so
//! repeated polling does not flood the trail.
//!
//! # Modules
//!
//! - [`template`] -- Validated templates and positional rendering
//! - [`recorder`] -- Diff-to-event translation and batch windowing
//! - [`error`] -- Audit error types

pub mod error;
pub mod recorder;
pub mod template;

pub use error::AuditError;
pub use recorder::{AuditRecorder, DEFAULT_WINDOW, EventDraft, creation_events, diff_events};
pub use template::{Template, TemplateRegistry};
