//! Diff-to-event translation and the windowed recorder.
//!
//! The translation functions are pure: they turn an insert or a list of
//! [`FieldChange`]s into [`EventDraft`]s. [`AuditRecorder`] then writes
//! drafts through a [`CatalogTx`], opening the root's batch lazily so a
//! pass that changes nothing leaves no trace in the trail.

use std::sync::Arc;

use catalog_db::CatalogTx;
use catalog_types::audit::templates;
use catalog_types::{
    AuditScope, ChangeBatch, ChangeEvent, EntityDescriptor, EntityHandle, FieldChange, FieldKind,
    FieldValue, Scalar,
};
use chrono::{DateTime, TimeDelta, Utc};

use crate::error::AuditError;
use crate::template::TemplateRegistry;

/// Default batch window.
pub const DEFAULT_WINDOW: TimeDelta = TimeDelta::minutes(30);

/// An event about to be recorded.
///
/// Arguments stay typed until they are written; [`AuditRecorder::record`]
/// converts each one to its display string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventDraft {
    /// Template rendering the event.
    pub template: &'static str,
    /// Arguments in slot order.
    pub args: Vec<FieldValue>,
}

impl EventDraft {
    /// Draft for `template` with `args`.
    pub const fn new(template: &'static str, args: Vec<FieldValue>) -> Self {
        Self { template, args }
    }
}

/// Events recorded when a new entity is inserted.
///
/// Only audit roots record their own creation.
pub fn creation_events(descriptor: &EntityDescriptor, handle: &EntityHandle) -> Vec<EventDraft> {
    match descriptor.audit {
        AuditScope::Root => vec![EventDraft::new(templates::PRODUCT_ADD, vec![
            FieldValue::from(handle.key_string()),
        ])],
        AuditScope::None | AuditScope::Child { .. } => Vec::new(),
    }
}

/// Events describing `changes`, recorded under `root`.
///
/// - A flag leaving its default emits the flag's own single-argument event.
/// - A collection emits `set_add` and `set_remove` for non-empty deltas only.
/// - Anything else emits one `detail_change`.
///
/// Fields excluded from the audit trail are skipped.
pub fn diff_events(root: &EntityHandle, changes: &[FieldChange]) -> Vec<EventDraft> {
    let root_id = FieldValue::from(root.key_string());
    let mut drafts = Vec::new();

    for change in changes.iter().filter(|c| c.field.audited) {
        let field = change.field;
        let name = FieldValue::from(field.name);

        if let Some(rule) = field.flag {
            let now_set = change.new.as_scalar().and_then(Scalar::as_bool);
            if now_set == Some(!rule.default) {
                drafts.push(EventDraft::new(rule.template, vec![root_id.clone()]));
                continue;
            }
        }

        if let FieldKind::Collection(_) = field.kind {
            let added = change.new.set_difference(&change.old);
            let removed = change.old.set_difference(&change.new);
            if !added.is_empty() {
                drafts.push(EventDraft::new(templates::SET_ADD, vec![
                    root_id.clone(),
                    name.clone(),
                    FieldValue::Set(added),
                ]));
            }
            if !removed.is_empty() {
                drafts.push(EventDraft::new(templates::SET_REMOVE, vec![
                    root_id.clone(),
                    name,
                    FieldValue::Set(removed),
                ]));
            }
            continue;
        }

        drafts.push(EventDraft::new(templates::DETAIL_CHANGE, vec![
            root_id.clone(),
            name,
            change.old.clone(),
            change.new.clone(),
        ]));
    }
    drafts
}

/// Writes events into windowed batches.
#[derive(Debug, Clone)]
pub struct AuditRecorder {
    registry: Arc<TemplateRegistry>,
    window: TimeDelta,
}

impl AuditRecorder {
    /// Recorder using `registry` and the default 30 minute window.
    pub const fn new(registry: Arc<TemplateRegistry>) -> Self {
        Self {
            registry,
            window: DEFAULT_WINDOW,
        }
    }

    /// Override the batch window.
    #[must_use]
    pub const fn with_window(mut self, window: TimeDelta) -> Self {
        self.window = window;
        self
    }

    /// Templates known to this recorder.
    pub fn registry(&self) -> &TemplateRegistry {
        &self.registry
    }

    /// Current batch window.
    pub const fn window(&self) -> TimeDelta {
        self.window
    }

    /// The open batch of `root` as of `now`, created if none is open.
    ///
    /// # Errors
    ///
    /// Propagates storage failures.
    pub async fn open_batch<T: CatalogTx>(
        &self,
        tx: &mut T,
        root: &EntityHandle,
        now: DateTime<Utc>,
    ) -> Result<ChangeBatch, AuditError> {
        Ok(tx.open_batch(root, now, self.window).await?)
    }

    /// Append one event to `batch`.
    ///
    /// # Errors
    ///
    /// Returns [`AuditError::UnknownTemplate`] if the draft names a
    /// template that is not registered, or propagates storage failures.
    pub async fn record<T: CatalogTx>(
        &self,
        tx: &mut T,
        batch: &ChangeBatch,
        draft: &EventDraft,
    ) -> Result<ChangeEvent, AuditError> {
        if !self.registry.contains(draft.template) {
            return Err(AuditError::UnknownTemplate(draft.template.to_owned()));
        }
        let args: Vec<String> = draft.args.iter().map(ToString::to_string).collect();
        let event = tx.append_event(batch, Some(draft.template), &args).await?;
        tracing::debug!(
            batch = %batch.id,
            ordinal = event.ordinal,
            template = draft.template,
            "Recorded change event"
        );
        Ok(event)
    }

    /// Record `drafts` under `root` in order.
    ///
    /// The batch is opened only when there is something to record.
    ///
    /// # Errors
    ///
    /// See [`Self::record`].
    pub async fn record_all<T: CatalogTx>(
        &self,
        tx: &mut T,
        root: &EntityHandle,
        now: DateTime<Utc>,
        drafts: &[EventDraft],
    ) -> Result<Vec<ChangeEvent>, AuditError> {
        if drafts.is_empty() {
            return Ok(Vec::new());
        }
        let batch = self.open_batch(tx, root, now).await?;
        let mut events = Vec::with_capacity(drafts.len());
        for draft in drafts {
            events.push(self.record(tx, &batch, draft).await?);
        }
        Ok(events)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use catalog_db::{CatalogBackend, MemoryBackend};
    use catalog_types::EntityKind;
    use chrono::TimeZone;

    use super::*;

    fn product(id: i64) -> EntityHandle {
        EntityHandle::single(EntityKind::Product, Scalar::Int(id))
    }

    fn change(field: &str, old: FieldValue, new: FieldValue) -> FieldChange {
        FieldChange {
            field: EntityKind::Product.descriptor().field(field).unwrap(),
            old,
            new,
        }
    }

    fn texts(values: &[&str]) -> FieldValue {
        FieldValue::Set(values.iter().map(|v| FieldValue::from(*v)).collect())
    }

    fn recorder() -> AuditRecorder {
        AuditRecorder::new(Arc::new(TemplateRegistry::builtin().unwrap()))
    }

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, minute, 0).unwrap()
    }

    #[test]
    fn roots_record_their_creation() {
        let drafts = creation_events(EntityKind::Product.descriptor(), &product(7));
        assert_eq!(drafts, vec![EventDraft::new(templates::PRODUCT_ADD, vec![
            FieldValue::from("7")
        ])]);
        let price = EntityHandle::new(EntityKind::Price, vec![
            Scalar::Int(7),
            Scalar::Text("US".into()),
            Scalar::Int(0),
        ]);
        assert!(creation_events(EntityKind::Price.descriptor(), &price).is_empty());
    }

    #[test]
    fn scalar_change_becomes_detail_change() {
        let drafts = diff_events(&product(1), &[change(
            "title",
            FieldValue::from("Foo"),
            FieldValue::from("Bar"),
        )]);
        assert_eq!(drafts.len(), 1);
        assert_eq!(drafts[0].template, templates::DETAIL_CHANGE);
        let args: Vec<String> = drafts[0].args.iter().map(ToString::to_string).collect();
        assert_eq!(args, ["1", "title", "Foo", "Bar"]);
    }

    #[test]
    fn collection_change_splits_into_added_and_removed() {
        let drafts = diff_events(&product(1), &[change(
            "tags",
            texts(&["a", "b", "c"]),
            texts(&["b", "c", "d"]),
        )]);
        assert_eq!(drafts.len(), 2);
        assert_eq!(drafts[0].template, templates::SET_ADD);
        assert_eq!(drafts[0].args[2], texts(&["d"]));
        assert_eq!(drafts[1].template, templates::SET_REMOVE);
        assert_eq!(drafts[1].args[2], texts(&["a"]));
    }

    #[test]
    fn pure_addition_emits_no_removal() {
        let drafts = diff_events(&product(1), &[change(
            "tags",
            FieldValue::Null,
            texts(&["x", "y"]),
        )]);
        assert_eq!(drafts.len(), 1);
        assert_eq!(drafts[0].args[2].to_string(), "x, y");
    }

    #[test]
    fn flags_leaving_default_use_dedicated_templates() {
        let drafts = diff_events(&product(3), &[
            change("initialized", false.into(), true.into()),
            change("is_visible_in_catalog", true.into(), false.into()),
        ]);
        let names: Vec<_> = drafts.iter().map(|d| d.template).collect();
        assert_eq!(names, [templates::PRODUCT_INIT, templates::PRODUCT_INVISIBLE]);
        assert_eq!(drafts[0].args, vec![FieldValue::from("3")]);
    }

    #[test]
    fn flag_returning_to_default_is_a_detail_change() {
        let drafts = diff_events(&product(3), &[change(
            "is_visible_in_catalog",
            false.into(),
            true.into(),
        )]);
        assert_eq!(drafts[0].template, templates::DETAIL_CHANGE);
    }

    #[test]
    fn unaudited_fields_are_skipped() {
        let drafts = diff_events(&product(1), &[change(
            "checked_at",
            FieldValue::Null,
            FieldValue::from(at(0)),
        )]);
        assert!(drafts.is_empty());
    }

    #[tokio::test]
    async fn records_ordinals_in_one_batch() {
        let backend = MemoryBackend::new();
        let recorder = recorder();
        let root = product(1);
        let drafts = diff_events(&root, &[
            change("title", "Foo".into(), "Bar".into()),
            change("slug", "foo".into(), "bar".into()),
        ]);

        let mut tx = backend.begin().await.unwrap();
        let events = recorder.record_all(&mut tx, &root, at(0), &drafts).await.unwrap();
        tx.commit().await.unwrap();

        let ordinals: Vec<u32> = events.iter().map(|e| e.ordinal).collect();
        assert_eq!(ordinals, [0, 1]);
        assert_eq!(backend.batch_count().await, 1);
        let stored = backend.events_in_batch(events[0].batch_id).await.unwrap();
        assert_eq!(stored, events);
    }

    #[tokio::test]
    async fn nothing_to_record_opens_no_batch() {
        let backend = MemoryBackend::new();
        let mut tx = backend.begin().await.unwrap();
        let events = recorder()
            .record_all(&mut tx, &product(1), at(0), &[])
            .await
            .unwrap();
        tx.commit().await.unwrap();
        assert!(events.is_empty());
        assert_eq!(backend.batch_count().await, 0);
    }

    #[tokio::test]
    async fn batches_age_out_of_the_window() {
        let backend = MemoryBackend::new();
        let recorder = recorder();
        let root = product(1);

        let mut tx = backend.begin().await.unwrap();
        let first = recorder.open_batch(&mut tx, &root, at(0)).await.unwrap();
        let again = recorder.open_batch(&mut tx, &root, at(5)).await.unwrap();
        let later = recorder.open_batch(&mut tx, &root, at(31)).await.unwrap();
        tx.commit().await.unwrap();

        assert_eq!(first.id, again.id);
        assert_ne!(first.id, later.id);
        assert_eq!(later.created_at, at(31));
    }

    #[tokio::test]
    async fn unregistered_templates_are_refused() {
        let backend = MemoryBackend::new();
        let recorder = recorder();
        let mut tx = backend.begin().await.unwrap();
        let batch = recorder.open_batch(&mut tx, &product(1), at(0)).await.unwrap();
        let err = recorder
            .record(&mut tx, &batch, &EventDraft::new("nope", Vec::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, AuditError::UnknownTemplate(_)));
    }
}
