//! The entity store.
//!
//! [`EntityStore`] runs one synchronization pass per record:
//!
//! 1. Normalize the record and resolve its handle (no I/O).
//! 2. Open a backend transaction and lock the entity.
//! 3. Check that every reference points at a stored entity.
//! 4. Insert, update exactly the changed fields, or do nothing.
//! 5. Record the creation or diff events under the entity's audit root.
//! 6. Run the kind's hook and drain the resulting cascades from a queue.
//! 7. Commit.
//!
//! Any failure drops the transaction, so an entity is never left
//! half-written and no event outlives the write it describes.

use std::collections::VecDeque;
use std::slice;
use std::sync::Arc;

use catalog_audit::{AuditRecorder, creation_events, diff_events};
use catalog_db::{CatalogBackend, CatalogTx};
use catalog_types::{EntityHandle, EntityKind, FieldChange, FieldValue, PreviousValues, Record};
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use tracing::{debug, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::diff::{self, Prepared};
use crate::error::SyncError;
use crate::hooks::{Cascade, HookContext, hooks_for};

/// Default number of unrelated entities synchronized at once by
/// [`EntityStore::sync_all`].
pub const DEFAULT_PARALLELISM: usize = 4;

/// What one pass did to an entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntityChange {
    /// The entity did not exist and was inserted.
    Inserted,
    /// Some fields differed and were written.
    Updated {
        /// Stored values of exactly the changed fields.
        previous: PreviousValues,
    },
    /// Nothing differed; nothing was written.
    Unchanged,
}

/// Result of synchronizing one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncOutcome {
    /// The persisted entity.
    pub handle: EntityHandle,
    /// What happened to it.
    pub change: EntityChange,
}

/// Generic insert-or-minimally-update store over a [`CatalogBackend`].
pub struct EntityStore<B> {
    backend: B,
    recorder: AuditRecorder,
    clock: Arc<dyn Clock>,
    parallelism: usize,
}

impl<B: CatalogBackend> EntityStore<B> {
    /// Store writing through `backend` and recording with `recorder`.
    pub fn new(backend: B, recorder: AuditRecorder) -> Self {
        Self {
            backend,
            recorder,
            clock: Arc::new(SystemClock),
            parallelism: DEFAULT_PARALLELISM,
        }
    }

    /// Replace the time source.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Set how many records [`Self::sync_all`] runs at once (at least 1).
    #[must_use]
    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism.max(1);
        self
    }

    /// Underlying backend.
    pub const fn backend(&self) -> &B {
        &self.backend
    }

    /// Audit recorder.
    pub const fn recorder(&self) -> &AuditRecorder {
        &self.recorder
    }

    /// Insert `record` as a new `kind` entity, or write the fields in
    /// which it differs from the stored one.
    ///
    /// # Errors
    ///
    /// Contract violations ([`SyncError::is_contract_violation`]) are
    /// reported before any I/O. Storage, audit and reference failures roll
    /// the whole pass back.
    pub async fn save_or_update(
        &self,
        kind: EntityKind,
        record: &Record,
    ) -> Result<SyncOutcome, SyncError> {
        let Prepared { handle, record } = diff::prepare(kind, record)?;
        self.run(handle, &record, false).await
    }

    /// Like [`Self::save_or_update`] for an entity already known to
    /// exist. `record` may omit key fields; any it carries must match.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::EntityMissing`] if `handle` is not stored, and
    /// otherwise fails like [`Self::save_or_update`].
    pub async fn update(
        &self,
        handle: &EntityHandle,
        record: &Record,
    ) -> Result<SyncOutcome, SyncError> {
        let desc = handle.kind.descriptor();
        diff::check_key(handle, record)?;
        let record = diff::normalize(desc, record)?;
        self.run(handle.clone(), &record, true).await
    }

    /// Synchronize many records of one kind.
    ///
    /// Up to the configured parallelism run at once, each in its own
    /// transaction. Results come back in input order and one record's
    /// failure does not affect the others.
    pub async fn sync_all(
        &self,
        kind: EntityKind,
        records: &[Record],
    ) -> Vec<Result<SyncOutcome, SyncError>> {
        stream::iter(records)
            .map(|record| async move {
                let result = self.save_or_update(kind, record).await;
                if let Err(e) = &result {
                    warn!(%kind, error = %e, "Entity sync failed");
                }
                result
            })
            .buffered(self.parallelism)
            .collect()
            .await
    }

    async fn run(
        &self,
        handle: EntityHandle,
        record: &Record,
        must_exist: bool,
    ) -> Result<SyncOutcome, SyncError> {
        let now = self.clock.now();
        let mut tx = self.backend.begin().await?;

        let (outcome, cascades) = self.sync_entity(&mut tx, handle, record, must_exist, now).await?;

        let mut queue = VecDeque::from(cascades);
        while let Some(cascade) = queue.pop_front() {
            match cascade {
                Cascade::Upsert { kind, record } => {
                    let Prepared { handle, record } = diff::prepare(kind, &record)?;
                    let (_, more) = self.sync_entity(&mut tx, handle, &record, false, now).await?;
                    queue.extend(more);
                }
                Cascade::Audit { root, drafts } => {
                    self.recorder.record_all(&mut tx, &root, now, &drafts).await?;
                }
                Cascade::Touch { target, field } => touch(&mut tx, &target, field, now).await?,
            }
        }

        tx.commit().await?;
        Ok(outcome)
    }

    /// One lookup, diff, write and hook call. Cascades are returned, not
    /// applied.
    ///
    /// The entity is locked before it is read, so concurrent passes over
    /// the same entity run one after the other and each diffs against
    /// what the previous one committed.
    async fn sync_entity(
        &self,
        tx: &mut B::Tx,
        handle: EntityHandle,
        record: &Record,
        must_exist: bool,
        now: DateTime<Utc>,
    ) -> Result<(SyncOutcome, Vec<Cascade>), SyncError> {
        let desc = handle.kind.descriptor();
        let hooks = hooks_for(handle.kind);
        tx.lock_entity(&handle).await?;
        check_references(tx, &handle, record).await?;

        let Some(stored) = tx.load(&handle).await? else {
            if must_exist {
                return Err(SyncError::EntityMissing(handle));
            }

            // --- Insert ---
            let full = diff::fill_defaults(desc, record)?;
            tx.insert(&handle, &full).await?;
            info!(entity = %handle, "Inserted");

            if let Some(root) = desc.audit_root(&handle, &full) {
                let drafts = creation_events(desc, &handle);
                self.recorder.record_all(tx, &root, now, &drafts).await?;
            }
            let ctx = HookContext { handle: &handle, current: &full, now };
            let cascades = hooks.on_insert(&ctx);
            return Ok((
                SyncOutcome {
                    handle,
                    change: EntityChange::Inserted,
                },
                cascades,
            ));
        };

        let changes = diff::diff(desc, &stored, record);

        // --- Checkout ---
        if changes.is_empty() {
            debug!(entity = %handle, "Unchanged");
            let ctx = HookContext { handle: &handle, current: &stored, now };
            let cascades = hooks.on_checkout(&ctx);
            return Ok((
                SyncOutcome {
                    handle,
                    change: EntityChange::Unchanged,
                },
                cascades,
            ));
        }

        // --- Update ---
        tx.update(&handle, &changes).await?;
        info!(entity = %handle, changed = changes.len(), "Updated");

        let mut current = stored;
        for change in &changes {
            current.set(change.field.name, change.new.clone());
        }
        if let Some(root) = desc.audit_root(&handle, &current) {
            let drafts = diff_events(&root, &changes);
            self.recorder.record_all(tx, &root, now, &drafts).await?;
        }

        let previous = PreviousValues::from(changes.as_slice());
        let ctx = HookContext { handle: &handle, current: &current, now };
        let cascades = hooks.on_update(&ctx, &previous);
        Ok((
            SyncOutcome {
                handle,
                change: EntityChange::Updated { previous },
            },
            cascades,
        ))
    }
}

/// Fail if any reference in `record` points at an entity that is not
/// stored. Self-references are allowed.
async fn check_references<T: CatalogTx>(
    tx: &mut T,
    handle: &EntityHandle,
    record: &Record,
) -> Result<(), SyncError> {
    let desc = handle.kind.descriptor();
    for field in desc.fields {
        let targets: Vec<&EntityHandle> = match record.get(field.name) {
            Some(FieldValue::Ref(target)) => vec![target],
            Some(FieldValue::Set(members)) => members
                .iter()
                .filter_map(FieldValue::as_ref_handle)
                .collect(),
            _ => continue,
        };
        for target in targets {
            if target == handle {
                continue;
            }
            if !tx.exists(target).await? {
                return Err(SyncError::DanglingReference {
                    from: handle.clone(),
                    field: field.name,
                    target: target.clone(),
                });
            }
        }
    }
    Ok(())
}

/// Set `field` of `target` to `now`, skipping the write if it already is.
async fn touch<T: CatalogTx>(
    tx: &mut T,
    target: &EntityHandle,
    field: &'static str,
    now: DateTime<Utc>,
) -> Result<(), SyncError> {
    let desc = target.kind.descriptor();
    let descriptor = desc.field(field).ok_or_else(|| SyncError::UnknownField {
        kind: target.kind,
        field: field.to_owned(),
    })?;
    let stored = tx
        .load(target)
        .await?
        .ok_or_else(|| SyncError::EntityMissing(target.clone()))?;

    let change = FieldChange {
        field: descriptor,
        old: stored.get(field).cloned().unwrap_or(FieldValue::Null),
        new: FieldValue::from(now),
    };
    if change.old == change.new {
        return Ok(());
    }
    tx.update(target, slice::from_ref(&change)).await?;
    debug!(entity = %target, field, "Touched");
    Ok(())
}
