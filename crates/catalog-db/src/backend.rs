//! Backend and transaction traits.
//!
//! The sync engine is generic over [`CatalogBackend`]. Every write goes
//! through a [`CatalogTx`]; dropping a transaction without calling
//! [`CatalogTx::commit`] rolls it back.

use std::future::Future;

use catalog_types::{BatchId, ChangeBatch, ChangeEvent, EntityHandle, FieldChange, Record};
use chrono::{DateTime, TimeDelta, Utc};

use crate::error::DbError;

/// One unit of work against the store.
pub trait CatalogTx: Send {
    /// Hold an exclusive lock on `handle` until this transaction ends.
    ///
    /// Works for entities that do not exist yet, so two transactions
    /// inserting the same new entity serialize here instead of failing on
    /// the primary key. Take it before [`CatalogTx::load`] so the diff is
    /// computed against state no other transaction can change.
    fn lock_entity(
        &mut self,
        handle: &EntityHandle,
    ) -> impl Future<Output = Result<(), DbError>> + Send;

    /// Load the stored state of an entity, key fields included.
    fn load(
        &mut self,
        handle: &EntityHandle,
    ) -> impl Future<Output = Result<Option<Record>, DbError>> + Send;

    /// True if the entity exists.
    fn exists(&mut self, handle: &EntityHandle)
    -> impl Future<Output = Result<bool, DbError>> + Send;

    /// Insert a new entity. `record` carries every field of the kind.
    fn insert(
        &mut self,
        handle: &EntityHandle,
        record: &Record,
    ) -> impl Future<Output = Result<(), DbError>> + Send;

    /// Write exactly the given changed fields of an existing entity.
    fn update(
        &mut self,
        handle: &EntityHandle,
        changes: &[FieldChange],
    ) -> impl Future<Output = Result<(), DbError>> + Send;

    /// Return the earliest batch for `root` created after `now - window`,
    /// or create one stamped `now`.
    ///
    /// Serialized per root entity: two transactions opening a batch for
    /// the same root never both create one.
    fn open_batch(
        &mut self,
        root: &EntityHandle,
        now: DateTime<Utc>,
        window: TimeDelta,
    ) -> impl Future<Output = Result<ChangeBatch, DbError>> + Send;

    /// Append an event with the next unused ordinal of `batch`.
    fn append_event(
        &mut self,
        batch: &ChangeBatch,
        template: Option<&str>,
        args: &[String],
    ) -> impl Future<Output = Result<ChangeEvent, DbError>> + Send;

    /// Make every write of this transaction durable.
    fn commit(self) -> impl Future<Output = Result<(), DbError>> + Send;
}

/// A store the sync engine can run against.
pub trait CatalogBackend: Send + Sync {
    /// Transaction type.
    type Tx: CatalogTx;

    /// Start a transaction.
    fn begin(&self) -> impl Future<Output = Result<Self::Tx, DbError>> + Send;

    /// Load committed entity state outside any transaction.
    fn load(
        &self,
        handle: &EntityHandle,
    ) -> impl Future<Output = Result<Option<Record>, DbError>> + Send;

    /// Batches of `root` created within `[from, to]`, oldest first.
    fn batches_for_root(
        &self,
        root: &EntityHandle,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> impl Future<Output = Result<Vec<ChangeBatch>, DbError>> + Send;

    /// Events of one batch in ordinal order.
    fn events_in_batch(
        &self,
        batch: BatchId,
    ) -> impl Future<Output = Result<Vec<ChangeEvent>, DbError>> + Send;
}

/// Oldest creation time still inside `window` as seen from `now`.
pub(crate) fn window_start(now: DateTime<Utc>, window: TimeDelta) -> DateTime<Utc> {
    now.checked_sub_signed(window)
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Advisory-lock key serializing synchronization of one entity.
pub(crate) fn entity_lock_key(handle: &EntityHandle) -> String {
    format!("entity:{}:{}", handle.kind, handle.key_string())
}

/// Advisory-lock key serializing batch creation for one root entity.
pub(crate) fn root_lock_key(root: &EntityHandle) -> String {
    format!("change_batch:{}:{}", root.kind, root.key_string())
}
