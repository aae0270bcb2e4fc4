//! In-process backend.
//!
//! Holds every table in one map behind an async mutex. A transaction
//! takes the lock for its whole lifetime and works on a staged copy, so
//! transactions are fully serialized and a dropped transaction leaves no
//! trace. Per-entity locks are therefore implied and
//! [`CatalogTx::lock_entity`] does nothing.
//!
//! Built for tests and dry runs only: `begin` clones the whole store, and
//! batches and events are never pruned, so memory use and per-transaction
//! cost grow with everything ever written.

use std::collections::BTreeMap;
use std::sync::Arc;

use catalog_types::{
    BatchId, ChangeBatch, ChangeEvent, EntityHandle, EntityKind, FieldChange, Record, Scalar,
};
use chrono::{DateTime, TimeDelta, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::backend::{CatalogBackend, CatalogTx, window_start};
use crate::error::DbError;

#[derive(Debug, Clone, Default)]
struct MemoryState {
    tables: BTreeMap<EntityKind, BTreeMap<Vec<Scalar>, Record>>,
    batches: Vec<ChangeBatch>,
    events: Vec<ChangeEvent>,
}

/// Shared in-process store. Clones share the same data.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryBackend {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of committed entities of `kind`.
    pub async fn entity_count(&self, kind: EntityKind) -> usize {
        self.state
            .lock()
            .await
            .tables
            .get(&kind)
            .map_or(0, BTreeMap::len)
    }

    /// Number of committed change batches.
    pub async fn batch_count(&self) -> usize {
        self.state.lock().await.batches.len()
    }

    /// Number of committed change events.
    pub async fn event_count(&self) -> usize {
        self.state.lock().await.events.len()
    }

    /// Committed entities of `kind`, in key order.
    pub async fn entities(&self, kind: EntityKind) -> Vec<Record> {
        self.state
            .lock()
            .await
            .tables
            .get(&kind)
            .map(|table| table.values().cloned().collect())
            .unwrap_or_default()
    }
}

/// Transaction over a [`MemoryBackend`].
///
/// Holds the store lock until committed or dropped.
#[derive(Debug)]
pub struct MemoryTx {
    guard: OwnedMutexGuard<MemoryState>,
    staged: MemoryState,
}

impl CatalogBackend for MemoryBackend {
    type Tx = MemoryTx;

    async fn begin(&self) -> Result<MemoryTx, DbError> {
        let guard = Arc::clone(&self.state).lock_owned().await;
        let staged = guard.clone();
        Ok(MemoryTx { guard, staged })
    }

    async fn load(&self, handle: &EntityHandle) -> Result<Option<Record>, DbError> {
        Ok(self.state.lock().await.entity(handle).cloned())
    }

    async fn batches_for_root(
        &self,
        root: &EntityHandle,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<ChangeBatch>, DbError> {
        let key = root.key_string();
        let state = self.state.lock().await;
        let mut batches: Vec<ChangeBatch> = state
            .batches
            .iter()
            .filter(|b| b.root_kind == root.kind && b.root_key == key)
            .filter(|b| b.created_at >= from && b.created_at <= to)
            .cloned()
            .collect();
        batches.sort_by_key(|b| (b.created_at, b.id));
        Ok(batches)
    }

    async fn events_in_batch(&self, batch: BatchId) -> Result<Vec<ChangeEvent>, DbError> {
        let state = self.state.lock().await;
        let mut events: Vec<ChangeEvent> = state
            .events
            .iter()
            .filter(|e| e.batch_id == batch)
            .cloned()
            .collect();
        events.sort_by_key(|e| e.ordinal);
        Ok(events)
    }
}

impl MemoryState {
    fn entity(&self, handle: &EntityHandle) -> Option<&Record> {
        self.tables.get(&handle.kind)?.get(&handle.key)
    }
}

impl CatalogTx for MemoryTx {
    async fn lock_entity(&mut self, _handle: &EntityHandle) -> Result<(), DbError> {
        Ok(())
    }

    async fn load(&mut self, handle: &EntityHandle) -> Result<Option<Record>, DbError> {
        Ok(self.staged.entity(handle).cloned())
    }

    async fn exists(&mut self, handle: &EntityHandle) -> Result<bool, DbError> {
        Ok(self.staged.entity(handle).is_some())
    }

    async fn insert(&mut self, handle: &EntityHandle, record: &Record) -> Result<(), DbError> {
        let table = self.staged.tables.entry(handle.kind).or_default();
        if table.contains_key(&handle.key) {
            return Err(DbError::Constraint(format!("duplicate key {handle}")));
        }
        table.insert(handle.key.clone(), record.clone());
        Ok(())
    }

    async fn update(&mut self, handle: &EntityHandle, changes: &[FieldChange]) -> Result<(), DbError> {
        let record = self
            .staged
            .tables
            .get_mut(&handle.kind)
            .and_then(|table| table.get_mut(&handle.key))
            .ok_or_else(|| DbError::Constraint(format!("update of missing entity {handle}")))?;
        for change in changes {
            if change.field.primary_key {
                return Err(DbError::Constraint(format!(
                    "primary key {}.{} is immutable",
                    handle.kind, change.field.name
                )));
            }
            record.set(change.field.name, change.new.clone());
        }
        Ok(())
    }

    async fn open_batch(
        &mut self,
        root: &EntityHandle,
        now: DateTime<Utc>,
        window: TimeDelta,
    ) -> Result<ChangeBatch, DbError> {
        let key = root.key_string();
        let cutoff = window_start(now, window);
        let open = self
            .staged
            .batches
            .iter()
            .filter(|b| b.root_kind == root.kind && b.root_key == key && b.created_at > cutoff)
            .min_by_key(|b| (b.created_at, b.id));
        if let Some(batch) = open {
            return Ok(batch.clone());
        }

        let batch = ChangeBatch {
            id: BatchId::new(),
            root_kind: root.kind,
            root_key: key,
            created_at: now,
        };
        self.staged.batches.push(batch.clone());
        Ok(batch)
    }

    async fn append_event(
        &mut self,
        batch: &ChangeBatch,
        template: Option<&str>,
        args: &[String],
    ) -> Result<ChangeEvent, DbError> {
        let ordinal = match self
            .staged
            .events
            .iter()
            .filter(|e| e.batch_id == batch.id)
            .map(|e| e.ordinal)
            .max()
        {
            Some(last) => last
                .checked_add(1)
                .ok_or_else(|| DbError::Constraint(format!("batch {} is full", batch.id)))?,
            None => 0,
        };
        let event = ChangeEvent {
            batch_id: batch.id,
            ordinal,
            template: template.map(ToOwned::to_owned),
            args: args.to_vec(),
        };
        self.staged.events.push(event.clone());
        Ok(event)
    }

    async fn commit(self) -> Result<(), DbError> {
        let Self { mut guard, staged } = self;
        *guard = staged;
        Ok(())
    }
}
