//! `PostgreSQL` backend.
//!
//! One table per entity kind (`EntityDescriptor::table`), references as
//! foreign-key columns, collections as `{table}_{field}` join tables keyed
//! by the owner's primary key.
//!
//! Two transaction-scoped advisory lock families keep concurrent passes
//! apart: one per entity, taken before its row is read, and one per audit
//! root, taken before the batch window lookup. Keys are prefixed
//! differently so the two never collide.

use catalog_types::{
    BatchId, ChangeBatch, ChangeEvent, EntityDescriptor, EntityHandle, FieldChange,
    FieldDescriptor, FieldKind, FieldValue, Record,
};
use chrono::{DateTime, TimeDelta, Utc};
use sqlx::{PgConnection, PgPool, Postgres, Transaction};

use crate::audit_store::{self, AuditStore};
use crate::backend::{CatalogBackend, CatalogTx, entity_lock_key, root_lock_key, window_start};
use crate::error::DbError;
use crate::sql::{
    Builder, MEMBER_COLUMN, collection_fields, column_fields, decode_column, decode_member,
    join_table, key_columns, push_column_value, push_key_filter, push_member, push_scalar,
};

/// Backend over a `PostgreSQL` pool.
#[derive(Debug, Clone)]
pub struct PgBackend {
    pool: PgPool,
}

impl PgBackend {
    /// Create a backend sharing `pool`.
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// The underlying pool.
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// A `PostgreSQL` transaction. Rolled back on drop unless committed.
#[derive(Debug)]
pub struct PgTx {
    tx: Transaction<'static, Postgres>,
}

impl CatalogBackend for PgBackend {
    type Tx = PgTx;

    async fn begin(&self) -> Result<PgTx, DbError> {
        Ok(PgTx {
            tx: self.pool.begin().await?,
        })
    }

    async fn load(&self, handle: &EntityHandle) -> Result<Option<Record>, DbError> {
        let mut conn = self.pool.acquire().await?;
        load_entity(&mut conn, handle).await
    }

    async fn batches_for_root(
        &self,
        root: &EntityHandle,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<ChangeBatch>, DbError> {
        AuditStore::new(&self.pool)
            .batches_for_root(root, from, to)
            .await
    }

    async fn events_in_batch(&self, batch: BatchId) -> Result<Vec<ChangeEvent>, DbError> {
        AuditStore::new(&self.pool).events_in_batch(batch).await
    }
}

impl CatalogTx for PgTx {
    async fn lock_entity(&mut self, handle: &EntityHandle) -> Result<(), DbError> {
        advisory_xact_lock(&mut self.tx, &entity_lock_key(handle)).await
    }

    async fn load(&mut self, handle: &EntityHandle) -> Result<Option<Record>, DbError> {
        load_entity(&mut self.tx, handle).await
    }

    async fn exists(&mut self, handle: &EntityHandle) -> Result<bool, DbError> {
        let desc = handle.kind.descriptor();
        let mut qb = Builder::new(format!("SELECT EXISTS (SELECT 1 FROM {}", desc.table));
        push_key_filter(&mut qb, desc, handle)?;
        qb.push(")");
        let exists: bool = qb.build_query_scalar::<bool>().fetch_one(&mut *self.tx).await?;
        Ok(exists)
    }

    async fn insert(&mut self, handle: &EntityHandle, record: &Record) -> Result<(), DbError> {
        let desc = handle.kind.descriptor();
        let fields: Vec<&FieldDescriptor> = column_fields(desc).collect();
        let names: Vec<&str> = fields.iter().map(|f| f.name).collect();

        let mut qb = Builder::new(format!(
            "INSERT INTO {} ({}) VALUES (",
            desc.table,
            names.join(", ")
        ));
        let null = FieldValue::Null;
        for (i, field) in fields.iter().enumerate() {
            if i > 0 {
                qb.push(", ");
            }
            let value = record.get(field.name).unwrap_or(&null);
            push_column_value(&mut qb, field, value)?;
        }
        qb.push(")");
        qb.build().execute(&mut *self.tx).await?;

        for field in collection_fields(desc) {
            if let Some(FieldValue::Set(members)) = record.get(field.name) {
                insert_members(&mut self.tx, desc, field, handle, members).await?;
            }
        }

        tracing::debug!(entity = %handle, "Row inserted");
        Ok(())
    }

    async fn update(&mut self, handle: &EntityHandle, changes: &[FieldChange]) -> Result<(), DbError> {
        let desc = handle.kind.descriptor();
        if let Some(key) = changes.iter().find(|c| c.field.primary_key) {
            return Err(DbError::Constraint(format!(
                "primary key {}.{} is immutable",
                handle.kind, key.field.name
            )));
        }

        let columns: Vec<&FieldChange> = changes
            .iter()
            .filter(|c| !c.field.kind.is_collection())
            .collect();
        if !columns.is_empty() {
            let mut qb = Builder::new(format!("UPDATE {} SET ", desc.table));
            for (i, change) in columns.iter().enumerate() {
                if i > 0 {
                    qb.push(", ");
                }
                qb.push(change.field.name);
                qb.push(" = ");
                push_column_value(&mut qb, change.field, &change.new)?;
            }
            push_key_filter(&mut qb, desc, handle)?;
            let result = qb.build().execute(&mut *self.tx).await?;
            if result.rows_affected() != 1 {
                return Err(DbError::Constraint(format!("update of missing entity {handle}")));
            }
        }

        for change in changes.iter().filter(|c| c.field.kind.is_collection()) {
            let mut qb = Builder::new(format!("DELETE FROM {}", join_table(desc, change.field)));
            push_key_filter(&mut qb, desc, handle)?;
            qb.build().execute(&mut *self.tx).await?;
            let members = change.new.as_set().unwrap_or_default();
            insert_members(&mut self.tx, desc, change.field, handle, members).await?;
        }

        tracing::debug!(entity = %handle, fields = changes.len(), "Row updated");
        Ok(())
    }

    async fn open_batch(
        &mut self,
        root: &EntityHandle,
        now: DateTime<Utc>,
        window: TimeDelta,
    ) -> Result<ChangeBatch, DbError> {
        advisory_xact_lock(&mut self.tx, &root_lock_key(root)).await?;

        let cutoff = window_start(now, window);
        if let Some(batch) = audit_store::find_open_batch(&mut self.tx, root, cutoff).await? {
            return Ok(batch);
        }

        let batch = ChangeBatch {
            id: BatchId::new(),
            root_kind: root.kind,
            root_key: root.key_string(),
            created_at: now,
        };
        audit_store::insert_batch(&mut self.tx, &batch).await?;
        tracing::debug!(root = %root, batch = %batch.id, "Opened change batch");
        Ok(batch)
    }

    async fn append_event(
        &mut self,
        batch: &ChangeBatch,
        template: Option<&str>,
        args: &[String],
    ) -> Result<ChangeEvent, DbError> {
        let ordinal = audit_store::next_ordinal(&mut self.tx, batch.id).await?;
        let event = ChangeEvent {
            batch_id: batch.id,
            ordinal,
            template: template.map(ToOwned::to_owned),
            args: args.to_vec(),
        };
        audit_store::insert_event(&mut self.tx, &event).await?;
        Ok(event)
    }

    async fn commit(self) -> Result<(), DbError> {
        self.tx.commit().await?;
        Ok(())
    }
}

/// Block until the advisory lock for `key` is ours. Released at commit
/// or rollback.
async fn advisory_xact_lock(conn: &mut PgConnection, key: &str) -> Result<(), DbError> {
    sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))")
        .bind(key)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

/// Load an entity row plus every collection it owns.
async fn load_entity(
    conn: &mut PgConnection,
    handle: &EntityHandle,
) -> Result<Option<Record>, DbError> {
    let desc = handle.kind.descriptor();
    let columns: Vec<&FieldDescriptor> = column_fields(desc).collect();
    let names: Vec<&str> = columns.iter().map(|f| f.name).collect();

    let mut qb = Builder::new(format!("SELECT {} FROM {}", names.join(", "), desc.table));
    push_key_filter(&mut qb, desc, handle)?;
    let Some(row) = qb.build().fetch_optional(&mut *conn).await? else {
        return Ok(None);
    };

    let mut record = Record::new();
    for field in columns {
        record.set(field.name, decode_column(&row, field)?);
    }
    for field in collection_fields(desc) {
        let members = load_members(conn, desc, field, handle).await?;
        record.set(field.name, FieldValue::Set(members));
    }
    Ok(Some(record))
}

async fn load_members(
    conn: &mut PgConnection,
    desc: &EntityDescriptor,
    field: &FieldDescriptor,
    handle: &EntityHandle,
) -> Result<Vec<FieldValue>, DbError> {
    let FieldKind::Collection(member) = field.kind else {
        return Err(DbError::Decode(format!("{} is not a collection", field.name)));
    };
    let mut qb = Builder::new(format!(
        "SELECT {MEMBER_COLUMN} FROM {}",
        join_table(desc, field)
    ));
    push_key_filter(&mut qb, desc, handle)?;
    let rows = qb.build().fetch_all(&mut *conn).await?;
    rows.iter().map(|row| decode_member(row, member)).collect()
}

async fn insert_members(
    conn: &mut PgConnection,
    desc: &EntityDescriptor,
    field: &FieldDescriptor,
    handle: &EntityHandle,
    members: &[FieldValue],
) -> Result<(), DbError> {
    let FieldKind::Collection(member) = field.kind else {
        return Err(DbError::Constraint(format!("{} is not a collection", field.name)));
    };
    if members.is_empty() {
        return Ok(());
    }

    let mut qb = Builder::new(format!(
        "INSERT INTO {} ({}, {MEMBER_COLUMN}) VALUES ",
        join_table(desc, field),
        key_columns(desc)
    ));
    for (i, value) in members.iter().enumerate() {
        if i > 0 {
            qb.push(", ");
        }
        qb.push("(");
        for key in &handle.key {
            push_scalar(&mut qb, key);
            qb.push(", ");
        }
        push_member(&mut qb, member, value)?;
        qb.push(")");
    }
    qb.build().execute(&mut *conn).await?;
    Ok(())
}
