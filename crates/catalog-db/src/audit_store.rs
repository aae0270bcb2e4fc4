//! Audit trail persistence.
//!
//! `change_batches` holds one row per (root entity, window); each batch
//! owns a dense, 0-based run of `change_events` rows. Events are
//! append-only and never updated.

use catalog_types::{BatchId, ChangeBatch, ChangeEvent, EntityHandle, UnknownKind};
use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use crate::error::DbError;

/// Read-side queries over the audit tables.
pub struct AuditStore<'a> {
    pool: &'a PgPool,
}

impl<'a> AuditStore<'a> {
    /// Create a new audit store bound to a connection pool.
    pub const fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    /// Batches of `root` created within `[from, to]`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Postgres`] if the query fails, or
    /// [`DbError::Decode`] if a row names an unknown entity kind.
    pub async fn batches_for_root(
        &self,
        root: &EntityHandle,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<ChangeBatch>, DbError> {
        let rows = sqlx::query_as::<_, BatchRow>(
            r"SELECT id, root_kind, root_key, created_at
              FROM change_batches
              WHERE root_kind = $1 AND root_key = $2
                AND created_at >= $3 AND created_at <= $4
              ORDER BY created_at ASC, id ASC",
        )
        .bind(root.kind.as_str())
        .bind(root.key_string())
        .bind(from)
        .bind(to)
        .fetch_all(self.pool)
        .await?;

        rows.into_iter().map(ChangeBatch::try_from).collect()
    }

    /// Events of one batch in ordinal order.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Postgres`] if the query fails.
    pub async fn events_in_batch(&self, batch: BatchId) -> Result<Vec<ChangeEvent>, DbError> {
        let rows = sqlx::query_as::<_, EventRow>(
            r"SELECT batch_id, ordinal, template, args
              FROM change_events
              WHERE batch_id = $1
              ORDER BY ordinal ASC",
        )
        .bind(batch.as_uuid())
        .fetch_all(self.pool)
        .await?;

        rows.into_iter().map(ChangeEvent::try_from).collect()
    }
}

/// The earliest batch of `root` created after `cutoff`.
pub(crate) async fn find_open_batch(
    conn: &mut PgConnection,
    root: &EntityHandle,
    cutoff: DateTime<Utc>,
) -> Result<Option<ChangeBatch>, DbError> {
    let row = sqlx::query_as::<_, BatchRow>(
        r"SELECT id, root_kind, root_key, created_at
          FROM change_batches
          WHERE root_kind = $1 AND root_key = $2 AND created_at > $3
          ORDER BY created_at ASC, id ASC
          LIMIT 1",
    )
    .bind(root.kind.as_str())
    .bind(root.key_string())
    .bind(cutoff)
    .fetch_optional(&mut *conn)
    .await?;

    row.map(ChangeBatch::try_from).transpose()
}

pub(crate) async fn insert_batch(conn: &mut PgConnection, batch: &ChangeBatch) -> Result<(), DbError> {
    sqlx::query(
        r"INSERT INTO change_batches (id, root_kind, root_key, created_at)
          VALUES ($1, $2, $3, $4)",
    )
    .bind(batch.id.as_uuid())
    .bind(batch.root_kind.as_str())
    .bind(&batch.root_key)
    .bind(batch.created_at)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Next unused ordinal of a batch.
pub(crate) async fn next_ordinal(conn: &mut PgConnection, batch: BatchId) -> Result<u32, DbError> {
    let next: i32 = sqlx::query_scalar(
        "SELECT COALESCE(MAX(ordinal) + 1, 0) FROM change_events WHERE batch_id = $1",
    )
    .bind(batch.as_uuid())
    .fetch_one(&mut *conn)
    .await?;
    u32::try_from(next).map_err(|e| DbError::Decode(format!("negative ordinal {next}: {e}")))
}

pub(crate) async fn insert_event(conn: &mut PgConnection, event: &ChangeEvent) -> Result<(), DbError> {
    let ordinal = i32::try_from(event.ordinal)
        .map_err(|e| DbError::Constraint(format!("ordinal {} overflows: {e}", event.ordinal)))?;
    sqlx::query(
        r"INSERT INTO change_events (batch_id, ordinal, template, args)
          VALUES ($1, $2, $3, $4)",
    )
    .bind(event.batch_id.as_uuid())
    .bind(ordinal)
    .bind(event.template.as_deref())
    .bind(&event.args)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// A row from the `change_batches` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct BatchRow {
    /// Batch identifier.
    pub id: Uuid,
    /// Root entity kind name.
    pub root_kind: String,
    /// Root entity key string.
    pub root_key: String,
    /// When the batch was opened.
    pub created_at: DateTime<Utc>,
}

impl TryFrom<BatchRow> for ChangeBatch {
    type Error = DbError;

    fn try_from(row: BatchRow) -> Result<Self, Self::Error> {
        let root_kind = row
            .root_kind
            .parse()
            .map_err(|e: UnknownKind| DbError::Decode(e.to_string()))?;
        Ok(Self {
            id: BatchId::from(row.id),
            root_kind,
            root_key: row.root_key,
            created_at: row.created_at,
        })
    }
}

/// A row from the `change_events` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct EventRow {
    /// Owning batch.
    pub batch_id: Uuid,
    /// Position within the batch.
    pub ordinal: i32,
    /// Rendering template name.
    pub template: Option<String>,
    /// Display-string arguments.
    pub args: Vec<String>,
}

impl TryFrom<EventRow> for ChangeEvent {
    type Error = DbError;

    fn try_from(row: EventRow) -> Result<Self, Self::Error> {
        let ordinal = u32::try_from(row.ordinal)
            .map_err(|e| DbError::Decode(format!("negative ordinal {}: {e}", row.ordinal)))?;
        Ok(Self {
            batch_id: BatchId::from(row.batch_id),
            ordinal,
            template: row.template,
            args: row.args,
        })
    }
}
