//! Catalog engine binary.
//!
//! Runs one polling pass: fetch product details and prices from the
//! provider, turn them into flat records, and reconcile them into the
//! store with a full audit trail. Scheduling repeated passes is left to
//! whatever runs the binary (cron, a systemd timer, a job queue).
//!
//! # Pass Sequence
//!
//! 1. Load configuration from `catalog-config.yaml`
//! 2. Initialize structured logging (tracing)
//! 3. Validate the entity descriptor table and register templates
//! 4. Build the fetch client and provider API
//! 5. Connect and migrate the store (or use the in-process one)
//! 6. Sync products, then the edges between them, then prices
//! 7. Log the pass summary

mod config;
mod error;
mod producer;

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use catalog_audit::{AuditRecorder, TemplateRegistry};
use catalog_db::{CatalogBackend, CatalogPool, MemoryBackend};
use catalog_fetch::{CatalogApi, FetchClient};
use catalog_sync::{EntityChange, EntityStore, SyncError, SyncOutcome};
use catalog_types::{EntityHandle, EntityKind, Record, Scalar};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::{CatalogConfig, LogFormat, LoggingSettings, StorageBackend};
use crate::error::EngineError;
use crate::producer::ProductRecords;

/// Path of the configuration file, relative to the working directory.
const CONFIG_PATH: &str = "catalog-config.yaml";

/// Application entry point for the catalog engine.
///
/// # Errors
///
/// Returns an error if start-up fails or a request the whole pass
/// depends on fails. Individual entity failures are logged, not returned.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. Load configuration.
    let config = load_config()?;

    // 2. Initialize structured logging.
    init_logging(&config.logging);
    info!(
        backend = ?config.storage.backend,
        concurrency = config.fetch.concurrency,
        retries = config.fetch.retries,
        window_minutes = config.audit.window_minutes,
        "catalog-engine starting"
    );

    // 3. Descriptors and templates fail fast, before any I/O.
    catalog_types::catalog::validate_all().map_err(EngineError::from)?;
    let registry = Arc::new(TemplateRegistry::builtin().map_err(EngineError::from)?);
    let recorder = AuditRecorder::new(registry).with_window(config.audit.window());

    // 4. Fetch client.
    let client = FetchClient::http(config.fetch.to_fetch_config()).map_err(EngineError::from)?;
    let api = CatalogApi::new(
        client,
        config.provider.hosts.to_api_hosts(),
        &config.provider.locale,
    );

    // 5-7. Store and pass.
    let summary = match config.storage.backend {
        StorageBackend::Postgres => {
            let pool = CatalogPool::connect(&config.database.to_pool_config())
                .await
                .map_err(EngineError::from)?;
            pool.run_migrations().await.map_err(EngineError::from)?;
            let store = EntityStore::new(pool.backend(), recorder)
                .with_parallelism(config.sync.parallelism);
            let summary = run_pass(&api, &store, &config).await;
            pool.close().await;
            summary?
        }
        StorageBackend::Memory => {
            let store = EntityStore::new(MemoryBackend::new(), recorder)
                .with_parallelism(config.sync.parallelism);
            run_pass(&api, &store, &config).await?
        }
    };

    info!(
        inserted = summary.inserted,
        updated = summary.updated,
        unchanged = summary.unchanged,
        failed = summary.failed,
        "catalog-engine pass complete"
    );
    Ok(())
}

/// Load the configuration from `catalog-config.yaml`, or defaults if the
/// file does not exist.
fn load_config() -> Result<CatalogConfig, EngineError> {
    let config_path = Path::new(CONFIG_PATH);
    if config_path.exists() {
        Ok(CatalogConfig::from_file(config_path)?)
    } else {
        let mut config = CatalogConfig::default();
        config.apply_env_overrides();
        Ok(config)
    }
}

/// Install the global tracing subscriber. `RUST_LOG` wins over the
/// configured level.
fn init_logging(settings: &LoggingSettings) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&settings.level));
    match settings.format {
        LogFormat::Pretty => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .init(),
    }
}

/// Per-entity tallies of one pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct PassSummary {
    inserted: u64,
    updated: u64,
    unchanged: u64,
    failed: u64,
}

impl PassSummary {
    fn tally(&mut self, results: &[Result<SyncOutcome, SyncError>]) {
        for result in results {
            let counter = match result {
                Ok(outcome) => match outcome.change {
                    EntityChange::Inserted => &mut self.inserted,
                    EntityChange::Updated { .. } => &mut self.updated,
                    EntityChange::Unchanged => &mut self.unchanged,
                },
                Err(_) => &mut self.failed,
            };
            *counter = counter.saturating_add(1);
        }
    }
}

/// One polling pass against `store`.
async fn run_pass<B: CatalogBackend>(
    api: &CatalogApi,
    store: &EntityStore<B>,
    config: &CatalogConfig,
) -> Result<PassSummary, EngineError> {
    let mut summary = PassSummary::default();

    // --- Product ids ---
    let ids = if config.provider.product_ids.is_empty() {
        api.product_ids().await?
    } else {
        config.provider.product_ids.clone()
    };
    info!(products = ids.len(), "Polling products");

    // --- Product details ---
    let mut produced: Vec<ProductRecords> = Vec::with_capacity(ids.len());
    for (id, payload) in api.products(&ids).await {
        let records = payload
            .map_err(EngineError::from)
            .and_then(|p| producer::product_records(&p).map_err(EngineError::from));
        match records {
            Ok(records) => produced.push(records),
            Err(e) => {
                warn!(product = id, error = %e, "Skipping product");
                summary.failed = summary.failed.saturating_add(1);
            }
        }
    }

    // --- Products, then edges once both endpoints exist ---
    let nodes: Vec<_> = produced.iter().map(|p| p.node.clone()).collect();
    let results = store.sync_all(EntityKind::Product, &nodes).await;
    summary.tally(&results);
    let stored: Vec<i64> = produced
        .iter()
        .zip(&results)
        .filter(|(_, result)| result.is_ok())
        .map(|(p, _)| p.id)
        .collect();
    summary.tally(&sync_edges(store, &produced, &stored).await?);

    // --- Prices ---
    let mut prices = Vec::new();
    for (country, payload) in api.prices(&stored, &config.provider.countries).await {
        let records = payload
            .map_err(EngineError::from)
            .and_then(|p| producer::price_records(&country, &p).map_err(EngineError::from));
        match records {
            Ok(records) => prices.extend(records),
            Err(e) => warn!(%country, error = %e, "Skipping prices"),
        }
    }
    summary.tally(&store.sync_all(EntityKind::Price, &prices).await);

    Ok(summary)
}

/// Write the edge fields of every product synced this pass.
///
/// An edge target is known if it was synced this pass or is already
/// stored. A field naming a target that is neither is left out, so it
/// is neither written nor diffed.
async fn sync_edges<B: CatalogBackend>(
    store: &EntityStore<B>,
    produced: &[ProductRecords],
    synced: &[i64],
) -> Result<Vec<Result<SyncOutcome, SyncError>>, EngineError> {
    let mut known: BTreeSet<i64> = synced.iter().copied().collect();
    let unseen: BTreeSet<i64> = produced
        .iter()
        .filter(|p| known.contains(&p.id))
        .flat_map(ProductRecords::edge_targets)
        .filter(|id| !known.contains(id))
        .collect();
    for id in unseen {
        let handle = EntityHandle::single(EntityKind::Product, Scalar::Int(id));
        if store.backend().load(&handle).await?.is_some() {
            known.insert(id);
        } else {
            debug!(product = id, "Edge target not stored, leaving its field out");
        }
    }

    let edges: Vec<Record> = produced
        .iter()
        .filter(|p| synced.contains(&p.id))
        .map(|p| p.edges_for(&known))
        .collect();
    Ok(store.sync_all(EntityKind::Product, &edges).await)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use catalog_audit::{AuditRecorder, TemplateRegistry};
    use catalog_db::MemoryBackend;
    use catalog_types::FieldValue;
    use catalog_types::audit::templates;
    use chrono::{TimeDelta, Utc};

    use super::*;

    fn memory_store() -> EntityStore<MemoryBackend> {
        let recorder = AuditRecorder::new(Arc::new(TemplateRegistry::builtin().unwrap()));
        EntityStore::new(MemoryBackend::new(), recorder)
    }

    fn records(id: i64, requires: &[i64]) -> ProductRecords {
        let members = requires.iter().map(|r| FieldValue::from(*r)).collect();
        ProductRecords {
            id,
            node: Record::new().with("id", id),
            edges: Record::new()
                .with("id", id)
                .with("requires_products", FieldValue::Set(members)),
        }
    }

    async fn templates_of(store: &EntityStore<MemoryBackend>, id: i64) -> Vec<String> {
        let root = EntityHandle::single(EntityKind::Product, Scalar::Int(id));
        let now = Utc::now();
        let mut names = Vec::new();
        let batches = store
            .backend()
            .batches_for_root(&root, now - TimeDelta::hours(1), now + TimeDelta::hours(1))
            .await
            .unwrap();
        for batch in batches {
            for event in store.backend().events_in_batch(batch.id).await.unwrap() {
                names.extend(event.template);
            }
        }
        names
    }

    #[tokio::test]
    async fn edges_to_products_outside_the_pass_survive() {
        let store = memory_store();
        let first = [records(1, &[2]), records(2, &[])];
        let nodes: Vec<Record> = first.iter().map(|p| p.node.clone()).collect();
        assert!(store.sync_all(EntityKind::Product, &nodes).await.iter().all(Result::is_ok));
        sync_edges(&store, &first, &[1, 2]).await.unwrap();

        // Only product 1 is polled now; 2 is already stored.
        let second = [records(1, &[2])];
        let outcomes = sync_edges(&store, &second, &[1]).await.unwrap();
        assert_eq!(outcomes[0].as_ref().unwrap().change, EntityChange::Unchanged);

        let names = templates_of(&store, 1).await;
        assert_eq!(names.iter().filter(|n| *n == templates::SET_ADD).count(), 1);
        assert!(!names.iter().any(|n| n == templates::SET_REMOVE));
    }

    #[tokio::test]
    async fn edge_fields_naming_unstored_products_are_skipped() {
        let store = memory_store();
        let first = [records(1, &[]), records(2, &[])];
        let nodes: Vec<Record> = first.iter().map(|p| p.node.clone()).collect();
        assert!(store.sync_all(EntityKind::Product, &nodes).await.iter().all(Result::is_ok));
        sync_edges(&store, &[records(1, &[2])], &[1]).await.unwrap();

        // 3 was never stored: the whole field is left alone.
        let outcomes = sync_edges(&store, &[records(1, &[2, 3])], &[1]).await.unwrap();
        assert_eq!(outcomes[0].as_ref().unwrap().change, EntityChange::Unchanged);
        let stored = store
            .backend()
            .load(&EntityHandle::single(EntityKind::Product, Scalar::Int(1)))
            .await
            .unwrap()
            .unwrap();
        let requires = stored.get("requires_products").and_then(FieldValue::as_set).unwrap();
        assert_eq!(requires.len(), 1);
    }

    #[test]
    fn summary_counts_each_outcome() {
        let handle = EntityHandle::single(EntityKind::Product, Scalar::Int(1));
        let results = vec![
            Ok(SyncOutcome {
                handle: handle.clone(),
                change: EntityChange::Inserted,
            }),
            Ok(SyncOutcome {
                handle,
                change: EntityChange::Unchanged,
            }),
            Err(SyncError::MissingPrimaryKey {
                kind: EntityKind::Product,
                field: "id",
            }),
        ];
        let mut summary = PassSummary::default();
        summary.tally(&results);
        assert_eq!(summary, PassSummary {
            inserted: 1,
            updated: 0,
            unchanged: 1,
            failed: 1,
        });
    }
}
