//! End-to-end tests of the sync engine against the in-process backend.

#![allow(
    clippy::expect_used,
    clippy::unwrap_used,
    clippy::indexing_slicing,
    clippy::panic,
    clippy::arithmetic_side_effects
)]

use std::sync::Arc;

use catalog_audit::{AuditRecorder, TemplateRegistry};
use catalog_db::{CatalogBackend, MemoryBackend};
use catalog_sync::{EntityChange, EntityStore, ManualClock, SyncError, SyncOutcome};
use catalog_types::audit::templates;
use catalog_types::{ChangeBatch, ChangeEvent, EntityHandle, EntityKind, FieldValue, Record, Scalar};
use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use rust_decimal::Decimal;

// =========================================================================
// Helpers
// =========================================================================

fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
}

fn store() -> (EntityStore<MemoryBackend>, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(start()));
    let recorder = AuditRecorder::new(Arc::new(TemplateRegistry::builtin().unwrap()));
    let store = EntityStore::new(MemoryBackend::new(), recorder).with_clock(Arc::clone(&clock) as _);
    (store, clock)
}

fn product(id: i64) -> EntityHandle {
    EntityHandle::single(EntityKind::Product, Scalar::Int(id))
}

fn texts(values: &[&str]) -> FieldValue {
    FieldValue::Set(values.iter().map(|v| FieldValue::from(*v)).collect())
}

fn price(product: i64, base: Decimal) -> Record {
    Record::new()
        .with("product", product)
        .with("country", "US")
        .with("priority", 0_i64)
        .with("currency", "USD")
        .with("base_price", base)
        .with("final_price", base)
}

async fn batches(store: &EntityStore<MemoryBackend>, root: &EntityHandle) -> Vec<ChangeBatch> {
    store
        .backend()
        .batches_for_root(root, start() - TimeDelta::days(1), start() + TimeDelta::days(1))
        .await
        .unwrap()
}

async fn events(store: &EntityStore<MemoryBackend>, root: &EntityHandle) -> Vec<ChangeEvent> {
    let mut all = Vec::new();
    for batch in batches(store, root).await {
        all.extend(store.backend().events_in_batch(batch.id).await.unwrap());
    }
    all
}

fn previous(outcome: &SyncOutcome) -> Vec<&str> {
    match &outcome.change {
        EntityChange::Updated { previous } => previous.fields().collect(),
        other => panic!("expected an update, got {other:?}"),
    }
}

// =========================================================================
// Diff engine
// =========================================================================

#[tokio::test]
async fn insert_then_update_records_creation_and_change() {
    let (store, clock) = store();
    let first = store
        .save_or_update(EntityKind::Product, &Record::new().with("id", 1_i64).with("title", "Foo"))
        .await
        .unwrap();
    assert_eq!(first.change, EntityChange::Inserted);
    assert_eq!(first.handle, product(1));

    clock.advance(TimeDelta::minutes(1));
    let second = store
        .save_or_update(EntityKind::Product, &Record::new().with("id", 1_i64).with("title", "Bar"))
        .await
        .unwrap();
    let EntityChange::Updated { previous } = &second.change else {
        panic!("expected an update, got {second:?}");
    };
    assert_eq!(previous.len(), 1);
    assert_eq!(previous.get("title"), Some(&FieldValue::from("Foo")));

    let stored = store.backend().load(&product(1)).await.unwrap().unwrap();
    assert_eq!(stored.get("title"), Some(&FieldValue::from("Bar")));

    let events = events(&store, &product(1)).await;
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].template.as_deref(), Some(templates::PRODUCT_ADD));
    assert_eq!(events[0].args, ["1"]);
    assert_eq!(events[1].template.as_deref(), Some(templates::DETAIL_CHANGE));
    assert_eq!(events[1].args, ["1", "title", "Foo", "Bar"]);
    assert_eq!(events[1].ordinal, 1);
}

#[tokio::test]
async fn unchanged_record_writes_nothing() {
    let (store, clock) = store();
    let record = Record::new().with("id", 1_i64).with("title", "Foo").with("tags", texts(&["a"]));
    store.save_or_update(EntityKind::Product, &record).await.unwrap();
    clock.advance(TimeDelta::minutes(1));
    let again = store.save_or_update(EntityKind::Product, &record).await.unwrap();

    assert_eq!(again.change, EntityChange::Unchanged);
    assert_eq!(store.backend().entity_count(EntityKind::Product).await, 1);
    assert_eq!(store.backend().event_count().await, 1);
}

#[tokio::test]
async fn update_reports_exactly_the_changed_fields() {
    let (store, _clock) = store();
    store
        .save_or_update(
            EntityKind::Product,
            &Record::new()
                .with("id", 1_i64)
                .with("title", "Foo")
                .with("slug", "foo")
                .with("tags", texts(&["a", "b"])),
        )
        .await
        .unwrap();

    let outcome = store
        .save_or_update(
            EntityKind::Product,
            &Record::new()
                .with("id", 1_i64)
                .with("title", "Bar")
                .with("slug", "foo")
                .with("tags", texts(&["b", "a", "c"]))
                .with("developers", texts(&["Studio"])),
        )
        .await
        .unwrap();

    assert_eq!(previous(&outcome), ["developers", "tags", "title"]);
    let EntityChange::Updated { previous } = &outcome.change else {
        panic!("expected an update, got {outcome:?}");
    };
    assert_eq!(previous.get("developers"), Some(&FieldValue::Set(Vec::new())));
    assert_eq!(previous.get("tags"), Some(&texts(&["a", "b"])));
}

#[tokio::test]
async fn collection_changes_are_symmetric() {
    let (store, _clock) = store();
    let with_tags = |tags: &[&str]| Record::new().with("id", 1_i64).with("tags", texts(tags));
    store.save_or_update(EntityKind::Product, &with_tags(&["a", "b", "c"])).await.unwrap();
    store.save_or_update(EntityKind::Product, &with_tags(&["b", "c", "d"])).await.unwrap();

    let events = events(&store, &product(1)).await;
    let tail: Vec<_> = events
        .iter()
        .skip(1)
        .map(|e| (e.template.as_deref().unwrap(), e.args.clone()))
        .collect();
    assert_eq!(tail, vec![
        (templates::SET_ADD, vec!["1".to_owned(), "tags".to_owned(), "d".to_owned()]),
        (templates::SET_REMOVE, vec!["1".to_owned(), "tags".to_owned(), "a".to_owned()]),
    ]);
}

#[tokio::test]
async fn flags_leaving_their_default_get_dedicated_events() {
    let (store, _clock) = store();
    store
        .save_or_update(EntityKind::Product, &Record::new().with("id", 5_i64))
        .await
        .unwrap();
    store
        .save_or_update(
            EntityKind::Product,
            &Record::new().with("id", 5_i64).with("initialized", true),
        )
        .await
        .unwrap();

    let events = events(&store, &product(5)).await;
    assert_eq!(events[1].template.as_deref(), Some(templates::PRODUCT_INIT));
    assert_eq!(events[1].args, ["5"]);
}

#[tokio::test]
async fn missing_primary_key_is_fatal_and_writes_nothing() {
    let (store, _clock) = store();
    let err = store
        .save_or_update(EntityKind::Product, &Record::new().with("title", "Foo"))
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::MissingPrimaryKey { field: "id", .. }));
    assert!(err.is_contract_violation());
    assert_eq!(store.backend().entity_count(EntityKind::Product).await, 0);
}

#[tokio::test]
async fn update_by_handle_checks_existence_and_key() {
    let (store, _clock) = store();
    let err = store
        .update(&product(1), &Record::new().with("title", "x"))
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::EntityMissing(_)));

    store
        .save_or_update(EntityKind::Product, &Record::new().with("id", 1_i64))
        .await
        .unwrap();
    let err = store
        .update(&product(1), &Record::new().with("id", 2_i64))
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::PrimaryKeyMismatch { .. }));

    let outcome = store
        .update(&product(1), &Record::new().with("title", "x"))
        .await
        .unwrap();
    assert_eq!(previous(&outcome), ["title"]);
}

// =========================================================================
// Batch windowing
// =========================================================================

#[tokio::test]
async fn updates_within_the_window_share_a_batch() {
    let (store, clock) = store();
    let titled = |t: &str| Record::new().with("id", 1_i64).with("title", t);
    store.save_or_update(EntityKind::Product, &titled("a")).await.unwrap();

    clock.advance(TimeDelta::minutes(5));
    store.save_or_update(EntityKind::Product, &titled("b")).await.unwrap();
    assert_eq!(batches(&store, &product(1)).await.len(), 1);

    clock.set(start() + TimeDelta::minutes(31));
    store.save_or_update(EntityKind::Product, &titled("c")).await.unwrap();
    let batches = batches(&store, &product(1)).await;
    assert_eq!(batches.len(), 2);
    assert_eq!(batches[1].created_at, start() + TimeDelta::minutes(31));

    let second = store.backend().events_in_batch(batches[1].id).await.unwrap();
    assert_eq!(second.len(), 1);
    assert_eq!(second[0].ordinal, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_passes_on_one_root_open_one_batch() {
    let (store, _clock) = store();
    store
        .save_or_update(EntityKind::Product, &Record::new().with("id", 1_i64))
        .await
        .unwrap();

    let title = Record::new().with("id", 1_i64).with("title", "T");
    let slug = Record::new().with("id", 1_i64).with("slug", "s");
    let (a, b) = tokio::join!(
        store.save_or_update(EntityKind::Product, &title),
        store.save_or_update(EntityKind::Product, &slug),
    );
    a.unwrap();
    b.unwrap();

    assert_eq!(batches(&store, &product(1)).await.len(), 1);
    let ordinals: Vec<u32> = events(&store, &product(1)).await.iter().map(|e| e.ordinal).collect();
    assert_eq!(ordinals, [0, 1, 2]);
}

// =========================================================================
// Hook cascades
// =========================================================================

#[tokio::test]
async fn price_changes_snapshot_history_and_audit_the_product() {
    let (store, clock) = store();
    store
        .save_or_update(EntityKind::Product, &Record::new().with("id", 1_i64))
        .await
        .unwrap();
    store
        .save_or_update(EntityKind::Price, &price(1, Decimal::new(999, 2)))
        .await
        .unwrap();
    assert_eq!(store.backend().entity_count(EntityKind::PriceHistory).await, 1);

    clock.advance(TimeDelta::minutes(1));
    let outcome = store
        .save_or_update(EntityKind::Price, &price(1, Decimal::new(499, 2)))
        .await
        .unwrap();
    assert_eq!(previous(&outcome), ["base_price", "final_price"]);
    assert_eq!(store.backend().entity_count(EntityKind::PriceHistory).await, 2);

    let events = events(&store, &product(1)).await;
    let price_events: Vec<_> = events
        .iter()
        .filter(|e| e.args.get(1).map(String::as_str) == Some("base_price"))
        .collect();
    assert_eq!(price_events.len(), 2);
    assert_eq!(price_events[0].template.as_deref(), Some(templates::DETAIL_CHANGE));
    assert_eq!(price_events[0].args, ["1", "base_price", "9.99", "4.99"]);
    assert_eq!(price_events[1].template.as_deref(), Some(templates::BASEPRICE_CHANGE));
    assert_eq!(price_events[1].args, ["1", "base_price", "US", "9.99", "4.99", "USD"]);
}

#[tokio::test]
async fn artifacts_touch_the_product_even_when_unchanged() {
    let (store, clock) = store();
    store
        .save_or_update(EntityKind::Product, &Record::new().with("id", 1_i64))
        .await
        .unwrap();
    let build = Record::new()
        .with("id", 77_i64)
        .with("product", 1_i64)
        .with("os", "windows")
        .with("is_default", true)
        .with("client_id", "cid")
        .with("client_secret", "secret");
    store.save_or_update(EntityKind::Build, &build).await.unwrap();

    let stored = store.backend().load(&product(1)).await.unwrap().unwrap();
    assert_eq!(stored.get("artifacts_checked_at"), Some(&FieldValue::from(start())));
    let access = store.backend().entities(EntityKind::DefaultAccessInfo).await;
    assert_eq!(access.len(), 1);
    assert_eq!(access[0].get("platform"), Some(&FieldValue::from("windows")));

    clock.advance(TimeDelta::hours(1));
    let again = store.save_or_update(EntityKind::Build, &build).await.unwrap();
    assert_eq!(again.change, EntityChange::Unchanged);
    let stored = store.backend().load(&product(1)).await.unwrap().unwrap();
    assert_eq!(
        stored.get("artifacts_checked_at"),
        Some(&FieldValue::from(start() + TimeDelta::hours(1)))
    );
    // Touching system timestamps is never audited.
    assert_eq!(store.backend().event_count().await, 1);
}

// =========================================================================
// Reference integrity and failure isolation
// =========================================================================

#[tokio::test]
async fn dangling_references_roll_the_pass_back() {
    let (store, _clock) = store();
    let err = store
        .save_or_update(EntityKind::Price, &price(99, Decimal::ONE))
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::DanglingReference { field: "product", .. }));

    let err = store
        .save_or_update(
            EntityKind::Product,
            &Record::new().with("id", 1_i64).with("requires_products", vec![2_i64]),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::DanglingReference { field: "requires_products", .. }));

    assert_eq!(store.backend().entity_count(EntityKind::Product).await, 0);
    assert_eq!(store.backend().entity_count(EntityKind::Price).await, 0);
    assert_eq!(store.backend().batch_count().await, 0);
}

#[tokio::test]
async fn sync_all_isolates_failures_and_keeps_order() {
    let (store, _clock) = store();
    let store = store.with_parallelism(2);
    let records = vec![
        Record::new().with("id", 1_i64),
        Record::new().with("title", "no key"),
        Record::new().with("id", 3_i64),
    ];

    let results = store.sync_all(EntityKind::Product, &records).await;
    assert_eq!(results.len(), 3);
    assert_eq!(results[0].as_ref().unwrap().handle, product(1));
    assert!(matches!(results[1], Err(SyncError::MissingPrimaryKey { .. })));
    assert_eq!(results[2].as_ref().unwrap().handle, product(3));
    assert_eq!(store.backend().entity_count(EntityKind::Product).await, 2);
}

#[tokio::test]
async fn reference_edges_sync_after_both_endpoints_exist() {
    let (store, _clock) = store();
    let nodes = vec![Record::new().with("id", 1_i64), Record::new().with("id", 2_i64)];
    for result in store.sync_all(EntityKind::Product, &nodes).await {
        result.unwrap();
    }

    let edges = vec![Record::new().with("id", 1_i64).with("requires_products", vec![2_i64])];
    let results = store.sync_all(EntityKind::Product, &edges).await;
    assert_eq!(previous(results[0].as_ref().unwrap()), ["requires_products"]);

    let stored = store.backend().load(&product(1)).await.unwrap().unwrap();
    assert_eq!(
        stored.get("requires_products"),
        Some(&FieldValue::Set(vec![FieldValue::Ref(product(2))]))
    );
}
