//! Write path behaviour of the tiered store.

use cms_cache::in_memory::{FastCacheOp, StoreOp};
use cms_cache::{
    CacheConfig, FastCache, InMemoryDurableStore, InMemoryFastCache, QueryParams, RecordData,
    RecordPayload, Source, SourcePreference, TieredStore, WriteOperation, WriteOutcome,
};
use tracing_test::traced_test;

type Store = TieredStore<InMemoryDurableStore, InMemoryFastCache>;

fn inline_store() -> Store {
    TieredStore::new(
        InMemoryDurableStore::new(),
        InMemoryFastCache::new(),
        CacheConfig::default().with_background_population(false),
    )
}

fn post(id: &str, title: &str) -> RecordPayload {
    RecordPayload::new("posts")
        .with_id(id)
        .with_attribute("title", title)
}

fn listing() -> QueryParams {
    QueryParams::new().with("limit", "1000")
}

async fn read_listing(store: &Store, source: SourcePreference) -> cms_cache::WrappedRecord {
    let params = listing();
    let key = store.query_key("posts", &params);
    store
        .get_records("posts", &params, &key, source, None)
        .await
        .unwrap()
}

#[tokio::test]
async fn test_insert_generates_id_and_invalidates() {
    let store = inline_store();
    read_listing(&store, SourcePreference::Fastest).await;
    assert_eq!(store.fast_cache().entry_count(), 1);

    let outcome = store
        .insert_record(RecordPayload::new("posts").with_attribute("title", "A"))
        .await;

    assert_eq!(outcome.code(), 201);
    let created = outcome.data().unwrap();
    assert!(!created.id.is_empty());
    assert_eq!(
        store.durable_store().row("posts", &created.id).unwrap().get_str("title"),
        Some("A")
    );
    assert!(store.fast_cache().record(&created.id).is_some());
    assert_eq!(store.fast_cache().entry_count(), 0);
    assert!(!store.validity().is_valid());
    assert_eq!(store.validity().generation(), 1);
}

#[tokio::test]
async fn test_insert_keeps_supplied_id() {
    let store = inline_store();
    let outcome = store.insert_record(post("given", "A")).await;
    assert_eq!(outcome.data().map(|r| r.id.as_str()), Some("given"));
}

#[tokio::test]
async fn test_insert_is_visible_to_next_fastest_listing() {
    let store = inline_store();
    store.durable_store().seed(post("1", "A"));
    let before = read_listing(&store, SourcePreference::Fastest).await;
    assert_eq!(before.total, 1);

    store.insert_record(post("2", "B")).await;

    let after = read_listing(&store, SourcePreference::Fastest).await;
    assert_eq!(after.source, Source::D1);
    assert_eq!(after.total, 2);
}

#[tokio::test]
#[traced_test]
async fn test_insert_swallows_fast_cache_failure() {
    let store = inline_store();
    store
        .fast_cache()
        .fail_when(|op| matches!(op, FastCacheOp::SaveRecord(_)));

    let outcome = store.insert_record(post("1", "A")).await;

    assert_eq!(outcome.code(), 201);
    assert!(store.durable_store().row("posts", "1").is_some());
    assert!(logs_contain("Fast cache save failed"));
}

#[tokio::test]
async fn test_insert_durable_failure_reports_500() {
    let store = inline_store();
    store
        .durable_store()
        .fail_when(|op| matches!(op, StoreOp::Insert { .. }));

    let outcome = store.insert_record(post("1", "A")).await;

    assert_eq!(outcome.code(), 500);
    assert!(matches!(
        &outcome,
        WriteOutcome::Failed { operation: WriteOperation::Insert, message } if message.contains("posts")
    ));
    let wire = serde_json::to_value(&outcome).unwrap();
    assert!(wire.get("error").is_some());
    assert!(store.validity().is_valid());
}

#[tokio::test]
async fn test_insert_without_table_is_rejected() {
    let store = inline_store();
    let mut payload = post("1", "A");
    payload.table.clear();

    let outcome = store.insert_record(payload).await;
    assert_eq!(outcome.code(), 500);
    assert!(store.durable_store().operations().is_empty());
}

#[tokio::test]
async fn test_update_repopulates_key_after_global_clear() {
    let store = inline_store();
    store.durable_store().seed(post("X", "old").with_attribute("author", "ann"));
    let params = QueryParams::new().with("id", "X");
    let key = store.query_key("posts", &params);
    store
        .get_records("posts", &params, &key, SourcePreference::Fastest, None)
        .await
        .unwrap();
    read_listing(&store, SourcePreference::Fastest).await;

    let outcome = store
        .update_record(&key, RecordPayload::new("posts").with_id("X").with_attribute("title", "new"))
        .await;
    assert_eq!(outcome.code(), 200);
    assert!(!store.validity().is_valid());

    // Only the updated key survived the clear
    assert_eq!(store.fast_cache().entry_count(), 1);

    let read = store
        .get_records("posts", &params, &key, SourcePreference::Fastest, None)
        .await
        .unwrap();
    assert_eq!(read.source, Source::Kv);
    let RecordData::Single(record) = read.data else {
        panic!("expected a single record, got {:?}", read.data);
    };
    assert_eq!(record.get_str("title"), Some("new"));
    assert_eq!(record.get_str("author"), Some("ann"));
}

#[tokio::test]
async fn test_update_rewarms_latest_url_from_durable_store() {
    let store = inline_store();
    store.durable_store().seed(post("1", "A"));
    store
        .get_records_by_url("/v1/posts", SourcePreference::Fastest)
        .await
        .unwrap();

    let key = store.cache_key("posts/1");
    store.update_record(&key, post("1", "B")).await;

    let listing_key = store.query_key("posts", &listing());
    let warmed = store.fast_cache().peek(&listing_key).unwrap();
    assert_eq!(warmed.data.records()[0].get_str("title"), Some("B"));

    let ops = store.durable_store().operations();
    let update_at = ops
        .iter()
        .position(|op| matches!(op, StoreOp::Update { .. }))
        .unwrap();
    assert!(matches!(ops.last(), Some(StoreOp::GetByTable { .. })));
    assert!(update_at < ops.len() - 1);
}

#[tokio::test]
async fn test_rejected_url_does_not_replace_latest_url() {
    let store = inline_store();
    store.durable_store().seed(post("1", "A"));
    store
        .get_records_by_url("/v1/posts", SourcePreference::Fastest)
        .await
        .unwrap();
    assert!(
        store
            .get_records_by_url("/v1/", SourcePreference::Fastest)
            .await
            .is_err()
    );
    assert_eq!(
        store.fast_cache().latest_url().await.unwrap().as_deref(),
        Some("/v1/posts")
    );

    let key = store.cache_key("posts/1");
    store.update_record(&key, post("1", "B")).await;

    let listing_key = store.query_key("posts", &listing());
    let warmed = store.fast_cache().peek(&listing_key).unwrap();
    assert_eq!(warmed.data.records()[0].get_str("title"), Some("B"));
}

#[tokio::test]
async fn test_update_durable_failure_leaves_caches_alone() {
    let store = inline_store();
    store.durable_store().seed(post("1", "A"));
    read_listing(&store, SourcePreference::Fastest).await;

    let key = store.cache_key("posts/1");
    let outcome = store.update_record(&key, post("missing", "B")).await;

    assert_eq!(outcome.code(), 500);
    assert!(outcome.message().is_some_and(|m| m.contains("missing")));
    assert!(store.validity().is_valid());
    assert_eq!(store.fast_cache().entry_count(), 1);
    let wire = serde_json::to_value(&outcome).unwrap();
    assert!(wire.get("message").is_some());
}

#[tokio::test]
async fn test_delete_removes_record_from_every_read_path() {
    let store = inline_store();
    store.durable_store().seed(post("X", "A"));
    store.durable_store().seed(post("Y", "B"));
    store.fast_cache().save_record(&post("X", "A")).await.unwrap();
    let before = read_listing(&store, SourcePreference::Fastest).await;
    assert_eq!(before.total, 2);

    let outcome = store.delete_record(&post("X", "A")).await;
    assert_eq!(outcome, WriteOutcome::Deleted);
    assert!(store.fast_cache().record("X").is_none());

    let params = QueryParams::new().with("id", "X");
    let key = store.query_key("posts", &params);
    let by_id = store
        .get_records("posts", &params, &key, SourcePreference::D1, None)
        .await
        .unwrap();
    assert_eq!(by_id.data, RecordData::Empty);
    assert_eq!(by_id.total, 0);

    let after = read_listing(&store, SourcePreference::Fastest).await;
    assert_eq!(after.source, Source::D1);
    assert_eq!(after.total, 1);
    assert!(after.data.records().iter().all(|r| r.id != "X"));
}

#[tokio::test]
async fn test_delete_partial_failure_is_reported_without_rollback() {
    let store = inline_store();
    store.durable_store().seed(post("X", "A"));
    store.fast_cache().save_record(&post("X", "A")).await.unwrap();
    store
        .durable_store()
        .fail_when(|op| matches!(op, StoreOp::Delete { .. }));

    let outcome = store.delete_record(&post("X", "A")).await;

    assert_eq!(outcome.code(), 500);
    let message = outcome.message().unwrap();
    assert!(message.contains("durable store"));
    assert!(!message.contains("fast cache:"));
    assert!(store.fast_cache().record("X").is_none());
    assert!(store.durable_store().row("posts", "X").is_some());
    assert!(!store.validity().is_valid());
}

#[tokio::test]
async fn test_delete_total_failure_combines_errors() {
    let store = inline_store();
    store
        .durable_store()
        .fail_when(|op| matches!(op, StoreOp::Delete { .. }));
    store
        .fast_cache()
        .fail_when(|op| matches!(op, FastCacheOp::DeleteById(_)));

    let outcome = store.delete_record(&post("X", "A")).await;

    let message = outcome.message().unwrap();
    assert!(message.contains("fast cache:"));
    assert!(message.contains("durable store:"));
    assert!(store.validity().is_valid());
}

#[tokio::test]
async fn test_no_stale_memory_read_across_write_boundary() {
    let store = inline_store();
    store.durable_store().seed(post("1", "A"));
    let params = QueryParams::new().with("id", "1");
    let key = store.query_key("posts", &params);
    let first = store
        .get_records("posts", &params, &key, SourcePreference::Fastest, None)
        .await
        .unwrap();
    assert_eq!(first.data.records()[0].get_str("title"), Some("A"));

    // A write elsewhere: the stale memory entry for `key` must not be served
    store.durable_store().seed(post("1", "changed out of band"));
    store.insert_record(RecordPayload::new("comments")).await;

    let after = store
        .get_records("posts", &params, &key, SourcePreference::Fastest, None)
        .await
        .unwrap();
    assert_eq!(after.source, Source::D1);
    assert_eq!(
        after.data.records()[0].get_str("title"),
        Some("changed out of band")
    );
}
