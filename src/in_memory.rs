//! Process-local adapters for both external tiers.
//!
//! Useful for embedding and for tests: every operation is recorded, failures can
//! be injected with [`InMemoryFastCache::fail_when`] / [`InMemoryDurableStore::fail_when`],
//! and fast cache writes can be slowed down to widen population races.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use crate::{BoxError, CacheKey, DurableStore, FastCache, QueryParams, RecordPayload, WrappedRecord};

type FailPredicate<Op> = Box<dyn Fn(&Op) -> bool + Send + Sync>;

/// Recorded fast cache operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FastCacheOp {
    Get(CacheKey),
    Set(CacheKey),
    Clear,
    Keys,
    SaveRecord(String),
    DeleteById(String),
    LatestUrl,
    SetLatestUrl(String),
}

#[derive(Default)]
struct FastCacheState {
    entries: HashMap<CacheKey, WrappedRecord>,
    records: HashMap<String, RecordPayload>,
    latest_url: Option<String>,
}

/// In-memory [`FastCache`]
#[derive(Clone, Default)]
pub struct InMemoryFastCache {
    state: Arc<RwLock<FastCacheState>>,
    operations: Arc<RwLock<Vec<FastCacheOp>>>,
    fail_when: Arc<RwLock<Option<FailPredicate<FastCacheOp>>>>,
    write_latency: Arc<RwLock<Option<Duration>>>,
}

impl InMemoryFastCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every operation matching the predicate
    pub fn fail_when<F>(&self, predicate: F)
    where
        F: Fn(&FastCacheOp) -> bool + Send + Sync + 'static,
    {
        *self.fail_when.write() = Some(Box::new(predicate));
    }

    /// Let every operation succeed again
    pub fn clear_failures(&self) {
        *self.fail_when.write() = None;
    }

    /// Delay every `set` by the given duration
    pub fn set_write_latency(&self, latency: Option<Duration>) {
        *self.write_latency.write() = latency;
    }

    /// All recorded operations
    pub fn operations(&self) -> Vec<FastCacheOp> {
        self.operations.read().clone()
    }

    /// Number of cached result sets
    pub fn entry_count(&self) -> usize {
        self.state.read().entries.len()
    }

    /// Raw record stored for an id
    pub fn record(&self, id: &str) -> Option<RecordPayload> {
        self.state.read().records.get(id).cloned()
    }

    /// Cached result set for a key, bypassing failure injection and recording
    pub fn peek(&self, key: &CacheKey) -> Option<WrappedRecord> {
        self.state.read().entries.get(key).cloned()
    }

    fn record_op(&self, op: FastCacheOp) -> Result<(), BoxError> {
        let fails = self.fail_when.read().as_ref().is_some_and(|p| p(&op));
        let message = format!("injected fast cache failure: {:?}", op);
        self.operations.write().push(op);
        if fails { Err(message.into()) } else { Ok(()) }
    }
}

#[async_trait]
impl FastCache for InMemoryFastCache {
    async fn get(&self, key: &CacheKey) -> Result<Option<WrappedRecord>, BoxError> {
        self.record_op(FastCacheOp::Get(key.clone()))?;
        Ok(self.state.read().entries.get(key).cloned())
    }

    async fn set(&self, key: &CacheKey, value: &WrappedRecord) -> Result<(), BoxError> {
        let latency = *self.write_latency.read();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        self.record_op(FastCacheOp::Set(key.clone()))?;
        self.state.write().entries.insert(key.clone(), value.clone());
        Ok(())
    }

    async fn clear(&self) -> Result<(), BoxError> {
        self.record_op(FastCacheOp::Clear)?;
        self.state.write().entries.clear();
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<CacheKey>, BoxError> {
        self.record_op(FastCacheOp::Keys)?;
        let mut keys: Vec<CacheKey> = self.state.read().entries.keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }

    async fn save_record(&self, record: &RecordPayload) -> Result<(), BoxError> {
        self.record_op(FastCacheOp::SaveRecord(record.id.clone()))?;
        self.state.write().records.insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn delete_by_id(&self, id: &str) -> Result<(), BoxError> {
        self.record_op(FastCacheOp::DeleteById(id.to_owned()))?;
        self.state.write().records.remove(id);
        Ok(())
    }

    async fn latest_url(&self) -> Result<Option<String>, BoxError> {
        self.record_op(FastCacheOp::LatestUrl)?;
        Ok(self.state.read().latest_url.clone())
    }

    async fn set_latest_url(&self, url: &str) -> Result<(), BoxError> {
        self.record_op(FastCacheOp::SetLatestUrl(url.to_owned()))?;
        self.state.write().latest_url = Some(url.to_owned());
        Ok(())
    }
}

/// Recorded durable store operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOp {
    GetById { table: String, id: String },
    GetByTable { table: String },
    Insert { table: String, id: String },
    Update { table: String, id: String },
    Delete { table: String, id: String },
}

/// Parameters with paging or lookup meaning rather than filter meaning
const RESERVED_PARAMS: [&str; 4] = ["id", "limit", "offset", "sort"];

/// In-memory [`DurableStore`].
///
/// Listings support equality filters on attributes, `sort=<attr>` (prefix `-`
/// for descending), `offset` and `limit`, and embed the filtered row count as
/// `total` in every returned row.
#[derive(Clone, Default)]
pub struct InMemoryDurableStore {
    tables: Arc<RwLock<HashMap<String, BTreeMap<String, RecordPayload>>>>,
    operations: Arc<RwLock<Vec<StoreOp>>>,
    fail_when: Arc<RwLock<Option<FailPredicate<StoreOp>>>>,
}

impl InMemoryDurableStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every operation matching the predicate
    pub fn fail_when<F>(&self, predicate: F)
    where
        F: Fn(&StoreOp) -> bool + Send + Sync + 'static,
    {
        *self.fail_when.write() = Some(Box::new(predicate));
    }

    /// Let every operation succeed again
    pub fn clear_failures(&self) {
        *self.fail_when.write() = None;
    }

    /// All recorded operations
    pub fn operations(&self) -> Vec<StoreOp> {
        self.operations.read().clone()
    }

    /// Number of recorded read operations
    pub fn read_count(&self) -> usize {
        self.operations.read()
            .iter()
            .filter(|op| matches!(op, StoreOp::GetById { .. } | StoreOp::GetByTable { .. }))
            .count()
    }

    /// Stored row, bypassing failure injection and recording
    pub fn row(&self, table: &str, id: &str) -> Option<RecordPayload> {
        self.tables.read().get(table).and_then(|rows| rows.get(id)).cloned()
    }

    /// Seed a row directly
    pub fn seed(&self, record: RecordPayload) {
        self.tables
            .write()
            .entry(record.table.clone())
            .or_default()
            .insert(record.id.clone(), record);
    }

    fn record_op(&self, op: StoreOp) -> Result<(), BoxError> {
        let fails = self.fail_when.read().as_ref().is_some_and(|p| p(&op));
        let message = format!("injected durable store failure: {:?}", op);
        self.operations.write().push(op);
        if fails { Err(message.into()) } else { Ok(()) }
    }
}

fn matches_filter(record: &RecordPayload, name: &str, expected: &str) -> bool {
    let actual = match name {
        "table" => return record.table == expected,
        _ => record.get(name),
    };
    match actual {
        Some(Value::String(s)) => s == expected,
        Some(Value::Null) | None => false,
        Some(other) => other.to_string() == expected,
    }
}

fn sort_key(record: &RecordPayload, attribute: &str) -> String {
    match record.get(attribute) {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None if attribute == "id" => record.id.clone(),
        None => String::new(),
    }
}

#[async_trait]
impl DurableStore for InMemoryDurableStore {
    async fn get_by_table_and_id(
        &self,
        table: &str,
        id: &str,
    ) -> Result<Option<RecordPayload>, BoxError> {
        self.record_op(StoreOp::GetById {
            table: table.to_owned(),
            id: id.to_owned(),
        })?;
        Ok(self.row(table, id))
    }

    async fn get_by_table(
        &self,
        table: &str,
        params: &QueryParams,
    ) -> Result<Vec<RecordPayload>, BoxError> {
        self.record_op(StoreOp::GetByTable {
            table: table.to_owned(),
        })?;

        let mut rows: Vec<RecordPayload> = self
            .tables
            .read()
            .get(table)
            .map(|rows| {
                rows.values()
                    .filter(|record| {
                        params
                            .iter()
                            .filter(|(name, _)| !RESERVED_PARAMS.contains(name))
                            .all(|(name, value)| matches_filter(record, name, value))
                    })
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        if let Some(sort) = params.get("sort") {
            let (attribute, descending) = match sort.strip_prefix('-') {
                Some(attribute) => (attribute, true),
                None => (sort, false),
            };
            rows.sort_by_key(|record| sort_key(record, attribute));
            if descending {
                rows.reverse();
            }
        }

        let total = rows.len();
        let offset = params.offset().unwrap_or(0) as usize;
        let limit = params.limit().map_or(usize::MAX, |l| l as usize);

        Ok(rows
            .into_iter()
            .skip(offset)
            .take(limit)
            .map(|record| record.with_attribute("total", total))
            .collect())
    }

    async fn insert(&self, table: &str, record: RecordPayload) -> Result<RecordPayload, BoxError> {
        self.record_op(StoreOp::Insert {
            table: table.to_owned(),
            id: record.id.clone(),
        })?;
        let mut tables = self.tables.write();
        let rows = tables.entry(table.to_owned()).or_default();
        if rows.contains_key(&record.id) {
            return Err(format!("duplicate id '{}' in table '{}'", record.id, table).into());
        }
        let stored = RecordPayload {
            table: table.to_owned(),
            ..record
        };
        rows.insert(stored.id.clone(), stored.clone());
        Ok(stored)
    }

    async fn update(&self, table: &str, record: RecordPayload) -> Result<RecordPayload, BoxError> {
        self.record_op(StoreOp::Update {
            table: table.to_owned(),
            id: record.id.clone(),
        })?;
        let mut tables = self.tables.write();
        let existing = tables
            .get_mut(table)
            .and_then(|rows| rows.get_mut(&record.id))
            .ok_or_else(|| format!("no record '{}' in table '{}'", record.id, table))?;
        existing.attributes.extend(record.attributes);
        Ok(existing.clone())
    }

    async fn delete_by_table_and_id(&self, table: &str, id: &str) -> Result<(), BoxError> {
        self.record_op(StoreOp::Delete {
            table: table.to_owned(),
            id: id.to_owned(),
        })?;
        if let Some(rows) = self.tables.write().get_mut(table) {
            rows.remove(id);
        }
        Ok(())
    }
}
