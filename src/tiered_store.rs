//! Tiered read-through / write-through record store
//!
//! Reads fall through three tiers, populating the faster ones on the way back:
//! - L1: in-memory Moka cache, trusted only while the validity flag is set
//! - L2: fast key-value cache (Redis), shared across instances
//! - L3: durable store of record
//!
//! Writes commit to the durable store first, then reconcile both caches.
//! Invalidation is global: any write flips the validity flag and clears every
//! cached result set, regardless of which table changed.
//!
//! Fast cache population after a durable read may run on a spawned task. Its
//! completion is not ordered against later writes, so a slow population can
//! land after a write cleared the fast cache and bring back a pre-write result
//! set until the next write clears it again. [`TieredStore::wait_for_background`]
//! drains pending population tasks.

use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::{
    CacheConfig, CacheError, CacheKey, CacheValidity, DataProducer, DurableStore, FastCache,
    MemoryCache, QueryParams, RecordData, RecordPayload, RequestTarget, Source, SourcePreference,
    WrappedRecord, WriteOperation, WriteOutcome,
};

/// Three-tier record store
pub struct TieredStore<D, F>
where
    D: DurableStore,
    F: FastCache,
{
    inner: Arc<TieredStoreInner<D, F>>,
}

struct TieredStoreInner<D, F>
where
    D: DurableStore,
    F: FastCache,
{
    memory: MemoryCache,
    validity: CacheValidity,
    fast: Arc<F>,
    durable: Arc<D>,
    config: CacheConfig,
    /// Pending fast cache population tasks
    background: Mutex<JoinSet<()>>,
}

impl<D, F> Clone for TieredStore<D, F>
where
    D: DurableStore,
    F: FastCache,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<D, F> TieredStore<D, F>
where
    D: DurableStore,
    F: FastCache,
{
    /// Create a store over the given durable store and fast cache
    pub fn new(durable: D, fast: F, config: CacheConfig) -> Self {
        Self {
            inner: Arc::new(TieredStoreInner {
                memory: MemoryCache::new(&config),
                validity: CacheValidity::new(),
                fast: Arc::new(fast),
                durable: Arc::new(durable),
                config,
                background: Mutex::new(JoinSet::new()),
            }),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    /// The process-wide validity flag
    pub fn validity(&self) -> &CacheValidity {
        &self.inner.validity
    }

    pub fn memory(&self) -> &MemoryCache {
        &self.inner.memory
    }

    pub fn fast_cache(&self) -> &F {
        &self.inner.fast
    }

    pub fn durable_store(&self) -> &D {
        &self.inner.durable
    }

    /// Namespace a caller-supplied cache key
    pub fn cache_key(&self, raw: &str) -> CacheKey {
        CacheKey::new(&self.inner.config.key_prefix, raw)
    }

    /// Cache key for a table query
    pub fn query_key(&self, table: &str, params: &QueryParams) -> CacheKey {
        CacheKey::for_query(&self.inner.config.key_prefix, table, params)
    }

    /// Read the records addressed by a request URL and remember it as the
    /// latest accessed URL.
    ///
    /// Only URLs that were read successfully become the latest URL.
    pub async fn get_records_by_url(
        &self,
        url: &str,
        source: SourcePreference,
    ) -> Result<WrappedRecord, CacheError> {
        let result = self.read_url(url, source).await?;
        if let Err(e) = self.inner.fast.set_latest_url(url).await {
            warn!("Failed to record latest url {}: {}. Continuing.", url, e);
        }
        Ok(result)
    }

    async fn read_url(
        &self,
        url: &str,
        source: SourcePreference,
    ) -> Result<WrappedRecord, CacheError> {
        let target = RequestTarget::from_url(url, self.inner.config.default_limit)?;
        let key = target.cache_key(&self.inner.config.key_prefix);
        self.get_records(&target.table, &target.params, &key, source, None)
            .await
    }

    /// Read records using tiered caching.
    ///
    /// `producer` replaces the default durable fetch when given; its result alone
    /// determines the data and total.
    pub async fn get_records(
        &self,
        table: &str,
        params: &QueryParams,
        key: &CacheKey,
        source: SourcePreference,
        producer: Option<&dyn DataProducer>,
    ) -> Result<WrappedRecord, CacheError> {
        debug!(cache_key = %key, %source, "get_records start");

        if source.allows_memory() {
            if self.inner.validity.is_valid() {
                if let Some(value) = self.inner.memory.get(key).await {
                    debug!("Cache hit memory for key: {}", key);
                    return Ok((*value).clone().with_source(Source::Cache));
                }
                debug!("Cache miss memory for key: {}", key);
            } else {
                debug!(
                    generation = self.inner.validity.generation(),
                    "Cache invalid, bypassing memory for key: {}", key
                );
            }
        }

        if source.allows_fast_cache() {
            match self.inner.fast.get(key).await {
                Ok(Some(value)) => {
                    debug!("Cache hit fast cache for key: {}", key);
                    self.inner
                        .memory
                        .set(key.clone(), value.clone().with_source(Source::Cache))
                        .await;
                    return Ok(value.with_source(Source::Kv));
                }
                Ok(None) => debug!("Cache miss fast cache for key: {}", key),
                Err(e) => warn!(
                    "Fast cache GET error for key {} ({}). Falling back to durable store.",
                    key, e
                ),
            }
        }

        let data = self.fetch_durable(table, params, producer).await.map_err(|e| {
            error!("Durable store error for key {}: {}", key, e);
            e
        })?;

        let result = WrappedRecord::new(data, Source::D1);
        debug!(cache_key = %key, total = result.total, "Fetched from durable store");

        self.inner
            .memory
            .set(key.clone(), result.clone().with_source(Source::Cache))
            .await;
        self.populate_fast_cache(key.clone(), result.clone().with_source(Source::Kv))
            .await;

        Ok(result)
    }

    async fn fetch_durable(
        &self,
        table: &str,
        params: &QueryParams,
        producer: Option<&dyn DataProducer>,
    ) -> Result<RecordData, CacheError> {
        if let Some(producer) = producer {
            return Ok(producer.produce().await?);
        }
        let durable = &self.inner.durable;
        let data: RecordData = match params.id() {
            Some(id) => durable.get_by_table_and_id(table, id).await?.into(),
            None => durable.get_by_table(table, params).await?.into(),
        };
        Ok(data)
    }

    async fn populate_fast_cache(&self, key: CacheKey, value: WrappedRecord) {
        let fast = Arc::clone(&self.inner.fast);
        let task = async move {
            if let Err(e) = fast.set(&key, &value).await {
                warn!("Fast cache SET error for key {}: {}. Continuing.", key, e);
            }
        };

        if self.inner.config.background_population {
            let mut background = self.inner.background.lock().await;
            // Reap finished tasks so the set stays bounded
            while background.try_join_next().is_some() {}
            background.spawn(task);
        } else {
            task.await;
        }
    }

    /// Wait for every pending fast cache population task
    pub async fn wait_for_background(&self) {
        let mut pending = std::mem::take(&mut *self.inner.background.lock().await);
        while let Some(joined) = pending.join_next().await {
            if let Err(e) = joined {
                warn!("Fast cache population task failed: {}", e);
            }
        }
    }

    /// Clear cached result sets, then flip the validity flag.
    ///
    /// Rehydration only revalidates at an unchanged generation, so the fast cache
    /// must be clean before the generation moves.
    async fn invalidate_caches(&self, operation: WriteOperation) {
        if let Err(e) = self.inner.fast.clear().await {
            warn!("Fast cache CLEAR error after {}: {}. Continuing.", operation, e);
        }
        let generation = self.inner.validity.invalidate();
        debug!(%operation, generation, "Cache invalidated");
    }

    /// Insert a record, generating its id when empty.
    ///
    /// The fast cache copy is best effort; the durable insert decides success.
    pub async fn insert_record(&self, mut payload: RecordPayload) -> WriteOutcome {
        if payload.table.is_empty() {
            return WriteOutcome::Failed {
                operation: WriteOperation::Insert,
                message: "error posting content: record has no table".to_owned(),
            };
        }
        if payload.id.is_empty() {
            payload.id = Uuid::new_v4().to_string();
        }

        if let Err(e) = self.inner.fast.save_record(&payload).await {
            warn!(
                "Fast cache save failed for record {}: {}. Continuing with durable insert.",
                payload.id, e
            );
        }

        let table = payload.table.clone();
        match self.inner.durable.insert(&table, payload).await {
            Ok(record) => {
                self.invalidate_caches(WriteOperation::Insert).await;
                debug!(table = %table, id = %record.id, "Record inserted");
                WriteOutcome::Created(record)
            }
            Err(e) => {
                error!("Durable insert failed for table {}: {}", table, e);
                WriteOutcome::Failed {
                    operation: WriteOperation::Insert,
                    message: format!("error posting content {}: {}", table, e),
                }
            }
        }
    }

    /// Update a record, then repopulate both caches for `key` and re-warm the
    /// latest accessed URL from the durable store.
    pub async fn update_record(&self, key: &CacheKey, payload: RecordPayload) -> WriteOutcome {
        let table = payload.table.clone();
        let record = match self.inner.durable.update(&table, payload).await {
            Ok(record) => record,
            Err(e) => {
                error!("Durable update failed for table {}: {}", table, e);
                return WriteOutcome::Failed {
                    operation: WriteOperation::Update,
                    message: format!("error updating content {}: {}", table, e),
                };
            }
        };

        self.inner.memory.clear();
        self.invalidate_caches(WriteOperation::Update).await;

        let fresh = WrappedRecord::new(RecordData::Single(record.clone()), Source::Cache);
        self.inner.memory.set(key.clone(), fresh.clone()).await;
        if let Err(e) = self.inner.fast.set(key, &fresh.with_source(Source::Kv)).await {
            warn!("Fast cache SET error for key {}: {}. Continuing.", key, e);
        }

        self.rewarm_latest_url().await;

        debug!(table = %table, id = %record.id, "Record updated");
        WriteOutcome::Updated(record)
    }

    async fn rewarm_latest_url(&self) {
        let url = match self.inner.fast.latest_url().await {
            Ok(Some(url)) => url,
            Ok(None) => return,
            Err(e) => {
                warn!("Failed to read latest url: {}. Skipping re-warm.", e);
                return;
            }
        };
        if let Err(e) = self.read_url(&url, SourcePreference::D1).await {
            warn!("Re-warm of latest url {} failed: {}", url, e);
        }
    }

    /// Delete a record from the fast cache and the durable store.
    ///
    /// Both deletes run to completion; failures are combined into one message
    /// and the side that succeeded is not rolled back.
    pub async fn delete_record(&self, payload: &RecordPayload) -> WriteOutcome {
        let (fast_result, durable_result) = futures::future::join(
            self.inner.fast.delete_by_id(&payload.id),
            self.inner
                .durable
                .delete_by_table_and_id(&payload.table, &payload.id),
        )
        .await;

        if fast_result.is_ok() || durable_result.is_ok() {
            self.invalidate_caches(WriteOperation::Delete).await;
        }

        let failures: Vec<String> = [
            fast_result.err().map(|e| format!("fast cache: {}", e)),
            durable_result.err().map(|e| format!("durable store: {}", e)),
        ]
        .into_iter()
        .flatten()
        .collect();

        if failures.is_empty() {
            debug!(table = %payload.table, id = %payload.id, "Record deleted");
            return WriteOutcome::Deleted;
        }

        error!(
            "Delete failed for record {} in table {}: {}",
            payload.id,
            payload.table,
            failures.join("; ")
        );
        WriteOutcome::Failed {
            operation: WriteOperation::Delete,
            message: format!("error deleting content: {}", failures.join("; ")),
        }
    }

    /// Reload the memory cache from the fast cache and mark it valid again.
    ///
    /// Returns the number of entries loaded. The flag stays invalid when a write
    /// lands while rehydrating.
    pub async fn rehydrate(&self) -> Result<usize, CacheError> {
        let observed = self.inner.validity.generation();
        let keys = self.inner.fast.keys().await?;

        self.inner.memory.clear();
        let mut loaded = 0;
        for key in keys {
            match self.inner.fast.get(&key).await {
                Ok(Some(value)) => {
                    self.inner
                        .memory
                        .set(key, value.with_source(Source::Cache))
                        .await;
                    loaded += 1;
                }
                Ok(None) => {}
                Err(e) => warn!("Fast cache GET error for key {} during rehydrate: {}", key, e),
            }
        }

        if self.inner.validity.revalidate(observed) {
            debug!(loaded, generation = observed, "Memory cache rehydrated");
        } else {
            warn!(
                loaded,
                "Cache invalidated during rehydration; memory cache stays untrusted"
            );
        }
        Ok(loaded)
    }
}
