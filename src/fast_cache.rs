//! Distributed key-value tier
//!
//! Result sets live under the configured key prefix and are tracked in an index
//! set so they can be listed and cleared without touching raw per-id record
//! entries, which live under `{prefix}__record:`.

use async_trait::async_trait;
use redis::AsyncCommands;
use std::time::Duration;
use tracing::{debug, warn};

use crate::{BoxError, CacheKey, RecordPayload, WrappedRecord};

/// Contract for the fast cache tier.
#[async_trait]
pub trait FastCache: Send + Sync + 'static {
    /// Look up a cached result set
    async fn get(&self, key: &CacheKey) -> Result<Option<WrappedRecord>, BoxError>;

    /// Store a result set
    async fn set(&self, key: &CacheKey, value: &WrappedRecord) -> Result<(), BoxError>;

    /// Drop every cached result set. Raw per-id records are kept.
    async fn clear(&self) -> Result<(), BoxError>;

    /// Keys of all cached result sets
    async fn keys(&self) -> Result<Vec<CacheKey>, BoxError>;

    /// Store the raw record for an id
    async fn save_record(&self, record: &RecordPayload) -> Result<(), BoxError>;

    /// Remove the raw record for an id
    async fn delete_by_id(&self, id: &str) -> Result<(), BoxError>;

    /// Most recently accessed request URL
    async fn latest_url(&self) -> Result<Option<String>, BoxError>;

    /// Record the most recently accessed request URL
    async fn set_latest_url(&self, url: &str) -> Result<(), BoxError>;
}

const RECORD_SEGMENT: &str = "__record:";
const LATEST_URL_SEGMENT: &str = "__latest_url";
const KEY_INDEX_SEGMENT: &str = "__keys";

/// Deletes every indexed result set and the index in one step. Runs atomically
/// on the server, so a concurrent `set` lands either wholly before the clear
/// (and is removed) or wholly after it (and stays indexed).
const CLEAR_INDEXED_SCRIPT: &str = r"
local members = redis.call('SMEMBERS', KEYS[1])
for _, member in ipairs(members) do
    redis.call('DEL', member)
end
redis.call('DEL', KEYS[1])
return #members
";

fn index_key(prefix: &str) -> String {
    format!("{}{}", prefix, KEY_INDEX_SEGMENT)
}

fn record_key(prefix: &str, id: &str) -> String {
    format!("{}{}{}", prefix, RECORD_SEGMENT, id)
}

fn latest_url_key(prefix: &str) -> String {
    format!("{}{}", prefix, LATEST_URL_SEGMENT)
}

/// Redis-backed fast cache
///
/// Every key lives under the configured prefix: result sets, the `__keys`
/// index of result sets, raw `__record:{id}` entries and `__latest_url`.
#[derive(Clone)]
pub struct RedisFastCache {
    redis: redis::aio::ConnectionManager,
    key_prefix: String,
    ttl_secs: u64,
}

impl RedisFastCache {
    /// Connect using a managed connection.
    ///
    /// A TTL under one second is raised to one second; `SETEX` rejects zero.
    pub async fn new(
        redis_client: redis::Client,
        key_prefix: impl Into<String>,
        ttl: Duration,
    ) -> Result<Self, redis::RedisError> {
        let redis = redis::aio::ConnectionManager::new(redis_client).await?;
        Ok(Self {
            redis,
            key_prefix: key_prefix.into(),
            ttl_secs: ttl.as_secs().max(1),
        })
    }
}

#[async_trait]
impl FastCache for RedisFastCache {
    async fn get(&self, key: &CacheKey) -> Result<Option<WrappedRecord>, BoxError> {
        let mut conn = self.redis.clone();
        let cached: Option<String> = conn.get(key.as_str()).await?;

        let Some(json) = cached else {
            return Ok(None);
        };

        match serde_json::from_str::<WrappedRecord>(&json) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                warn!(
                    "Failed to deserialize cached value for key {}: {}. Deleting corrupt entry.",
                    key, e
                );
                if let Err(del_err) = conn.del::<_, ()>(key.as_str()).await {
                    warn!("Failed to delete corrupt entry for key {}: {}", key, del_err);
                }
                Ok(None)
            }
        }
    }

    async fn set(&self, key: &CacheKey, value: &WrappedRecord) -> Result<(), BoxError> {
        let json = serde_json::to_string(value)?;
        let mut conn = self.redis.clone();
        // MULTI/EXEC keeps the entry and its index membership together
        let (): () = redis::pipe()
            .atomic()
            .set_ex(key.as_str(), json, self.ttl_secs)
            .ignore()
            .sadd(index_key(&self.key_prefix), key.as_str())
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn clear(&self) -> Result<(), BoxError> {
        let mut conn = self.redis.clone();
        let removed: usize = redis::Script::new(CLEAR_INDEXED_SCRIPT)
            .key(index_key(&self.key_prefix))
            .invoke_async(&mut conn)
            .await?;
        debug!("Cleared {} result-set entries from fast cache", removed);
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<CacheKey>, BoxError> {
        let mut conn = self.redis.clone();
        let keys: Vec<String> = conn.smembers(index_key(&self.key_prefix)).await?;
        Ok(keys.into_iter().map(CacheKey::from_raw).collect())
    }

    async fn save_record(&self, record: &RecordPayload) -> Result<(), BoxError> {
        let json = serde_json::to_string(record)?;
        let mut conn = self.redis.clone();
        conn.set::<_, _, ()>(record_key(&self.key_prefix, &record.id), json)
            .await?;
        Ok(())
    }

    async fn delete_by_id(&self, id: &str) -> Result<(), BoxError> {
        let mut conn = self.redis.clone();
        conn.del::<_, ()>(record_key(&self.key_prefix, id)).await?;
        Ok(())
    }

    async fn latest_url(&self) -> Result<Option<String>, BoxError> {
        let mut conn = self.redis.clone();
        Ok(conn.get(latest_url_key(&self.key_prefix)).await?)
    }

    async fn set_latest_url(&self, url: &str) -> Result<(), BoxError> {
        let mut conn = self.redis.clone();
        conn.set::<_, _, ()>(latest_url_key(&self.key_prefix), url)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CacheConfig, QueryParams, RecordData, Source};

    fn redis_url() -> String {
        std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_owned())
    }

    async fn connect(prefix: &str) -> RedisFastCache {
        let client = redis::Client::open(redis_url()).unwrap();
        let cache = RedisFastCache::new(client, prefix, Duration::from_secs(60))
            .await
            .unwrap();
        cache.clear().await.unwrap();
        cache
    }

    fn result_set(title: &str) -> WrappedRecord {
        WrappedRecord::new(
            RecordData::Many(vec![
                RecordPayload::new("posts")
                    .with_id("1")
                    .with_attribute("title", title),
            ]),
            Source::Kv,
        )
    }

    #[test]
    fn test_auxiliary_keys_share_the_prefix() {
        assert_eq!(index_key("cache:"), "cache:__keys");
        assert_eq!(record_key("cache:", "42"), "cache:__record:42");
        assert_eq!(latest_url_key("cache:"), "cache:__latest_url");
        assert_ne!(record_key("a:", "42"), record_key("b:", "42"));
        assert_ne!(latest_url_key("a:"), latest_url_key("b:"));
    }

    #[tokio::test]
    #[ignore = "needs a running Redis at REDIS_URL"]
    async fn test_clear_removes_indexed_entries_and_keeps_records() {
        let cache = connect("cms-cache-test-clear:").await;
        let key = CacheKey::for_query(
            "cms-cache-test-clear:",
            "posts",
            &QueryParams::new().with_default_limit(CacheConfig::default().default_limit),
        );
        cache.set(&key, &result_set("A")).await.unwrap();
        cache
            .save_record(&RecordPayload::new("posts").with_id("1"))
            .await
            .unwrap();
        assert_eq!(cache.keys().await.unwrap(), vec![key.clone()]);

        cache.clear().await.unwrap();
        assert!(cache.get(&key).await.unwrap().is_none());
        assert!(cache.keys().await.unwrap().is_empty());

        // Entries written after a clear are indexed and removed by the next one
        cache.set(&key, &result_set("B")).await.unwrap();
        assert_eq!(cache.keys().await.unwrap(), vec![key.clone()]);
        cache.clear().await.unwrap();
        assert!(cache.get(&key).await.unwrap().is_none());

        let mut conn = cache.redis.clone();
        let raw: Option<String> = conn
            .get(record_key("cms-cache-test-clear:", "1"))
            .await
            .unwrap();
        assert!(raw.is_some());
        cache.delete_by_id("1").await.unwrap();
    }

    #[tokio::test]
    #[ignore = "needs a running Redis at REDIS_URL"]
    async fn test_prefixes_isolate_latest_url() {
        let a = connect("cms-cache-test-a:").await;
        let b = connect("cms-cache-test-b:").await;
        a.set_latest_url("/v1/posts").await.unwrap();
        b.set_latest_url("/v1/comments").await.unwrap();
        assert_eq!(a.latest_url().await.unwrap().as_deref(), Some("/v1/posts"));
        assert_eq!(b.latest_url().await.unwrap().as_deref(), Some("/v1/comments"));
    }
}
