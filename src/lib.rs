//! cms-cache - Three-tier record store for a content-management backend
//!
//! Records are read and written through three tiers:
//! - L1: In-memory Moka cache (fastest, process-local)
//! - L2: Fast key-value cache such as Redis (shared across instances)
//! - L3: Durable store of record (relational, pluggable)
//!
//! The store supports:
//! - Read-through with per-request source preference (`fastest`, `kv`, `d1`)
//! - Write-through with durable-first commits and partial-failure reporting
//! - A global cache-validity flag gating trust in the memory tier
//! - Explicit rehydration of the memory tier from the fast cache
//! - Deterministic cache keys from table + canonical query parameters

mod cache_key;
mod config;
mod durable_store;
mod error;
mod fast_cache;
pub mod in_memory;
mod memory_cache;
mod outcome;
mod record;
mod tiered_store;
mod validity;

pub use cache_key::{CacheKey, QueryParams, RequestTarget};
pub use config::{CacheConfig, DEFAULT_KEY_PREFIX, DEFAULT_LIMIT};
pub use durable_store::{DataProducer, DurableStore};
pub use error::{BoxError, CacheError};
pub use fast_cache::{FastCache, RedisFastCache};
pub use in_memory::{InMemoryDurableStore, InMemoryFastCache};
pub use memory_cache::MemoryCache;
pub use outcome::{WriteOperation, WriteOutcome};
pub use record::{RecordData, RecordPayload, Source, SourcePreference, WrappedRecord};
pub use tiered_store::TieredStore;
pub use validity::CacheValidity;

// Re-export async_trait for convenience
pub use async_trait::async_trait;
