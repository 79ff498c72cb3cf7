//! Cache configuration

use std::time::Duration;

/// Namespace token prepended to every result-set cache key.
pub const DEFAULT_KEY_PREFIX: &str = "cache:";

/// Page size applied to listing queries that carry no `limit`.
pub const DEFAULT_LIMIT: u32 = 1000;

/// Configuration for the tiered store
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum number of entries in the memory cache
    pub l1_max_capacity: u64,
    /// Optional time-to-live for memory cache entries. Expiry only evicts;
    /// it never revalidates the cache.
    pub l1_ttl: Option<Duration>,
    /// Time-to-live for fast cache (Redis) entries
    pub l2_ttl: Duration,
    /// Namespace token for result-set keys
    pub key_prefix: String,
    /// Listing limit used when a query has none
    pub default_limit: u32,
    /// Populate the fast cache from a spawned task instead of inline
    pub background_population: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            l1_max_capacity: 10_000,
            l1_ttl: None,
            l2_ttl: Duration::from_secs(900), // 15 minutes
            key_prefix: DEFAULT_KEY_PREFIX.to_owned(),
            default_limit: DEFAULT_LIMIT,
            background_population: true,
        }
    }
}

impl CacheConfig {
    /// Build a config from `CMS_CACHE_*` environment variables, falling back to
    /// defaults for anything unset or unparseable. A zero fast cache TTL is
    /// ignored.
    ///
    /// Recognised variables: `CMS_CACHE_L1_MAX_CAPACITY`, `CMS_CACHE_L1_TTL_SECS`,
    /// `CMS_CACHE_L2_TTL_SECS`, `CMS_CACHE_KEY_PREFIX`, `CMS_CACHE_DEFAULT_LIMIT`,
    /// `CMS_CACHE_BACKGROUND_POPULATION`.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let parsed = |name: &str| lookup(name).and_then(|v| v.trim().parse::<u64>().ok());

        Self {
            l1_max_capacity: parsed("CMS_CACHE_L1_MAX_CAPACITY")
                .unwrap_or(defaults.l1_max_capacity),
            l1_ttl: parsed("CMS_CACHE_L1_TTL_SECS")
                .map(Duration::from_secs)
                .or(defaults.l1_ttl),
            // SETEX rejects a zero expiry
            l2_ttl: parsed("CMS_CACHE_L2_TTL_SECS")
                .filter(|&secs| secs > 0)
                .map(Duration::from_secs)
                .unwrap_or(defaults.l2_ttl),
            key_prefix: lookup("CMS_CACHE_KEY_PREFIX")
                .filter(|p| !p.is_empty())
                .unwrap_or(defaults.key_prefix),
            default_limit: parsed("CMS_CACHE_DEFAULT_LIMIT")
                .and_then(|v| u32::try_from(v).ok())
                .unwrap_or(defaults.default_limit),
            background_population: lookup("CMS_CACHE_BACKGROUND_POPULATION")
                .and_then(|v| v.trim().parse::<bool>().ok())
                .unwrap_or(defaults.background_population),
        }
    }

    /// Set the memory cache capacity.
    pub fn with_l1_capacity(mut self, capacity: u64) -> Self {
        self.l1_max_capacity = capacity;
        self
    }

    /// Set the memory cache TTL.
    pub fn with_l1_ttl(mut self, ttl: Duration) -> Self {
        self.l1_ttl = Some(ttl);
        self
    }

    /// Set the fast cache TTL.
    pub fn with_l2_ttl(mut self, ttl: Duration) -> Self {
        self.l2_ttl = ttl;
        self
    }

    /// Set the key namespace token.
    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    /// Set the default listing limit.
    pub fn with_default_limit(mut self, limit: u32) -> Self {
        self.default_limit = limit;
        self
    }

    /// Choose between spawned and inline fast cache population.
    pub fn with_background_population(mut self, enabled: bool) -> Self {
        self.background_population = enabled;
        self
    }
}
