//! Namespaced metadata cache with lazy TTL expiry.
//!
//! Schemas, collection listings, statistics, index lists and server status
//! are cached in independent namespaces. Entries never expire on their own:
//! a read older than the caller's TTL is simply a miss. The cache has no
//! size bound; it is kept in check by TTL and by [`MetadataCache::report_memory_pressure`],
//! which drops everything once the process crosses a critical memory level.

use crate::memory::MemoryGauge;
use parking_lot::RwLock;
use serde::Serialize;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, warn};

use crate::constants::{
    COLLECTIONS_TTL, INDEXES_TTL, SCHEMAS_TTL, SERVER_STATUS_TTL, STATS_TTL,
};

/// The fixed set of cache namespaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Namespace {
    Schemas,
    Collections,
    Stats,
    Indexes,
    ServerStatus,
    Fields,
}

impl Namespace {
    /// Every namespace, in storage order.
    pub const ALL: [Namespace; 6] = [
        Namespace::Schemas,
        Namespace::Collections,
        Namespace::Stats,
        Namespace::Indexes,
        Namespace::ServerStatus,
        Namespace::Fields,
    ];

    /// Time-to-live used when reading this namespace.
    ///
    /// Field-name lists share the schema TTL since they are derived from it.
    pub fn ttl(&self) -> Duration {
        match self {
            Self::Schemas | Self::Fields => SCHEMAS_TTL,
            Self::Collections => COLLECTIONS_TTL,
            Self::Stats => STATS_TTL,
            Self::Indexes => INDEXES_TTL,
            Self::ServerStatus => SERVER_STATUS_TTL,
        }
    }

    /// Name used in logs and string lookups.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Schemas => "schemas",
            Self::Collections => "collections",
            Self::Stats => "stats",
            Self::Indexes => "indexes",
            Self::ServerStatus => "serverStatus",
            Self::Fields => "fields",
        }
    }

    fn slot(&self) -> usize {
        *self as usize
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown namespace name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownNamespaceError(String);

impl fmt::Display for UnknownNamespaceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown cache namespace: '{}'", self.0)
    }
}

impl std::error::Error for UnknownNamespaceError {}

impl FromStr for Namespace {
    type Err = UnknownNamespaceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Namespace::ALL
            .into_iter()
            .find(|ns| ns.as_str() == s)
            .ok_or_else(|| UnknownNamespaceError(s.to_string()))
    }
}

/// A cached value and the moment it was stored.
#[derive(Clone)]
pub struct CacheEntry {
    data: Arc<dyn Any + Send + Sync>,
    stored_at: Instant,
}

impl CacheEntry {
    fn new<T: Send + Sync + 'static>(data: Arc<T>) -> Self {
        Self {
            data,
            stored_at: Instant::now(),
        }
    }

    /// Time elapsed since the entry was written.
    pub fn age(&self) -> Duration {
        self.stored_at.elapsed()
    }

    fn is_fresh(&self, ttl: Duration) -> bool {
        self.age() <= ttl
    }
}

impl fmt::Debug for CacheEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheEntry")
            .field("age", &self.age())
            .finish_non_exhaustive()
    }
}

type NamespaceMap = RwLock<HashMap<String, CacheEntry>>;

/// Cache statistics.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheStats {
    /// Total number of fresh reads.
    pub hits: u64,

    /// Total number of absent or stale reads.
    pub misses: u64,

    /// Number of full clears (manual or pressure-triggered).
    pub clears: u64,

    /// Entries held per namespace, stale ones included.
    pub entries: HashMap<Namespace, usize>,
}

impl CacheStats {
    /// Calculate hit rate as a percentage.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }

    /// Total entries across all namespaces.
    pub fn total_entries(&self) -> usize {
        self.entries.values().sum()
    }
}

/// Outcome of a memory-pressure check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryStatus {
    pub used_mb: u64,
    pub total_mb: u64,
    pub warning: bool,
    pub critical: bool,
}

/// Metadata cache: one independently locked map per namespace.
pub struct MetadataCache {
    namespaces: [NamespaceMap; Namespace::ALL.len()],
    hits: AtomicU64,
    misses: AtomicU64,
    clears: AtomicU64,
}

impl MetadataCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self {
            namespaces: std::array::from_fn(|_| RwLock::new(HashMap::new())),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            clears: AtomicU64::new(0),
        }
    }

    fn map(&self, namespace: Namespace) -> &NamespaceMap {
        &self.namespaces[namespace.slot()]
    }

    /// Read a value no older than `ttl`.
    ///
    /// Missing, stale and wrongly-typed entries are all a plain miss. Reads
    /// never evict; stale entries stay until overwritten or cleared.
    pub fn get<T: Send + Sync + 'static>(
        &self,
        namespace: Namespace,
        key: &str,
        ttl: Duration,
    ) -> Option<Arc<T>> {
        let found = {
            let entries = self.map(namespace).read();
            entries
                .get(key)
                .filter(|entry| entry.is_fresh(ttl))
                .and_then(|entry| entry.data.clone().downcast::<T>().ok())
        };

        match found {
            Some(value) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                debug!(namespace = %namespace, key, "cache hit");
                Some(value)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Read using the namespace's own TTL.
    pub fn get_fresh<T: Send + Sync + 'static>(
        &self,
        namespace: Namespace,
        key: &str,
    ) -> Option<Arc<T>> {
        self.get(namespace, key, namespace.ttl())
    }

    /// Store a value, replacing any previous entry for the key.
    pub fn set<T: Send + Sync + 'static>(&self, namespace: Namespace, key: impl Into<String>, data: T) {
        self.set_shared(namespace, key, Arc::new(data));
    }

    /// Store an already shared value; later reads hand out the same `Arc`.
    pub fn set_shared<T: Send + Sync + 'static>(
        &self,
        namespace: Namespace,
        key: impl Into<String>,
        data: Arc<T>,
    ) {
        self.map(namespace)
            .write()
            .insert(key.into(), CacheEntry::new(data));
    }

    /// Store a value in a namespace given by name.
    ///
    /// Returns `false` for a name outside the fixed namespace set.
    pub fn set_named<T: Send + Sync + 'static>(&self, namespace: &str, key: impl Into<String>, data: T) -> bool {
        match namespace.parse::<Namespace>() {
            Ok(ns) => {
                self.set(ns, key, data);
                true
            }
            Err(e) => {
                debug!("{}", e);
                false
            }
        }
    }

    /// Read from a namespace given by name; unknown names are a miss.
    pub fn get_named<T: Send + Sync + 'static>(
        &self,
        namespace: &str,
        key: &str,
        ttl: Duration,
    ) -> Option<Arc<T>> {
        let ns = namespace.parse::<Namespace>().ok()?;
        self.get(ns, key, ttl)
    }

    /// Empty every namespace.
    pub fn clear(&self) {
        for map in &self.namespaces {
            map.write().clear();
        }
        self.clears.fetch_add(1, Ordering::Relaxed);
    }

    /// Empty every namespace and hand the maps' memory back to the allocator.
    fn purge(&self) {
        for map in &self.namespaces {
            let mut entries = map.write();
            entries.clear();
            entries.shrink_to_fit();
        }
        self.clears.fetch_add(1, Ordering::Relaxed);
    }

    /// Number of entries in a namespace, stale ones included.
    pub fn len(&self, namespace: Namespace) -> usize {
        self.map(namespace).read().len()
    }

    /// Whether every namespace is empty.
    pub fn is_empty(&self) -> bool {
        self.namespaces.iter().all(|map| map.read().is_empty())
    }

    /// Get cache statistics.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            clears: self.clears.load(Ordering::Relaxed),
            entries: Namespace::ALL
                .into_iter()
                .map(|ns| (ns, self.len(ns)))
                .collect(),
        }
    }

    /// Classify process memory against two thresholds.
    ///
    /// Logs a warning above `warning_mb`. Above `critical_mb` the whole cache
    /// is dropped and its memory released; this is the only size control the
    /// cache has.
    pub fn report_memory_pressure(
        &self,
        gauge: &dyn MemoryGauge,
        critical_mb: u64,
        warning_mb: u64,
    ) -> MemoryStatus {
        let sample = gauge.sample().unwrap_or_default();

        let status = MemoryStatus {
            used_mb: sample.used_mb,
            total_mb: sample.total_mb,
            warning: sample.used_mb > warning_mb,
            critical: sample.used_mb > critical_mb,
        };

        if status.warning {
            warn!(
                "High memory usage: {}MB used of {}MB",
                status.used_mb, status.total_mb
            );
        }

        if status.critical {
            error!("Critical memory pressure. Clearing caches...");
            self.purge();
        }

        status
    }
}

impl Default for MetadataCache {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for MetadataCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetadataCache")
            .field("stats", &self.stats())
            .finish()
    }
}

/// Shared cache wrapper.
pub type SharedCache = Arc<MetadataCache>;

/// Create a new shared cache.
pub fn new_shared_cache() -> SharedCache {
    Arc::new(MetadataCache::new())
}
