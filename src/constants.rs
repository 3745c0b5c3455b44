//! Centralized constants for the MongoDB Lens core.
//!
//! This module contains all magic numbers and default values used throughout
//! the codebase, making them easy to find, understand, and modify.

use std::time::Duration;

// =============================================================================
// Connection Constants
// =============================================================================

/// Connection string used when nothing else is configured.
pub const DEFAULT_MONGODB_URI: &str = "mongodb://localhost:27017";

/// Database used when the connection string does not name one.
pub const FALLBACK_DATABASE: &str = "admin";

/// Default maximum connections in the driver pool.
pub const DEFAULT_MAX_POOL_SIZE: u32 = 20;

/// Default connect timeout in milliseconds.
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 30_000;

/// Default socket (per-operation) timeout in milliseconds.
pub const DEFAULT_SOCKET_TIMEOUT_MS: u64 = 360_000;

/// Default server selection timeout in milliseconds.
pub const DEFAULT_SERVER_SELECTION_TIMEOUT_MS: u64 = 30_000;

/// Default heartbeat frequency in milliseconds.
pub const DEFAULT_HEARTBEAT_FREQUENCY_MS: u64 = 10_000;

/// Application name reported to the server.
pub const APPLICATION_NAME: &str = "mongo-lens-mcp";

// =============================================================================
// Retry Constants
// =============================================================================

/// Attempts made by the initial connect before giving up.
pub const MAX_CONNECT_ATTEMPTS: u32 = 5;

/// Base delay of the initial connect backoff.
pub const CONNECT_BACKOFF_BASE: Duration = Duration::from_millis(1_000);

/// Upper bound on a single connect backoff delay.
pub const CONNECT_BACKOFF_CAP: Duration = Duration::from_millis(30_000);

/// Cumulative reconnect attempts allowed before the manager gives up.
pub const MAX_RECONNECT_ATTEMPTS: u32 = 10;

/// Timeout applied to a single liveness ping.
pub const LIVENESS_PING_TIMEOUT: Duration = Duration::from_secs(5);

// =============================================================================
// Cache Constants
// =============================================================================

/// TTL of inferred schemas (and of the derived field-name lists).
pub const SCHEMAS_TTL: Duration = Duration::from_secs(60);

/// TTL of collection listings.
pub const COLLECTIONS_TTL: Duration = Duration::from_secs(30);

/// TTL of collection statistics.
pub const STATS_TTL: Duration = Duration::from_secs(15);

/// TTL of index listings.
pub const INDEXES_TTL: Duration = Duration::from_secs(120);

/// TTL of server status documents.
pub const SERVER_STATUS_TTL: Duration = Duration::from_secs(20);

/// Cache key under which build info is stored after connecting.
pub const SERVER_INFO_KEY: &str = "server_info";

/// Cache key under which the last `serverStatus` reply is stored.
pub const SERVER_STATUS_KEY: &str = "server_status";

// =============================================================================
// Watchdog Constants
// =============================================================================

/// Default watchdog tick interval in seconds.
pub const DEFAULT_WATCHDOG_INTERVAL_SECS: u64 = 30;

/// Default watchdog tick interval as Duration.
pub const DEFAULT_WATCHDOG_INTERVAL: Duration =
    Duration::from_secs(DEFAULT_WATCHDOG_INTERVAL_SECS);

/// Memory usage above which a warning is logged.
pub const DEFAULT_MEMORY_WARNING_MB: u64 = 1_500;

/// Memory usage above which the cache is dropped.
pub const DEFAULT_MEMORY_CRITICAL_MB: u64 = 2_000;

// =============================================================================
// Schema Inference Constants
// =============================================================================

/// Default number of documents sampled for inference.
pub const DEFAULT_SAMPLE_SIZE: usize = 100;

/// Sample size used for cheap field-name and example-filter lookups.
pub const QUICK_SAMPLE_SIZE: usize = 5;

/// Server-side batch size of the sampling cursor.
pub const SAMPLE_BATCH_SIZE: u32 = 50;

/// Progress is logged every this many sampled documents.
pub const SAMPLE_PROGRESS_INTERVAL: usize = 50;

/// Maximum characters of a rendered example value.
pub const SAMPLE_DISPLAY_LIMIT: usize = 50;

// =============================================================================
// Change Stream Constants
// =============================================================================

/// Default watch window in seconds.
pub const DEFAULT_WATCH_SECS: u64 = 10;

/// Longest allowed watch window in seconds.
pub const MAX_WATCH_SECS: u64 = 60;

// =============================================================================
// Shutdown Constants
// =============================================================================

/// Upper bound on closing the driver during shutdown.
pub const DEFAULT_CLOSE_TIMEOUT: Duration = Duration::from_secs(10);
