//! Connection pool configuration for the persistence database.

use std::time::Duration;

/// Default maximum number of connections in the pool.
pub const DEFAULT_POOL_MAX_CONNECTIONS: u32 = 10;

/// Default minimum number of connections to keep alive in the pool.
///
/// Set to 25% of [`DEFAULT_POOL_MAX_CONNECTIONS`] (rounded up, minimum 1).
/// Keeping a floor of ready connections avoids connection establishment
/// latency on the hot path and staggers `max_lifetime` expiration so the
/// pool never recycles all connections at once.
pub const DEFAULT_POOL_MIN_CONNECTIONS: u32 = {
    let v = DEFAULT_POOL_MAX_CONNECTIONS.div_ceil(4);
    if v < 1 { 1 } else { v }
};

/// Default acquire timeout when checking out a connection (2 seconds).
///
/// Requests that cannot acquire a connection within this window fail fast
/// rather than queuing indefinitely.
pub const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(2);

/// Default idle timeout for a pooled connection (30 seconds).
///
/// Connections idle longer than this are closed and removed from the pool,
/// down to the [`DEFAULT_POOL_MIN_CONNECTIONS`] floor.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(30);

/// Default maximum lifetime for a pooled connection (30 minutes).
///
/// Connections are recycled before they hit server-side idle timeouts
/// (typically 1-8 hours on managed PostgreSQL).
pub const DEFAULT_MAX_LIFETIME: Duration = Duration::from_secs(1800);

/// Connection pool configuration.
///
/// Controls pool sizing and connection lifecycle.
///
/// # Defaults
///
/// | Field              | Default                                |
/// |--------------------|----------------------------------------|
/// | `max_connections`  | [`DEFAULT_POOL_MAX_CONNECTIONS`] (10)  |
/// | `min_connections`  | [`DEFAULT_POOL_MIN_CONNECTIONS`] (3)   |
/// | `acquire_timeout`  | [`DEFAULT_ACQUIRE_TIMEOUT`] (2 s)      |
/// | `idle_timeout`     | [`DEFAULT_IDLE_TIMEOUT`] (30 s)        |
/// | `max_lifetime`     | [`DEFAULT_MAX_LIFETIME`] (30 min)      |
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum number of connections in the pool.
    pub max_connections: u32,
    /// Minimum number of connections to keep alive in the pool.
    pub min_connections: u32,
    /// Maximum time to wait for a connection from the pool before failing.
    pub acquire_timeout: Duration,
    /// How long a connection may sit idle before being closed.
    pub idle_timeout: Duration,
    /// Maximum lifetime of a connection before it is recycled.
    pub max_lifetime: Duration,
}

impl PoolConfig {
    /// Creates a `PoolConfig` with the given pool size and default lifecycle.
    ///
    /// `min_connections` is derived from `size` using the heuristic
    /// `size.div_ceil(4).max(1)` (~25% of max, minimum 1).
    pub fn with_size(size: u32) -> Self {
        Self {
            max_connections: size,
            min_connections: size.div_ceil(4).max(1),
            ..Self::default()
        }
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: DEFAULT_POOL_MAX_CONNECTIONS,
            min_connections: DEFAULT_POOL_MIN_CONNECTIONS,
            acquire_timeout: DEFAULT_ACQUIRE_TIMEOUT,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            max_lifetime: DEFAULT_MAX_LIFETIME,
        }
    }
}
