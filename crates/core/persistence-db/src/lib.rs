//! Database access layer for the annotation persistence core.
//!
//! Wraps a pooled PostgreSQL connection and exposes the three tables the
//! core owns (`updates`, `snapshots`, `compaction_log`) plus the soft-delete
//! markers on the application-owned annotation tables.
//!
//! Module-level SQL functions are generic over [`Executor`], so the same
//! statements compose into the compaction and delete-cascade transactions or
//! run directly against the pool. `PersistenceDb` methods cover the
//! single-statement call sites.

use std::time::{Duration, Instant};

use futures::{future::BoxFuture, stream::BoxStream};
use sqlx::types::chrono::{DateTime, Utc};

pub mod annotations;
pub mod compaction_log;
mod config;
mod db;
mod error;
pub mod snapshots;
#[cfg(feature = "temp-db")]
pub mod temp;
pub mod updates;

use self::db::ConnPool;
#[cfg(feature = "temp-db")]
pub use self::temp::TempPersistenceDb;
pub use self::{
    compaction_log::CompactionLogEntry,
    config::{
        DEFAULT_ACQUIRE_TIMEOUT, DEFAULT_IDLE_TIMEOUT, DEFAULT_MAX_LIFETIME,
        DEFAULT_POOL_MAX_CONNECTIONS, DEFAULT_POOL_MIN_CONNECTIONS, PoolConfig,
    },
    db::{ConnError, Executor, Transaction},
    error::Error,
    snapshots::{Checksum, ChecksumParseError, NewSnapshot, Snapshot},
    updates::{UpdateId, UpdateIdFromStrError, UpdateIdI64ConvError, UpdateLogStats, UpdateRecord},
};

/// Per-attempt timeout for the health probe.
const HEALTH_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Connection pool to the persistence DB. Clones will refer to the same instance.
#[derive(Clone, Debug)]
pub struct PersistenceDb {
    pool: ConnPool,
}

impl PersistenceDb {
    /// Sets up a connection pool to the persistence DB
    ///
    /// Runs migrations if necessary.
    #[tracing::instrument(skip_all, err)]
    pub async fn connect(url: &str, config: &PoolConfig) -> Result<Self, Error> {
        let pool = ConnPool::connect(url, config).await?;
        pool.run_migrations().await?;
        Ok(Self { pool })
    }

    /// Sets up a connection pool with retry logic for freshly started databases.
    ///
    /// Retries while the server reports error code 57P03 (database starting
    /// up), which temporary test databases do for a short window after spawn.
    #[tracing::instrument(skip_all, err)]
    pub async fn connect_with_retry(url: &str, config: &PoolConfig) -> Result<Self, Error> {
        use backon::{ExponentialBuilder, Retryable};

        let retry_policy = ExponentialBuilder::default()
            .with_min_delay(Duration::from_millis(10))
            .with_max_delay(Duration::from_millis(100))
            .with_max_times(20);

        fn is_db_starting_up(err: &ConnError) -> bool {
            matches!(
                err,
                ConnError::ConnectionError(sqlx::Error::Database(db_err))
                if db_err.code().is_some_and(|code| code == "57P03")
            )
        }

        fn notify_retry(err: &ConnError, dur: Duration) {
            tracing::warn!(
                error = %err,
                "Database still starting up during connection. Retrying in {:.1}s",
                dur.as_secs_f32()
            );
        }

        let pool = (|| ConnPool::connect(url, config))
            .retry(retry_policy)
            .when(is_db_starting_up)
            .notify(notify_retry)
            .await?;

        pool.run_migrations().await?;

        Ok(Self { pool })
    }

    /// Begins a new database transaction
    ///
    /// Returns a `Transaction` that provides RAII semantics - it will automatically
    /// roll back when dropped unless explicitly committed with `.commit()`.
    #[tracing::instrument(skip(self), err)]
    pub async fn begin_txn(&self) -> Result<Transaction<'_>, Error> {
        let tx = self.pool.begin().await.map_err(Error::Database)?;
        Ok(Transaction::new(tx))
    }

    /// Closes the pool, waiting for checked-out connections to be returned.
    ///
    /// Called from the process-edge shutdown hook after the batcher has
    /// drained.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Current pool occupancy.
    pub fn pool_status(&self) -> PoolStatus {
        PoolStatus {
            total: self.pool.size(),
            idle: self.pool.num_idle(),
        }
    }

    /// Probes database liveness with a trivial query.
    ///
    /// Never returns an error: an unreachable database yields
    /// `healthy = false` with the failure message. One retry is attempted,
    /// each attempt bounded by [`HEALTH_PROBE_TIMEOUT`].
    pub async fn health(&self) -> HealthSnapshot {
        let started = Instant::now();

        let mut last_error = None;
        for _ in 0..2 {
            let probe = sqlx::query_scalar::<_, DateTime<Utc>>("SELECT now()");
            match tokio::time::timeout(HEALTH_PROBE_TIMEOUT, probe.fetch_one(&*self.pool)).await {
                Ok(Ok(_)) => {
                    return HealthSnapshot {
                        healthy: true,
                        latency: started.elapsed(),
                        pool: self.pool_status(),
                        error: None,
                    };
                }
                Ok(Err(err)) => last_error = Some(err.to_string()),
                Err(_) => last_error = Some("health probe timed out".to_string()),
            }
        }

        HealthSnapshot {
            healthy: false,
            latency: started.elapsed(),
            pool: self.pool_status(),
            error: last_error,
        }
    }
}

/// Update log API
impl PersistenceDb {
    /// Appends one update record, returning the assigned `(id, timestamp)`.
    pub async fn append_update(
        &self,
        doc_name: &str,
        payload: &[u8],
        client_id: Option<&str>,
    ) -> Result<(UpdateId, DateTime<Utc>), Error> {
        updates::sql::insert(&self.pool, doc_name, payload, client_id)
            .await
            .map_err(Error::Database)
    }

    /// All update records for a doc in `(timestamp, id)` ascending order.
    pub async fn updates_all(&self, doc_name: &str) -> Result<Vec<UpdateRecord>, Error> {
        updates::sql::list_all(&self.pool, doc_name)
            .await
            .map_err(Error::Database)
    }

    /// Update records at or after the cutoff timestamp.
    pub async fn updates_since(
        &self,
        doc_name: &str,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<UpdateRecord>, Error> {
        updates::sql::list_since(&self.pool, doc_name, cutoff)
            .await
            .map_err(Error::Database)
    }

    /// Aggregates over a doc's update log for the compaction decision.
    pub async fn update_log_stats(&self, doc_name: &str) -> Result<UpdateLogStats, Error> {
        updates::sql::stats(&self.pool, doc_name)
            .await
            .map_err(Error::Database)
    }

    /// Deletes every update record for a doc. Returns the deleted count.
    pub async fn clear_updates(&self, doc_name: &str) -> Result<u64, Error> {
        updates::sql::delete_all(&self.pool, doc_name)
            .await
            .map_err(Error::Database)
    }

    /// Deletes update records strictly older than the given timestamp.
    pub async fn clear_updates_before(
        &self,
        doc_name: &str,
        before: DateTime<Utc>,
    ) -> Result<u64, Error> {
        updates::sql::delete_before(&self.pool, doc_name, before)
            .await
            .map_err(Error::Database)
    }
}

/// Snapshot API
impl PersistenceDb {
    /// Verifies the checksum and stores one snapshot row.
    pub async fn save_snapshot(&self, snapshot: NewSnapshot<'_>) -> Result<Snapshot, Error> {
        snapshots::save(&self.pool, snapshot).await
    }

    /// The most recent snapshot for a doc, if any.
    pub async fn latest_snapshot(&self, doc_name: &str) -> Result<Option<Snapshot>, Error> {
        snapshots::sql::latest(&self.pool, doc_name)
            .await
            .map_err(Error::Database)
    }

    /// A doc's snapshot with the given checksum, if one exists.
    pub async fn snapshot_by_checksum(
        &self,
        doc_name: &str,
        checksum: &Checksum,
    ) -> Result<Option<Snapshot>, Error> {
        snapshots::sql::by_checksum(&self.pool, doc_name, checksum)
            .await
            .map_err(Error::Database)
    }

    /// Number of snapshots stored for a doc.
    pub async fn snapshot_count(&self, doc_name: &str) -> Result<i64, Error> {
        snapshots::sql::count(&self.pool, doc_name)
            .await
            .map_err(Error::Database)
    }

    /// Deletes all but the most recent `keep` snapshots for a doc.
    pub async fn prune_snapshots(&self, doc_name: &str, keep: i64) -> Result<u64, Error> {
        snapshots::sql::prune_to_last(&self.pool, doc_name, keep)
            .await
            .map_err(Error::Database)
    }
}

/// Compaction log API
impl PersistenceDb {
    /// The most recent compaction runs for a doc, newest first.
    pub async fn recent_compactions(
        &self,
        doc_name: &str,
        limit: i64,
    ) -> Result<Vec<CompactionLogEntry>, Error> {
        compaction_log::recent(&self.pool, doc_name, limit)
            .await
            .map_err(Error::Database)
    }
}

/// Current pool occupancy, reported by the health endpoint.
#[derive(Debug, Clone, Copy)]
pub struct PoolStatus {
    /// Connections currently open (in use + idle)
    pub total: u32,
    /// Open connections sitting idle in the pool
    pub idle: usize,
}

/// Result of a liveness probe. Never an error; see [`PersistenceDb::health`].
#[derive(Debug, Clone)]
pub struct HealthSnapshot {
    /// Whether the probe query succeeded
    pub healthy: bool,
    /// Round-trip latency of the probe (includes the retry on failure)
    pub latency: Duration,
    /// Pool occupancy at probe time
    pub pool: PoolStatus,
    /// Failure message when unhealthy
    pub error: Option<String>,
}

// Implement sqlx::Executor for &PersistenceDb by delegating to the pool
impl<'c> sqlx::Executor<'c> for &'c PersistenceDb {
    type Database = sqlx::Postgres;

    fn fetch_many<'e, 'q: 'e, E>(
        self,
        query: E,
    ) -> BoxStream<
        'e,
        Result<
            sqlx::Either<
                <sqlx::Postgres as sqlx::Database>::QueryResult,
                <sqlx::Postgres as sqlx::Database>::Row,
            >,
            sqlx::Error,
        >,
    >
    where
        'c: 'e,
        E: 'q + sqlx::Execute<'q, Self::Database>,
    {
        (&self.pool).fetch_many(query)
    }

    fn fetch_optional<'e, 'q: 'e, E>(
        self,
        query: E,
    ) -> BoxFuture<'e, Result<Option<<sqlx::Postgres as sqlx::Database>::Row>, sqlx::Error>>
    where
        'c: 'e,
        E: 'q + sqlx::Execute<'q, Self::Database>,
    {
        (&self.pool).fetch_optional(query)
    }

    fn prepare_with<'e, 'q: 'e>(
        self,
        sql: &'q str,
        parameters: &'e [<sqlx::Postgres as sqlx::Database>::TypeInfo],
    ) -> BoxFuture<'e, Result<<sqlx::Postgres as sqlx::Database>::Statement<'q>, sqlx::Error>>
    where
        'c: 'e,
    {
        (&self.pool).prepare_with(sql, parameters)
    }

    fn describe<'e, 'q: 'e>(
        self,
        sql: &'q str,
    ) -> BoxFuture<'e, Result<sqlx::Describe<Self::Database>, sqlx::Error>>
    where
        'c: 'e,
    {
        (&self.pool).describe(sql)
    }
}

impl<'c> Executor<'c> for &'c PersistenceDb {}

impl _priv::Sealed for &PersistenceDb {}

/// Private module for sealed trait pattern
///
/// This module contains the `Sealed` trait used to prevent external
/// implementations of our `Executor` trait. The trait implementations
/// are co-located with the `Executor` trait impls in `db/`.
pub(crate) mod _priv {
    /// Sealed trait to prevent external implementations
    pub trait Sealed {}
}
