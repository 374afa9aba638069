//! Temporary persistence DB for tests
//!
//! Wraps a [`pgtemp`] ephemeral PostgreSQL instance. On drop, the database
//! and its data directory are deleted (unless `KEEP_TEMP_DIRS` is set).

use std::sync::LazyLock;

use pgtemp::{PgTempDB, PgTempDBBuilder};

use crate::{PersistenceDb, PoolConfig};

/// Whether to keep the temporary directory after the database is dropped
///
/// This is set to `false` by default, but can be overridden by the `KEEP_TEMP_DIRS` environment
/// variable.
pub static KEEP_TEMP_DIRS: LazyLock<bool> = LazyLock::new(|| {
    std::env::var("KEEP_TEMP_DIRS")
        .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
        .unwrap_or(false)
});

/// Temporary persistence DB
///
/// This is a wrapper around [`PersistenceDb`] backed by a temporary database.
/// On drop, the database is deleted.
pub struct TempPersistenceDb {
    /// Inner persistence DB handle
    inner: PersistenceDb,

    /// Temporary database handle
    ///
    /// On drop, the database is deleted.
    temp_db: PgTempDB,
}

impl TempPersistenceDb {
    /// Create a new temporary persistence DB with the default pool config.
    pub async fn new() -> Self {
        Self::with_config(&PoolConfig::default()).await
    }

    /// Create a new temporary persistence DB with a custom pool config.
    pub async fn with_config(config: &PoolConfig) -> Self {
        // Set C locale. To remove this `unsafe` we need:
        // https://github.com/boustrophedon/pgtemp/pull/21
        unsafe {
            std::env::set_var("LANG", "C");
        }

        let builder = PgTempDBBuilder::new().persist_data(*KEEP_TEMP_DIRS);
        let temp_db = PgTempDB::from_builder(builder);

        let uri = temp_db.connection_uri();
        tracing::info!("connecting to temp persistence-db at: {uri}");

        let inner = PersistenceDb::connect_with_retry(&uri, config)
            .await
            .expect("failed to connect to temp persistence-db");

        TempPersistenceDb { inner, temp_db }
    }

    /// Get the connection URL of the temporary database
    pub fn url(&self) -> String {
        self.temp_db.connection_uri()
    }

    /// Get the inner [`PersistenceDb`] handle
    pub fn db(&self) -> &PersistenceDb {
        &self.inner
    }
}

impl std::ops::Deref for TempPersistenceDb {
    type Target = PersistenceDb;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}
