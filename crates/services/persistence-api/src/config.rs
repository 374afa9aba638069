//! Environment-driven configuration
//!
//! All options have defaults except the database URL; the service refuses to
//! start without one.

use std::{net::SocketAddr, time::Duration};

use doc_batcher::{BatchConfig, BatchPreset};
use persistence::CompactionConfig;
use persistence_db::PoolConfig;

/// Default listen address of the API server.
pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:8087";

/// Runtime configuration assembled from `MARGINALIA_*` environment variables.
///
/// | Variable | Effect | Default |
/// |---|---|---|
/// | `MARGINALIA_DATABASE_URL` | PostgreSQL connection URL | mandatory |
/// | `MARGINALIA_LISTEN_ADDR` | API bind address | `127.0.0.1:8087` |
/// | `MARGINALIA_POOL_SIZE` | max DB connections | 10 |
/// | `MARGINALIA_ACQUIRE_TIMEOUT_SECS` | pool acquire timeout | 2 |
/// | `MARGINALIA_IDLE_TIMEOUT_SECS` | pooled connection idle timeout | 30 |
/// | `MARGINALIA_BATCH_PRESET` | `web` / `embedded` / `test` | `web` |
/// | `MARGINALIA_UPDATE_THRESHOLD` | compaction trigger (count) | 100 |
/// | `MARGINALIA_SIZE_THRESHOLD_BYTES` | compaction trigger (bytes) | 1048576 |
/// | `MARGINALIA_AGE_THRESHOLD_SECS` | compaction trigger (age) | 86400 |
/// | `MARGINALIA_KEEP_SNAPSHOTS` | snapshots retained per doc | 3 |
/// | `MARGINALIA_AUTO_COMPACT` | post-flush compaction check | `true` |
/// | `MARGINALIA_SWEEP` | periodic compaction sweep | `true` |
/// | `MARGINALIA_SWEEP_INTERVAL_SECS` | sweep interval | 300 |
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub listen_addr: SocketAddr,
    pub pool: PoolConfig,
    pub batch: BatchConfig,
    pub compaction: CompactionConfig,
    pub sweep: bool,
}

impl Config {
    /// Reads the configuration from the environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = std::env::var("MARGINALIA_DATABASE_URL")
            .ok()
            .filter(|url| !url.trim().is_empty())
            .ok_or(ConfigError::MissingDatabaseUrl)?;

        let listen_addr = parse_var("MARGINALIA_LISTEN_ADDR")?
            .unwrap_or_else(|| DEFAULT_LISTEN_ADDR.parse().expect("valid default addr"));

        let mut pool = PoolConfig::with_size(parse_var("MARGINALIA_POOL_SIZE")?.unwrap_or(10));
        if let Some(secs) = parse_var::<u64>("MARGINALIA_ACQUIRE_TIMEOUT_SECS")? {
            pool.acquire_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_var::<u64>("MARGINALIA_IDLE_TIMEOUT_SECS")? {
            pool.idle_timeout = Duration::from_secs(secs);
        }

        let batch = parse_var::<BatchPreset>("MARGINALIA_BATCH_PRESET")?
            .unwrap_or(BatchPreset::Web)
            .config();

        let mut compaction = CompactionConfig::default();
        if let Some(n) = parse_var("MARGINALIA_UPDATE_THRESHOLD")? {
            compaction.update_threshold = n;
        }
        if let Some(n) = parse_var("MARGINALIA_SIZE_THRESHOLD_BYTES")? {
            compaction.size_threshold_bytes = n;
        }
        if let Some(secs) = parse_var::<u64>("MARGINALIA_AGE_THRESHOLD_SECS")? {
            compaction.age_threshold = Duration::from_secs(secs);
        }
        if let Some(k) = parse_var("MARGINALIA_KEEP_SNAPSHOTS")? {
            compaction.keep_snapshots = k;
        }
        if let Some(flag) = parse_bool("MARGINALIA_AUTO_COMPACT")? {
            compaction.auto_compact = flag;
        }
        if let Some(secs) = parse_var::<u64>("MARGINALIA_SWEEP_INTERVAL_SECS")? {
            compaction.sweep_interval = Duration::from_secs(secs);
        }

        let sweep = parse_bool("MARGINALIA_SWEEP")?.unwrap_or(true);

        Ok(Self {
            database_url,
            listen_addr,
            pool,
            batch,
            compaction,
            sweep,
        })
    }
}

fn parse_var<T>(name: &'static str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(value) if !value.trim().is_empty() => {
            value.trim().parse().map(Some).map_err(|err: T::Err| {
                ConfigError::Invalid {
                    name,
                    value,
                    message: err.to_string(),
                }
            })
        }
        _ => Ok(None),
    }
}

fn parse_bool(name: &'static str) -> Result<Option<bool>, ConfigError> {
    match std::env::var(name) {
        Ok(value) if !value.trim().is_empty() => match value.trim() {
            "1" | "true" | "TRUE" | "True" => Ok(Some(true)),
            "0" | "false" | "FALSE" | "False" => Ok(Some(false)),
            _ => Err(ConfigError::Invalid {
                name,
                value,
                message: "expected a boolean".to_string(),
            }),
        },
        _ => Ok(None),
    }
}

/// Invalid or missing environment configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// `MARGINALIA_DATABASE_URL` is unset or empty.
    #[error("MARGINALIA_DATABASE_URL must be set")]
    MissingDatabaseUrl,

    /// An option could not be parsed.
    #[error("invalid value for {name}: '{value}' ({message})")]
    Invalid {
        name: &'static str,
        value: String,
        message: String,
    },
}
