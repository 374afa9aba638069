//! Batching writer configuration and platform presets.

use std::time::Duration;

/// Batching writer configuration.
///
/// Three presets cover the deployment targets; see [`BatchConfig::web`],
/// [`BatchConfig::embedded`], and [`BatchConfig::test_profile`]. Custom
/// configs must pass [`BatchConfig::validate`].
#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Flush as soon as this many updates are pending for a doc.
    pub max_batch_count: usize,
    /// Flush as soon as this many payload bytes are pending for a doc.
    pub max_batch_bytes: usize,
    /// Hard deadline: a batch never waits longer than this after its first
    /// enqueue, regardless of debouncing.
    pub batch_timeout: Duration,
    /// Quiet-period timer re-armed on every enqueue.
    pub debounce: Duration,
    /// Merge pending updates into one blob before appending.
    pub coalesce: bool,
}

impl BatchConfig {
    /// The "web" preset: browser-facing deployments with generous batches.
    pub fn web() -> Self {
        Self {
            max_batch_count: 100,
            max_batch_bytes: 1024 * 1024,
            batch_timeout: Duration::from_millis(2000),
            debounce: Duration::from_millis(300),
            coalesce: true,
        }
    }

    /// The "embedded" preset: tighter bounds for constrained runtimes.
    pub fn embedded() -> Self {
        Self {
            max_batch_count: 50,
            max_batch_bytes: 256 * 1024,
            batch_timeout: Duration::from_millis(500),
            debounce: Duration::from_millis(100),
            coalesce: true,
        }
    }

    /// The "test" preset: small and fast so tests exercise every trigger.
    pub fn test_profile() -> Self {
        Self {
            max_batch_count: 10,
            max_batch_bytes: 10 * 1024,
            batch_timeout: Duration::from_millis(100),
            debounce: Duration::from_millis(20),
            coalesce: true,
        }
    }

    /// Checks the configuration bounds.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_batch_count < 1 {
            return Err(ConfigError::ZeroBatchCount);
        }
        if self.max_batch_bytes < 1 {
            return Err(ConfigError::ZeroBatchBytes);
        }
        if self.batch_timeout.is_zero() {
            return Err(ConfigError::ZeroBatchTimeout);
        }
        Ok(())
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self::web()
    }
}

/// A named batching preset, parseable from configuration strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchPreset {
    Web,
    Embedded,
    Test,
}

impl BatchPreset {
    /// The [`BatchConfig`] for this preset.
    pub fn config(self) -> BatchConfig {
        match self {
            BatchPreset::Web => BatchConfig::web(),
            BatchPreset::Embedded => BatchConfig::embedded(),
            BatchPreset::Test => BatchConfig::test_profile(),
        }
    }
}

impl std::str::FromStr for BatchPreset {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "web" => Ok(BatchPreset::Web),
            "embedded" => Ok(BatchPreset::Embedded),
            "test" => Ok(BatchPreset::Test),
            other => Err(ConfigError::UnknownPreset(other.to_string())),
        }
    }
}

/// Invalid batching configuration, rejected at construction time.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// `max_batch_count` must be at least 1.
    #[error("max_batch_count must be at least 1")]
    ZeroBatchCount,

    /// `max_batch_bytes` must be at least 1.
    #[error("max_batch_bytes must be at least 1")]
    ZeroBatchBytes,

    /// `batch_timeout` must be positive.
    #[error("batch_timeout must be positive")]
    ZeroBatchTimeout,

    /// The preset name is not one of `web`, `embedded`, `test`.
    #[error("unknown batching preset: '{0}'")]
    UnknownPreset(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presets_are_valid() {
        BatchConfig::web().validate().expect("web preset");
        BatchConfig::embedded().validate().expect("embedded preset");
        BatchConfig::test_profile().validate().expect("test preset");
    }

    #[test]
    fn validate_rejects_degenerate_bounds() {
        let mut config = BatchConfig::web();
        config.max_batch_count = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ZeroBatchCount)
        ));

        let mut config = BatchConfig::web();
        config.max_batch_bytes = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ZeroBatchBytes)
        ));

        let mut config = BatchConfig::web();
        config.batch_timeout = Duration::ZERO;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ZeroBatchTimeout)
        ));
    }

    #[test]
    fn preset_parses_from_str() {
        assert_eq!("web".parse::<BatchPreset>().unwrap(), BatchPreset::Web);
        assert_eq!(
            "embedded".parse::<BatchPreset>().unwrap(),
            BatchPreset::Embedded
        );
        assert_eq!("test".parse::<BatchPreset>().unwrap(), BatchPreset::Test);
        assert!("desktop".parse::<BatchPreset>().is_err());
    }
}
