//! Configuration for the reconciler.

use std::path::PathBuf;
use std::time::Duration;

use crate::db::DbConfig;
use crate::workspace::Factory;

/// Reconciler configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Database connection settings.
    pub database: DbConfig,

    /// Root for workspace artifacts; the process working directory when
    /// unset.
    pub storage_dir: Option<PathBuf>,

    /// Remote source of artifact bundles; the project-pinned URL when unset.
    pub repository_url: Option<String>,

    /// Verbose logging.
    pub debug: bool,

    /// Whether we're in development mode.
    pub dev_mode: bool,

    /// Age beyond which an in-progress operation is reported orphan.
    pub orphan_timeout: Duration,

    /// Mean occupancy percentage above which a component is saturated.
    pub occupancy_high_water_mark: f64,

    /// Interval between bookkeeping passes.
    pub bookkeeper_interval: Duration,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let storage_dir = std::env::var("FLEET_STORAGE_DIR").ok().map(PathBuf::from);

        let repository_url = std::env::var("FLEET_REPOSITORY_URL").ok();

        let debug = std::env::var("FLEET_DEBUG")
            .map(|v| v == "1" || v.to_lowercase() == "true")
            .unwrap_or(false);

        let dev_mode = std::env::var("FLEET_DEV")
            .map(|v| v == "1" || v.to_lowercase() == "true")
            .unwrap_or(false);

        let orphan_timeout = std::env::var("FLEET_ORPHAN_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(300));

        let occupancy_high_water_mark = std::env::var("FLEET_OCCUPANCY_HIGH_WATER_MARK")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(80.0);

        let bookkeeper_interval = std::env::var("FLEET_BOOKKEEPER_INTERVAL_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(30));

        Self {
            database: DbConfig::from_env(),
            storage_dir,
            repository_url,
            debug,
            dev_mode,
            orphan_timeout,
            occupancy_high_water_mark,
            bookkeeper_interval,
        }
    }

    /// Workspace factory configured from this config.
    pub fn workspace_factory(&self) -> Factory {
        Factory {
            storage_dir: self.storage_dir.clone(),
            repository_url: self.repository_url.clone(),
            debug: self.debug,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_without_env() {
        // Only asserts fields no test environment overrides.
        let config = Config::from_env();
        assert_eq!(config.orphan_timeout, Duration::from_secs(300));
        assert_eq!(config.occupancy_high_water_mark, 80.0);
        assert_eq!(config.bookkeeper_interval, Duration::from_secs(30));
    }
}
