//! Forwarder configuration
//!
//! Loaded from a RON file, e.g.
//!
//! ```ron
//! (
//!     destinations: [
//!         (name: "pacs", mode: "dicom"),
//!         (name: "cloud", mode: "dicom-web-series-by-series"),
//!     ],
//!     trigger: series,
//!     worker_count: 4,
//!     retry: (intervals_secs: [30, 60, 600]),
//! )
//! ```

use std::{
    collections::BTreeSet,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Serialize};

use crate::{
    error::ConfigError,
    policy::RetryPolicy,
    transport::DEFAULT_SPLIT_THRESHOLD_BYTES,
    types::{Destination, Trigger},
};

/// Environment variable naming the configuration file
pub const CONFIG_ENV: &str = "COURIER_CONFIG";

const CONFIG_SEARCH_PATHS: [&str; 2] = [
    "./courier.config.ron",
    "/etc/courier/courier.config.ron",
];

const fn default_max_startup_attempts() -> u32 {
    5
}

const fn default_polling_interval_ms() -> u64 {
    1000
}

const fn default_worker_count() -> usize {
    1
}

const fn default_split_threshold_bytes() -> u64 {
    DEFAULT_SPLIT_THRESHOLD_BYTES
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForwarderConfig {
    /// Where every resource set is forwarded, in delivery order
    pub destinations: Vec<Destination>,

    /// Granularity at which new resource sets are picked up
    #[serde(default)]
    pub trigger: Trigger,

    /// Liveness probes of the source before giving up at startup
    #[serde(default = "default_max_startup_attempts")]
    pub max_startup_attempts: u32,

    /// Pause between forwarding cycles, and between startup probes
    #[serde(default = "default_polling_interval_ms")]
    pub polling_interval_ms: u64,

    /// Resource sets handled concurrently within a cycle
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,

    #[serde(default)]
    pub retry: RetryPolicy,

    /// Series larger than this are sent instance by instance in
    /// `dicom-web-series-by-series` mode
    #[serde(default = "default_split_threshold_bytes")]
    pub split_threshold_bytes: u64,

    /// Where to keep the status snapshot between restarts.
    ///
    /// Without it, status is only held in memory.
    #[serde(default)]
    pub state_path: Option<PathBuf>,
}

impl ForwarderConfig {
    /// A configuration with default settings for `destinations`
    #[must_use]
    pub fn new(destinations: Vec<Destination>) -> Self {
        Self {
            destinations,
            trigger: Trigger::default(),
            max_startup_attempts: default_max_startup_attempts(),
            polling_interval_ms: default_polling_interval_ms(),
            worker_count: default_worker_count(),
            retry: RetryPolicy::default(),
            split_threshold_bytes: default_split_threshold_bytes(),
            state_path: None,
        }
    }

    /// Parse and validate a RON document
    ///
    /// # Errors
    ///
    /// Returns an error if the document does not parse or is invalid.
    pub fn from_ron_str(config: &str) -> Result<Self, ConfigError> {
        let config: Self =
            ron::from_str(config).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate the configuration at `path`
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, does not parse or is invalid.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::NotFound(path.display().to_string())
            } else {
                ConfigError::Io(e)
            }
        })?;

        Self::from_ron_str(&contents)
    }

    /// Load the configuration named by `COURIER_CONFIG`, or the first one
    /// found in the default locations
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::NotFound`] if there is no configuration file,
    /// or any error from [`Self::load`].
    pub fn find() -> Result<Self, ConfigError> {
        Self::load(Self::locate(std::env::var(CONFIG_ENV).ok())?)
    }

    fn locate(overridden: Option<String>) -> Result<PathBuf, ConfigError> {
        if let Some(path) = overridden {
            return Ok(PathBuf::from(path));
        }

        CONFIG_SEARCH_PATHS
            .iter()
            .map(PathBuf::from)
            .find(|path| path.exists())
            .ok_or_else(|| ConfigError::NotFound(CONFIG_SEARCH_PATHS.join(", ")))
    }

    /// Check everything that can be checked without the source or transports
    ///
    /// # Errors
    ///
    /// Returns the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.destinations.is_empty() {
            return Err(ConfigError::NoDestinations);
        }

        let mut seen = BTreeSet::new();
        if let Some(duplicate) = self
            .destinations
            .iter()
            .find(|destination| !seen.insert(destination.name.as_str()))
        {
            return Err(ConfigError::DuplicateDestination(duplicate.name.clone()));
        }

        if self.worker_count == 0 {
            return Err(ConfigError::NoWorkers);
        }

        self.retry.validate()
    }

    #[must_use]
    pub const fn polling_interval(&self) -> Duration {
        Duration::from_millis(self.polling_interval_ms)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::io::Write;

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::types::ForwardMode;

    #[test]
    fn test_defaults() {
        let config = ForwarderConfig::from_ron_str(r#"(destinations: [(name: "pacs", mode: "dicom")])"#)
            .unwrap();

        assert_eq!(
            config,
            ForwarderConfig::new(vec![Destination::new("pacs", ForwardMode::Dicom)])
        );
        assert_eq!(config.trigger, Trigger::Study);
        assert_eq!(config.max_startup_attempts, 5);
        assert_eq!(config.polling_interval(), Duration::from_secs(1));
        assert_eq!(config.worker_count, 1);
        assert_eq!(config.split_threshold_bytes, 1 << 30);
        assert_eq!(config.retry.intervals_secs, vec![60, 120, 300, 1800, 3600]);
    }

    #[test]
    fn test_full_config() {
        let config = ForwarderConfig::from_ron_str(
            r#"(
                destinations: [
                    (name: "pacs", mode: "dicom-series-by-series", alternate: Some("backup")),
                    (name: "peer", mode: "peering"),
                ],
                trigger: instance,
                max_startup_attempts: 2,
                polling_interval_ms: 250,
                worker_count: 8,
                retry: (intervals_secs: [1, 2], jitter_factor: 0.1),
                split_threshold_bytes: 1024,
                state_path: Some("/var/lib/courier/status.bin"),
            )"#,
        )
        .unwrap();

        assert_eq!(config.destinations.len(), 2);
        assert_eq!(config.destinations[0].alternate.as_deref(), Some("backup"));
        assert_eq!(config.destinations[1].mode, ForwardMode::Peering);
        assert_eq!(config.trigger, Trigger::Instance);
        assert_eq!(config.worker_count, 8);
        assert_eq!(config.retry.intervals_secs, vec![1, 2]);
        assert_eq!(config.split_threshold_bytes, 1024);
        assert_eq!(
            config.state_path,
            Some(PathBuf::from("/var/lib/courier/status.bin"))
        );
    }

    #[test]
    fn test_invalid_configs() {
        assert!(matches!(
            ForwarderConfig::from_ron_str("(destinations: [])"),
            Err(ConfigError::NoDestinations)
        ));
        assert!(matches!(
            ForwarderConfig::from_ron_str(
                r#"(destinations: [(name: "a", mode: "dicom"), (name: "a", mode: "peering")])"#
            ),
            Err(ConfigError::DuplicateDestination(name)) if name == "a"
        ));
        assert!(matches!(
            ForwarderConfig::from_ron_str(r#"(destinations: [(name: "a", mode: "ftp")])"#),
            Err(ConfigError::Parse(_))
        ));
        assert!(matches!(
            ForwarderConfig::from_ron_str(
                r#"(destinations: [(name: "a", mode: "dicom")], worker_count: 0)"#
            ),
            Err(ConfigError::NoWorkers)
        ));
        assert!(matches!(
            ForwarderConfig::from_ron_str(
                r#"(destinations: [(name: "a", mode: "dicom")], retry: (intervals_secs: []))"#
            ),
            Err(ConfigError::EmptyRetryTable)
        ));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"(destinations: [(name: "web", mode: "dicom-web")])"#).unwrap();

        let config = ForwarderConfig::load(file.path()).unwrap();
        assert_eq!(config.destinations[0].mode, ForwardMode::DicomWeb);

        assert!(matches!(
            ForwarderConfig::load("/nonexistent/courier.config.ron"),
            Err(ConfigError::NotFound(_))
        ));
    }

    #[test]
    fn test_locate_prefers_override() {
        let path = ForwarderConfig::locate(Some("/tmp/custom.ron".to_string())).unwrap();
        assert_eq!(path, PathBuf::from("/tmp/custom.ron"));
    }
}
