//! Engine configuration.
//!
//! Loaded from a JSON file so credentials stay out of the code:
//!
//! ```json
//! {
//!   "database": "weather.db",
//!   "device_url": "http://192.168.18.107",
//!   "destinations": [
//!     {"code": "wu", "bit": 0, "url": "https://example.com/update",
//!      "station_id": "KXX1", "password": "secret"}
//!   ]
//! }
//! ```
//!
//! Every other field has a default.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::backfill::DEFAULT_DIAGNOSTIC_BELOW;
use crate::consolidate::DEFAULT_RECONDENSE_BELOW;
use crate::error::ConfigError;
use crate::publish::Destination;

fn default_audit_log() -> PathBuf {
    PathBuf::from("permanent.log")
}

fn default_program() -> String {
    "quarterly".to_string()
}

fn default_request_pause_ms() -> u64 {
    500
}

fn default_http_timeout_secs() -> u64 {
    30
}

fn default_recondense_below() -> u32 {
    DEFAULT_RECONDENSE_BELOW
}

fn default_diagnostic_below() -> u32 {
    DEFAULT_DIAGNOSTIC_BELOW
}

/// Configuration for a consolidation, backfill and publish run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// SQLite database holding samples and quarters.
    pub database: PathBuf,
    /// Base URL of the weather device.
    pub device_url: String,
    /// Permanent audit log file.
    #[serde(default = "default_audit_log")]
    pub audit_log: PathBuf,
    /// Program name written in audit lines.
    #[serde(default = "default_program")]
    pub program: String,
    /// Pause before each device log fetch, in milliseconds.
    #[serde(default = "default_request_pause_ms")]
    pub request_pause_ms: u64,
    /// HTTP timeout for device and destination requests, in seconds.
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,
    /// Sample count below which quarters are recondensed.
    #[serde(default = "default_recondense_below")]
    pub recondense_below: u32,
    /// Sample count below which diagnostic backfill searches a quarter.
    #[serde(default = "default_diagnostic_below")]
    pub diagnostic_below: u32,
    /// Reporting destinations.
    pub destinations: Vec<Destination>,
}

impl EngineConfig {
    /// Creates a configuration with default settings and no destinations.
    pub fn new(database: impl Into<PathBuf>, device_url: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            device_url: device_url.into(),
            audit_log: default_audit_log(),
            program: default_program(),
            request_pause_ms: default_request_pause_ms(),
            http_timeout_secs: default_http_timeout_secs(),
            recondense_below: default_recondense_below(),
            diagnostic_below: default_diagnostic_below(),
            destinations: Vec::new(),
        }
    }

    /// Reads and validates a configuration file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read, is not valid
    /// JSON, or fails [`validate`](Self::validate).
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            source: e,
        })?;
        let config: Self = serde_json::from_str(&text).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            source: e,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Checks the values for consistency.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if the device URL is empty, there
    /// are no destinations, a destination code is empty or repeated, or a
    /// mask bit is out of range or repeated.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |reason: String| Err(ConfigError::Invalid { reason });

        if self.device_url.trim().is_empty() {
            return invalid("device_url must not be empty".into());
        }
        if self.destinations.is_empty() {
            return invalid("at least one destination is required".into());
        }

        let mut codes = HashSet::new();
        let mut bits = HashSet::new();
        for destination in &self.destinations {
            if destination.code.trim().is_empty() {
                return invalid("destination code must not be empty".into());
            }
            if !codes.insert(destination.code.as_str()) {
                return invalid(format!("duplicate destination code '{}'", destination.code));
            }
            if destination.bit >= 8 {
                return invalid(format!(
                    "destination '{}' bit {} does not fit the acknowledgment mask",
                    destination.code, destination.bit
                ));
            }
            if !bits.insert(destination.bit) {
                return invalid(format!(
                    "destination '{}' reuses bit {}",
                    destination.code, destination.bit
                ));
            }
        }

        Ok(())
    }

    /// Sets the audit log path.
    #[must_use]
    pub fn with_audit_log(mut self, path: impl Into<PathBuf>) -> Self {
        self.audit_log = path.into();
        self
    }

    /// Sets the program name written in audit lines.
    #[must_use]
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    /// Sets the pause before each device log fetch.
    #[must_use]
    pub fn with_request_pause(mut self, pause: Duration) -> Self {
        self.request_pause_ms = u64::try_from(pause.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Sets the HTTP timeout.
    #[must_use]
    pub fn with_http_timeout(mut self, timeout: Duration) -> Self {
        self.http_timeout_secs = timeout.as_secs();
        self
    }

    /// Sets the recondense threshold.
    #[must_use]
    pub fn with_recondense_below(mut self, below: u32) -> Self {
        self.recondense_below = below;
        self
    }

    /// Sets the diagnostic backfill threshold.
    #[must_use]
    pub fn with_diagnostic_below(mut self, below: u32) -> Self {
        self.diagnostic_below = below;
        self
    }

    /// Adds a destination.
    #[must_use]
    pub fn with_destination(mut self, destination: Destination) -> Self {
        self.destinations.push(destination);
        self
    }

    /// The pause before each device log fetch.
    pub fn request_pause(&self) -> Duration {
        Duration::from_millis(self.request_pause_ms)
    }

    /// The HTTP timeout.
    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}
