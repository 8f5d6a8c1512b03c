//! # Driver and Worker Configuration
//!
//! [`DriverConfig`] is read from the environment by the requestor side.
//! [`WorkerConfig`] is the `verifier.toml` file the orchestrator writes into
//! each worker's base directory and the worker reads back on startup.

use crate::domain::errors::DriverError;
use serde::{Deserialize, Serialize};
use shared_bus::TlsSettings;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

/// File name of the worker configuration inside its base directory.
pub const WORKER_CONFIG_FILE: &str = "verifier.toml";

/// Largest `data` payload a worker accepts by default.
pub const DEFAULT_MAX_DATA_BYTES: usize = 128 * 1024;

/// Requestor-side settings.
#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// Directory under which each worker gets its own base directory.
    pub base_directory: PathBuf,
    /// Path or name of the `qc-verifier` executable.
    pub worker_binary: PathBuf,
    /// Pause between consumer-count queries.
    pub retry_interval: Duration,
    /// How long readiness waits before giving up.
    pub readiness_timeout: Duration,
    /// Launch workers with a debug port and debug logging.
    pub debug: bool,
    /// First port handed out to debug-mode workers.
    pub debug_port_start: u16,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            base_directory: std::env::temp_dir().join("qc-verifier"),
            worker_binary: PathBuf::from("qc-verifier"),
            retry_interval: Duration::from_millis(100),
            readiness_timeout: Duration::from_secs(30),
            debug: false,
            debug_port_start: 5005,
        }
    }
}

impl DriverConfig {
    /// Defaults overridden by environment variables.
    ///
    /// - `QC_VERIFIER_BASE_DIR`
    /// - `QC_VERIFIER_BIN`
    /// - `QC_VERIFIER_RETRY_INTERVAL_MS`
    /// - `QC_VERIFIER_READINESS_TIMEOUT_MS`
    /// - `QC_VERIFIER_DEBUG` (`true` or `1`)
    /// - `QC_VERIFIER_DEBUG_PORT_START`
    ///
    /// Unparseable values are ignored with a warning.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(dir) = std::env::var("QC_VERIFIER_BASE_DIR") {
            config.base_directory = PathBuf::from(dir);
        }
        if let Ok(bin) = std::env::var("QC_VERIFIER_BIN") {
            config.worker_binary = PathBuf::from(bin);
        }
        if let Some(ms) = parse_env::<u64>("QC_VERIFIER_RETRY_INTERVAL_MS") {
            config.retry_interval = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_env::<u64>("QC_VERIFIER_READINESS_TIMEOUT_MS") {
            config.readiness_timeout = Duration::from_millis(ms);
        }
        if let Ok(debug) = std::env::var("QC_VERIFIER_DEBUG") {
            config.debug = debug.eq_ignore_ascii_case("true") || debug == "1";
        }
        if let Some(port) = parse_env::<u16>("QC_VERIFIER_DEBUG_PORT_START") {
            config.debug_port_start = port;
        }

        config
    }

    #[must_use]
    pub fn with_base_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.base_directory = dir.into();
        self
    }

    #[must_use]
    pub fn with_worker_binary(mut self, bin: impl Into<PathBuf>) -> Self {
        self.worker_binary = bin.into();
        self
    }

    #[must_use]
    pub fn with_readiness_timeout(mut self, timeout: Duration) -> Self {
        self.readiness_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_debug(mut self, start_port: u16) -> Self {
        self.debug = true;
        self.debug_port_start = start_port;
        self
    }
}

fn parse_env<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(key, value = %raw, "Ignoring unparseable environment override");
            None
        }
    }
}

/// Settings for one worker process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Ordinal assigned by the orchestrator.
    pub ordinal: u32,
    /// Directory holding this file, certificates and logs.
    pub base_directory: PathBuf,
    /// `host:port` of the broker carrying verification requests.
    pub request_address: String,
    /// Name bound into the worker's certificate.
    pub legal_name: String,
    /// Largest accepted `data` payload.
    #[serde(default = "default_max_data_bytes")]
    pub max_data_bytes: usize,
    #[serde(default)]
    pub tls: TlsSettings,
}

fn default_max_data_bytes() -> usize {
    DEFAULT_MAX_DATA_BYTES
}

impl WorkerConfig {
    pub fn new(ordinal: u32, base_directory: PathBuf, request_address: impl Into<String>) -> Self {
        Self {
            ordinal,
            base_directory,
            request_address: request_address.into(),
            legal_name: format!("qc-verifier-{ordinal}"),
            max_data_bytes: DEFAULT_MAX_DATA_BYTES,
            tls: TlsSettings::default(),
        }
    }

    /// Location of the config file for a base directory.
    pub fn path_in(base_directory: &Path) -> PathBuf {
        base_directory.join(WORKER_CONFIG_FILE)
    }

    pub fn to_toml(&self) -> Result<String, DriverError> {
        toml::to_string_pretty(self).map_err(|e| DriverError::Config(e.to_string()))
    }

    pub fn from_toml(raw: &str) -> Result<Self, DriverError> {
        toml::from_str(raw).map_err(|e| DriverError::Config(e.to_string()))
    }

    /// Write `verifier.toml` into the base directory.
    pub async fn write(&self) -> Result<PathBuf, DriverError> {
        let path = Self::path_in(&self.base_directory);
        tokio::fs::write(&path, self.to_toml()?).await?;
        Ok(path)
    }

    /// Read `verifier.toml` from `base_directory`.
    pub async fn load(base_directory: &Path) -> Result<Self, DriverError> {
        let path = Self::path_in(base_directory);
        let raw = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| DriverError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml(&raw)
    }
}
