//! Telemetry settings, read from the environment.

use std::env;

/// Name used when nothing more specific is known.
const DEFAULT_SERVICE: &str = "qc-verifier-harness";

/// Which side of the verification protocol a process runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessRole {
    /// Test or node process submitting transactions.
    Requestor,
    /// A `qc-verifier` worker process.
    Worker,
}

impl ProcessRole {
    fn as_str(self) -> &'static str {
        match self {
            Self::Requestor => "requestor",
            Self::Worker => "worker",
        }
    }
}

#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Service name attached to the startup record
    pub service_name: String,

    pub role: ProcessRole,

    /// Worker ordinal, when this process is a worker
    pub ordinal: Option<u32>,

    /// `EnvFilter` directive used when `RUST_LOG` is unset
    pub log_level: String,

    /// One JSON object per line instead of human-readable output
    pub json_logs: bool,

    pub ansi: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: DEFAULT_SERVICE.to_string(),
            role: ProcessRole::Requestor,
            ordinal: None,
            log_level: "info".to_string(),
            json_logs: false,
            ansi: true,
        }
    }
}

impl TelemetryConfig {
    /// Read settings from the environment.
    ///
    /// - `QC_SERVICE_NAME`: service name (default: `qc-verifier-harness`)
    /// - `QC_LOG_LEVEL`: filter directive (default: `info`)
    /// - `QC_JSON_LOGS`: `true`/`1` for JSON lines
    ///
    /// Worker stdout is redirected to a log file by the orchestrator, so
    /// `QC_LOG_NO_ANSI` turns colours off there.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            service_name: env::var("QC_SERVICE_NAME").unwrap_or(defaults.service_name),
            log_level: env::var("QC_LOG_LEVEL").unwrap_or(defaults.log_level),
            json_logs: env::var("QC_JSON_LOGS")
                .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
                .unwrap_or(false),
            ansi: env::var_os("QC_LOG_NO_ANSI").is_none(),
            ..defaults
        }
    }

    /// Settings for worker `ordinal`. Workers log to a file, never with colours.
    pub fn for_worker(ordinal: u32) -> Self {
        Self {
            service_name: "qc-verifier".to_string(),
            role: ProcessRole::Worker,
            ordinal: Some(ordinal),
            ansi: false,
            ..Self::from_env()
        }
    }

    #[must_use]
    pub fn with_log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    /// Name identifying this process in logs, e.g. `qc-verifier/worker-3`.
    pub fn instance_name(&self) -> String {
        match self.ordinal {
            Some(ordinal) => format!("{}/{}-{ordinal}", self.service_name, self.role.as_str()),
            None => format!("{}/{}", self.service_name, self.role.as_str()),
        }
    }
}
