//! # Quantum Telemetry
//!
//! Structured logging and Prometheus metrics shared by the verification
//! requestor and the `qc-verifier` worker processes.
//!
//! ```rust,ignore
//! use quantum_telemetry::{init_telemetry, TelemetryConfig};
//!
//! let _telemetry = init_telemetry(&TelemetryConfig::for_worker(ordinal))?;
//! ```
//!
//! | Variable | Default | Effect |
//! |----------|---------|--------|
//! | `RUST_LOG` | unset | Overrides every other filter setting |
//! | `QC_LOG_LEVEL` | `info` | Filter directive |
//! | `QC_JSON_LOGS` | `false` | JSON lines output |
//! | `QC_SERVICE_NAME` | `qc-verifier-harness` | Service name |
//! | `QC_LOG_NO_ANSI` | unset | Disable colours |

mod config;
mod logging;
pub mod metrics;

pub use config::{ProcessRole, TelemetryConfig};
pub use logging::init_logging;
pub use metrics::{
    encode_metrics, register_metrics, MetricsHandle, READINESS_TIMEOUTS, VERIFICATION_IN_FLIGHT,
    VERIFICATION_OUTCOMES, VERIFICATION_REQUESTS_SENT, VERIFICATION_RESPONSES,
    VERIFICATION_ROLLBACKS, VERIFICATION_ROUND_TRIP, VERIFIER_WORKERS_STARTED,
    WORKER_TRANSACTIONS_CHECKED,
};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("Invalid log filter: {0}")]
    Config(String),

    #[error("Prometheus metrics: {0}")]
    MetricsInit(String),
}

/// Register metrics and install the log subscriber.
///
/// Later calls in the same process keep the first subscriber.
pub fn init_telemetry(config: &TelemetryConfig) -> Result<TelemetryGuard, TelemetryError> {
    let metrics = register_metrics()?;
    init_logging(config)?;

    Ok(TelemetryGuard {
        instance: config.instance_name(),
        _metrics: metrics,
    })
}

/// Keeps metrics registered; logs once when the process winds down.
pub struct TelemetryGuard {
    instance: String,
    _metrics: MetricsHandle,
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        tracing::info!(instance = %self.instance, "Telemetry stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_telemetry_twice() {
        let config = TelemetryConfig::default();
        assert!(init_telemetry(&config).is_ok());
        assert!(init_telemetry(&config).is_ok());
    }
}
