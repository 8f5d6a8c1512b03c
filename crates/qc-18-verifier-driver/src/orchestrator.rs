//! # Worker Orchestration
//!
//! Launches `qc-verifier` processes bound to a request address.
//!
//! ## Startup Sequence
//!
//! 1. Allocate a process-wide ordinal
//! 2. Write `<base>/verifier-<ordinal>/verifier.toml`
//! 3. Provision development identity material
//! 4. Spawn `qc-verifier <base-dir>` (plus `QC_VERIFIER_DEBUG_PORT` in debug mode)
//! 5. Register the process with the shutdown sequence

use crate::domain::{provision_dev_identity, DriverConfig, DriverError, WorkerConfig};
use crate::shutdown::ShutdownManager;
use crate::worker::DEBUG_PORT_ENV;
use quantum_telemetry::VERIFIER_WORKERS_STARTED;
use std::fs::File;
use std::future::Future;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicU16, AtomicU32, Ordering};
use std::sync::Arc;
use tokio::process::Command;
use tracing::{info, warn};

/// Ordinals are unique across every orchestrator in the process.
static NEXT_ORDINAL: AtomicU32 = AtomicU32::new(0);

fn next_ordinal() -> u32 {
    NEXT_ORDINAL.fetch_add(1, Ordering::SeqCst)
}

/// Hands out consecutive debug ports.
#[derive(Debug)]
pub struct DebugPortAllocation {
    next: AtomicU16,
}

impl DebugPortAllocation {
    pub fn new(start: u16) -> Self {
        Self {
            next: AtomicU16::new(start),
        }
    }

    /// Next free port, or `None` once the range is exhausted.
    pub fn next_port(&self) -> Option<u16> {
        self.next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |port| {
                port.checked_add(1)
            })
            .ok()
    }
}

/// A launched worker process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerHandle {
    pub pid: Option<u32>,
    pub ordinal: u32,
    /// Broker address the worker consumes requests from.
    pub request_address: String,
    pub base_directory: PathBuf,
    pub debug_port: Option<u16>,
}

pub struct WorkerOrchestrator {
    config: Arc<DriverConfig>,
    shutdown: Arc<ShutdownManager>,
    debug_ports: Arc<DebugPortAllocation>,
}

impl WorkerOrchestrator {
    pub fn new(config: Arc<DriverConfig>, shutdown: Arc<ShutdownManager>) -> Self {
        let debug_ports = Arc::new(DebugPortAllocation::new(config.debug_port_start));
        Self {
            config,
            shutdown,
            debug_ports,
        }
    }

    /// Start a worker consuming from the broker at `request_address`.
    ///
    /// The whole launch, ordinal included, runs on its own task; the
    /// returned future only waits for it. Any number of starts may be in
    /// progress at once.
    pub fn start_worker(
        &self,
        request_address: impl Into<String>,
    ) -> impl Future<Output = Result<WorkerHandle, DriverError>> + Send + 'static {
        let request_address = request_address.into();
        let config = Arc::clone(&self.config);
        let shutdown = Arc::clone(&self.shutdown);
        let debug_ports = Arc::clone(&self.debug_ports);

        let task = tokio::spawn(async move {
            let ordinal = next_ordinal();
            launch(&config, &shutdown, &debug_ports, ordinal, request_address).await
        });

        async move {
            task.await
                .map_err(|e| DriverError::LaunchAborted(e.to_string()))?
        }
    }
}

async fn launch(
    config: &DriverConfig,
    shutdown: &Arc<ShutdownManager>,
    debug_ports: &DebugPortAllocation,
    ordinal: u32,
    request_address: String,
) -> Result<WorkerHandle, DriverError> {
    if shutdown.is_shut_down() {
        return Err(DriverError::ShutDown);
    }

    let spawn_error = |reason: String| DriverError::WorkerSpawn { ordinal, reason };

    let base_directory = config.base_directory.join(format!("verifier-{ordinal}"));
    tokio::fs::create_dir_all(&base_directory).await?;

    let worker_config = WorkerConfig::new(ordinal, base_directory.clone(), &request_address);
    worker_config.write().await?;
    let identity_directory = base_directory.clone();
    let legal_name = worker_config.legal_name.clone();
    tokio::task::spawn_blocking(move || provision_dev_identity(&identity_directory, &legal_name))
        .await
        .map_err(|e| DriverError::LaunchAborted(e.to_string()))??;

    let debug_port = if config.debug {
        Some(
            debug_ports
                .next_port()
                .ok_or_else(|| spawn_error("debug port range exhausted".to_string()))?,
        )
    } else {
        None
    };

    let log_path = base_directory.join("worker.log");
    let stdout = File::create(&log_path)?;
    let stderr = stdout.try_clone()?;

    let mut command = Command::new(&config.worker_binary);
    command
        .arg(&base_directory)
        .stdin(Stdio::null())
        .stdout(Stdio::from(stdout))
        .stderr(Stdio::from(stderr))
        .kill_on_drop(true);
    if let Some(port) = debug_port {
        command.env(DEBUG_PORT_ENV, port.to_string());
    }

    let child = command
        .spawn()
        .map_err(|e| spawn_error(format!("{}: {e}", config.worker_binary.display())))?;
    let pid = child.id();

    shutdown.register(format!("verifier-{ordinal}"), move || async move {
        let mut child = child;
        if let Err(e) = child.kill().await {
            warn!(ordinal, error = %e, "Failed to stop verifier worker");
        } else {
            info!(ordinal, "Verifier worker stopped");
        }
    })?;

    VERIFIER_WORKERS_STARTED.inc();
    info!(
        ordinal,
        pid,
        request_address = %request_address,
        base_directory = %base_directory.display(),
        debug_port,
        "Verifier worker started"
    );

    Ok(WorkerHandle {
        pid,
        ordinal,
        request_address,
        base_directory,
        debug_port,
    })
}
