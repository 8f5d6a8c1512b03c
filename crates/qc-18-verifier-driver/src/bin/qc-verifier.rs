//! # qc-verifier
//!
//! Out-of-process verifier worker.
//!
//! ## Startup Sequence
//!
//! 1. Read `<base-dir>/verifier.toml` and start logging
//! 2. Check the identity certificate against the development trust root
//! 3. Connect to the request broker
//! 4. Serve the debug probe when `QC_VERIFIER_DEBUG_PORT` is set
//! 5. Consume `verifier.requests` until the broker goes away or SIGINT

use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{error, info};

use qc_18_verifier_driver::domain::load_verified_identity;
use qc_18_verifier_driver::worker::serve_debug_probe;
use qc_18_verifier_driver::{VerifierWorker, WorkerConfig};
use quantum_telemetry::{init_telemetry, TelemetryConfig};
use shared_bus::{BrokerSession, RemoteSession, TransportConfig};

#[derive(Debug, Parser)]
#[command(name = "qc-verifier", version, about = "Out-of-process transaction verifier")]
struct Args {
    /// Worker base directory holding verifier.toml and certificates/
    base_dir: PathBuf,

    /// Serve a status probe on this port and log at debug level
    #[arg(long, env = "QC_VERIFIER_DEBUG_PORT")]
    debug_port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = WorkerConfig::load(&args.base_dir)
        .await
        .with_context(|| format!("load worker config from {}", args.base_dir.display()))?;

    let mut telemetry = TelemetryConfig::for_worker(config.ordinal);
    if args.debug_port.is_some() {
        telemetry = telemetry.with_log_level("debug");
    }
    let _telemetry = init_telemetry(&telemetry).context("initialize telemetry")?;

    let identity_directory = config.base_directory.clone();
    let identity = tokio::task::spawn_blocking(move || load_verified_identity(&identity_directory))
        .await
        .context("identity check task")?
        .context("verify worker identity")?;
    info!(
        ordinal = config.ordinal,
        legal_name = %identity.legal_name(),
        "Worker identity verified"
    );

    let mut transport = TransportConfig::parse(&config.request_address)
        .with_context(|| format!("parse request address {}", config.request_address))?;
    transport.tls = config.tls.clone();
    let session: Arc<dyn BrokerSession> = Arc::new(
        RemoteSession::connect(&transport)
            .await
            .with_context(|| format!("connect to broker at {}", transport.address()))?,
    );

    let worker = VerifierWorker::new(config, identity, Arc::clone(&session));

    if let Some(port) = args.debug_port {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, port))
            .await
            .with_context(|| format!("bind debug probe on port {port}"))?;
        let legal_name = worker.legal_name().to_string();
        let stats = Arc::clone(worker.stats());
        tokio::spawn(async move {
            if let Err(e) = serve_debug_probe(listener, legal_name, stats).await {
                error!(error = %e, "Debug probe stopped");
            }
        });
    }

    tokio::select! {
        result = worker.run() => result.context("verifier worker failed")?,
        _ = tokio::signal::ctrl_c() => info!("Received SIGINT, shutting down"),
    }

    session.close().await;
    Ok(())
}
