//! Domain layer: correlation bookkeeping, configuration, identity material
//! and error types. Nothing here touches the broker.

pub mod config;
pub mod correlation;
pub mod errors;
pub mod identity;
pub mod registry;

pub use config::{DriverConfig, WorkerConfig, DEFAULT_MAX_DATA_BYTES, WORKER_CONFIG_FILE};
pub use correlation::{random_correlation_id, random_queue_nonce};
pub use errors::{DriverError, HandleError, IdentityError};
pub use identity::{
    dev_root_key, load_verified_identity, provision_dev_identity, IdentityCertificate,
    WorkerIdentity,
};
pub use registry::{CompletionHandle, CorrelationRegistry, RegistryStats, Resolution};
