//! # Development Identity Material
//!
//! Every worker gets an Ed25519 identity key and a certificate binding its
//! legal name to that key, signed by a fixed development root. The root key
//! is derived from a public label, so anyone can mint a "trusted"
//! certificate: this material is for harness use only.
//!
//! Layout under `<base>/certificates/`:
//!
//! ```text
//! identity.key     hex-encoded 32-byte signing seed
//! identity.toml    certificate (legal name, public key, root signature)
//! truststore.toml  the root public key the worker trusts
//! ```

use crate::domain::errors::IdentityError;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Directory under a worker's base directory holding its identity.
pub const CERTIFICATES_DIR: &str = "certificates";

const KEY_FILE: &str = "identity.key";
const CERTIFICATE_FILE: &str = "identity.toml";
const TRUSTSTORE_FILE: &str = "truststore.toml";

/// Label the development root seed is derived from.
const DEV_ROOT_LABEL: &[u8] = b"quantum-chain/dev-root-ca/v1";

/// The development root signing key.
pub fn dev_root_key() -> SigningKey {
    let seed: [u8; 32] = Sha256::digest(DEV_ROOT_LABEL).into();
    SigningKey::from_bytes(&seed)
}

/// Certificate binding a legal name to a public key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityCertificate {
    pub legal_name: String,
    /// Hex-encoded Ed25519 public key.
    pub public_key: String,
    /// Hex-encoded public key of the issuing root.
    pub issuer: String,
    /// Hex-encoded root signature over [`certificate_digest`].
    pub signature: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct TrustStore {
    /// Hex-encoded root public keys.
    roots: Vec<String>,
}

/// The bytes a root signs when issuing a certificate.
fn certificate_digest(legal_name: &str, public_key: &[u8; 32]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update((legal_name.len() as u64).to_le_bytes());
    hasher.update(legal_name.as_bytes());
    hasher.update(public_key);
    hasher.finalize().into()
}

impl IdentityCertificate {
    /// Issue a certificate for `subject` signed by `root`.
    pub fn issue(legal_name: &str, subject: &VerifyingKey, root: &SigningKey) -> Self {
        let public_key = subject.to_bytes();
        let signature = root.sign(&certificate_digest(legal_name, &public_key));
        Self {
            legal_name: legal_name.to_string(),
            public_key: hex::encode(public_key),
            issuer: hex::encode(root.verifying_key().to_bytes()),
            signature: hex::encode(signature.to_bytes()),
        }
    }

    /// Check the certificate was signed by one of `roots`.
    pub fn verify(&self, roots: &[VerifyingKey]) -> Result<VerifyingKey, IdentityError> {
        let public_key = decode_fixed::<32>(&self.public_key)?;
        let issuer = decode_fixed::<32>(&self.issuer)?;
        let signature = Signature::from_bytes(&decode_fixed::<64>(&self.signature)?);

        let root = roots
            .iter()
            .find(|root| root.to_bytes() == issuer)
            .ok_or(IdentityError::UntrustedCertificate)?;
        root.verify(&certificate_digest(&self.legal_name, &public_key), &signature)
            .map_err(|_| IdentityError::UntrustedCertificate)?;

        VerifyingKey::from_bytes(&public_key).map_err(|_| IdentityError::InvalidKey)
    }
}

fn decode_fixed<const N: usize>(raw: &str) -> Result<[u8; N], IdentityError> {
    let bytes = hex::decode(raw).map_err(|_| IdentityError::InvalidKey)?;
    bytes.try_into().map_err(|_| IdentityError::InvalidKey)
}

/// A worker's verified identity.
pub struct WorkerIdentity {
    pub certificate: IdentityCertificate,
    signing_key: SigningKey,
}

impl WorkerIdentity {
    pub fn legal_name(&self) -> &str {
        &self.certificate.legal_name
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }
}

impl std::fmt::Debug for WorkerIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerIdentity")
            .field("legal_name", &self.certificate.legal_name)
            .field("public_key", &self.certificate.public_key)
            .finish()
    }
}

fn io_error(path: &Path, e: std::io::Error) -> IdentityError {
    IdentityError::Io {
        path: path.display().to_string(),
        reason: e.to_string(),
    }
}

fn malformed(path: &Path, reason: impl ToString) -> IdentityError {
    IdentityError::Malformed {
        path: path.display().to_string(),
        reason: reason.to_string(),
    }
}

fn write_toml<T: Serialize>(path: &Path, value: &T) -> Result<(), IdentityError> {
    let raw = toml::to_string_pretty(value).map_err(|e| malformed(path, e))?;
    fs::write(path, raw).map_err(|e| io_error(path, e))
}

fn read_toml<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T, IdentityError> {
    let raw = fs::read_to_string(path).map_err(|e| io_error(path, e))?;
    toml::from_str(&raw).map_err(|e| malformed(path, e))
}

/// Generate a key, certificate and trust store under `<base>/certificates/`.
pub fn provision_dev_identity(
    base_directory: &Path,
    legal_name: &str,
) -> Result<IdentityCertificate, IdentityError> {
    let dir = base_directory.join(CERTIFICATES_DIR);
    fs::create_dir_all(&dir).map_err(|e| io_error(&dir, e))?;

    let root = dev_root_key();
    let signing_key = SigningKey::generate(&mut OsRng);
    let certificate = IdentityCertificate::issue(legal_name, &signing_key.verifying_key(), &root);

    let key_path = dir.join(KEY_FILE);
    fs::write(&key_path, hex::encode(signing_key.to_bytes())).map_err(|e| io_error(&key_path, e))?;
    write_toml(&dir.join(CERTIFICATE_FILE), &certificate)?;
    write_toml(
        &dir.join(TRUSTSTORE_FILE),
        &TrustStore {
            roots: vec![hex::encode(root.verifying_key().to_bytes())],
        },
    )?;

    debug!(legal_name, dir = %dir.display(), "Provisioned development identity");
    Ok(certificate)
}

/// Load the identity under `<base>/certificates/` and check it against the
/// trust store and the signing key.
pub fn load_verified_identity(base_directory: &Path) -> Result<WorkerIdentity, IdentityError> {
    let dir = base_directory.join(CERTIFICATES_DIR);

    let truststore: TrustStore = read_toml(&dir.join(TRUSTSTORE_FILE))?;
    let roots = truststore
        .roots
        .iter()
        .map(|raw| {
            decode_fixed::<32>(raw)
                .and_then(|bytes| VerifyingKey::from_bytes(&bytes).map_err(|_| IdentityError::InvalidKey))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let certificate: IdentityCertificate = read_toml(&dir.join(CERTIFICATE_FILE))?;
    let certified_key = certificate.verify(&roots)?;

    let key_path = dir.join(KEY_FILE);
    let raw_key = fs::read_to_string(&key_path).map_err(|e| io_error(&key_path, e))?;
    let signing_key = SigningKey::from_bytes(&decode_fixed::<32>(raw_key.trim())?);
    if signing_key.verifying_key() != certified_key {
        return Err(IdentityError::KeyMismatch);
    }

    Ok(WorkerIdentity {
        certificate,
        signing_key,
    })
}

/// Paths of the identity files, for diagnostics.
pub fn identity_paths(base_directory: &Path) -> [PathBuf; 3] {
    let dir = base_directory.join(CERTIFICATES_DIR);
    [dir.join(KEY_FILE), dir.join(CERTIFICATE_FILE), dir.join(TRUSTSTORE_FILE)]
}
