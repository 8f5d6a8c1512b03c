//! # Core Domain Entities
//!
//! The verification unit carried by the protocol: a signed ledger
//! transaction. Workers validate it; the requestor treats it as opaque.

use serde::{Deserialize, Serialize};
use serde_with::{serde_as, Bytes};
use sha2::{Digest, Sha256};

/// A 32-byte SHA-256 hash.
pub type Hash = [u8; 32];

/// A 64-byte Ed25519 signature.
pub type Signature = [u8; 64];

/// A 32-byte Ed25519 public key.
pub type PublicKey = [u8; 32];

/// A raw transaction as submitted for verification.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Sender's public key.
    pub from: PublicKey,
    /// Recipient's public key (optional for contract creation).
    pub to: Option<PublicKey>,
    /// Transaction amount in base units.
    pub value: u64,
    /// Sender's nonce to prevent replay attacks.
    pub nonce: u64,
    /// Transaction payload (contract call data, etc.).
    pub data: Vec<u8>,
    /// Sender's signature over [`Transaction::signing_hash`].
    #[serde_as(as = "Bytes")]
    pub signature: Signature,
}

impl Transaction {
    /// Hash of every field except the signature.
    pub fn signing_hash(&self) -> Hash {
        let mut hasher = Sha256::new();
        hasher.update(self.from);
        match &self.to {
            Some(to) => {
                hasher.update([1u8]);
                hasher.update(to);
            }
            None => hasher.update([0u8]),
        }
        hasher.update(self.value.to_le_bytes());
        hasher.update(self.nonce.to_le_bytes());
        hasher.update((self.data.len() as u64).to_le_bytes());
        hasher.update(&self.data);
        hasher.finalize().into()
    }

    /// Transaction id: hash of the signing hash and the signature.
    pub fn tx_hash(&self) -> Hash {
        let mut hasher = Sha256::new();
        hasher.update(self.signing_hash());
        hasher.update(self.signature);
        hasher.finalize().into()
    }
}
