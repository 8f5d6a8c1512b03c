//! # Transaction Validation
//!
//! The checks a verifier worker runs on every request. A failure becomes the
//! response's failure text; the exchange itself still succeeds.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use shared_types::Transaction;
use thiserror::Error;

/// Why a transaction was rejected.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// `from` is not a valid Ed25519 point.
    #[error("Invalid sender public key")]
    InvalidPublicKey,

    /// The signature does not cover this transaction under `from`.
    #[error("Signature verification failed")]
    InvalidSignature,

    /// Neither value nor data: nothing to execute.
    #[error("Transaction carries no value and no data")]
    EmptyTransaction,

    #[error("Data too large: {size} bytes (max {max})")]
    DataTooLarge { size: usize, max: usize },
}

/// Stateless transaction checks.
#[derive(Debug, Clone, Copy)]
pub struct TransactionValidator {
    max_data_bytes: usize,
}

impl TransactionValidator {
    pub fn new(max_data_bytes: usize) -> Self {
        Self { max_data_bytes }
    }

    /// Run every check; the first failure wins.
    pub fn validate(&self, transaction: &Transaction) -> Result<(), ValidationError> {
        if transaction.data.len() > self.max_data_bytes {
            return Err(ValidationError::DataTooLarge {
                size: transaction.data.len(),
                max: self.max_data_bytes,
            });
        }
        if transaction.value == 0 && transaction.data.is_empty() {
            return Err(ValidationError::EmptyTransaction);
        }

        let sender = VerifyingKey::from_bytes(&transaction.from)
            .map_err(|_| ValidationError::InvalidPublicKey)?;
        let signature = Signature::from_bytes(&transaction.signature);
        sender
            .verify(&transaction.signing_hash(), &signature)
            .map_err(|_| ValidationError::InvalidSignature)
    }
}

/// Set `from` to `key`'s public key and sign the transaction.
pub fn sign_transaction(transaction: &mut Transaction, key: &SigningKey) {
    transaction.from = key.verifying_key().to_bytes();
    transaction.signature = key.sign(&transaction.signing_hash()).to_bytes();
}
