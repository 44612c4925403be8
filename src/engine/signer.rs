//! Signing capability handed to the engine per call
//!
//! The engine never stores key material. Callers pass a signer for the
//! duration of one `submit_order` call.

use secrecy::{ExposeSecret, SecretString};
use solana_sdk::{
    pubkey::Pubkey,
    signature::{Keypair, Signer},
    transaction::VersionedTransaction,
};
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum SigningError {
    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("malformed transaction: {0}")]
    MalformedTransaction(String),

    #[error("signing rejected: {0}")]
    Rejected(String),
}

/// `sign(transactionBytes) -> signedBytes`
pub trait TransactionSigner: Send + Sync {
    /// Wallet that pays for and receives the swap
    fn public_key(&self) -> String;

    fn sign(&self, transaction: &[u8]) -> Result<Vec<u8>, SigningError>;
}

/// Signs with a 64-byte keypair supplied as hex
pub struct KeypairSigner {
    secret_hex: SecretString,
    pubkey: Pubkey,
}

impl KeypairSigner {
    pub fn new(secret_hex: SecretString) -> Result<Self, SigningError> {
        let pubkey = load_keypair(&secret_hex)?.pubkey();
        Ok(Self { secret_hex, pubkey })
    }
}

impl std::fmt::Debug for KeypairSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeypairSigner")
            .field("pubkey", &self.pubkey)
            .finish_non_exhaustive()
    }
}

impl TransactionSigner for KeypairSigner {
    fn public_key(&self) -> String {
        self.pubkey.to_string()
    }

    fn sign(&self, transaction: &[u8]) -> Result<Vec<u8>, SigningError> {
        // bincode 1.x matches the ledger wire format
        let unsigned: VersionedTransaction = bincode1::deserialize(transaction)
            .map_err(|e| SigningError::MalformedTransaction(e.to_string()))?;

        let keypair = load_keypair(&self.secret_hex)?;
        let signed = VersionedTransaction::try_new(unsigned.message, &[&keypair])
            .map_err(|e| SigningError::Rejected(e.to_string()))?;

        bincode1::serialize(&signed).map_err(|e| SigningError::MalformedTransaction(e.to_string()))
    }
}

fn load_keypair(secret_hex: &SecretString) -> Result<Keypair, SigningError> {
    let key_bytes = hex::decode(secret_hex.expose_secret().trim())
        .map_err(|e| SigningError::InvalidKey(format!("invalid hex: {}", e)))?;

    if key_bytes.len() != 64 {
        return Err(SigningError::InvalidKey(format!(
            "expected 64 bytes, got {}",
            key_bytes.len()
        )));
    }

    Keypair::try_from(key_bytes.as_slice()).map_err(|e| SigningError::InvalidKey(e.to_string()))
}
