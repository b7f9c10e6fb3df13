pub mod local;

use anyhow::Result;
use async_trait::async_trait;
use thiserror::Error;

/// Encryption provider for environment-variable secret values at rest.
///
/// Local key material is implemented (`local::LocalEncryptionProvider`); an
/// external KMS-backed provider is an intentional extension point for the
/// same trait and is not implemented here.
#[async_trait]
pub trait EncryptionProvider: Send + Sync {
    async fn encrypt(&self, plaintext: &str) -> Result<String, EncryptionError>;
    async fn decrypt(&self, ciphertext: &str) -> Result<String, EncryptionError>;
    fn provider_name(&self) -> &str;
}

#[derive(Debug, Error)]
pub enum EncryptionError {
    #[error("invalid key material: {0}")]
    InvalidKey(String),

    #[error("decryption failed")]
    DecryptionFailed,

    #[error("malformed ciphertext: {0}")]
    MalformedCiphertext(String),
}
