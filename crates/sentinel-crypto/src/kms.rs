//! Remote KMS signing backend.
//!
//! The KMS backend delegates signing to an external key-management service
//! that accepts raw message bytes and returns a detached Ed25519 signature.
//! The local process holds only the public key. Callers wrap KMS signing in
//! the `kms` circuit-breaker profile; this module stays transport-only.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use ed25519_dalek::Signer;
use sentinel_core::{Approval, Result, SentinelError};

use crate::signer::ApprovalSigner;

/// Errors surfaced by a KMS client.
#[derive(Debug, Clone, thiserror::Error)]
pub enum KmsError {
    /// The service rejected the request.
    #[error("KMS rejected request for key {key_id}: {reason}")]
    Rejected {
        /// Key the request named.
        key_id: String,
        /// Service-reported reason.
        reason: String,
    },

    /// The service is unreachable or timed out.
    #[error("KMS unavailable: {0}")]
    Unavailable(String),
}

/// Transport interface to a key-management service.
///
/// Implementations sign raw message bytes with a key they never release.
#[async_trait]
pub trait KmsClient: Send + Sync {
    /// Sign `message` with the named key; returns the 64-byte signature.
    async fn sign(&self, key_id: &str, message: &[u8]) -> std::result::Result<Vec<u8>, KmsError>;

    /// Fetch the 32-byte public key for the named key.
    async fn public_key(&self, key_id: &str) -> std::result::Result<[u8; 32], KmsError>;
}

/// Signing backend that delegates to a [`KmsClient`].
pub struct KmsSigner<C: KmsClient> {
    client: C,
    key_id: String,
    public_key: [u8; 32],
}

impl<C: KmsClient> KmsSigner<C> {
    /// Connect to the KMS and cache the public key for `key_id`.
    pub async fn connect(client: C, key_id: impl Into<String>) -> Result<Self> {
        let key_id = key_id.into();
        let public_key = client
            .public_key(&key_id)
            .await
            .map_err(|e| SentinelError::unavailable(format!("KMS public key fetch: {e}")))?;
        Ok(Self {
            client,
            key_id,
            public_key,
        })
    }
}

#[async_trait]
impl<C: KmsClient> ApprovalSigner for KmsSigner<C> {
    async fn sign(&self, approval: &Approval) -> Result<String> {
        let payload = approval
            .signing_payload()
            .map_err(|e| SentinelError::signature(format!("canonicalization failed: {e}")))?;
        let signature = self
            .client
            .sign(&self.key_id, &payload)
            .await
            .map_err(|e| match e {
                KmsError::Rejected { .. } => SentinelError::signature(e.to_string()),
                KmsError::Unavailable(_) => SentinelError::unavailable(e.to_string()),
            })?;
        if signature.len() != 64 {
            return Err(SentinelError::signature(format!(
                "KMS returned {} signature bytes, expected 64",
                signature.len()
            )));
        }
        Ok(BASE64.encode(signature))
    }

    fn public_key(&self) -> [u8; 32] {
        self.public_key
    }

    fn key_id(&self) -> &str {
        &self.key_id
    }
}

/// In-process KMS emulation for development and tests.
///
/// Holds a signing key locally and answers the [`KmsClient`] interface with
/// it. Production deployments point [`KmsSigner`] at a real service client
/// instead.
pub struct StaticKmsClient {
    key_id: String,
    key: ed25519_dalek::SigningKey,
}

impl StaticKmsClient {
    /// Create an emulated KMS holding one named key.
    pub fn new(key_id: impl Into<String>, key: ed25519_dalek::SigningKey) -> Self {
        Self {
            key_id: key_id.into(),
            key,
        }
    }
}

#[async_trait]
impl KmsClient for StaticKmsClient {
    async fn sign(&self, key_id: &str, message: &[u8]) -> std::result::Result<Vec<u8>, KmsError> {
        if key_id != self.key_id {
            return Err(KmsError::Rejected {
                key_id: key_id.to_string(),
                reason: "unknown key".to_string(),
            });
        }
        Ok(self.key.sign(message).to_bytes().to_vec())
    }

    async fn public_key(&self, key_id: &str) -> std::result::Result<[u8; 32], KmsError> {
        if key_id != self.key_id {
            return Err(KmsError::Rejected {
                key_id: key_id.to_string(),
                reason: "unknown key".to_string(),
            });
        }
        Ok(self.key.verifying_key().to_bytes())
    }
}
