//! Approval signer trait and the local Ed25519 backend.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use ed25519_dalek::{Signer, SigningKey, VerifyingKey};
use sentinel_core::{Approval, Result, SentinelError};

/// Signing backend for approvals.
///
/// `sign` is async because the KMS backend crosses the network; the local
/// backend resolves immediately.
#[async_trait]
pub trait ApprovalSigner: Send + Sync {
    /// Sign the canonical form of `approval` (minus its signature field)
    /// and return the detached signature, base64 encoded.
    async fn sign(&self, approval: &Approval) -> Result<String>;

    /// Verify a detached signature against this signer's own public key.
    ///
    /// Fails closed: any error during canonicalization or decoding yields
    /// `false`, never an error the caller could mistake for success.
    fn verify(&self, approval: &Approval, signature_b64: &str) -> bool {
        let Ok(payload) = approval.signing_payload() else {
            return false;
        };
        verify_detached(&payload, signature_b64, &self.public_key())
    }

    /// The signer's public key bytes.
    fn public_key(&self) -> [u8; 32];

    /// Identifier of the active signing key, embedded in approvals.
    fn key_id(&self) -> &str;
}

/// Verify a base64 detached Ed25519 signature over `payload`.
///
/// Returns `false` on any malformed input. The signature bytes run through
/// a constant-time equality pre-check before the strict dalek verification.
pub(crate) fn verify_detached(payload: &[u8], signature_b64: &str, public_key: &[u8; 32]) -> bool {
    let Ok(sig_bytes) = BASE64.decode(signature_b64) else {
        return false;
    };
    let Ok(sig_arr) = <[u8; 64]>::try_from(sig_bytes.as_slice()) else {
        return false;
    };
    // Reject the all-zero signature in constant time before handing the
    // bytes to point decompression.
    use subtle::ConstantTimeEq;
    if bool::from(sig_arr.ct_eq(&[0u8; 64])) {
        return false;
    }
    let Ok(vk) = VerifyingKey::from_bytes(public_key) else {
        return false;
    };
    let signature = ed25519_dalek::Signature::from_bytes(&sig_arr);
    vk.verify_strict(payload, &signature).is_ok()
}

/// Local signing backend.
///
/// Holds the private key in process memory only; `ed25519_dalek::SigningKey`
/// zeroizes its scalar on drop. Ephemeral keys are permitted in development
/// mode only — production loads the key from the configured secret.
pub struct LocalSigner {
    key: SigningKey,
    key_id: String,
}

impl std::fmt::Debug for LocalSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never expose key material through Debug.
        f.debug_struct("LocalSigner")
            .field("key_id", &self.key_id)
            .finish_non_exhaustive()
    }
}

impl LocalSigner {
    /// Load a signer from a base64-encoded 32-byte secret.
    pub fn from_base64(secret_b64: &str, key_id: impl Into<String>) -> Result<Self> {
        let mut bytes = BASE64
            .decode(secret_b64.trim())
            .map_err(|_| SentinelError::config("SIGNER_PRIVATE_KEY is not valid base64"))?;
        let arr: [u8; 32] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| SentinelError::config("SIGNER_PRIVATE_KEY must decode to 32 bytes"))?;
        let key = SigningKey::from_bytes(&arr);
        zeroize::Zeroize::zeroize(&mut bytes);
        Ok(Self {
            key,
            key_id: key_id.into(),
        })
    }

    /// Generate an ephemeral signer. Development mode only.
    pub fn generate_ephemeral(key_id: impl Into<String>) -> Self {
        let key = SigningKey::generate(&mut rand::rngs::OsRng);
        tracing::warn!("using ephemeral signing key; approvals will not survive a restart");
        Self {
            key,
            key_id: key_id.into(),
        }
    }

    /// The verifying key for this signer.
    pub fn verifying_key(&self) -> VerifyingKey {
        self.key.verifying_key()
    }
}

#[async_trait]
impl ApprovalSigner for LocalSigner {
    async fn sign(&self, approval: &Approval) -> Result<String> {
        let payload = approval
            .signing_payload()
            .map_err(|e| SentinelError::signature(format!("canonicalization failed: {e}")))?;
        let signature = self.key.sign(&payload);
        Ok(BASE64.encode(signature.to_bytes()))
    }

    fn public_key(&self) -> [u8; 32] {
        self.key.verifying_key().to_bytes()
    }

    fn key_id(&self) -> &str {
        &self.key_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sentinel_core::{ApprovalId, EnvelopeKind, PlanId, ENVELOPE_VERSION, ZERO_HASH_HEX};

    fn sample_approval(key_id: &str) -> Approval {
        Approval {
            version: ENVELOPE_VERSION.to_string(),
            kind: EnvelopeKind::Approval,
            approval_id: ApprovalId::new("approval-001"),
            plan_id: PlanId::new("plan-001"),
            issued_at: "2026-01-01T00:00:00Z".parse().expect("timestamp"),
            expires_at: "2026-01-01T00:01:00Z".parse().expect("timestamp"),
            human_approved: false,
            approver: "bridge".to_string(),
            payload_hash: ZERO_HASH_HEX.to_string(),
            key_id: key_id.to_string(),
            signature: String::new(),
        }
    }

    #[tokio::test]
    async fn sign_verify_round_trip() {
        let signer = LocalSigner::generate_ephemeral("key-1");
        let approval = sample_approval("key-1");
        let signature = signer.sign(&approval).await.expect("sign");
        assert!(signer.verify(&approval, &signature));
    }

    #[tokio::test]
    async fn mutated_payload_fails_verification() {
        let signer = LocalSigner::generate_ephemeral("key-1");
        let approval = sample_approval("key-1");
        let signature = signer.sign(&approval).await.expect("sign");

        let mut tampered = approval.clone();
        tampered.human_approved = true;
        assert!(!signer.verify(&tampered, &signature));
    }

    #[tokio::test]
    async fn mutated_signature_fails_verification() {
        let signer = LocalSigner::generate_ephemeral("key-1");
        let approval = sample_approval("key-1");
        let signature = signer.sign(&approval).await.expect("sign");

        let mut bytes = BASE64.decode(&signature).expect("base64");
        bytes[0] ^= 0x01;
        let flipped = BASE64.encode(&bytes);
        assert!(!signer.verify(&approval, &flipped));
    }

    #[test]
    fn malformed_signatures_fail_closed() {
        let signer = LocalSigner::generate_ephemeral("key-1");
        let approval = sample_approval("key-1");
        assert!(!signer.verify(&approval, "not base64!!"));
        assert!(!signer.verify(&approval, &BASE64.encode([0u8; 10])));
        assert!(!signer.verify(&approval, &BASE64.encode([0u8; 64])));
    }

    #[test]
    fn from_base64_rejects_bad_secrets() {
        assert!(LocalSigner::from_base64("short", "key-1").is_err());
        assert!(LocalSigner::from_base64(&BASE64.encode([1u8; 16]), "key-1").is_err());
        assert!(LocalSigner::from_base64(&BASE64.encode([1u8; 32]), "key-1").is_ok());
    }

    #[tokio::test]
    async fn signature_stable_for_identical_approvals() {
        let signer =
            LocalSigner::from_base64(&BASE64.encode([7u8; 32]), "key-1").expect("signer");
        let a = sample_approval("key-1");
        let b = sample_approval("key-1");
        assert_eq!(
            signer.sign(&a).await.expect("sign"),
            signer.sign(&b).await.expect("sign")
        );
    }
}
