//! Verifier-side trusted key set.
//!
//! The executor trusts a fixed set of `keyId → public key` entries,
//! distributed out of band. Rotation adds the new key under a fresh
//! `keyId` while the old one stays valid for in-flight approvals.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use sentinel_core::{Approval, Result, SentinelError};
use std::collections::HashMap;

use crate::signer::verify_detached;

/// Read-only set of trusted verification keys.
#[derive(Debug, Clone, Default)]
pub struct TrustedKeys {
    keys: HashMap<String, [u8; 32]>,
}

impl TrustedKeys {
    /// Empty set; every verification fails.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse the `TRUSTED_PUBLIC_KEYS` format: comma-separated
    /// `keyId=base64` entries.
    pub fn parse(spec: &str) -> Result<Self> {
        let mut keys = HashMap::new();
        for entry in spec.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let (key_id, encoded) = entry.split_once('=').ok_or_else(|| {
                SentinelError::config(format!("trusted key entry {entry:?} is not keyId=base64"))
            })?;
            let bytes = BASE64.decode(encoded).map_err(|_| {
                SentinelError::config(format!("trusted key {key_id}: invalid base64"))
            })?;
            let arr: [u8; 32] = bytes.as_slice().try_into().map_err(|_| {
                SentinelError::config(format!("trusted key {key_id}: expected 32 bytes"))
            })?;
            keys.insert(key_id.to_string(), arr);
        }
        Ok(Self { keys })
    }

    /// Add a key programmatically.
    pub fn insert(&mut self, key_id: impl Into<String>, public_key: [u8; 32]) {
        self.keys.insert(key_id.into(), public_key);
    }

    /// Look up a trusted key by identifier.
    pub fn get(&self, key_id: &str) -> Option<&[u8; 32]> {
        self.keys.get(key_id)
    }

    /// Number of trusted keys.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// Verify an approval's signature against the trusted key set.
///
/// Fails closed: unknown `keyId`, canonicalization failure, or a bad
/// signature all yield a [`SentinelError::Signature`].
pub fn verify_approval(approval: &Approval, trusted: &TrustedKeys) -> Result<()> {
    let public_key = trusted.get(&approval.key_id).ok_or_else(|| {
        SentinelError::signature(format!("unknown signing key: {}", approval.key_id))
    })?;
    let payload = approval
        .signing_payload()
        .map_err(|e| SentinelError::signature(format!("canonicalization failed: {e}")))?;
    if verify_detached(&payload, &approval.signature, public_key) {
        Ok(())
    } else {
        Err(SentinelError::signature("signature verification failed"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signer::{ApprovalSigner, LocalSigner};
    use sentinel_core::{ApprovalId, EnvelopeKind, PlanId, ENVELOPE_VERSION, ZERO_HASH_HEX};

    fn signed_approval(signer: &LocalSigner) -> Approval {
        let mut approval = Approval {
            version: ENVELOPE_VERSION.to_string(),
            kind: EnvelopeKind::Approval,
            approval_id: ApprovalId::new("approval-001"),
            plan_id: PlanId::new("plan-001"),
            issued_at: "2026-01-01T00:00:00Z".parse().expect("timestamp"),
            expires_at: "2026-01-01T00:01:00Z".parse().expect("timestamp"),
            human_approved: false,
            approver: "bridge".to_string(),
            payload_hash: ZERO_HASH_HEX.to_string(),
            key_id: signer.key_id().to_string(),
            signature: String::new(),
        };
        approval.signature =
            tokio_block_on(signer.sign(&approval)).expect("sign");
        approval
    }

    fn tokio_block_on<F: std::future::Future>(fut: F) -> F::Output {
        tokio::runtime::Builder::new_current_thread()
            .build()
            .expect("runtime")
            .block_on(fut)
    }

    #[test]
    fn parse_accepts_key_id_base64_pairs() {
        let spec = format!(
            "key-1={},key-2={}",
            BASE64.encode([1u8; 32]),
            BASE64.encode([2u8; 32])
        );
        let trusted = TrustedKeys::parse(&spec).expect("parse");
        assert_eq!(trusted.len(), 2);
        assert_eq!(trusted.get("key-1"), Some(&[1u8; 32]));
    }

    #[test]
    fn parse_rejects_malformed_entries() {
        assert!(TrustedKeys::parse("no-equals-sign").is_err());
        assert!(TrustedKeys::parse("key-1=@@@").is_err());
        assert!(TrustedKeys::parse(&format!("key-1={}", BASE64.encode([1u8; 16]))).is_err());
    }

    #[test]
    fn verification_succeeds_for_trusted_key() {
        let signer = LocalSigner::generate_ephemeral("key-1");
        let mut trusted = TrustedKeys::new();
        trusted.insert("key-1", signer.public_key());

        let approval = signed_approval(&signer);
        assert!(verify_approval(&approval, &trusted).is_ok());
    }

    #[test]
    fn unknown_key_id_fails_closed() {
        let signer = LocalSigner::generate_ephemeral("key-1");
        let approval = signed_approval(&signer);

        let trusted = TrustedKeys::new();
        let err = verify_approval(&approval, &trusted).expect_err("must fail");
        assert_eq!(err.code(), "signature-failure");
    }

    #[test]
    fn tampered_approval_fails_closed() {
        let signer = LocalSigner::generate_ephemeral("key-1");
        let mut trusted = TrustedKeys::new();
        trusted.insert("key-1", signer.public_key());

        let mut approval = signed_approval(&signer);
        approval.human_approved = true;
        assert!(verify_approval(&approval, &trusted).is_err());
    }
}
