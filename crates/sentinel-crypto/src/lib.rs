//! # Sentinel Crypto
//!
//! Ed25519 approval signing. Two backends implement [`ApprovalSigner`]:
//! a local backend that owns the private key in zeroized memory, and a KMS
//! backend that delegates signing to a remote service and never holds the
//! private key at all.
//!
//! Verification on the executor side goes through [`TrustedKeys`], a
//! read-only set of `keyId → public key` entries, so key rotation only
//! requires distributing a new trusted-key list.
//!
//! # Invariants
//!
//! - The signed message is always `canonical(approval minus signature)`;
//!   no other byte form is ever signed.
//! - `verify` fails closed: any error (unknown key, malformed signature,
//!   canonicalization failure) is a verification failure, never a panic.

#![forbid(unsafe_code)]

pub mod kms;
pub mod signer;
pub mod trusted;

pub use kms::{KmsClient, KmsError, KmsSigner, StaticKmsClient};
pub use signer::{ApprovalSigner, LocalSigner};
pub use trusted::{verify_approval, TrustedKeys};
