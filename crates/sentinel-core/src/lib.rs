//! # Sentinel Core
//!
//! Foundation crate for Aureus-Sentinel: the envelope data model, canonical
//! byte serialization, schema validation, and the shared error type.
//!
//! This crate has zero dependencies on other sentinel crates. Everything that
//! signs, hashes, persists, or validates an envelope goes through the types
//! defined here, so the canonical byte form has exactly one producer.
//!
//! # Invariants
//!
//! - `canonical::to_canonical_vec` is the only serialization used on the
//!   signing and hashing paths.
//! - Envelopes are immutable once validated; mutation happens by producing a
//!   new envelope with a new identifier.
//! - All timestamps are RFC-3339 UTC.

#![forbid(unsafe_code)]

pub mod canonical;
pub mod envelope;
pub mod errors;
pub mod hash;
pub mod identifiers;
pub mod risk;
pub mod schema;
pub mod time;

pub use canonical::{canonical_hash, canonical_hash_hex, to_canonical_vec, CanonicalError};
pub use envelope::{
    Approval, ContextSnapshot, HistoryEntry, Intent, PatternFlags, Plan, PlanStep, Report,
    RiskAssessment, StepOutcome, StepStatus, ENVELOPE_VERSION,
};
pub use errors::{Result, SentinelError};
pub use hash::{sha256, sha256_hex, ZERO_HASH_HEX};
pub use identifiers::{
    ActorId, ApprovalId, ChannelId, ContextId, IntentId, PlanId, ReportId, StepId,
};
pub use risk::RiskBand;
pub use schema::{EnvelopeKind, SchemaRegistry, ValidationReport};
pub use time::{Clock, FixedClock, SystemClock};
