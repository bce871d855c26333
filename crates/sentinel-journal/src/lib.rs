//! # Sentinel Journal
//!
//! Two append-only logs with different trust levels:
//!
//! - [`audit::AuditChain`] — security-critical, hash-linked, fsync'd per
//!   entry, tamper-evident. A failed append aborts the surrounding
//!   operation.
//! - [`events::EventStore`] — operational history of every state
//!   transition, strictly ordered, queryable, and the substrate for
//!   deterministic replay.
//!
//! Both are single-writer; readers see a consistent prefix.

#![forbid(unsafe_code)]

pub mod audit;
pub mod events;

pub use audit::{AuditChain, AuditEntry, ChainVerification, ExportFormat};
pub use events::{Event, EventStore};
