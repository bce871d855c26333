//! # Sentinel Bridge
//!
//! The HTTP core of the approval pipeline. `POST /intents` validates the
//! envelope, enriches context from the actor's history, runs the decision
//! engine, signs an approval, and persists every boundary to the audit
//! chain and event store — in that order; nothing leaves the process
//! before its audit entry is durable. `POST /verify` is a stateless
//! convenience check, `GET /health` reports dependency status, and
//! `GET /audit` exports the chain.
//!
//! # Ordering guarantees
//!
//! - Per intent, all state transitions land in one total order; concurrent
//!   submissions of the same `intentId` are serialized and duplicates get
//!   the first winner's approval.
//! - The audit append precedes the wire response. A failed append aborts
//!   the request and poisons the bridge.

#![forbid(unsafe_code)]

pub mod config;
pub mod http;
pub mod service;

pub use config::BridgeConfig;
pub use http::router;
pub use service::{BridgeService, HealthStatus, VerifyOutcome};
