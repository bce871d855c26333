//! # Sentinel Engine
//!
//! The decision engine maps a validated intent plus its enriched context
//! snapshot to a plan, and the replay harness re-runs recorded decisions
//! against the policy snapshot they pinned, comparing canonical bytes.
//!
//! `decide` is a pure function of `(intent, context, policy, ttl)` — no
//! clock reads, no randomness. Plan and step identifiers derive from the
//! intent and policy generation, and the validity window anchors on the
//! context's enrichment time, so a replayed decision is byte-identical to
//! the recorded one.

#![forbid(unsafe_code)]

pub mod decide;
pub mod replay;

pub use decide::{decide, TtlConfig};
pub use replay::{replay_all, ReplayDivergence, ReplayReport};
