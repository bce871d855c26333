//! Identifier types used across the sentinel pipeline.
//!
//! Identifiers are opaque strings on the wire, unique within their type.
//! Caller-supplied identifiers (intent, channel, actor) are validated by the
//! schema layer; identifiers minted by the bridge are UUIDs, and the
//! plan/step identifiers are UUIDv5 derivations so the decision engine stays
//! deterministic under replay.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Namespace for all UUIDv5 derivations in the sentinel pipeline.
const SENTINEL_NAMESPACE: Uuid = Uuid::from_bytes([
    0x5e, 0x17, 0x1e, 0x3a, 0x9c, 0x44, 0x4b, 0x8f, 0x86, 0x0d, 0x2b, 0x51, 0xc0, 0x7a, 0xde,
    0x01,
]);

macro_rules! string_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            /// Wrap an existing identifier string.
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Borrow the identifier as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }
    };
}

string_id! {
    /// Caller-assigned identifier of an intent; globally unique per type.
    IntentId
}

string_id! {
    /// Identifier of the ingress channel an intent arrived on.
    ChannelId
}

string_id! {
    /// Identity of the actor an intent is attributed to.
    ActorId
}

string_id! {
    /// Identifier of a derived context snapshot.
    ContextId
}

string_id! {
    /// Identifier of a plan produced by the decision engine.
    PlanId
}

string_id! {
    /// Identifier of a single step within a plan.
    StepId
}

string_id! {
    /// Identifier of a signed approval.
    ApprovalId
}

string_id! {
    /// Identifier of a post-execution report.
    ReportId
}

impl ContextId {
    /// Derive the context identifier for an intent.
    ///
    /// Deterministic so a replayed enrichment produces the same identifier.
    pub fn derive(intent: &IntentId) -> Self {
        let name = format!("context:{}", intent.as_str());
        Self(Uuid::new_v5(&SENTINEL_NAMESPACE, name.as_bytes()).to_string())
    }
}

impl PlanId {
    /// Derive the plan identifier for an intent decided under a policy
    /// generation.
    ///
    /// Deterministic so replay reproduces byte-identical plans.
    pub fn derive(intent: &IntentId, policy_generation: u64) -> Self {
        let name = format!("plan:{}:{policy_generation}", intent.as_str());
        Self(Uuid::new_v5(&SENTINEL_NAMESPACE, name.as_bytes()).to_string())
    }
}

impl StepId {
    /// Derive the identifier of step `index` within a plan.
    pub fn derive(plan: &PlanId, index: usize) -> Self {
        let name = format!("step:{}:{index}", plan.as_str());
        Self(Uuid::new_v5(&SENTINEL_NAMESPACE, name.as_bytes()).to_string())
    }
}

impl ApprovalId {
    /// Mint a fresh approval identifier.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl ReportId {
    /// Mint a fresh report identifier.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}
