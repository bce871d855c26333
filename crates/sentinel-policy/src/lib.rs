//! # Sentinel Policy
//!
//! Read-mostly registry mapping each tool to its profile: base risk,
//! allowlist membership, optional hash pin, and optional per-step risk
//! override. The registry hot-reloads behind a generation counter;
//! in-flight decisions pin the generation they observed and the plan
//! records it, so replay can resolve the exact policy it was decided
//! against.

#![forbid(unsafe_code)]

use parking_lot::RwLock;
use sentinel_core::RiskBand;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Per-tool policy entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolProfile {
    /// Risk band the tool carries before contextual adjustment.
    pub base_risk: RiskBand,
    /// Whether the tool may be executed at all.
    pub allowed: bool,
    /// Expected hash of the tool implementation, when pinned.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash_pin: Option<String>,
    /// Fixed step risk overriding the contextual adjustment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub risk_override: Option<RiskBand>,
}

impl ToolProfile {
    /// Profile for a routine allowed tool.
    pub fn allowed(base_risk: RiskBand) -> Self {
        Self {
            base_risk,
            allowed: true,
            hash_pin: None,
            risk_override: None,
        }
    }

    /// The implicit profile for tools absent from the registry:
    /// disallowed at high risk.
    pub fn deny_all() -> Self {
        Self {
            base_risk: RiskBand::High,
            allowed: false,
            hash_pin: None,
            risk_override: None,
        }
    }

    /// Attach a hash pin.
    pub fn with_hash_pin(mut self, pin: impl Into<String>) -> Self {
        self.hash_pin = Some(pin.into());
        self
    }

    /// Attach a risk override.
    pub fn with_risk_override(mut self, band: RiskBand) -> Self {
        self.risk_override = Some(band);
        self
    }
}

/// Immutable view of the policy at one generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicySnapshot {
    /// Generation counter, monotonically increasing across reloads.
    pub generation: u64,
    /// Tool registry at this generation.
    pub tools: BTreeMap<String, ToolProfile>,
}

impl PolicySnapshot {
    /// Look up the profile of a tool, if registered.
    pub fn profile(&self, tool: &str) -> Option<&ToolProfile> {
        self.tools.get(tool)
    }

    /// Whether the tool is registered and allowed.
    pub fn is_allowed(&self, tool: &str) -> bool {
        self.profile(tool).map(|p| p.allowed).unwrap_or(false)
    }
}

/// Hot-reloadable policy registry.
///
/// Readers take cheap `Arc` snapshots and never block a reload; retired
/// generations stay resolvable for replay.
pub struct PolicyRegistry {
    current: RwLock<Arc<PolicySnapshot>>,
    history: RwLock<BTreeMap<u64, Arc<PolicySnapshot>>>,
}

impl PolicyRegistry {
    /// Create the registry with an initial tool set at generation 1.
    pub fn new(tools: BTreeMap<String, ToolProfile>) -> Self {
        let snapshot = Arc::new(PolicySnapshot {
            generation: 1,
            tools,
        });
        let mut history = BTreeMap::new();
        history.insert(1, snapshot.clone());
        Self {
            current: RwLock::new(snapshot),
            history: RwLock::new(history),
        }
    }

    /// The current snapshot; in-flight decisions hold this `Arc` so a
    /// concurrent reload cannot change the policy under them.
    pub fn snapshot(&self) -> Arc<PolicySnapshot> {
        self.current.read().clone()
    }

    /// The snapshot a past decision pinned, for replay.
    pub fn snapshot_at(&self, generation: u64) -> Option<Arc<PolicySnapshot>> {
        self.history.read().get(&generation).cloned()
    }

    /// Replace the tool registry, bumping the generation.
    pub fn reload(&self, tools: BTreeMap<String, ToolProfile>) -> u64 {
        let mut current = self.current.write();
        let generation = current.generation + 1;
        let snapshot = Arc::new(PolicySnapshot { generation, tools });
        self.history.write().insert(generation, snapshot.clone());
        *current = snapshot;
        tracing::info!(generation, "tool policy reloaded");
        generation
    }
}
