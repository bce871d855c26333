//! Scoped fault injection for chaos testing.
//!
//! The injector is consulted at well-defined seams (KMS call, database
//! call, external-API call). An active rule fails or stalls the call per
//! its type and probability. Call sites record every activation in the
//! audit chain, so postmortems can separate injected faults from real
//! ones. Disabled in production by default.

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use sentinel_core::{Result, SentinelError};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Injection seams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Seam {
    /// Remote KMS signing call.
    Kms,
    /// Persistence-layer call.
    Database,
    /// Third-party API call.
    ExternalApi,
}

/// Kinds of injected fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultType {
    /// The call fails outright.
    ToolFailure,
    /// The call stalls before proceeding.
    LatencySpike,
    /// The dependency reports itself unavailable.
    PartialOutage,
}

/// One injection rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaultRule {
    /// Seam the rule targets.
    pub seam: Seam,
    /// Fault to inject when the rule fires.
    pub fault_type: FaultType,
    /// Firing probability in `[0, 1]`.
    pub probability: f64,
    /// Stall duration for latency spikes, milliseconds.
    #[serde(default)]
    pub latency_ms: u64,
}

/// A fault that fired for one call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveFault {
    /// Seam that was hit.
    pub seam: Seam,
    /// Fault type that fired.
    pub fault_type: FaultType,
    /// Stall duration for latency spikes, milliseconds.
    pub latency_ms: u64,
}

/// Configurable fault injector.
pub struct FaultInjector {
    enabled: bool,
    rules: Vec<FaultRule>,
    rng: Mutex<StdRng>,
}

impl FaultInjector {
    /// Injector with no rules; every roll is a pass.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            rules: Vec::new(),
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Injector with the given rules, randomly seeded.
    pub fn new(rules: Vec<FaultRule>) -> Self {
        Self {
            enabled: true,
            rules,
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Injector with a fixed seed for deterministic chaos tests.
    pub fn with_seed(rules: Vec<FaultRule>, seed: u64) -> Self {
        Self {
            enabled: true,
            rules,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    /// Whether any rules are active.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Roll the dice for one call at `seam`.
    ///
    /// Returns the fault to apply, or `None` to proceed normally. The
    /// caller records returned faults in the audit chain.
    pub fn roll(&self, seam: Seam) -> Option<ActiveFault> {
        if !self.enabled {
            return None;
        }
        let mut rng = self.rng.lock();
        for rule in self.rules.iter().filter(|r| r.seam == seam) {
            if rng.gen_bool(rule.probability.clamp(0.0, 1.0)) {
                return Some(ActiveFault {
                    seam: rule.seam,
                    fault_type: rule.fault_type,
                    latency_ms: rule.latency_ms,
                });
            }
        }
        None
    }

    /// Apply a fault: stall for latency spikes, error otherwise.
    pub async fn apply(fault: &ActiveFault) -> Result<()> {
        match fault.fault_type {
            FaultType::LatencySpike => {
                tokio::time::sleep(Duration::from_millis(fault.latency_ms)).await;
                Ok(())
            }
            FaultType::ToolFailure => Err(SentinelError::internal(format!(
                "injected tool failure at {:?} seam",
                fault.seam
            ))),
            FaultType::PartialOutage => Err(SentinelError::unavailable(format!(
                "injected outage at {:?} seam",
                fault.seam
            ))),
        }
    }
}
