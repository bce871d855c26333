//! Envelope types for the approval pipeline.
//!
//! Every envelope shares `{version, type, <id>, timestamp}` discriminators
//! and is validated by the schema layer before any other processing. Wire
//! format is camelCase JSON; canonical bytes come from
//! [`crate::canonical::to_canonical_vec`].
//!
//! # Invariants
//!
//! - Intents are immutable after acceptance and round-trip through
//!   canonicalization.
//! - An approval's signature is a detached Ed25519 signature over the
//!   canonical approval with the `signature` field removed.
//! - `expiresAt > issuedAt` for every approval.

use crate::canonical::{to_canonical_vec, CanonicalError};
use crate::identifiers::{
    ActorId, ApprovalId, ChannelId, ContextId, IntentId, PlanId, ReportId, StepId,
};
use crate::risk::RiskBand;
use crate::schema::EnvelopeKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Current envelope schema version.
pub const ENVELOPE_VERSION: &str = "1";

/// Caller-submitted request to perform a tool action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Intent {
    /// Schema version discriminator.
    pub version: String,
    /// Envelope type discriminator; always `intent`.
    #[serde(rename = "type")]
    pub kind: EnvelopeKind,
    /// Globally unique caller-assigned identifier.
    pub intent_id: IntentId,
    /// Ingress channel the intent arrived on.
    pub channel_id: ChannelId,
    /// Tool the caller wants to invoke.
    pub tool: String,
    /// Opaque tool parameters.
    pub parameters: Map<String, Value>,
    /// Risk level the caller declared.
    pub declared_risk_level: RiskBand,
    /// Human-readable description of the request.
    pub description: String,
    /// Identity of the requesting actor, bound by the ingress channel.
    pub actor: ActorId,
    /// Submission time, RFC-3339 UTC.
    pub timestamp: DateTime<Utc>,
}

/// One completed execution from an actor's history window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    /// Tool that was invoked.
    pub tool: String,
    /// Risk band the execution carried.
    pub risk: RiskBand,
    /// Whether the execution was approved.
    pub approved: bool,
    /// When the execution completed.
    pub at: DateTime<Utc>,
}

/// Behavioral pattern flags derived from an actor's recent window.
///
/// Inputs to the decision engine, not decisions themselves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatternFlags {
    /// More requests per minute than the profiler threshold.
    pub rapid_requests: bool,
    /// Rejection rate above one half in the window.
    pub high_rejection_rate: bool,
    /// More high-risk attempts than the profiler threshold.
    pub many_high_risk: bool,
    /// Any of the above fired.
    pub suspicious: bool,
}

/// Derived per-intent context: the intent plus the actor's recent history.
///
/// Created once per intent, persisted by ID, referenced by the plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextSnapshot {
    /// Deterministic identifier derived from the intent.
    pub context_id: ContextId,
    /// The validated intent this context enriches.
    pub intent: Intent,
    /// Recent history window for the actor.
    pub history: Vec<HistoryEntry>,
    /// Trust score in `[0, 1]` from the risk profiler.
    pub trust_score: f64,
    /// Tools the actor uses routinely.
    pub common_tools: Vec<String>,
    /// Pattern flags for the window.
    pub flags: PatternFlags,
    /// Enrichment time; the decision engine's notion of "now".
    pub created_at: DateTime<Utc>,
}

/// One step of a plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PlanStep {
    /// Identifier of this step, derived from the plan.
    pub step_id: StepId,
    /// Tool the step invokes.
    pub tool: String,
    /// Arguments forwarded to the tool.
    pub args: Map<String, Value>,
    /// Risk band the step carries after adjustment.
    pub declared_risk: RiskBand,
    /// Expected hash of the tool implementation, when the policy pins one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skill_hash: Option<String>,
}

/// Risk assessment recorded on a plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RiskAssessment {
    /// Risk resolved from the policy registry for the intent's tool.
    pub base_risk: RiskBand,
    /// Risk after contextual adjustment; the plan's overall band.
    pub adjusted_risk: RiskBand,
    /// Why the adjustment was applied.
    pub reason: String,
}

/// Decision engine output: an ordered decomposition of an intent into steps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Plan {
    /// Schema version discriminator.
    pub version: String,
    /// Envelope type discriminator; always `plan`.
    #[serde(rename = "type")]
    pub kind: EnvelopeKind,
    /// Identifier derived from the intent and policy generation.
    pub plan_id: PlanId,
    /// Intent this plan decomposes.
    pub intent_id: IntentId,
    /// Context snapshot the decision was made against.
    pub context_id: ContextId,
    /// Ordered steps; every tool must exist in the policy registry.
    pub steps: Vec<PlanStep>,
    /// Base and adjusted risk with the adjustment reason.
    pub risk_assessment: RiskAssessment,
    /// Whether a human must approve before execution.
    pub requires_human_approval: bool,
    /// Policy generation the decision observed, pinned for replay.
    pub policy_generation: u64,
    /// Start of the validity window.
    pub valid_from: DateTime<Utc>,
    /// End of the validity window; stricter for higher risk bands.
    pub valid_until: DateTime<Utc>,
}

impl Plan {
    /// The plan's overall risk band.
    pub fn overall_risk(&self) -> RiskBand {
        self.risk_assessment.adjusted_risk
    }
}

/// Signed, time-limited authorization to execute a plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Approval {
    /// Schema version discriminator.
    pub version: String,
    /// Envelope type discriminator; always `approval`.
    #[serde(rename = "type")]
    pub kind: EnvelopeKind,
    /// Unique identifier of this approval.
    pub approval_id: ApprovalId,
    /// Plan this approval binds; must reference an existing plan.
    pub plan_id: PlanId,
    /// Issue time.
    pub issued_at: DateTime<Utc>,
    /// Expiry; always after `issued_at`.
    pub expires_at: DateTime<Utc>,
    /// Whether a human approved; required when the plan demands it.
    pub human_approved: bool,
    /// Identity of the approver.
    pub approver: String,
    /// Hex SHA-256 of the bound plan's canonical bytes.
    pub payload_hash: String,
    /// Identifier of the signing key, for rotation.
    pub key_id: String,
    /// Base64 detached Ed25519 signature over the canonical approval with
    /// this field removed.
    pub signature: String,
}

impl Approval {
    /// Canonical bytes that are signed: the approval without its
    /// `signature` field.
    pub fn signing_payload(&self) -> Result<Vec<u8>, CanonicalError> {
        let mut value = serde_json::to_value(self)
            .map_err(|e| CanonicalError::Unsupported(e.to_string()))?;
        if let Some(map) = value.as_object_mut() {
            map.remove("signature");
        }
        to_canonical_vec(&value)
    }
}

/// Outcome of a single step after the executor gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    /// Step passed the gate and ran.
    Executed,
    /// Step was refused by the gate.
    Rejected,
    /// Step ran and the tool reported failure.
    Failed,
    /// Step was not attempted.
    Skipped,
}

/// Per-step outcome in a report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct StepOutcome {
    /// The step this outcome describes.
    pub step_id: StepId,
    /// What happened.
    pub status: StepStatus,
    /// Error detail for rejected or failed steps.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Post-execution record forwarded from the executor to the bridge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Report {
    /// Schema version discriminator.
    pub version: String,
    /// Envelope type discriminator; always `report`.
    #[serde(rename = "type")]
    pub kind: EnvelopeKind,
    /// Unique identifier of this report.
    pub report_id: ReportId,
    /// Approval the execution ran under.
    pub approval_id: ApprovalId,
    /// Plan that was executed.
    pub plan_id: PlanId,
    /// Per-step outcomes, in declared order.
    pub steps: Vec<StepOutcome>,
    /// Terminal status across all steps.
    pub status: StepStatus,
    /// Completion time.
    pub timestamp: DateTime<Utc>,
}

impl Report {
    /// Terminal status for a set of step outcomes: executed when all steps
    /// ran, failed when something ran and broke, rejected otherwise.
    pub fn terminal_status(steps: &[StepOutcome]) -> StepStatus {
        if steps.iter().all(|s| s.status == StepStatus::Executed) && !steps.is_empty() {
            StepStatus::Executed
        } else if steps.iter().any(|s| s.status == StepStatus::Failed) {
            StepStatus::Failed
        } else {
            StepStatus::Rejected
        }
    }
}
