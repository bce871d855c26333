//! Intent → Plan decision logic.
//!
//! Contract, applied in order:
//!
//! 1. Resolve the tool's base risk from the policy snapshot; unregistered
//!    or disallowed tools are policy denials.
//! 2. Contextual adjustment: a trusted actor (trust > 0.8) using one of
//!    their common tools is downgraded one band — unless the suspicion
//!    flag fired, which blocks downgrades; a distrusted actor
//!    (trust < 0.3) is upgraded one band.
//! 3. Decompose into steps (one step per tool call); a step inherits the
//!    adjusted risk unless the profile carries a risk override.
//! 4. Human approval is required iff any step is high risk or suspicion
//!    fired. Suspicion is applied last and only ever tightens the result.
//! 5. Validity runs from the context's enrichment time for the TTL of the
//!    overall band; higher bands get stricter TTLs.

use chrono::Duration;
use sentinel_core::{
    ContextSnapshot, Intent, Plan, PlanId, PlanStep, Result, RiskAssessment, RiskBand,
    SentinelError, StepId, EnvelopeKind, ENVELOPE_VERSION,
};
use sentinel_policy::PolicySnapshot;

/// Plan TTL per risk band.
#[derive(Debug, Clone)]
pub struct TtlConfig {
    /// TTL for low-risk plans.
    pub low: Duration,
    /// TTL for medium-risk plans.
    pub medium: Duration,
    /// TTL for high-risk plans.
    pub high: Duration,
}

impl TtlConfig {
    /// Build from the `PLAN_TTL_*` second counts.
    pub fn from_secs(low: i64, medium: i64, high: i64) -> Self {
        Self {
            low: Duration::seconds(low),
            medium: Duration::seconds(medium),
            high: Duration::seconds(high),
        }
    }

    /// TTL for a band.
    pub fn for_band(&self, band: RiskBand) -> Duration {
        match band {
            RiskBand::Low => self.low,
            RiskBand::Medium => self.medium,
            RiskBand::High => self.high,
        }
    }
}

impl Default for TtlConfig {
    fn default() -> Self {
        Self::from_secs(600, 300, 60)
    }
}

/// Decide a plan for `intent` under `context` and `policy`.
///
/// Deterministic: identical inputs produce byte-identical canonical plans.
pub fn decide(
    intent: &Intent,
    context: &ContextSnapshot,
    policy: &PolicySnapshot,
    ttl: &TtlConfig,
) -> Result<Plan> {
    let profile = policy.profile(&intent.tool).ok_or_else(|| {
        SentinelError::policy_denial(format!("tool {} is not registered", intent.tool))
    })?;
    if !profile.allowed {
        return Err(SentinelError::policy_denial(format!(
            "tool {} is not allowed",
            intent.tool
        )));
    }

    let base_risk = profile.base_risk;
    let mut adjusted = base_risk;
    let mut reasons: Vec<String> = Vec::new();

    let trusted = context.trust_score > 0.8;
    let common = context.common_tools.iter().any(|t| t == &intent.tool);
    if trusted && common {
        if context.flags.suspicious {
            reasons.push("trusted-actor downgrade blocked by suspicion".to_string());
        } else {
            adjusted = adjusted.downgraded();
            reasons.push("trusted actor using a common tool".to_string());
        }
    } else if context.trust_score < 0.3 {
        adjusted = adjusted.upgraded();
        reasons.push("low trust score".to_string());
    }

    let step_risk = profile.risk_override.unwrap_or(adjusted);
    let overall = adjusted.max(step_risk);

    let suspicious = context.flags.suspicious;
    if suspicious {
        reasons.push("suspicious activity pattern".to_string());
    }
    if reasons.is_empty() {
        reasons.push("no contextual adjustment".to_string());
    }

    let plan_id = PlanId::derive(&intent.intent_id, policy.generation);
    let step = PlanStep {
        step_id: StepId::derive(&plan_id, 0),
        tool: intent.tool.clone(),
        args: intent.parameters.clone(),
        declared_risk: step_risk,
        skill_hash: profile.hash_pin.clone(),
    };

    let requires_human_approval = step_risk == RiskBand::High || suspicious;
    let valid_from = context.created_at;
    let valid_until = valid_from + ttl.for_band(overall);

    Ok(Plan {
        version: ENVELOPE_VERSION.to_string(),
        kind: EnvelopeKind::Plan,
        plan_id,
        intent_id: intent.intent_id.clone(),
        context_id: context.context_id.clone(),
        steps: vec![step],
        risk_assessment: RiskAssessment {
            base_risk,
            adjusted_risk: overall,
            reason: reasons.join("; "),
        },
        requires_human_approval,
        policy_generation: policy.generation,
        valid_from,
        valid_until,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use sentinel_core::{
        to_canonical_vec, ActorId, ChannelId, ContextId, IntentId, PatternFlags,
    };
    use sentinel_policy::{PolicyRegistry, ToolProfile};
    use std::collections::BTreeMap;

    fn tools() -> BTreeMap<String, ToolProfile> {
        let mut tools = BTreeMap::new();
        tools.insert("web_search".to_string(), ToolProfile::allowed(RiskBand::Low));
        tools.insert(
            "send_email".to_string(),
            ToolProfile::allowed(RiskBand::Medium),
        );
        tools.insert(
            "delete_data".to_string(),
            ToolProfile::allowed(RiskBand::High),
        );
        tools.insert(
            "legacy_import".to_string(),
            ToolProfile {
                base_risk: RiskBand::Low,
                allowed: false,
                hash_pin: None,
                risk_override: None,
            },
        );
        tools.insert(
            "code_executor".to_string(),
            ToolProfile::allowed(RiskBand::Medium)
                .with_hash_pin("b".repeat(64))
                .with_risk_override(RiskBand::High),
        );
        tools
    }

    fn intent(tool: &str, declared: RiskBand) -> Intent {
        Intent {
            version: ENVELOPE_VERSION.to_string(),
            kind: EnvelopeKind::Intent,
            intent_id: IntentId::new("intent-001"),
            channel_id: ChannelId::new("telegram-main"),
            tool: tool.to_string(),
            parameters: serde_json::Map::new(),
            declared_risk_level: declared,
            description: "test intent".to_string(),
            actor: ActorId::new("alice"),
            timestamp: "2026-01-01T00:00:00Z".parse().expect("timestamp"),
        }
    }

    fn context(intent: &Intent, trust: f64, common: &[&str], flags: PatternFlags) -> ContextSnapshot {
        ContextSnapshot {
            context_id: ContextId::derive(&intent.intent_id),
            intent: intent.clone(),
            history: Vec::new(),
            trust_score: trust,
            common_tools: common.iter().map(|s| s.to_string()).collect(),
            flags,
            created_at: "2026-01-01T00:00:01Z".parse().expect("timestamp"),
        }
    }

    fn suspicious_flags() -> PatternFlags {
        PatternFlags {
            rapid_requests: true,
            high_rejection_rate: false,
            many_high_risk: false,
            suspicious: true,
        }
    }

    #[test]
    fn trusted_actor_gets_downgrade_on_common_tool() {
        let registry = PolicyRegistry::new(tools());
        let intent = intent("send_email", RiskBand::Medium);
        let ctx = context(&intent, 0.9, &["send_email"], PatternFlags::default());
        let plan = decide(&intent, &ctx, &registry.snapshot(), &TtlConfig::default())
            .expect("plan");
        assert_eq!(plan.risk_assessment.base_risk, RiskBand::Medium);
        assert_eq!(plan.risk_assessment.adjusted_risk, RiskBand::Low);
        assert!(!plan.requires_human_approval);
    }

    #[test]
    fn downgrade_requires_common_tool() {
        let registry = PolicyRegistry::new(tools());
        let intent = intent("send_email", RiskBand::Medium);
        let ctx = context(&intent, 0.9, &["web_search"], PatternFlags::default());
        let plan = decide(&intent, &ctx, &registry.snapshot(), &TtlConfig::default())
            .expect("plan");
        assert_eq!(plan.risk_assessment.adjusted_risk, RiskBand::Medium);
    }

    #[test]
    fn distrusted_actor_gets_upgrade() {
        let registry = PolicyRegistry::new(tools());
        let intent = intent("send_email", RiskBand::Medium);
        let ctx = context(&intent, 0.2, &[], PatternFlags::default());
        let plan = decide(&intent, &ctx, &registry.snapshot(), &TtlConfig::default())
            .expect("plan");
        assert_eq!(plan.risk_assessment.adjusted_risk, RiskBand::High);
        assert!(plan.requires_human_approval);
    }

    #[test]
    fn upgrade_never_exceeds_high() {
        let registry = PolicyRegistry::new(tools());
        let intent = intent("delete_data", RiskBand::High);
        let ctx = context(&intent, 0.1, &[], PatternFlags::default());
        let plan = decide(&intent, &ctx, &registry.snapshot(), &TtlConfig::default())
            .expect("plan");
        assert_eq!(plan.risk_assessment.adjusted_risk, RiskBand::High);
    }

    #[test]
    fn suspicion_blocks_downgrade_and_forces_human_approval() {
        let registry = PolicyRegistry::new(tools());
        let intent = intent("send_email", RiskBand::Medium);
        let ctx = context(&intent, 0.95, &["send_email"], suspicious_flags());
        let plan = decide(&intent, &ctx, &registry.snapshot(), &TtlConfig::default())
            .expect("plan");
        assert_eq!(plan.risk_assessment.adjusted_risk, RiskBand::Medium);
        assert!(plan.requires_human_approval);
    }

    #[test]
    fn high_risk_steps_require_human_approval() {
        let registry = PolicyRegistry::new(tools());
        let intent = intent("delete_data", RiskBand::High);
        let ctx = context(&intent, 0.5, &[], PatternFlags::default());
        let plan = decide(&intent, &ctx, &registry.snapshot(), &TtlConfig::default())
            .expect("plan");
        assert!(plan.requires_human_approval);
    }

    #[test]
    fn risk_override_and_hash_pin_flow_to_the_step() {
        let registry = PolicyRegistry::new(tools());
        let intent = intent("code_executor", RiskBand::Medium);
        let ctx = context(&intent, 0.5, &[], PatternFlags::default());
        let plan = decide(&intent, &ctx, &registry.snapshot(), &TtlConfig::default())
            .expect("plan");
        assert_eq!(plan.steps[0].declared_risk, RiskBand::High);
        assert_eq!(plan.steps[0].skill_hash, Some("b".repeat(64)));
        assert!(plan.requires_human_approval);
    }

    #[test]
    fn unregistered_and_banned_tools_are_denied() {
        let registry = PolicyRegistry::new(tools());
        let unknown = intent("format_disk", RiskBand::Low);
        let ctx = context(&unknown, 0.5, &[], PatternFlags::default());
        let err = decide(&unknown, &ctx, &registry.snapshot(), &TtlConfig::default())
            .expect_err("denied");
        assert_eq!(err.code(), "policy-denial");

        let banned = intent("legacy_import", RiskBand::Low);
        let ctx = context(&banned, 0.5, &[], PatternFlags::default());
        let err = decide(&banned, &ctx, &registry.snapshot(), &TtlConfig::default())
            .expect_err("denied");
        assert_eq!(err.code(), "policy-denial");
    }

    #[test]
    fn ttl_tightens_with_risk() {
        let registry = PolicyRegistry::new(tools());
        let ttl = TtlConfig::from_secs(600, 300, 60);

        let low = intent("web_search", RiskBand::Low);
        let ctx = context(&low, 0.5, &[], PatternFlags::default());
        let plan = decide(&low, &ctx, &registry.snapshot(), &ttl).expect("plan");
        assert_eq!(plan.valid_until - plan.valid_from, Duration::seconds(600));

        let high = intent("delete_data", RiskBand::High);
        let ctx = context(&high, 0.5, &[], PatternFlags::default());
        let plan = decide(&high, &ctx, &registry.snapshot(), &ttl).expect("plan");
        assert_eq!(plan.valid_until - plan.valid_from, Duration::seconds(60));
    }

    #[test]
    fn decision_is_byte_deterministic() {
        let registry = PolicyRegistry::new(tools());
        let intent = intent("web_search", RiskBand::Low);
        let ctx = context(&intent, 0.9, &["web_search"], PatternFlags::default());
        let snapshot = registry.snapshot();
        let ttl = TtlConfig::default();

        let a = decide(&intent, &ctx, &snapshot, &ttl).expect("plan");
        let b = decide(&intent, &ctx, &snapshot, &ttl).expect("plan");
        assert_eq!(
            to_canonical_vec(&a).expect("canonical"),
            to_canonical_vec(&b).expect("canonical")
        );
    }

    #[test]
    fn plan_pins_policy_generation() {
        let registry = PolicyRegistry::new(tools());
        let intent = intent("web_search", RiskBand::Low);
        let ctx = context(&intent, 0.5, &[], PatternFlags::default());
        let first = decide(&intent, &ctx, &registry.snapshot(), &TtlConfig::default())
            .expect("plan");
        registry.reload(tools());
        let second = decide(&intent, &ctx, &registry.snapshot(), &TtlConfig::default())
            .expect("plan");
        assert_eq!(first.policy_generation, 1);
        assert_eq!(second.policy_generation, 2);
        assert_ne!(first.plan_id, second.plan_id);
    }
}
