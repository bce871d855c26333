//! Deterministic replay of recorded decisions.
//!
//! For every recorded plan, the harness looks up the context snapshot it
//! was decided against and the policy snapshot its generation pins,
//! re-runs the decision engine, and compares canonical bytes. Signatures
//! are not re-checked here — approvals carry fresh identifiers and
//! timestamps — replay compares the plan layer only. A divergence is
//! reported with both serializations for diffing; it never interrupts
//! live traffic.

use sentinel_core::{to_canonical_vec, ContextSnapshot, Plan, Result, SentinelError};
use sentinel_journal::EventStore;
use sentinel_policy::PolicyRegistry;
use serde::{Deserialize, Serialize};

use crate::decide::{decide, TtlConfig};

/// Event types the bridge records and replay consumes.
pub const EVENT_CONTEXT_CREATED: &str = "context.created";
/// Plan event type.
pub const EVENT_PLAN_CREATED: &str = "plan.created";

/// One non-matching replayed decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayDivergence {
    /// Plan that failed to reproduce.
    pub plan_id: String,
    /// Canonical JSON recorded at decision time.
    pub recorded: String,
    /// Canonical JSON the replay produced.
    pub replayed: String,
}

/// Outcome of replaying a recorded event stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayReport {
    /// Number of recorded plans checked.
    pub checked: u64,
    /// Plans skipped because their context or policy generation is gone.
    pub skipped: u64,
    /// Every divergence found.
    pub divergences: Vec<ReplayDivergence>,
}

impl ReplayReport {
    /// Whether every checked decision reproduced exactly.
    pub fn is_clean(&self) -> bool {
        self.divergences.is_empty()
    }
}

fn envelope_of<T: for<'de> Deserialize<'de>>(event: &sentinel_journal::Event) -> Result<T> {
    let envelope = event
        .body
        .get("envelope")
        .ok_or_else(|| SentinelError::internal("event body has no envelope"))?;
    serde_json::from_value(envelope.clone())
        .map_err(|e| SentinelError::internal(format!("recorded envelope unparseable: {e}")))
}

/// Replay every recorded plan in `events` against `policies`.
pub fn replay_all(
    events: &EventStore,
    policies: &PolicyRegistry,
    ttl: &TtlConfig,
) -> Result<ReplayReport> {
    let mut report = ReplayReport {
        checked: 0,
        skipped: 0,
        divergences: Vec::new(),
    };

    for plan_event in events.query_kind(EVENT_PLAN_CREATED) {
        let recorded: Plan = envelope_of(&plan_event)?;
        let intent_id = recorded.intent_id.as_str();

        let context = events
            .query_correlated("intentId", intent_id)
            .into_iter()
            .filter(|e| e.kind == EVENT_CONTEXT_CREATED)
            .map(|e| envelope_of::<ContextSnapshot>(&e))
            .next()
            .transpose()?;
        let Some(context) = context else {
            tracing::warn!(intent_id, "replay skipped: no recorded context");
            report.skipped += 1;
            continue;
        };
        let Some(policy) = policies.snapshot_at(recorded.policy_generation) else {
            tracing::warn!(
                intent_id,
                generation = recorded.policy_generation,
                "replay skipped: policy generation not resolvable"
            );
            report.skipped += 1;
            continue;
        };

        let replayed = decide(&context.intent, &context, &policy, ttl)?;
        report.checked += 1;

        let recorded_bytes = to_canonical_vec(&recorded)
            .map_err(|e| SentinelError::internal(format!("canonicalize recorded plan: {e}")))?;
        let replayed_bytes = to_canonical_vec(&replayed)
            .map_err(|e| SentinelError::internal(format!("canonicalize replayed plan: {e}")))?;
        if recorded_bytes != replayed_bytes {
            let error = SentinelError::replay_divergence(format!(
                "plan {} did not reproduce",
                recorded.plan_id
            ));
            tracing::warn!(error = %error, "deterministic replay failure");
            report.divergences.push(ReplayDivergence {
                plan_id: recorded.plan_id.as_str().to_string(),
                recorded: String::from_utf8_lossy(&recorded_bytes).into_owned(),
                replayed: String::from_utf8_lossy(&replayed_bytes).into_owned(),
            });
        }
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sentinel_core::{
        ActorId, ChannelId, Clock, ContextId, EnvelopeKind, FixedClock, Intent, IntentId,
        PatternFlags, RiskBand, ENVELOPE_VERSION,
    };
    use sentinel_policy::ToolProfile;
    use serde_json::json;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    fn fixed_clock() -> Arc<dyn Clock> {
        Arc::new(FixedClock::new(
            "2026-01-01T00:00:00Z".parse().expect("timestamp"),
        ))
    }

    fn registry() -> PolicyRegistry {
        let mut tools = BTreeMap::new();
        tools.insert("web_search".to_string(), ToolProfile::allowed(RiskBand::Low));
        PolicyRegistry::new(tools)
    }

    fn sample_intent(id: &str) -> Intent {
        Intent {
            version: ENVELOPE_VERSION.to_string(),
            kind: EnvelopeKind::Intent,
            intent_id: IntentId::new(id),
            channel_id: ChannelId::new("telegram-main"),
            tool: "web_search".to_string(),
            parameters: serde_json::Map::new(),
            declared_risk_level: RiskBand::Low,
            description: "search".to_string(),
            actor: ActorId::new("alice"),
            timestamp: "2026-01-01T00:00:00Z".parse().expect("timestamp"),
        }
    }

    fn sample_context(intent: &Intent) -> ContextSnapshot {
        ContextSnapshot {
            context_id: ContextId::derive(&intent.intent_id),
            intent: intent.clone(),
            history: Vec::new(),
            trust_score: 0.9,
            common_tools: vec!["web_search".to_string()],
            flags: PatternFlags::default(),
            created_at: "2026-01-01T00:00:01Z".parse().expect("timestamp"),
        }
    }

    fn record_decision(events: &EventStore, context: &ContextSnapshot, plan: &Plan) {
        events
            .append(
                EVENT_CONTEXT_CREATED,
                json!({
                    "intentId": context.intent.intent_id.as_str(),
                    "envelope": serde_json::to_value(context).expect("context"),
                }),
            )
            .expect("append");
        events
            .append(
                EVENT_PLAN_CREATED,
                json!({
                    "intentId": plan.intent_id.as_str(),
                    "planId": plan.plan_id.as_str(),
                    "envelope": serde_json::to_value(plan).expect("plan"),
                }),
            )
            .expect("append");
    }

    #[test]
    fn faithful_recording_replays_clean() {
        let dir = tempfile::tempdir().expect("tempdir");
        let events = EventStore::open(dir.path().join("events.jsonl"), fixed_clock()).expect("open");
        let policies = registry();
        let ttl = TtlConfig::default();

        for n in 0..3 {
            let intent = sample_intent(&format!("intent-{n}"));
            let context = sample_context(&intent);
            let plan =
                decide(&intent, &context, &policies.snapshot(), &ttl).expect("plan");
            record_decision(&events, &context, &plan);
        }

        let report = replay_all(&events, &policies, &ttl).expect("replay");
        assert_eq!(report.checked, 3);
        assert_eq!(report.skipped, 0);
        assert!(report.is_clean());
    }

    #[test]
    fn tampered_recording_diverges() {
        let dir = tempfile::tempdir().expect("tempdir");
        let events = EventStore::open(dir.path().join("events.jsonl"), fixed_clock()).expect("open");
        let policies = registry();
        let ttl = TtlConfig::default();

        let intent = sample_intent("intent-1");
        let context = sample_context(&intent);
        let mut plan = decide(&intent, &context, &policies.snapshot(), &ttl).expect("plan");
        // Falsify the recorded decision.
        plan.requires_human_approval = true;
        record_decision(&events, &context, &plan);

        let report = replay_all(&events, &policies, &ttl).expect("replay");
        assert_eq!(report.checked, 1);
        assert_eq!(report.divergences.len(), 1);
        let divergence = &report.divergences[0];
        assert!(divergence.recorded.contains("\"requiresHumanApproval\":true"));
        assert!(divergence.replayed.contains("\"requiresHumanApproval\":false"));
    }

    #[test]
    fn replay_uses_the_pinned_policy_generation() {
        let dir = tempfile::tempdir().expect("tempdir");
        let events = EventStore::open(dir.path().join("events.jsonl"), fixed_clock()).expect("open");
        let policies = registry();
        let ttl = TtlConfig::default();

        let intent = sample_intent("intent-1");
        let context = sample_context(&intent);
        let plan = decide(&intent, &context, &policies.snapshot(), &ttl).expect("plan");
        record_decision(&events, &context, &plan);

        // A later reload must not affect the replayed decision.
        let mut stricter = BTreeMap::new();
        stricter.insert(
            "web_search".to_string(),
            ToolProfile::allowed(RiskBand::High),
        );
        policies.reload(stricter);

        let report = replay_all(&events, &policies, &ttl).expect("replay");
        assert!(report.is_clean());
    }

    #[test]
    fn missing_context_is_skipped_not_fatal() {
        let dir = tempfile::tempdir().expect("tempdir");
        let events = EventStore::open(dir.path().join("events.jsonl"), fixed_clock()).expect("open");
        let policies = registry();
        let ttl = TtlConfig::default();

        let intent = sample_intent("intent-1");
        let context = sample_context(&intent);
        let plan = decide(&intent, &context, &policies.snapshot(), &ttl).expect("plan");
        events
            .append(
                EVENT_PLAN_CREATED,
                json!({
                    "intentId": plan.intent_id.as_str(),
                    "planId": plan.plan_id.as_str(),
                    "envelope": serde_json::to_value(&plan).expect("plan"),
                }),
            )
            .expect("append");

        let report = replay_all(&events, &policies, &ttl).expect("replay");
        assert_eq!(report.checked, 0);
        assert_eq!(report.skipped, 1);
    }
}
