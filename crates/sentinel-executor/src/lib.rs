//! # Sentinel Executor
//!
//! The before-execution gate that runs adjacent to a tool executor. Nothing
//! runs until the approval passes, in order: signature against the trusted
//! key set, TTL window with symmetric clock-skew tolerance, plan binding
//! (identifier and payload hash), per-step tool profile with hash pinning,
//! and the high-risk human-approval requirement.
//!
//! The gate is fail-closed: any error on the whole-approval checks rejects
//! the plan outright, and any per-step error rejects that step. Partial
//! success is permitted and fully reported.

#![forbid(unsafe_code)]

use chrono::Duration;
use sentinel_core::{
    canonical_hash_hex, Approval, Clock, Plan, PlanStep, Report, ReportId, Result, RiskBand,
    SentinelError, StepOutcome, StepStatus, EnvelopeKind, ENVELOPE_VERSION,
};
use sentinel_crypto::{verify_approval, TrustedKeys};
use sentinel_journal::AuditChain;
use sentinel_policy::{PolicySnapshot, ToolProfile};
use serde_json::json;
use std::sync::Arc;

/// Default clock-skew tolerance, seconds.
pub const DEFAULT_CLOCK_SKEW_SECS: i64 = 30;

/// Runs the tool behind an admitted step.
///
/// The sentinel never executes tools itself; deployments plug their
/// executor in here. [`NoopRunner`] marks every admitted step executed,
/// which is what the verification tests need.
pub trait ToolRunner: Send + Sync {
    /// Run one admitted step; an `Err` message marks the step failed.
    fn run(&self, step: &PlanStep) -> std::result::Result<(), String>;
}

/// Runner that performs no work and succeeds.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopRunner;

impl ToolRunner for NoopRunner {
    fn run(&self, _step: &PlanStep) -> std::result::Result<(), String> {
        Ok(())
    }
}

/// Executor-side verification gate.
pub struct ExecutorVerifier {
    trusted: TrustedKeys,
    clock: Arc<dyn Clock>,
    clock_skew: Duration,
    audit: Option<Arc<AuditChain>>,
}

impl ExecutorVerifier {
    /// Build a verifier with the default 30-second skew tolerance.
    pub fn new(trusted: TrustedKeys, clock: Arc<dyn Clock>) -> Self {
        Self {
            trusted,
            clock,
            clock_skew: Duration::seconds(DEFAULT_CLOCK_SKEW_SECS),
            audit: None,
        }
    }

    /// Override the clock-skew tolerance.
    pub fn with_clock_skew(mut self, skew: Duration) -> Self {
        self.clock_skew = skew;
        self
    }

    /// Wire an executor-side audit chain; rejections are then recorded.
    pub fn with_audit(mut self, audit: Arc<AuditChain>) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Run the whole-approval checks without executing anything.
    ///
    /// Order: signature, TTL window, plan binding, human-approval gate.
    /// The TTL window is closed: `issuedAt − skew ≤ now ≤ expiresAt + skew`.
    pub fn verify(&self, approval: &Approval, plan: &Plan) -> Result<()> {
        verify_approval(approval, &self.trusted)?;

        let now = self.clock.now();
        if now > approval.expires_at + self.clock_skew {
            return Err(SentinelError::expired(format!(
                "approval expired at {}",
                approval.expires_at.to_rfc3339()
            )));
        }
        if now < approval.issued_at - self.clock_skew {
            return Err(SentinelError::expired(format!(
                "approval is future-dated: issued at {}",
                approval.issued_at.to_rfc3339()
            )));
        }

        if approval.plan_id != plan.plan_id {
            return Err(SentinelError::policy_denial("plan-mismatch"));
        }
        let plan_hash = canonical_hash_hex(plan)
            .map_err(|e| SentinelError::signature(format!("plan canonicalization: {e}")))?;
        if plan_hash != approval.payload_hash {
            return Err(SentinelError::policy_denial("plan-mismatch"));
        }

        let needs_human = plan.requires_human_approval
            || plan.steps.iter().any(|s| s.declared_risk == RiskBand::High);
        if needs_human && !approval.human_approved {
            return Err(SentinelError::policy_denial("human-approval-required"));
        }
        Ok(())
    }

    /// Verify an approval and execute its plan's admitted steps in order.
    ///
    /// Whole-approval failures reject before any step runs; per-step
    /// failures reject that step only. Every outcome lands in the report.
    pub fn verify_and_enforce(
        &self,
        approval: &Approval,
        plan: &Plan,
        profiles: &PolicySnapshot,
        runner: &dyn ToolRunner,
    ) -> Result<Report> {
        if let Err(e) = self.verify(approval, plan) {
            self.record_rejection(approval, &e);
            return Err(e);
        }

        let deny_all = ToolProfile::deny_all();
        let mut outcomes = Vec::with_capacity(plan.steps.len());
        for step in &plan.steps {
            let profile = profiles.profile(&step.tool).unwrap_or(&deny_all);
            let outcome = if !profile.allowed {
                StepOutcome {
                    step_id: step.step_id.clone(),
                    status: StepStatus::Rejected,
                    error: Some(format!("tool {} is not allowed", step.tool)),
                }
            } else if let Some(pin) = &profile.hash_pin {
                if step.skill_hash.as_deref() == Some(pin.as_str()) {
                    self.run_step(step, runner)
                } else {
                    StepOutcome {
                        step_id: step.step_id.clone(),
                        status: StepStatus::Rejected,
                        error: Some("hash-pin-mismatch".to_string()),
                    }
                }
            } else {
                self.run_step(step, runner)
            };
            outcomes.push(outcome);
        }

        let status = Report::terminal_status(&outcomes);
        let report = Report {
            version: ENVELOPE_VERSION.to_string(),
            kind: EnvelopeKind::Report,
            report_id: ReportId::generate(),
            approval_id: approval.approval_id.clone(),
            plan_id: plan.plan_id.clone(),
            steps: outcomes,
            status,
            timestamp: self.clock.now(),
        };
        if let Some(audit) = &self.audit {
            // Executor-side audit failures must not lose the report; the
            // bridge-side chain is the durability boundary.
            if let Err(e) = audit.append(
                "execution.reported",
                json!({
                    "reportId": report.report_id.as_str(),
                    "planId": report.plan_id.as_str(),
                    "status": report.status,
                }),
                json!({}),
            ) {
                tracing::error!(error = %e, "executor audit append failed");
            }
        }
        Ok(report)
    }

    fn run_step(&self, step: &PlanStep, runner: &dyn ToolRunner) -> StepOutcome {
        match runner.run(step) {
            Ok(()) => StepOutcome {
                step_id: step.step_id.clone(),
                status: StepStatus::Executed,
                error: None,
            },
            Err(message) => StepOutcome {
                step_id: step.step_id.clone(),
                status: StepStatus::Failed,
                error: Some(message),
            },
        }
    }

    fn record_rejection(&self, approval: &Approval, error: &SentinelError) {
        let Some(audit) = &self.audit else {
            return;
        };
        let action = match error {
            SentinelError::Expired { .. } => "approval.expired.rejected",
            SentinelError::Signature { .. } => "approval.signature.rejected",
            _ => "approval.rejected",
        };
        if let Err(e) = audit.append(
            action,
            json!({
                "approvalId": approval.approval_id.as_str(),
                "planId": approval.plan_id.as_str(),
                "reason": error.to_string(),
            }),
            json!({}),
        ) {
            tracing::error!(error = %e, "executor audit append failed");
        }
    }
}
