//! Bridge orchestration: intent intake, decision, signing, persistence.
//!
//! The durability boundary lives here: every audit append happens before
//! the corresponding response can leave the process, and a failed append
//! aborts the request. Idempotency is keyed on `intentId` — the first
//! accepted submission wins and duplicates receive its stored outcome.

use chrono::Duration;
use parking_lot::Mutex;
use sentinel_core::{
    canonical_hash_hex, Approval, ApprovalId, Clock, ContextId, ContextSnapshot, EnvelopeKind,
    HistoryEntry, Intent, Plan, Report, Result, RiskBand, SchemaRegistry, SentinelError,
    SystemClock, ENVELOPE_VERSION,
};
use sentinel_crypto::{ApprovalSigner, KmsClient, KmsSigner, LocalSigner, TrustedKeys};
use sentinel_engine::{decide, replay_all, ReplayReport, TtlConfig};
use sentinel_executor::ExecutorVerifier;
use sentinel_journal::{AuditChain, EventStore, ExportFormat};
use sentinel_memory::{ExecutionRecord, MemoryStore, ProfilerConfig};
use sentinel_policy::{PolicyRegistry, ToolProfile};
use sentinel_reliability::{
    BreakerConfig, BreakerRegistry, CircuitBreaker, FaultInjector, Seam,
};
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::config::BridgeConfig;

/// Stored outcome of the first submission for an `intentId`.
#[derive(Debug, Clone)]
enum IdempotentOutcome {
    Approved(Box<Approval>),
    Denied { code: String, message: String },
}

#[derive(Debug, Clone)]
struct IdempotencyEntry {
    body_hash: String,
    outcome: IdempotentOutcome,
}

/// `/verify` result.
#[derive(Debug, Clone, Serialize)]
pub struct VerifyOutcome {
    /// Whether the approval verifies against the supplied plan.
    pub valid: bool,
    /// Failure reason when invalid.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// `/health` detail.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthStatus {
    /// Whether the bridge can take traffic.
    pub healthy: bool,
    /// Signer reachable.
    pub signer: bool,
    /// Audit chain accepting appends.
    pub audit: bool,
    /// Event store reachable.
    pub events: bool,
    /// Breakers currently not CLOSED.
    pub degraded_breakers: Vec<String>,
}

/// The bridge's orchestration service, shared across request handlers.
pub struct BridgeService {
    config: BridgeConfig,
    clock: Arc<dyn Clock>,
    schemas: SchemaRegistry,
    signer: Arc<dyn ApprovalSigner>,
    trusted: TrustedKeys,
    audit: Arc<AuditChain>,
    events: Arc<EventStore>,
    memory: Arc<MemoryStore>,
    policy: Arc<PolicyRegistry>,
    ttl: TtlConfig,
    breakers: Arc<BreakerRegistry>,
    kms_breaker: Arc<CircuitBreaker>,
    injector: Arc<FaultInjector>,
    idempotency: Mutex<HashMap<String, IdempotencyEntry>>,
    intent_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

/// Built-in tool registry used when no deployment policy is supplied.
pub fn default_tools() -> BTreeMap<String, ToolProfile> {
    let mut tools = BTreeMap::new();
    tools.insert("web_search".to_string(), ToolProfile::allowed(RiskBand::Low));
    tools.insert("fetch_url".to_string(), ToolProfile::allowed(RiskBand::Low));
    tools.insert(
        "send_email".to_string(),
        ToolProfile::allowed(RiskBand::Medium),
    );
    tools.insert(
        "file_write".to_string(),
        ToolProfile::allowed(RiskBand::Medium),
    );
    tools.insert(
        "code_executor".to_string(),
        ToolProfile::allowed(RiskBand::Medium),
    );
    tools.insert(
        "delete_data".to_string(),
        ToolProfile::allowed(RiskBand::High),
    );
    tools
}

impl BridgeService {
    /// Build the service from configuration with the local signing backend.
    ///
    /// `USE_KMS` deployments must construct through
    /// [`BridgeService::from_config_with_kms`] with their service client.
    pub async fn from_config(config: BridgeConfig) -> Result<Arc<Self>> {
        if config.use_kms {
            return Err(SentinelError::signature(
                "USE_KMS is set; construct the bridge with a KMS client",
            ));
        }
        let signer: Arc<dyn ApprovalSigner> = match &config.signer_private_key {
            Some(secret) => Arc::new(LocalSigner::from_base64(secret, &config.signer_key_id)?),
            None if config.development_mode => {
                Arc::new(LocalSigner::generate_ephemeral(&config.signer_key_id))
            }
            None => {
                return Err(SentinelError::signature(
                    "no signing key available outside development mode",
                ))
            }
        };
        Self::assemble(
            config,
            signer,
            Arc::new(SystemClock),
            Arc::new(PolicyRegistry::new(default_tools())),
            Arc::new(FaultInjector::disabled()),
        )
    }

    /// Build the service with a remote KMS signing backend.
    pub async fn from_config_with_kms<C: KmsClient + 'static>(
        config: BridgeConfig,
        client: C,
    ) -> Result<Arc<Self>> {
        let key_id = config
            .kms_key_id
            .clone()
            .ok_or_else(|| SentinelError::config("USE_KMS requires KMS_KEY_ID"))?;
        let signer = Arc::new(KmsSigner::connect(client, key_id).await?);
        Self::assemble(
            config,
            signer,
            Arc::new(SystemClock),
            Arc::new(PolicyRegistry::new(default_tools())),
            Arc::new(FaultInjector::disabled()),
        )
    }

    /// Assemble the service from explicit parts. Tests inject fixed
    /// clocks, custom policies, and seeded fault injectors here.
    pub fn assemble(
        config: BridgeConfig,
        signer: Arc<dyn ApprovalSigner>,
        clock: Arc<dyn Clock>,
        policy: Arc<PolicyRegistry>,
        injector: Arc<FaultInjector>,
    ) -> Result<Arc<Self>> {
        let audit = Arc::new(AuditChain::open(
            config.audit_dir.join("audit.jsonl"),
            clock.clone(),
        )?);
        let events = Arc::new(EventStore::open(
            config.event_dir.join("events.jsonl"),
            clock.clone(),
        )?);
        let memory = Arc::new(MemoryStore::open(
            config.event_dir.join("history.jsonl"),
            ProfilerConfig::default(),
        )?);

        let mut trusted = TrustedKeys::parse(&config.trusted_public_keys)?;
        // The bridge always trusts its own active key so /verify works
        // before the first rotation is distributed.
        trusted.insert(signer.key_id(), signer.public_key());

        let breakers = Arc::new(BreakerRegistry::new());
        let kms_breaker = breakers.register(CircuitBreaker::new("kms", BreakerConfig::kms()));
        breakers.register(CircuitBreaker::new("database", BreakerConfig::database()));

        let ttl = TtlConfig::from_secs(
            config.plan_ttl_low,
            config.plan_ttl_medium,
            config.plan_ttl_high,
        );

        Ok(Arc::new(Self {
            config,
            clock,
            schemas: SchemaRegistry::new(),
            signer,
            trusted,
            audit,
            events,
            memory,
            policy,
            ttl,
            breakers,
            kms_breaker,
            injector,
            idempotency: Mutex::new(HashMap::new()),
            intent_locks: Mutex::new(HashMap::new()),
        }))
    }

    /// The audit chain, for startup verification and tests.
    pub fn audit(&self) -> &Arc<AuditChain> {
        &self.audit
    }

    /// The event store.
    pub fn events(&self) -> &Arc<EventStore> {
        &self.events
    }

    /// The policy registry.
    pub fn policy(&self) -> &Arc<PolicyRegistry> {
        &self.policy
    }

    /// The trusted key set the bridge verifies against.
    pub fn trusted_keys(&self) -> &TrustedKeys {
        &self.trusted
    }

    async fn lock_intent(&self, intent_id: &str) -> tokio::sync::OwnedMutexGuard<()> {
        let lock = self
            .intent_locks
            .lock()
            .entry(intent_id.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone();
        lock.lock_owned().await
    }

    /// Handle `POST /intents`.
    ///
    /// Audit entries land at every boundary (`intent.received`,
    /// `plan.generated`, `approval.issued` / `approval.denied`) and the
    /// issued approval is durable before it is returned.
    pub async fn submit_intent(&self, body: Value) -> Result<Approval> {
        let report = self
            .schemas
            .validate(&body)
            .map_err(|e| SentinelError::validation(e.to_string()))?;
        if !report.valid {
            return Err(SentinelError::validation(report.errors.join("; ")));
        }
        let intent: Intent = serde_json::from_value(body.clone())?;
        let body_hash = canonical_hash_hex(&body)
            .map_err(|e| SentinelError::validation(format!("canonicalization failed: {e}")))?;

        // Serialize concurrent submissions of the same intent.
        let _guard = self.lock_intent(intent.intent_id.as_str()).await;

        if let Some(entry) = self.idempotency.lock().get(intent.intent_id.as_str()) {
            if entry.body_hash != body_hash {
                return Err(SentinelError::validation(format!(
                    "intentId {} was already used with a different body",
                    intent.intent_id
                )));
            }
            return match &entry.outcome {
                IdempotentOutcome::Approved(approval) => Ok((**approval).clone()),
                IdempotentOutcome::Denied { code, message } => Err(match code.as_str() {
                    "policy-denial" => SentinelError::policy_denial(message.clone()),
                    _ => SentinelError::validation(message.clone()),
                }),
            };
        }

        tracing::info!(intent_id = %intent.intent_id, tool = %intent.tool, "intent received");

        self.audit_boundary(
            "intent.received",
            json!({"intentId": intent.intent_id.as_str(), "tool": intent.tool}),
            &intent,
        )?;
        self.record_event("intent.accepted", &intent.intent_id.0, None, &intent)?;

        let context = self.enrich(&intent);
        self.record_event(
            "context.created",
            &intent.intent_id.0,
            None,
            &context,
        )?;

        let policy = self.policy.snapshot();
        let plan = match decide(&intent, &context, &policy, &self.ttl) {
            Ok(plan) => plan,
            Err(e) => {
                return Err(self.deny(&intent, body_hash, None, e)?);
            }
        };

        self.audit_boundary(
            "plan.generated",
            json!({
                "planId": plan.plan_id.as_str(),
                "intentId": intent.intent_id.as_str(),
                "adjustedRisk": plan.risk_assessment.adjusted_risk,
                "requiresHumanApproval": plan.requires_human_approval,
            }),
            &intent,
        )?;
        self.record_event(
            "plan.created",
            &intent.intent_id.0,
            Some(&plan.plan_id.0),
            &plan,
        )?;

        if plan.requires_human_approval {
            // No human is present on this path; the approval cannot
            // carry humanApproved=true, so the intent is denied.
            let denial = SentinelError::policy_denial("human-approval-required");
            return Err(self.deny(&intent, body_hash, Some(&plan), denial)?);
        }

        let approval = self.issue_approval(&plan).await?;
        self.audit_boundary(
            "approval.issued",
            json!({
                "approvalId": approval.approval_id.as_str(),
                "planId": plan.plan_id.as_str(),
                "intentId": intent.intent_id.as_str(),
                "expiresAt": approval.expires_at.to_rfc3339(),
            }),
            &intent,
        )?;
        self.record_event(
            "approval.issued",
            &intent.intent_id.0,
            Some(&plan.plan_id.0),
            &approval,
        )?;

        self.idempotency.lock().insert(
            intent.intent_id.as_str().to_string(),
            IdempotencyEntry {
                body_hash,
                outcome: IdempotentOutcome::Approved(Box::new(approval.clone())),
            },
        );
        Ok(approval)
    }

    /// Derive the context snapshot for an intent from the actor's history.
    fn enrich(&self, intent: &Intent) -> ContextSnapshot {
        let now = self.clock.now();
        let profile = self.memory.risk_profile(&intent.actor);
        let flags = self.memory.pattern_flags(&intent.actor, now);
        let history = self
            .memory
            .user_history(&intent.actor, self.memory.window(), now)
            .into_iter()
            .map(|r| HistoryEntry {
                tool: r.tool,
                risk: r.risk,
                approved: r.approved,
                at: r.at,
            })
            .collect();
        ContextSnapshot {
            context_id: ContextId::derive(&intent.intent_id),
            intent: intent.clone(),
            history,
            trust_score: profile.trust_score,
            common_tools: profile.common_tools,
            flags,
            created_at: now,
        }
    }

    async fn issue_approval(&self, plan: &Plan) -> Result<Approval> {
        let now = self.clock.now();
        let mut approval = Approval {
            version: ENVELOPE_VERSION.to_string(),
            kind: EnvelopeKind::Approval,
            approval_id: ApprovalId::generate(),
            plan_id: plan.plan_id.clone(),
            issued_at: now,
            expires_at: plan.valid_until.max(now + Duration::seconds(1)),
            human_approved: false,
            approver: "bridge".to_string(),
            payload_hash: canonical_hash_hex(plan)
                .map_err(|e| SentinelError::internal(format!("plan canonicalization: {e}")))?,
            key_id: self.signer.key_id().to_string(),
            signature: String::new(),
        };

        approval.signature = if self.config.use_kms {
            let fault = self.injector.roll(Seam::Kms);
            if let Some(fault) = &fault {
                self.audit.append(
                    "fault.injected",
                    serde_json::to_value(fault)?,
                    json!({"planId": plan.plan_id.as_str()}),
                )?;
            }
            let signer = self.signer.clone();
            let unsigned = approval.clone();
            // The fault fires inside the breaker-wrapped call so the
            // breaker sees it as a dependency failure.
            self.kms_breaker
                .call(move || async move {
                    if let Some(fault) = &fault {
                        FaultInjector::apply(fault).await?;
                    }
                    signer.sign(&unsigned).await
                })
                .await
                .map_err(|e| e.into_sentinel())?
        } else {
            self.signer.sign(&approval).await?
        };
        Ok(approval)
    }

    /// Deny path: audit, event, execution record, idempotency store.
    ///
    /// Returns the error to surface so callers can `return Err(...)` it.
    fn deny(
        &self,
        intent: &Intent,
        body_hash: String,
        plan: Option<&Plan>,
        error: SentinelError,
    ) -> Result<SentinelError> {
        self.audit_boundary(
            "approval.denied",
            json!({
                "intentId": intent.intent_id.as_str(),
                "planId": plan.map(|p| p.plan_id.as_str().to_string()),
                "reason": error.to_string(),
            }),
            intent,
        )?;
        self.record_event("approval.denied", &intent.intent_id.0, None, &json!({
            "reason": error.to_string(),
        }))?;
        self.memory.record(ExecutionRecord {
            actor: intent.actor.clone(),
            tool: intent.tool.clone(),
            risk: plan
                .map(|p| p.risk_assessment.adjusted_risk)
                .unwrap_or(intent.declared_risk_level),
            approved: false,
            at: self.clock.now(),
        })?;
        self.idempotency.lock().insert(
            intent.intent_id.as_str().to_string(),
            IdempotencyEntry {
                body_hash,
                outcome: IdempotentOutcome::Denied {
                    code: error.code().to_string(),
                    message: match &error {
                        SentinelError::PolicyDenial { message } => message.clone(),
                        other => other.to_string(),
                    },
                },
            },
        );
        Ok(error)
    }

    /// Handle `POST /verify`: stateless approval/plan check.
    pub fn verify(&self, approval: &Approval, plan: &Plan) -> VerifyOutcome {
        let verifier = ExecutorVerifier::new(self.trusted.clone(), self.clock.clone())
            .with_clock_skew(Duration::seconds(self.config.clock_skew_secs));
        match verifier.verify(approval, plan) {
            Ok(()) => VerifyOutcome {
                valid: true,
                reason: None,
            },
            Err(e) => VerifyOutcome {
                valid: false,
                reason: Some(match e {
                    SentinelError::PolicyDenial { message } => message,
                    other => other.to_string(),
                }),
            },
        }
    }

    /// Ingest a post-execution report forwarded by an executor.
    pub fn ingest_report(&self, report: Report) -> Result<()> {
        let plan_events = self
            .events
            .query_correlated("planId", report.plan_id.as_str());
        let plan: Option<Plan> = plan_events
            .iter()
            .filter(|e| e.kind == "plan.created")
            .filter_map(|e| e.body.get("envelope"))
            .filter_map(|v| serde_json::from_value(v.clone()).ok())
            .next();
        let Some(plan) = plan else {
            return Err(SentinelError::validation(format!(
                "report references unknown plan {}",
                report.plan_id
            )));
        };

        self.audit.append(
            "report.received",
            json!({
                "reportId": report.report_id.as_str(),
                "planId": report.plan_id.as_str(),
                "status": report.status,
            }),
            json!({"intentId": plan.intent_id.as_str()}),
        )?;
        self.record_event(
            "report.received",
            &plan.intent_id.0,
            Some(&report.plan_id.0),
            &report,
        )?;

        let intent: Option<Intent> = self
            .events
            .query_correlated("intentId", plan.intent_id.as_str())
            .iter()
            .filter(|e| e.kind == "intent.accepted")
            .filter_map(|e| e.body.get("envelope"))
            .filter_map(|v| serde_json::from_value(v.clone()).ok())
            .next();
        if let Some(intent) = intent {
            self.memory.record(ExecutionRecord {
                actor: intent.actor,
                tool: intent.tool,
                risk: plan.risk_assessment.adjusted_risk,
                approved: report.status == sentinel_core::StepStatus::Executed,
                at: self.clock.now(),
            })?;
        }
        Ok(())
    }

    /// Handle `GET /health`.
    pub fn health(&self) -> HealthStatus {
        let audit_ok = self.audit.healthy();
        let events_ok = self.events.healthy();
        let signer_ok = !self.signer.key_id().is_empty();
        HealthStatus {
            healthy: audit_ok && events_ok && signer_ok,
            signer: signer_ok,
            audit: audit_ok,
            events: events_ok,
            degraded_breakers: self.breakers.degraded(),
        }
    }

    /// Handle `GET /audit`.
    pub fn export_audit(&self, since: u64, format: ExportFormat) -> Result<String> {
        self.audit.export(since, format)
    }

    /// Replay every recorded decision; divergences are reported, never
    /// fatal to live traffic.
    pub fn replay(&self) -> Result<ReplayReport> {
        replay_all(&self.events, &self.policy, &self.ttl)
    }

    fn audit_boundary(&self, action: &str, payload: Value, intent: &Intent) -> Result<()> {
        self.audit
            .append(
                action,
                payload,
                json!({
                    "actor": intent.actor.as_str(),
                    "channelId": intent.channel_id.as_str(),
                }),
            )
            .map(|_| ())
    }

    fn record_event<T: Serialize>(
        &self,
        kind: &str,
        intent_id: &str,
        plan_id: Option<&str>,
        envelope: &T,
    ) -> Result<()> {
        let mut body = json!({
            "intentId": intent_id,
            "envelope": serde_json::to_value(envelope)?,
        });
        if let Some(plan_id) = plan_id {
            body["planId"] = json!(plan_id);
        }
        self.events.append(kind, body).map(|_| ())
    }
}
