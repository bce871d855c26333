//! Versioned schema validation for envelopes.
//!
//! Envelopes decode into typed structs (`deny_unknown_fields` enforces the
//! closed-schema rule), then semantic checks run on the typed value: ID
//! charset, timestamp sanity, string and collection bounds. Validators are
//! registered once per `(type, version)` pair; an unknown pair is an
//! `UnknownSchemaVersion` error, distinct from an invalid envelope.

use crate::envelope::{Approval, Intent, Plan, Report};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;

/// Maximum length of a description field.
const DESCRIPTION_MAX: usize = 4096;
/// Maximum number of entries in a parameters map.
const PARAMETERS_MAX: usize = 64;
/// Maximum number of steps in a plan.
const STEPS_MAX: usize = 32;
/// Maximum identifier length.
const ID_MAX: usize = 128;

/// Envelope type discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvelopeKind {
    /// Caller-submitted intent.
    Intent,
    /// Decision engine plan.
    Plan,
    /// Signed approval.
    Approval,
    /// Post-execution report.
    Report,
}

impl fmt::Display for EnvelopeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Intent => "intent",
            Self::Plan => "plan",
            Self::Approval => "approval",
            Self::Report => "report",
        };
        f.write_str(name)
    }
}

/// Outcome of validating one envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    /// Whether the envelope passed every check.
    pub valid: bool,
    /// Accumulated failures; empty when valid.
    pub errors: Vec<String>,
}

impl ValidationReport {
    fn ok() -> Self {
        Self {
            valid: true,
            errors: Vec::new(),
        }
    }

    fn failed(errors: Vec<String>) -> Self {
        Self {
            valid: false,
            errors,
        }
    }
}

/// Errors that prevent validation from running at all.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SchemaError {
    /// The envelope has no usable `type`/`version` discriminators.
    #[error("envelope is missing type or version discriminator")]
    MissingDiscriminator,

    /// No schema is registered for this `(type, version)` pair.
    #[error("unknown schema version {version} for envelope type {kind}")]
    UnknownSchemaVersion {
        /// The envelope type.
        kind: String,
        /// The unrecognized version.
        version: String,
    },
}

type Validator = fn(&Value) -> Vec<String>;

/// Registry of schema validators keyed by `(type, version)`.
///
/// Built once at startup; lookups never touch the filesystem.
pub struct SchemaRegistry {
    validators: HashMap<(EnvelopeKind, String), Validator>,
}

impl Default for SchemaRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SchemaRegistry {
    /// Build the registry with every known schema version.
    pub fn new() -> Self {
        let mut validators: HashMap<(EnvelopeKind, String), Validator> = HashMap::new();
        validators.insert((EnvelopeKind::Intent, "1".to_string()), validate_intent_v1);
        validators.insert((EnvelopeKind::Plan, "1".to_string()), validate_plan_v1);
        validators.insert(
            (EnvelopeKind::Approval, "1".to_string()),
            validate_approval_v1,
        );
        validators.insert((EnvelopeKind::Report, "1".to_string()), validate_report_v1);
        Self { validators }
    }

    /// Validate an envelope against the schema its discriminators select.
    pub fn validate(&self, value: &Value) -> Result<ValidationReport, SchemaError> {
        let kind_str = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or(SchemaError::MissingDiscriminator)?;
        let version = value
            .get("version")
            .and_then(Value::as_str)
            .ok_or(SchemaError::MissingDiscriminator)?;
        let kind: EnvelopeKind = serde_json::from_value(Value::String(kind_str.to_string()))
            .map_err(|_| SchemaError::UnknownSchemaVersion {
                kind: kind_str.to_string(),
                version: version.to_string(),
            })?;
        let validator = self
            .validators
            .get(&(kind, version.to_string()))
            .ok_or_else(|| SchemaError::UnknownSchemaVersion {
                kind: kind_str.to_string(),
                version: version.to_string(),
            })?;
        let errors = validator(value);
        Ok(if errors.is_empty() {
            ValidationReport::ok()
        } else {
            ValidationReport::failed(errors)
        })
    }
}

/// Check an identifier against the `[A-Za-z0-9._-]{1,128}` constraint.
fn check_id(field: &str, id: &str, errors: &mut Vec<String>) {
    if id.is_empty() || id.len() > ID_MAX {
        errors.push(format!("{field}: identifier length must be 1..={ID_MAX}"));
        return;
    }
    if !id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
    {
        errors.push(format!(
            "{field}: identifier contains characters outside [A-Za-z0-9._-]"
        ));
    }
}

fn validate_intent_v1(value: &Value) -> Vec<String> {
    let mut errors = Vec::new();
    let intent: Intent = match serde_json::from_value(value.clone()) {
        Ok(intent) => intent,
        Err(e) => return vec![format!("intent does not match schema: {e}")],
    };
    if intent.kind != EnvelopeKind::Intent {
        errors.push("type must be \"intent\"".to_string());
    }
    check_id("intentId", intent.intent_id.as_str(), &mut errors);
    check_id("channelId", intent.channel_id.as_str(), &mut errors);
    check_id("actor", intent.actor.as_str(), &mut errors);
    check_id("tool", &intent.tool, &mut errors);
    if intent.description.len() > DESCRIPTION_MAX {
        errors.push(format!("description exceeds {DESCRIPTION_MAX} characters"));
    }
    if intent.parameters.len() > PARAMETERS_MAX {
        errors.push(format!("parameters exceed {PARAMETERS_MAX} entries"));
    }
    errors
}

fn validate_plan_v1(value: &Value) -> Vec<String> {
    let mut errors = Vec::new();
    let plan: Plan = match serde_json::from_value(value.clone()) {
        Ok(plan) => plan,
        Err(e) => return vec![format!("plan does not match schema: {e}")],
    };
    if plan.kind != EnvelopeKind::Plan {
        errors.push("type must be \"plan\"".to_string());
    }
    check_id("planId", plan.plan_id.as_str(), &mut errors);
    check_id("intentId", plan.intent_id.as_str(), &mut errors);
    if plan.steps.is_empty() || plan.steps.len() > STEPS_MAX {
        errors.push(format!("steps must contain 1..={STEPS_MAX} entries"));
    }
    for step in &plan.steps {
        check_id("stepId", step.step_id.as_str(), &mut errors);
        check_id("step.tool", &step.tool, &mut errors);
    }
    if plan.valid_until <= plan.valid_from {
        errors.push("validUntil must be after validFrom".to_string());
    }
    errors
}

fn validate_approval_v1(value: &Value) -> Vec<String> {
    let mut errors = Vec::new();
    let approval: Approval = match serde_json::from_value(value.clone()) {
        Ok(approval) => approval,
        Err(e) => return vec![format!("approval does not match schema: {e}")],
    };
    if approval.kind != EnvelopeKind::Approval {
        errors.push("type must be \"approval\"".to_string());
    }
    check_id("approvalId", approval.approval_id.as_str(), &mut errors);
    check_id("planId", approval.plan_id.as_str(), &mut errors);
    check_id("keyId", &approval.key_id, &mut errors);
    if approval.expires_at <= approval.issued_at {
        errors.push("expiresAt must be after issuedAt".to_string());
    }
    if approval.payload_hash.len() != 64
        || !approval.payload_hash.chars().all(|c| c.is_ascii_hexdigit())
    {
        errors.push("payloadHash must be 64 hex characters".to_string());
    }
    {
        use base64::Engine;
        match base64::engine::general_purpose::STANDARD.decode(&approval.signature) {
            Ok(bytes) if bytes.len() == 64 => {}
            Ok(_) => errors.push("signature must decode to 64 bytes".to_string()),
            Err(_) => errors.push("signature is not valid base64".to_string()),
        }
    }
    errors
}

fn validate_report_v1(value: &Value) -> Vec<String> {
    let mut errors = Vec::new();
    let report: Report = match serde_json::from_value(value.clone()) {
        Ok(report) => report,
        Err(e) => return vec![format!("report does not match schema: {e}")],
    };
    if report.kind != EnvelopeKind::Report {
        errors.push("type must be \"report\"".to_string());
    }
    check_id("reportId", report.report_id.as_str(), &mut errors);
    check_id("approvalId", report.approval_id.as_str(), &mut errors);
    check_id("planId", report.plan_id.as_str(), &mut errors);
    if report.steps.is_empty() || report.steps.len() > STEPS_MAX {
        errors.push(format!("steps must contain 1..={STEPS_MAX} entries"));
    }
    errors
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn intent_value() -> Value {
        json!({
            "version": "1",
            "type": "intent",
            "intentId": "intent-001",
            "channelId": "telegram-main",
            "tool": "web_search",
            "parameters": {"query": "weather"},
            "declaredRiskLevel": "low",
            "description": "search the weather",
            "actor": "alice",
            "timestamp": "2026-01-01T00:00:00Z"
        })
    }

    #[test]
    fn valid_intent_passes() {
        let registry = SchemaRegistry::new();
        let report = registry.validate(&intent_value()).expect("schema known");
        assert!(report.valid, "errors: {:?}", report.errors);
    }

    #[test]
    fn unknown_version_is_a_distinct_error() {
        let registry = SchemaRegistry::new();
        let mut value = intent_value();
        value["version"] = json!("9");
        assert!(matches!(
            registry.validate(&value),
            Err(SchemaError::UnknownSchemaVersion { .. })
        ));
    }

    #[test]
    fn missing_discriminator_is_rejected() {
        let registry = SchemaRegistry::new();
        let value = json!({"intentId": "a"});
        assert!(matches!(
            registry.validate(&value),
            Err(SchemaError::MissingDiscriminator)
        ));
    }

    #[test]
    fn extra_fields_fail_closed_schemas() {
        let registry = SchemaRegistry::new();
        let mut value = intent_value();
        value["unexpected"] = json!(1);
        let report = registry.validate(&value).expect("schema known");
        assert!(!report.valid);
    }

    #[test]
    fn bad_identifier_charset_is_reported() {
        let registry = SchemaRegistry::new();
        let mut value = intent_value();
        value["intentId"] = json!("has spaces!");
        let report = registry.validate(&value).expect("schema known");
        assert!(!report.valid);
        assert!(report.errors.iter().any(|e| e.contains("intentId")));
    }

    #[test]
    fn bad_enum_member_is_reported() {
        let registry = SchemaRegistry::new();
        let mut value = intent_value();
        value["declaredRiskLevel"] = json!("extreme");
        let report = registry.validate(&value).expect("schema known");
        assert!(!report.valid);
    }

    #[test]
    fn bad_timestamp_is_reported() {
        let registry = SchemaRegistry::new();
        let mut value = intent_value();
        value["timestamp"] = json!("yesterday");
        let report = registry.validate(&value).expect("schema known");
        assert!(!report.valid);
    }

    #[test]
    fn approval_ttl_ordering_is_checked() {
        let registry = SchemaRegistry::new();
        let value = json!({
            "version": "1",
            "type": "approval",
            "approvalId": "approval-001",
            "planId": "plan-001",
            "issuedAt": "2026-01-01T00:01:00Z",
            "expiresAt": "2026-01-01T00:00:00Z",
            "humanApproved": false,
            "approver": "bridge",
            "payloadHash": "00".repeat(32),
            "keyId": "key-1",
            "signature": base64::Engine::encode(
                &base64::engine::general_purpose::STANDARD,
                [0u8; 64],
            )
        });
        let report = registry.validate(&value).expect("schema known");
        assert!(!report.valid);
        assert!(report
            .errors
            .iter()
            .any(|e| e.contains("expiresAt must be after issuedAt")));
    }
}
