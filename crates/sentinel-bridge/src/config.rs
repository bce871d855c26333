//! Environment-driven bridge configuration.
//!
//! All settings come from the environment; parse failures are config
//! errors and map to exit code 2 at startup.

use sentinel_core::{Result, SentinelError};
use std::net::SocketAddr;
use std::path::PathBuf;

/// Bridge configuration, read once at startup.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Listen address.
    pub bind_addr: SocketAddr,
    /// Development mode permits ephemeral signing keys.
    pub development_mode: bool,
    /// Use the remote KMS signing backend.
    pub use_kms: bool,
    /// KMS key identifier, required with `use_kms`.
    pub kms_key_id: Option<String>,
    /// KMS region hint, forwarded to the client.
    pub kms_region: Option<String>,
    /// Base64 32-byte Ed25519 secret for the local backend.
    pub signer_private_key: Option<String>,
    /// Key identifier embedded in approvals signed by the local backend.
    pub signer_key_id: String,
    /// Symmetric clock-skew tolerance, seconds.
    pub clock_skew_secs: i64,
    /// Plan TTL for low-risk plans, seconds.
    pub plan_ttl_low: i64,
    /// Plan TTL for medium-risk plans, seconds.
    pub plan_ttl_medium: i64,
    /// Plan TTL for high-risk plans, seconds.
    pub plan_ttl_high: i64,
    /// Directory holding the audit chain.
    pub audit_dir: PathBuf,
    /// Directory holding the event store and execution history.
    pub event_dir: PathBuf,
    /// Comma-separated `keyId=base64` trusted verification keys.
    pub trusted_public_keys: String,
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> Result<T> {
    match env_var(name) {
        None => Ok(default),
        Some(raw) => raw
            .parse()
            .map_err(|_| SentinelError::config(format!("{name} is not a valid value: {raw}"))),
    }
}

fn env_bool(name: &str) -> bool {
    matches!(env_var(name).as_deref(), Some("true") | Some("1"))
}

impl BridgeConfig {
    /// Read the configuration from the environment.
    pub fn from_env() -> Result<Self> {
        let config = Self {
            bind_addr: env_parse("BIND_ADDR", "127.0.0.1:8080".parse().map_err(|_| {
                SentinelError::config("default bind address unparseable")
            })?)?,
            development_mode: env_bool("DEVELOPMENT_MODE"),
            use_kms: env_bool("USE_KMS"),
            kms_key_id: env_var("KMS_KEY_ID"),
            kms_region: env_var("KMS_REGION"),
            signer_private_key: env_var("SIGNER_PRIVATE_KEY"),
            signer_key_id: env_var("SIGNER_KEY_ID").unwrap_or_else(|| "local".to_string()),
            clock_skew_secs: env_parse("ALLOW_CLOCK_SKEW_SEC", 30)?,
            plan_ttl_low: env_parse("PLAN_TTL_LOW", 600)?,
            plan_ttl_medium: env_parse("PLAN_TTL_MEDIUM", 300)?,
            plan_ttl_high: env_parse("PLAN_TTL_HIGH", 60)?,
            audit_dir: env_var("AUDIT_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./data/audit")),
            event_dir: env_var("EVENT_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./data/events")),
            trusted_public_keys: env_var("TRUSTED_PUBLIC_KEYS").unwrap_or_default(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Semantic validation beyond parsing.
    pub fn validate(&self) -> Result<()> {
        if self.use_kms && self.kms_key_id.is_none() {
            return Err(SentinelError::config("USE_KMS requires KMS_KEY_ID"));
        }
        if !self.use_kms && self.signer_private_key.is_none() && !self.development_mode {
            return Err(SentinelError::config(
                "SIGNER_PRIVATE_KEY is required outside development mode",
            ));
        }
        if self.clock_skew_secs < 0 {
            return Err(SentinelError::config("ALLOW_CLOCK_SKEW_SEC must be >= 0"));
        }
        for (name, value) in [
            ("PLAN_TTL_LOW", self.plan_ttl_low),
            ("PLAN_TTL_MEDIUM", self.plan_ttl_medium),
            ("PLAN_TTL_HIGH", self.plan_ttl_high),
        ] {
            if value <= 0 {
                return Err(SentinelError::config(format!("{name} must be positive")));
            }
        }
        Ok(())
    }

    /// Configuration for tests: local ephemeral signer, temp directories.
    pub fn for_tests(audit_dir: PathBuf, event_dir: PathBuf) -> Self {
        Self {
            bind_addr: std::net::SocketAddr::from(([127, 0, 0, 1], 0)),
            development_mode: true,
            use_kms: false,
            kms_key_id: None,
            kms_region: None,
            signer_private_key: None,
            signer_key_id: "test-key".to_string(),
            clock_skew_secs: 30,
            plan_ttl_low: 600,
            plan_ttl_medium: 300,
            plan_ttl_high: 60,
            audit_dir,
            event_dir,
            trusted_public_keys: String::new(),
        }
    }
}
