//! Unified error type for sentinel operations.
//!
//! One enum, one variant per failure kind from the error taxonomy. Terminal
//! kinds (validation, policy, signature, expiry) are never retried; transient
//! kinds carry an explicit retry signal; integrity failures poison the
//! surrounding component.

use serde::{Deserialize, Serialize};

/// Unified error type for all sentinel operations.
#[derive(Debug, Clone, Serialize, Deserialize, thiserror::Error)]
pub enum SentinelError {
    /// Envelope schema or semantic check failed; terminal.
    #[error("Validation failure: {message}")]
    Validation {
        /// What failed to validate.
        message: String,
    },

    /// Decision engine refused the intent; terminal.
    #[error("Policy denial: {message}")]
    PolicyDenial {
        /// Why the policy refused.
        message: String,
    },

    /// Signature verification failed or the key is unknown; terminal.
    #[error("Signature failure: {message}")]
    Signature {
        /// What went wrong during verification.
        message: String,
    },

    /// Approval is outside its TTL window; terminal.
    #[error("Expired: {message}")]
    Expired {
        /// The violated window.
        message: String,
    },

    /// A dependency is unavailable; transient, caller may retry.
    #[error("Dependency unavailable: {message}")]
    DependencyUnavailable {
        /// Which dependency and why.
        message: String,
        /// Seconds the caller should wait before retrying, when known.
        retry_after_secs: Option<u64>,
    },

    /// Audit chain verification or persistence failed; fatal.
    #[error("Integrity failure: {message}")]
    Integrity {
        /// Full internal context; never surfaced to callers verbatim.
        message: String,
    },

    /// Replay produced a plan that differs from the recorded one.
    #[error("Replay divergence: {message}")]
    ReplayDivergence {
        /// Which recorded decision diverged.
        message: String,
    },

    /// Invalid configuration at startup.
    #[error("Config error: {message}")]
    Config {
        /// Which setting is invalid.
        message: String,
    },

    /// Storage operation failed.
    #[error("Storage error: {message}")]
    Storage {
        /// What the storage layer reported.
        message: String,
    },

    /// Internal invariant violation.
    #[error("Internal error: {message}")]
    Internal {
        /// Description of the violated invariant.
        message: String,
    },
}

impl SentinelError {
    /// Create a validation failure.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Create a policy denial.
    pub fn policy_denial(message: impl Into<String>) -> Self {
        Self::PolicyDenial {
            message: message.into(),
        }
    }

    /// Create a signature failure.
    pub fn signature(message: impl Into<String>) -> Self {
        Self::Signature {
            message: message.into(),
        }
    }

    /// Create an expiry failure.
    pub fn expired(message: impl Into<String>) -> Self {
        Self::Expired {
            message: message.into(),
        }
    }

    /// Create a dependency-unavailable error without a retry hint.
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::DependencyUnavailable {
            message: message.into(),
            retry_after_secs: None,
        }
    }

    /// Create a dependency-unavailable error with a retry hint.
    pub fn unavailable_retry_after(message: impl Into<String>, retry_after_secs: u64) -> Self {
        Self::DependencyUnavailable {
            message: message.into(),
            retry_after_secs: Some(retry_after_secs),
        }
    }

    /// Create an integrity failure.
    pub fn integrity(message: impl Into<String>) -> Self {
        Self::Integrity {
            message: message.into(),
        }
    }

    /// Create a replay divergence report.
    pub fn replay_divergence(message: impl Into<String>) -> Self {
        Self::ReplayDivergence {
            message: message.into(),
        }
    }

    /// Create a config error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a storage error.
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Whether a caller may retry the failed operation.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::DependencyUnavailable { .. } | Self::Storage { .. }
        )
    }

    /// Stable error code surfaced to callers.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "validation-failure",
            Self::PolicyDenial { .. } => "policy-denial",
            Self::Signature { .. } => "signature-failure",
            Self::Expired { .. } => "expired",
            Self::DependencyUnavailable { .. } => "dependency-unavailable",
            Self::Integrity { .. } => "integrity-failure",
            Self::ReplayDivergence { .. } => "replay-divergence",
            Self::Config { .. } => "config-error",
            Self::Storage { .. } => "storage-error",
            Self::Internal { .. } => "internal-error",
        }
    }
}

/// Standard Result type for sentinel operations.
pub type Result<T> = std::result::Result<T, SentinelError>;

impl From<serde_json::Error> for SentinelError {
    fn from(err: serde_json::Error) -> Self {
        Self::validation(err.to_string())
    }
}

impl From<std::io::Error> for SentinelError {
    fn from(err: std::io::Error) -> Self {
        Self::storage(err.to_string())
    }
}

impl From<base64::DecodeError> for SentinelError {
    fn from(err: base64::DecodeError) -> Self {
        Self::validation(format!("base64 decoding error: {err}"))
    }
}

impl From<hex::FromHexError> for SentinelError {
    fn from(err: hex::FromHexError) -> Self {
        Self::validation(format!("hex decoding error: {err}"))
    }
}
