//! Risk bands and band arithmetic.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Risk band assigned to an intent, step, or plan.
///
/// Ordered so `max` over a set of bands yields the strictest one.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum RiskBand {
    /// Routine, reversible operations.
    #[default]
    Low,
    /// Operations with meaningful side effects.
    Medium,
    /// Destructive or sensitive operations; require human approval.
    High,
}

impl RiskBand {
    /// One band stricter; saturates at `High`.
    pub fn upgraded(self) -> Self {
        match self {
            Self::Low => Self::Medium,
            Self::Medium | Self::High => Self::High,
        }
    }

    /// One band looser; saturates at `Low`.
    pub fn downgraded(self) -> Self {
        match self {
            Self::High => Self::Medium,
            Self::Medium | Self::Low => Self::Low,
        }
    }

    /// Stable lowercase name, matching the wire encoding.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

impl fmt::Display for RiskBand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RiskBand {
    type Err = crate::SentinelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            other => Err(crate::SentinelError::validation(format!(
                "unknown risk band: {other}"
            ))),
        }
    }
}
