//! Severity classification

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::SignalError;

/// Coarse urgency classification driving routing and escalation
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    /// Informational, nothing failed
    Info,
    /// Something failed but the system is not known to be down
    Warning,
    /// Page-worthy
    Critical,
}

impl Severity {
    /// Uppercase name used in templates and routing tables
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "INFO",
            Severity::Warning => "WARNING",
            Severity::Critical => "CRITICAL",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = SignalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "INFO" => Ok(Severity::Info),
            "WARNING" | "WARN" => Ok(Severity::Warning),
            "CRITICAL" => Ok(Severity::Critical),
            other => Err(SignalError::UnknownSeverity(other.to_string())),
        }
    }
}
