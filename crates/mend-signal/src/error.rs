//! Error types for the signal model

/// Errors raised while building or parsing signal model values
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignalError {
    /// Unrecognised health status
    #[error("unknown health status: '{0}'")]
    UnknownStatus(String),

    /// Unrecognised severity
    #[error("unknown severity: '{0}'")]
    UnknownSeverity(String),

    /// Unrecognised trigger kind
    #[error("unknown trigger kind: '{0}'")]
    UnknownTrigger(String),

    /// Unrecognised alarm state
    #[error("unknown alarm state: '{0}'")]
    UnknownAlarmState(String),

    /// Composite alarm expression could not be parsed
    #[error("invalid alarm expression at offset {offset}: {message}")]
    InvalidExpression {
        /// Byte offset of the offending token
        offset: usize,
        /// What was wrong
        message: String,
    },
}

impl SignalError {
    /// Create expression error at offset
    pub fn expression(offset: usize, message: impl Into<String>) -> Self {
        Self::InvalidExpression {
            offset,
            message: message.into(),
        }
    }
}
