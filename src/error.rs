//! Error types for the cash position orchestrator

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Result type alias for orchestrator operations
pub type Result<T> = std::result::Result<T, OrchestrationError>;

/// Why a language-model call failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationFailureKind {
    Authentication,
    RateLimited,
    Transient,
    Timeout,
    InvalidResponse,
}

impl GenerationFailureKind {
    /// Transient conditions the caller may retry by re-running the query.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            GenerationFailureKind::RateLimited
                | GenerationFailureKind::Transient
                | GenerationFailureKind::Timeout
        )
    }
}

impl fmt::Display for GenerationFailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            GenerationFailureKind::Authentication => "authentication",
            GenerationFailureKind::RateLimited => "rate limited",
            GenerationFailureKind::Transient => "transient",
            GenerationFailureKind::Timeout => "timeout",
            GenerationFailureKind::InvalidResponse => "invalid response",
        };
        write!(f, "{}", s)
    }
}

#[derive(Error, Debug)]
pub enum OrchestrationError {

    // =============================
    // Core Pipeline Errors
    // =============================

    #[error("Malformed input: {0}")]
    MalformedInput(String),

    #[error("Generation failed ({kind}): {message}")]
    GenerationFailed {
        kind: GenerationFailureKind,
        message: String,
    },

    #[error("Analysis error: {0}")]
    AnalysisError(String),

    #[error("Tool error: {0}")]
    ToolError(String),

    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Invalid tool input: {0}")]
    InvalidToolInput(String),

    #[error("Memory log error: {0}")]
    MemoryError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    // =============================
    // External Library Conversions
    // =============================

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl OrchestrationError {
    pub fn generation(kind: GenerationFailureKind, message: impl Into<String>) -> Self {
        OrchestrationError::GenerationFailed {
            kind,
            message: message.into(),
        }
    }

    /// Whether re-running the whole query may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            OrchestrationError::GenerationFailed { kind, .. } => kind.is_retryable(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_is_retryable() {
        let err = OrchestrationError::generation(GenerationFailureKind::Timeout, "slow model");
        assert!(err.is_retryable());
        assert!(err.to_string().contains("timeout"));
    }

    #[test]
    fn test_authentication_is_not_retryable() {
        let err = OrchestrationError::generation(GenerationFailureKind::Authentication, "denied");
        assert!(!err.is_retryable());
        assert!(!OrchestrationError::MalformedInput("x".into()).is_retryable());
    }
}
