//! Error types for Mail Assist.

use std::time::Duration;

/// Top-level error type for the crate.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Completion error: {0}")]
    Completion(#[from] CompletionError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Store-related errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Failed to open database: {0}")]
    Open(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Completion call failures.
///
/// The first three kinds are transient and eligible for retry; the last two
/// are terminal and must be returned after a single attempt.
#[derive(Debug, thiserror::Error)]
pub enum CompletionError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Completion timed out after {0:?}")]
    Timeout(Duration),

    #[error("Blocked by safety filters: {0}")]
    SafetyBlocked(String),

    #[error("Malformed request: {0}")]
    MalformedRequest(String),
}

impl CompletionError {
    /// Whether another attempt may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Network(_) | Self::RateLimited(_) | Self::Timeout(_)
        )
    }

    /// Stable failure-kind label for logs and the processing log.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Network(_) => "transient_network",
            Self::RateLimited(_) => "rate_limited",
            Self::Timeout(_) => "timeout",
            Self::SafetyBlocked(_) => "safety_blocked",
            Self::MalformedRequest(_) => "malformed_request",
        }
    }
}

/// Pipeline-related errors.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("No active prompt for operation '{operation}'")]
    NoActivePrompt { operation: String },

    #[error("{count} active prompts for operation '{operation}', expected exactly one")]
    AmbiguousPrompts { operation: String, count: usize },

    #[error("Completion failed: {0}")]
    Completion(#[from] CompletionError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl PipelineError {
    /// Prompt-configuration failures, detected before any completion call.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::NoActivePrompt { .. } | Self::AmbiguousPrompts { .. }
        )
    }
}

/// Result type alias for the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_kinds_are_retryable() {
        assert!(CompletionError::Network("connection reset".into()).is_retryable());
        assert!(CompletionError::RateLimited("quota".into()).is_retryable());
        assert!(CompletionError::Timeout(Duration::from_secs(30)).is_retryable());
    }

    #[test]
    fn terminal_kinds_are_not_retryable() {
        assert!(!CompletionError::SafetyBlocked("blocked".into()).is_retryable());
        assert!(!CompletionError::MalformedRequest("bad key".into()).is_retryable());
    }

    #[test]
    fn kind_labels_are_stable() {
        assert_eq!(CompletionError::Network("x".into()).kind(), "transient_network");
        assert_eq!(CompletionError::RateLimited("x".into()).kind(), "rate_limited");
        assert_eq!(
            CompletionError::Timeout(Duration::from_secs(1)).kind(),
            "timeout"
        );
        assert_eq!(
            CompletionError::SafetyBlocked("x".into()).kind(),
            "safety_blocked"
        );
        assert_eq!(
            CompletionError::MalformedRequest("x".into()).kind(),
            "malformed_request"
        );
    }

    #[test]
    fn configuration_errors_are_flagged() {
        let missing = PipelineError::NoActivePrompt {
            operation: "categorization".into(),
        };
        let ambiguous = PipelineError::AmbiguousPrompts {
            operation: "categorization".into(),
            count: 2,
        };
        assert!(missing.is_configuration());
        assert!(ambiguous.is_configuration());
        assert!(!PipelineError::Store(StoreError::Query("x".into())).is_configuration());
        assert!(
            !PipelineError::Completion(CompletionError::Network("x".into())).is_configuration()
        );
    }
}
