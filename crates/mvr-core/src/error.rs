//! Error types for the retrieval system.

use thiserror::Error;

/// Result type alias using RetrievalError.
pub type Result<T> = std::result::Result<T, RetrievalError>;

/// Errors that can occur while retrieving, fusing or reranking.
///
/// None of these are fatal to a query: the orchestrator maps each one onto a
/// degraded outcome (strategy excluded, pass-through ordering, structural
/// analysis). They surface to callers only from ingestion and setup paths.
#[derive(Error, Debug)]
pub enum RetrievalError {
    /// A single retrieval strategy failed.
    #[error("Strategy '{strategy}' failed: {message}")]
    StrategyFailed { strategy: String, message: String },

    /// An operation exceeded its time budget.
    #[error("Timeout after {millis}ms: {operation}")]
    Timeout { operation: String, millis: u64 },

    /// The LLM or query-intelligence collaborator failed.
    #[error("Provider error: {message}")]
    Provider { message: String },

    /// The relevance model could not score a batch.
    #[error("Relevance model error: {message}")]
    Relevance { message: String },

    /// The document index rejected or failed a search.
    #[error("Index error: {message}")]
    Index { message: String },

    /// Database error.
    #[error("Database error: {message}")]
    Database { message: String },

    /// Invalid argument provided.
    #[error("Invalid argument: {message}")]
    InvalidArgument { message: String },

    /// Configuration error.
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Internal error (unexpected).
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl RetrievalError {
    /// Create a strategy failure.
    pub fn strategy(strategy: impl Into<String>, message: impl Into<String>) -> Self {
        Self::StrategyFailed {
            strategy: strategy.into(),
            message: message.into(),
        }
    }

    /// Create a timeout error.
    pub fn timeout(operation: impl Into<String>, millis: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            millis,
        }
    }

    /// Create a provider error.
    pub fn provider(message: impl Into<String>) -> Self {
        Self::Provider {
            message: message.into(),
        }
    }

    /// Create a relevance model error.
    pub fn relevance(message: impl Into<String>) -> Self {
        Self::Relevance {
            message: message.into(),
        }
    }

    /// Create an index error.
    pub fn index(message: impl Into<String>) -> Self {
        Self::Index {
            message: message.into(),
        }
    }

    /// Create a database error.
    pub fn database(message: impl Into<String>) -> Self {
        Self::Database {
            message: message.into(),
        }
    }

    /// Create an invalid argument error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Get the error code for service responses.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::StrategyFailed { .. } => "STRATEGY_FAILED",
            Self::Timeout { .. } => "TIMEOUT",
            Self::Provider { .. } => "PROVIDER_ERROR",
            Self::Relevance { .. } => "RELEVANCE_ERROR",
            Self::Index { .. } => "INDEX_ERROR",
            Self::Database { .. } => "DATABASE_ERROR",
            Self::InvalidArgument { .. } => "INVALID_ARGUMENT",
            Self::Config { .. } => "CONFIG_ERROR",
            Self::Io(_) => "IO_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::Internal { .. } => "INTERNAL_ERROR",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = RetrievalError::strategy("qa_pairs", "connection reset");
        let text = err.to_string();
        assert!(text.contains("qa_pairs"));
        assert!(text.contains("connection reset"));
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(
            RetrievalError::timeout("search", 5000).error_code(),
            "TIMEOUT"
        );
        assert_eq!(
            RetrievalError::provider("quota exceeded").error_code(),
            "PROVIDER_ERROR"
        );
        assert_eq!(RetrievalError::database("locked").error_code(), "DATABASE_ERROR");
    }
}
