//! Error types for Noesis operations

/// Result type for Noesis operations
pub type Result<T> = std::result::Result<T, NoesisError>;

/// Error types for the Noesis orchestrator
#[derive(Debug, thiserror::Error)]
pub enum NoesisError {
    /// Network or IO failure while talking to the LLM
    #[error("Oracle transport error: {0}")]
    OracleTransport(String),

    /// The LLM reply could not be parsed into the declared structure
    #[error("Oracle parse error: {0}")]
    OracleParse(String),

    /// Retries exhausted without any gradable answer
    #[error("Workflow exhausted: {0}")]
    WorkflowExhausted(String),

    /// Cooperative cancellation or wall-clock timeout without a candidate
    #[error("Workflow cancelled")]
    WorkflowCancelled,

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Knowledge store ingestion or status failure
    #[error("Knowledge store error: {0}")]
    KnowledgeStore(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl NoesisError {
    /// Whether this error may succeed on a retry of the same call.
    ///
    /// Only transport failures are retryable; parse failures are handled by
    /// the workflow engine's conservative defaults instead.
    pub fn is_transient(&self) -> bool {
        matches!(self, NoesisError::OracleTransport(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(NoesisError::OracleTransport("timeout".into()).is_transient());
        assert!(!NoesisError::OracleParse("bad json".into()).is_transient());
        assert!(!NoesisError::WorkflowCancelled.is_transient());
    }

    #[test]
    fn test_error_display() {
        let err = NoesisError::WorkflowExhausted("no gradable answer".into());
        assert_eq!(err.to_string(), "Workflow exhausted: no gradable answer");
    }
}
