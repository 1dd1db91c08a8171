//! Error taxonomy for Converge.

/// Normalized error raised by a provider adapter.
///
/// Adapters translate backend-specific failures into this type so the
/// engine never has to look at a backend's own error representation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    #[error("{operation} failed: {message}")]
    Backend { operation: String, message: String },

    #[error("{operation} rejected by provider: {message}")]
    Rejected { operation: String, message: String },

    #[error("target not found: {id}")]
    TargetNotFound { id: String },

    #[error("{operation} did not complete before the deadline")]
    DeadlineExceeded { operation: String },

    #[error("malformed provider response: {0}")]
    MalformedResponse(String),
}

impl ProviderError {
    pub fn backend(operation: impl Into<String>, message: impl Into<String>) -> Self {
        ProviderError::Backend {
            operation: operation.into(),
            message: message.into(),
        }
    }

    pub fn deadline(operation: impl Into<String>) -> Self {
        ProviderError::DeadlineExceeded {
            operation: operation.into(),
        }
    }

    /// Whether the error came from running out of time rather than from the backend.
    pub fn is_deadline(&self) -> bool {
        matches!(self, ProviderError::DeadlineExceeded { .. })
    }
}

/// Result type for provider adapter calls.
pub type ProviderResult<T> = std::result::Result<T, ProviderError>;

/// Converge errors.
#[derive(Debug, thiserror::Error)]
pub enum ConvergeError {
    #[error("invalid deployment spec: {0}")]
    InvalidSpec(String),

    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for Converge operations.
pub type Result<T> = std::result::Result<T, ConvergeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_error_display_carries_backend_message() {
        let err = ProviderError::backend("CreateStack", "Template format error");
        let msg = err.to_string();
        assert!(msg.contains("CreateStack"));
        assert!(msg.contains("Template format error"));
    }

    #[test]
    fn deadline_is_distinguishable() {
        assert!(ProviderError::deadline("DescribeStacks").is_deadline());
        assert!(!ProviderError::TargetNotFound { id: "s-1".into() }.is_deadline());
    }

    #[test]
    fn converge_error_wraps_provider_error() {
        let err: ConvergeError = ProviderError::MalformedResponse("empty body".into()).into();
        assert!(err.to_string().contains("provider error"));
        assert!(err.to_string().contains("empty body"));
    }
}
