use std::time::Duration;
use thiserror::Error;

/// Failure taxonomy for the chat gateway.
///
/// Input-validation variants (`UnknownAgent`, `EmptyInput`) are raised before
/// any backend call or persistence. Backend variants preserve the upstream
/// message for diagnostics. Malformed individual upstream lines are not
/// errors at this level; adapters skip them.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("invalid or missing agent: {0}")]
    UnknownAgent(String),

    #[error("missing message content")]
    EmptyInput,

    #[error("missing credential: {0} is not set")]
    MissingCredential(&'static str),

    #[error("backend unreachable: {0}")]
    BackendUnreachable(String),

    #[error("backend timed out after {0:?}")]
    BackendTimeout(Duration),

    #[error("backend error: {0}")]
    Backend(String),

    #[error("history storage: {0}")]
    Storage(String),
}

impl GatewayError {
    /// True for errors callers caused, rejected before any side effect.
    pub fn is_client_error(&self) -> bool {
        matches!(self, GatewayError::UnknownAgent(_) | GatewayError::EmptyInput)
    }
}

pub type GatewayResult<T> = Result<T, GatewayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_error_classification() {
        assert!(GatewayError::UnknownAgent("x".into()).is_client_error());
        assert!(GatewayError::EmptyInput.is_client_error());
        assert!(!GatewayError::Backend("boom".into()).is_client_error());
        assert!(!GatewayError::MissingCredential("OPENAI_API_KEY").is_client_error());
    }

    #[test]
    fn test_display_preserves_upstream_message() {
        let err = GatewayError::Backend("502 Bad Gateway: upstream said no".into());
        assert!(err.to_string().contains("upstream said no"));
    }
}
