//! Request-level error types.

use thiserror::Error;

/// Errors that stop a request before or outside of execution.
///
/// Execution failures (non-zero exit, timeout, missing interpreter) are not
/// errors at this level; they are reported inside a normal result.
#[derive(Debug, Error)]
pub enum SandboxError {
    /// Missing, empty or malformed input.
    #[error("{0}")]
    InvalidRequest(String),

    /// The body was refused before parsing (too large, wrong content type).
    #[error("{message}")]
    UnacceptableBody { status: u16, message: String },

    /// No recipe resolves the submitted identifier.
    #[error("Unsupported language: {0}")]
    UnsupportedLanguage(String),

    /// Anything unanticipated during orchestration.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl SandboxError {
    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::InvalidRequest(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// HTTP status code for this error.
    pub const fn status_code(&self) -> u16 {
        match self {
            Self::InvalidRequest(_) | Self::UnsupportedLanguage(_) => 400,
            Self::UnacceptableBody { status, .. } => *status,
            Self::Internal(_) => 500,
        }
    }

    /// Message safe to show to the caller. Internal details stay in the logs.
    pub fn public_message(&self) -> String {
        match self {
            Self::Internal(_) => "Internal server error".to_string(),
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes() {
        assert_eq!(SandboxError::invalid_request("x").status_code(), 400);
        assert_eq!(
            SandboxError::UnsupportedLanguage("cobol".into()).status_code(),
            400
        );
        assert_eq!(SandboxError::internal("boom").status_code(), 500);
        assert_eq!(
            SandboxError::UnacceptableBody {
                status: 413,
                message: "Failed to buffer the request body".into(),
            }
            .status_code(),
            413
        );
    }

    #[test]
    fn internal_details_are_hidden() {
        let err = SandboxError::internal("semaphore closed");
        assert_eq!(err.public_message(), "Internal server error");
        assert!(err.to_string().contains("semaphore closed"));

        let err = SandboxError::UnsupportedLanguage("cobol".into());
        assert_eq!(err.public_message(), "Unsupported language: cobol");
    }
}
