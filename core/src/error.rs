use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    InvalidArgument,
    NotInitialized,
    NotFound,
    Computation,
    JobFailed,
    Internal,
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorCode::InvalidArgument => "INVALID_ARGUMENT",
            ErrorCode::NotInitialized => "NOT_INITIALIZED",
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::Computation => "COMPUTATION",
            ErrorCode::JobFailed => "JOB_FAILED",
            ErrorCode::Internal => "INTERNAL",
        };
        write!(f, "{}", s)
    }
}

/// Structured form of an error handed back across the service boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error_code: ErrorCode,
    pub message: String,
}

pub trait HyperrecError: std::error::Error {
    fn error_code(&self) -> ErrorCode;

    fn to_response(&self) -> ErrorResponse {
        ErrorResponse {
            error_code: self.error_code(),
            message: self.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, thiserror::Error)]
    #[error("missing thing {0}")]
    struct Missing(String);

    impl HyperrecError for Missing {
        fn error_code(&self) -> ErrorCode {
            ErrorCode::NotFound
        }
    }

    #[test]
    fn error_code_serializes_screaming_snake_case() {
        let json = serde_json::to_string(&ErrorCode::NotInitialized).unwrap();
        assert_eq!(json, "\"NOT_INITIALIZED\"");
        assert_eq!(ErrorCode::JobFailed.to_string(), "JOB_FAILED");
    }

    #[test]
    fn default_response_carries_code_and_message() {
        let response = Missing("item-9".to_string()).to_response();
        assert_eq!(response.error_code, ErrorCode::NotFound);
        assert!(response.message.contains("item-9"));
    }
}
