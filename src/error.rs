use aws_sdk_ssm::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use thiserror::Error;

const THROTTLING_CODES: &[&str] = &[
    "Throttling",
    "ThrottlingException",
    "ThrottledException",
    "RequestLimitExceeded",
    "TooManyRequestsException",
    "TooManyUpdates",
];

/// Failure of a single AWS API call, classified by what callers do about it.
#[derive(Debug, Clone, Error)]
pub enum ApiError {
    #[error("target is not connected: {0}")]
    TargetNotConnected(String),

    #[error("request was throttled: {0}")]
    Throttled(String),

    #[error("invocation does not exist yet: {0}")]
    InvocationNotFound(String),

    #[error("{operation} returned an incomplete response: {detail}")]
    IncompleteResponse {
        operation: &'static str,
        detail: String,
    },

    #[error("{operation} failed: {message}")]
    Service {
        operation: &'static str,
        code: Option<String>,
        message: String,
    },
}

impl ApiError {
    /// Classify an SDK error by its service error code.
    pub fn from_sdk<E, R>(operation: &'static str, err: SdkError<E, R>) -> Self
    where
        E: ProvideErrorMetadata + std::error::Error + 'static,
        R: std::fmt::Debug,
    {
        let code = err
            .as_service_error()
            .and_then(|e| e.code())
            .map(str::to_string);
        let message = format!("{}", DisplayErrorContext(&err));
        Self::from_code(operation, code, message)
    }

    pub fn from_code(operation: &'static str, code: Option<String>, message: String) -> Self {
        match code.as_deref() {
            Some("TargetNotConnected") => ApiError::TargetNotConnected(message),
            Some("InvocationDoesNotExist") => ApiError::InvocationNotFound(message),
            Some(c) if THROTTLING_CODES.contains(&c) => ApiError::Throttled(message),
            _ => ApiError::Service {
                operation,
                code,
                message,
            },
        }
    }

    pub fn incomplete(operation: &'static str, detail: impl Into<String>) -> Self {
        ApiError::IncompleteResponse {
            operation,
            detail: detail.into(),
        }
    }

    pub fn service(operation: &'static str, message: impl Into<String>) -> Self {
        ApiError::Service {
            operation,
            code: None,
            message: message.into(),
        }
    }

    pub fn is_throttling(&self) -> bool {
        matches!(self, ApiError::Throttled(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_code_classification() {
        let err = ApiError::from_code("StartSession", Some("TargetNotConnected".into()), "x".into());
        assert!(matches!(err, ApiError::TargetNotConnected(_)));

        let err = ApiError::from_code("StartSession", Some("ThrottlingException".into()), "x".into());
        assert!(err.is_throttling());

        let err = ApiError::from_code(
            "GetCommandInvocation",
            Some("InvocationDoesNotExist".into()),
            "x".into(),
        );
        assert!(matches!(err, ApiError::InvocationNotFound(_)));

        let err = ApiError::from_code("SendCommand", Some("AccessDenied".into()), "denied".into());
        match err {
            ApiError::Service { operation, code, .. } => {
                assert_eq!(operation, "SendCommand");
                assert_eq!(code.as_deref(), Some("AccessDenied"));
            }
            other => panic!("unexpected classification: {other:?}"),
        }
    }

    #[test]
    fn test_display_includes_operation() {
        let err = ApiError::incomplete("SendCommand", "missing command id");
        assert_eq!(
            err.to_string(),
            "SendCommand returned an incomplete response: missing command id"
        );
    }
}
