//! Result and error types for the core library

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Core library error type
///
/// These are the stage-fatal failures of the import pipeline. Row-level
/// problems (validation errors, duplicate suspects, failed writes) are data,
/// collected into `PreviewResult` / `ImportResult` instead.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Malformed CSV: {0}")]
    MalformedCsv(String),

    #[error("Invalid mapping: {0}")]
    InvalidMapping(String),

    #[error("Import session not found: {0}")]
    SessionNotFound(String),

    #[error("Import session expired: {0}")]
    SessionExpired(String),

    #[error("Import session already committed: {0}")]
    SessionAlreadyConsumed(String),

    #[error("Template not found: {0}")]
    TemplateNotFound(String),

    #[error("Account not found: {0}")]
    AccountNotFound(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create a database error
    pub fn database(msg: impl Into<String>) -> Self {
        Self::Database(msg.into())
    }

    /// Create a mapping error
    pub fn invalid_mapping(msg: impl Into<String>) -> Self {
        Self::InvalidMapping(msg.into())
    }

    /// Create a malformed CSV error
    pub fn malformed_csv(msg: impl Into<String>) -> Self {
        Self::MalformedCsv(msg.into())
    }

    /// Create an invalid request error
    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::InvalidRequest(msg.into())
    }

    /// Stable machine-readable code, used in JSON output
    pub fn code(&self) -> &'static str {
        match self {
            Error::MalformedCsv(_) => "malformed_csv",
            Error::InvalidMapping(_) => "invalid_mapping",
            Error::SessionNotFound(_) => "session_not_found",
            Error::SessionExpired(_) => "session_expired",
            Error::SessionAlreadyConsumed(_) => "session_already_consumed",
            Error::TemplateNotFound(_) => "template_not_found",
            Error::AccountNotFound(_) => "account_not_found",
            Error::InvalidRequest(_) => "invalid_request",
            Error::Database(_) => "database_error",
            Error::Config(_) => "config_error",
            Error::Io(_) => "io_error",
            Error::Json(_) => "json_error",
            Error::Other(_) => "internal_error",
        }
    }
}

/// Core library result type
pub type Result<T> = std::result::Result<T, Error>;

/// Operation result with optional context (for JSON output)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationResult<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
    pub context: Option<HashMap<String, serde_json::Value>>,
}

impl<T> OperationResult<T> {
    /// Create a successful result
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            context: None,
        }
    }

    /// Create a failed result
    pub fn fail(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
            context: None,
        }
    }

    /// Create a failed result with context
    pub fn fail_with_context(
        error: impl Into<String>,
        context: HashMap<String, serde_json::Value>,
    ) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
            context: Some(context),
        }
    }
}

impl<T> From<Result<T>> for OperationResult<T> {
    fn from(result: Result<T>) -> Self {
        match result {
            Ok(data) => Self::ok(data),
            Err(e) => {
                let mut context = HashMap::new();
                context.insert("code".to_string(), serde_json::Value::from(e.code()));
                Self::fail_with_context(e.to_string(), context)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_result_ok() {
        let result: OperationResult<i32> = OperationResult::ok(42);
        assert!(result.success);
        assert_eq!(result.data, Some(42));
        assert!(result.error.is_none());
    }

    #[test]
    fn test_operation_result_fail() {
        let result: OperationResult<i32> = OperationResult::fail("Something went wrong");
        assert!(!result.success);
        assert!(result.data.is_none());
        assert_eq!(result.error, Some("Something went wrong".to_string()));
    }

    #[test]
    fn test_from_result_carries_error_code() {
        let ok: Result<i32> = Ok(42);
        let result: OperationResult<i32> = ok.into();
        assert!(result.success);

        let err: Result<i32> = Err(Error::SessionAlreadyConsumed("abc".into()));
        let result: OperationResult<i32> = err.into();
        assert!(!result.success);
        assert!(result.error.unwrap().contains("already committed"));
        let context = result.context.unwrap();
        assert_eq!(context["code"], "session_already_consumed");
    }
}
