use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

mod pipeline;

pub use pipeline::{FailurePhase, PipelineError};

/// A structured error payload that is serialized back to API clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppError {
    /// Machine readable error code.
    pub code: String,
    /// Human friendly message that can be shown directly to the operator.
    pub message: String,
    /// Arbitrary key/value pairs that provide additional context.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub context: HashMap<String, String>,
    /// Optional nested cause that preserves the error chain.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<Box<AppError>>,
}

pub type AppResult<T> = std::result::Result<T, AppError>;

impl AppError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        AppError {
            code: code.into(),
            message: message.into(),
            context: HashMap::new(),
            cause: None,
        }
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn context(&self) -> &HashMap<String, String> {
        &self.context
    }

    pub fn cause(&self) -> Option<&AppError> {
        self.cause.as_deref()
    }

    /// Adds a contextual key/value pair to the error.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Sets the nested cause for the error.
    pub fn with_cause(mut self, cause: impl Into<AppError>) -> Self {
        self.cause = Some(Box::new(cause.into()));
        self
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.context.is_empty() {
            write!(f, "[{}] {}", self.code, self.message)
        } else {
            write!(f, "[{}] {} ({:?})", self.code, self.message, self.context)
        }
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause
            .as_deref()
            .map(|cause| cause as &(dyn std::error::Error + 'static))
    }
}

impl From<PipelineError> for AppError {
    fn from(error: PipelineError) -> Self {
        let phase = error.phase();
        AppError::new(error.code(), error.to_string())
            .with_context("phase", phase.as_str())
            .with_context("retry_safe", error.retry_safe().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::ValidationError;

    #[test]
    fn builds_error_with_context_and_cause() {
        let error = AppError::new("BACKUP/TRANSACTION", "import rolled back")
            .with_context("table", "stores")
            .with_cause(AppError::new("DB/23505", "duplicate key"));

        assert_eq!(error.code(), "BACKUP/TRANSACTION");
        assert_eq!(error.context().get("table"), Some(&"stores".to_string()));
        let cause = error.cause().expect("cause present");
        assert_eq!(cause.message(), "duplicate key");
        assert!(error.to_string().starts_with("[BACKUP/TRANSACTION] import rolled back"));
    }

    #[test]
    fn pipeline_errors_carry_phase_and_retry_hint() {
        let app_error = AppError::from(PipelineError::Busy);
        assert_eq!(app_error.code(), "BACKUP/BUSY");
        assert_eq!(
            app_error.context().get("phase").map(String::as_str),
            Some("rejected_before_change")
        );
        assert_eq!(
            app_error.context().get("retry_safe").map(String::as_str),
            Some("true")
        );
    }

    #[test]
    fn validation_errors_keep_their_message() {
        let app_error =
            AppError::from(PipelineError::Validation(ValidationError::UnsupportedExtension));
        assert_eq!(app_error.code(), "BACKUP/VALIDATION");
        assert!(!app_error.message().is_empty());
    }

    #[test]
    fn json_shape_is_flat_struct() {
        let error = AppError::new("BACKUP/SCHEMA", "nope").with_context("table", "secrets");
        let value = serde_json::to_value(&error).expect("serialize app error");
        assert_eq!(value["code"], "BACKUP/SCHEMA");
        assert_eq!(value["context"]["table"], "secrets");
        assert!(value.get("cause").is_none());
    }
}
