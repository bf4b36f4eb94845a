use serde::Serialize;
use thiserror::Error;

use crate::artifact::sniff::SniffError;
use crate::artifact::ValidationError;
use crate::import::execute::ExecutionError;
use crate::import::validator::SchemaViolation;
use crate::native::NativeToolError;

/// Whether a failure happened before the target store could have changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePhase {
    RejectedBeforeChange,
    FailedDuringOperation,
}

impl FailurePhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailurePhase::RejectedBeforeChange => "rejected_before_change",
            FailurePhase::FailedDuringOperation => "failed_during_operation",
        }
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Format(#[from] SniffError),
    #[error(transparent)]
    Schema(#[from] SchemaViolation),
    #[error("{tool} failed: {reason}")]
    Subprocess { tool: &'static str, reason: String },
    #[error("{tool} did not finish within {timeout_ms} ms and was terminated")]
    Timeout { tool: &'static str, timeout_ms: u64 },
    #[error(transparent)]
    Transaction(#[from] ExecutionError),
    #[error("another backup or import operation is already running")]
    Busy,
    #[error("backup artifact not found")]
    NotFound,
    #[error("internal error: {0}")]
    Internal(String),
}

impl PipelineError {
    pub fn code(&self) -> &'static str {
        match self {
            PipelineError::Validation(_) => "BACKUP/VALIDATION",
            PipelineError::Format(_) => "BACKUP/FORMAT",
            PipelineError::Schema(_) => "BACKUP/SCHEMA",
            PipelineError::Subprocess { .. } => "BACKUP/SUBPROCESS",
            PipelineError::Timeout { .. } => "BACKUP/TIMEOUT",
            PipelineError::Transaction(_) => "BACKUP/TRANSACTION",
            PipelineError::Busy => "BACKUP/BUSY",
            PipelineError::NotFound => "BACKUP/NOT_FOUND",
            PipelineError::Internal(_) => "BACKUP/INTERNAL",
        }
    }

    pub fn phase(&self) -> FailurePhase {
        match self {
            PipelineError::Validation(_)
            | PipelineError::Format(_)
            | PipelineError::Schema(_)
            | PipelineError::Busy
            | PipelineError::NotFound => FailurePhase::RejectedBeforeChange,
            PipelineError::Subprocess { .. }
            | PipelineError::Timeout { .. }
            | PipelineError::Transaction(_)
            | PipelineError::Internal(_) => FailurePhase::FailedDuringOperation,
        }
    }

    /// A transaction failure is rolled back in full, so retrying it cannot
    /// compound damage. Native tool failures may have applied part of a dump.
    pub fn retry_safe(&self) -> bool {
        match self.phase() {
            FailurePhase::RejectedBeforeChange => true,
            FailurePhase::FailedDuringOperation => matches!(self, PipelineError::Transaction(_)),
        }
    }

    pub(crate) fn internal(context: &str, err: impl std::fmt::Display) -> Self {
        PipelineError::Internal(format!("{context}: {err}"))
    }
}

impl From<NativeToolError> for PipelineError {
    fn from(err: NativeToolError) -> Self {
        match err {
            NativeToolError::InvalidParameter { name, reason } => {
                PipelineError::Validation(ValidationError::InvalidParameter { name, reason })
            }
            NativeToolError::Timeout { tool, timeout_ms } => {
                PipelineError::Timeout { tool, timeout_ms }
            }
            other => PipelineError::Subprocess {
                tool: other.tool(),
                reason: other.to_string(),
            },
        }
    }
}
