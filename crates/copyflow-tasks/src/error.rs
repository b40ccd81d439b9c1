//! Task handler error types.

use thiserror::Error;

/// Workflow error name for transient task failures.
pub const TASK_FAILED: &str = "States.TaskFailed";
/// Workflow error name for task timeouts.
pub const TIMEOUT: &str = "States.Timeout";
/// Workflow error name for authorization failures.
pub const PERMISSIONS: &str = "States.Permissions";
/// Workflow error name for failures the definition cannot recover from.
pub const RUNTIME: &str = "States.Runtime";
/// Workflow error name for a task result that cannot be stored at its `ResultPath`.
pub const RESULT_PATH_MATCH_FAILURE: &str = "States.ResultPathMatchFailure";

/// Errors a task handler can report.
///
/// Every variant maps onto a workflow error name via [`HandlerError::error_name`],
/// which is what Retry and Catch policies match against.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// Handler not found in registry.
    #[error("Handler not found: {0}")]
    NotFound(String),

    /// Resource is known by name only and cannot be invoked locally.
    #[error("Resource has no local implementation: {0}")]
    Unavailable(String),

    /// Transient failure; worth retrying.
    #[error("Task failed: {0}")]
    TaskFailed(String),

    /// Task did not finish in time.
    #[error("Task timed out after {0} seconds")]
    Timeout(u64),

    /// Caller is not authorized; retrying cannot help.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Failure with a caller-defined error name.
    #[error("{error}: {cause}")]
    Failed { error: String, cause: String },

    /// Handler could not read or build JSON; treated as a task failure.
    #[error("JSON error: {0}")]
    Json(String),
}

impl HandlerError {
    /// Workflow error name used for Retry/Catch matching.
    pub fn error_name(&self) -> &str {
        match self {
            HandlerError::NotFound(_) | HandlerError::Unavailable(_) => RUNTIME,
            HandlerError::TaskFailed(_) | HandlerError::Json(_) => TASK_FAILED,
            HandlerError::Timeout(_) => TIMEOUT,
            HandlerError::PermissionDenied(_) => PERMISSIONS,
            HandlerError::Failed { error, .. } => error.as_str(),
        }
    }

    /// Human-readable cause, without the error name.
    pub fn cause(&self) -> String {
        match self {
            HandlerError::Failed { cause, .. } => cause.clone(),
            other => other.to_string(),
        }
    }
}

impl From<serde_json::Error> for HandlerError {
    fn from(e: serde_json::Error) -> Self {
        HandlerError::Json(e.to_string())
    }
}
