//! Execution records produced by local dry runs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Final (or current) status of an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// Execution is in progress.
    Running,
    /// Reached a Succeed state or a state with `End: true`.
    Succeeded,
    /// Reached a Fail state or an unrecovered error.
    Failed,
    /// Exceeded the machine's `TimeoutSeconds`.
    TimedOut,
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
            Self::TimedOut => write!(f, "timed_out"),
        }
    }
}

/// One run of a workflow document.
///
/// `trace` lists every state entered, in order. States inside Parallel
/// branches appear scoped by their branch, e.g. `CopyWorkers[1]/Wait`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Execution {
    pub execution_id: Uuid,
    pub status: ExecutionStatus,
    pub trace: Vec<String>,
    /// Context document at the end of the run.
    pub output: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<String>,
    /// Virtual time consumed by waits and retry delays.
    pub elapsed_seconds: u64,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl Execution {
    pub fn start(input: serde_json::Value) -> Self {
        Self {
            execution_id: Uuid::new_v4(),
            status: ExecutionStatus::Running,
            trace: Vec::new(),
            output: input,
            error: None,
            cause: None,
            elapsed_seconds: 0,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.status != ExecutionStatus::Running
    }

    /// Number of transitions taken (states entered after the first).
    pub fn transitions(&self) -> usize {
        self.trace.len().saturating_sub(1)
    }

    /// Transitions taken after first entering `state`.
    pub fn transitions_after(&self, state: &str) -> Option<usize> {
        self.trace
            .iter()
            .position(|s| s == state)
            .map(|pos| self.trace.len() - pos - 1)
    }

    /// How many times `state` was entered.
    pub fn visits(&self, state: &str) -> usize {
        self.trace.iter().filter(|s| s.as_str() == state).count()
    }

    pub(crate) fn finish(
        &mut self,
        status: ExecutionStatus,
        failure: Option<(String, String)>,
        elapsed_seconds: u64,
    ) {
        self.status = status;
        if let Some((error, cause)) = failure {
            self.error = Some(error);
            self.cause = Some(cause);
        }
        self.elapsed_seconds = elapsed_seconds;
        self.finished_at = Some(Utc::now());
    }
}
