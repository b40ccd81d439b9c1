//! Execution context for task handler invocations.

use serde::{Deserialize, Serialize};

/// Branch indices assigned to a replica, ordered from the outermost
/// enclosing replication to the innermost.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BranchIndex(Vec<usize>);

impl BranchIndex {
    /// Create a branch index from an ordered list of indices.
    pub fn new(indices: Vec<usize>) -> Self {
        Self(indices)
    }

    /// The indices, outermost first.
    pub fn as_slice(&self) -> &[usize] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Index assigned by the outermost replication.
    pub fn outermost(&self) -> Option<usize> {
        self.0.first().copied()
    }

    /// Index assigned by the closest enclosing replication.
    pub fn innermost(&self) -> Option<usize> {
        self.0.last().copied()
    }
}

impl From<Vec<usize>> for BranchIndex {
    fn from(indices: Vec<usize>) -> Self {
        Self(indices)
    }
}

impl std::fmt::Display for BranchIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let parts: Vec<String> = self.0.iter().map(|i| i.to_string()).collect();
        write!(f, "({})", parts.join(", "))
    }
}

/// Execution context passed to task handlers.
///
/// Carries the identity of the running execution, the state being executed
/// and the current context document. `parameters` holds the state's
/// `Parameters` block when the definition declares one.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionContext {
    /// Execution (run instance) identifier.
    pub execution_id: String,

    /// Name of the state whose task is being invoked.
    pub state: String,

    /// Zero-based attempt counter, incremented on every retry.
    #[serde(default)]
    pub attempt: u32,

    /// Context document accumulated so far.
    #[serde(default)]
    pub input: serde_json::Value,

    /// Static parameters declared on the state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<serde_json::Value>,
}

impl ExecutionContext {
    /// Create a new execution context.
    pub fn new(
        execution_id: impl Into<String>,
        state: impl Into<String>,
        input: serde_json::Value,
    ) -> Self {
        Self {
            execution_id: execution_id.into(),
            state: state.into(),
            attempt: 0,
            input,
            parameters: None,
        }
    }

    /// Set the attempt counter.
    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = attempt;
        self
    }

    /// Set the state parameters.
    pub fn with_parameters(mut self, parameters: Option<serde_json::Value>) -> Self {
        self.parameters = parameters;
        self
    }

    /// Look up a field of the context document by JSON pointer
    /// (e.g. `/status/check_count`).
    pub fn input_at(&self, pointer: &str) -> Option<&serde_json::Value> {
        self.input.pointer(pointer)
    }

    /// Look up a parameter by name.
    pub fn parameter(&self, name: &str) -> Option<&serde_json::Value> {
        self.parameters.as_ref().and_then(|p| p.get(name))
    }
}
