//! Task handlers bound to a replica's branch index.

use std::sync::Arc;

use async_trait::async_trait;
use copyflow_tasks::{BranchIndex, ExecutionContext, HandlerError, TaskHandler};

/// Wraps a handler so every invocation receives the branch index captured
/// when the enclosing replica was expanded.
pub struct BoundHandler {
    inner: Arc<dyn TaskHandler>,
    branch: BranchIndex,
}

impl BoundHandler {
    /// Bind `inner` to `branch`.
    ///
    /// The branch index is taken by value: each bound handler owns its own
    /// snapshot and never observes a later replica's indices.
    pub fn bind(inner: Arc<dyn TaskHandler>, branch: BranchIndex) -> Arc<dyn TaskHandler> {
        Arc::new(Self { inner, branch })
    }

    pub fn branch(&self) -> &BranchIndex {
        &self.branch
    }
}

#[async_trait]
impl TaskHandler for BoundHandler {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn accepts_branch_index(&self) -> bool {
        self.inner.accepts_branch_index()
    }

    async fn invoke(
        &self,
        ctx: &ExecutionContext,
        _branch: Option<&BranchIndex>,
    ) -> Result<serde_json::Value, HandlerError> {
        self.inner.invoke(ctx, Some(&self.branch)).await
    }
}
