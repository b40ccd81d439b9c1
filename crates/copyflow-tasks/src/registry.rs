//! Task handler registry and dispatch.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

use crate::context::{BranchIndex, ExecutionContext};
use crate::error::HandlerError;

/// A unit of work referenced by a workflow definition.
///
/// `branch` is `Some` when the handler was bound inside a replicated
/// branch; it carries the branch indices fixed when the definition was
/// expanded.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    /// Resource identifier the workflow document refers to.
    fn name(&self) -> &str;

    /// Whether the handler can receive a branch-index tuple.
    ///
    /// Handlers returning `false` must not appear inside a replication.
    fn accepts_branch_index(&self) -> bool {
        true
    }

    /// Run the task and return its result document.
    async fn invoke(
        &self,
        ctx: &ExecutionContext,
        branch: Option<&BranchIndex>,
    ) -> Result<serde_json::Value, HandlerError>;
}

impl std::fmt::Debug for dyn TaskHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskHandler")
            .field("name", &self.name())
            .finish()
    }
}

/// Resolves handler identifiers found in annotated documents.
pub trait HandlerResolver {
    fn resolve(&self, name: &str) -> Option<Arc<dyn TaskHandler>>;
}

/// A resource known only by its identifier.
///
/// Used when a definition is rendered for an external engine that owns the
/// actual implementation. Invoking it locally fails with
/// [`HandlerError::Unavailable`].
#[derive(Debug, Clone)]
pub struct ResourceRef {
    name: String,
}

impl ResourceRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl TaskHandler for ResourceRef {
    fn name(&self) -> &str {
        &self.name
    }

    async fn invoke(
        &self,
        _ctx: &ExecutionContext,
        _branch: Option<&BranchIndex>,
    ) -> Result<serde_json::Value, HandlerError> {
        Err(HandlerError::Unavailable(self.name.clone()))
    }
}

/// Resolver that turns every identifier into a [`ResourceRef`].
#[derive(Debug, Clone, Default)]
pub struct RemoteResolver;

impl HandlerResolver for RemoteResolver {
    fn resolve(&self, name: &str) -> Option<Arc<dyn TaskHandler>> {
        Some(Arc::new(ResourceRef::new(name)))
    }
}

/// Registry of available task handlers.
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn TaskHandler>>,
}

impl HandlerRegistry {
    /// Create a new empty handler registry.
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Register a handler under its own name.
    pub fn register<T: TaskHandler + 'static>(&mut self, handler: T) {
        self.register_arc(Arc::new(handler));
    }

    /// Register an already shared handler.
    pub fn register_arc(&mut self, handler: Arc<dyn TaskHandler>) {
        let name = handler.name().to_string();
        if self.handlers.insert(name.clone(), handler).is_some() {
            tracing::warn!(handler = %name, "Replaced previously registered handler");
        }
    }

    /// Get a handler by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn TaskHandler>> {
        self.handlers.get(name).cloned()
    }

    /// Check if a handler is registered.
    pub fn has(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// List all registered handler names, sorted.
    pub fn list(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.handlers.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    /// Invoke a handler by name.
    pub async fn invoke(
        &self,
        name: &str,
        ctx: &ExecutionContext,
        branch: Option<&BranchIndex>,
    ) -> Result<serde_json::Value, HandlerError> {
        let handler = self
            .get(name)
            .ok_or_else(|| HandlerError::NotFound(name.to_string()))?;
        handler.invoke(ctx, branch).await
    }
}

impl HandlerResolver for HandlerRegistry {
    fn resolve(&self, name: &str) -> Option<Arc<dyn TaskHandler>> {
        self.get(name)
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("handlers", &self.list())
            .finish()
    }
}
