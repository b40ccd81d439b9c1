//! Copyflow Task Library
//!
//! Shared plumbing for the units of work referenced by copy workflows:
//!
//! - [`registry`]: the `TaskHandler` trait and a name-keyed registry
//! - [`context`]: execution context and branch-index tuples handed to handlers
//! - [`error`]: handler error taxonomy, mapped onto workflow error names
//! - [`listing`]: cursor-based key listing and per-replica sharding
//!
//! Handlers are opaque: the workflow definition only refers to them by
//! name, and the execution engine decides when they run.

pub mod context;
pub mod error;
pub mod listing;
pub mod registry;

pub use context::{BranchIndex, ExecutionContext};
pub use error::{
    HandlerError, PERMISSIONS, RESULT_PATH_MATCH_FAILURE, RUNTIME, TASK_FAILED, TIMEOUT,
};
pub use listing::{shard, KeyCursor, KeyLister, KeyPage, MemoryLister};
pub use registry::{HandlerRegistry, HandlerResolver, RemoteResolver, ResourceRef, TaskHandler};
