//! Local execution engine for workflow documents.
//!
//! - **Executor**: walks a document against a virtual clock
//! - **Evaluator**: evaluates Choice rules against the context document
//! - **Retry**: Retry/Catch matching and backoff
//! - **State**: execution records

pub mod evaluator;
pub mod executor;
pub mod retry;
pub mod state;

pub use evaluator::{choose, evaluate_condition};
pub use executor::{Executor, ExecutorOptions, FAIL_DEFAULT, NO_CHOICE_MATCHED};
pub use retry::{backoff_delay, RetryDecision, RetryTracker};
pub use state::{Execution, ExecutionStatus};
