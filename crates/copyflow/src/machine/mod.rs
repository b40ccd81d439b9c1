//! Workflow documents: typed model, validation and the copy-job template.

pub mod document;
pub mod job;
pub mod path;
pub mod types;
pub mod validate;

pub use document::{branch_scope, HandlerTable, WorkflowDocument, ROOT_SCOPE};
pub use job::{failure_catchers, standard_retriers, JobHandlers, JobTemplate, JobTemplateOptions};
pub use path::ContextPath;
pub use types::{
    Catcher, ChoiceRule, ChoiceState, Comparator, Condition, FailState, ParallelState, Retrier,
    State, StateMachine, SucceedState, TaskState, WaitState, ALL_ERRORS,
};
pub use validate::{parse_machine, validate_machine, validate_task_policies};
