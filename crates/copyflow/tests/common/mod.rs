//! Scripted task handlers for end-to-end runs.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use copyflow::engine::{Execution, Executor};
use copyflow::machine::{JobHandlers, JobTemplate, JobTemplateOptions, WorkflowDocument};
use copyflow::template::expand;
use copyflow_tasks::{BranchIndex, ExecutionContext, HandlerError, HandlerRegistry, TaskHandler};
use serde_json::{json, Value};

type Respond =
    dyn Fn(&ExecutionContext, Option<&BranchIndex>) -> Result<Value, HandlerError> + Send + Sync;

/// Handler whose result is computed by a closure; counts its invocations.
pub struct Scripted {
    name: String,
    calls: AtomicUsize,
    respond: Box<Respond>,
}

impl Scripted {
    pub fn new(
        name: &str,
        respond: impl Fn(&ExecutionContext, Option<&BranchIndex>) -> Result<Value, HandlerError>
            + Send
            + Sync
            + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            calls: AtomicUsize::new(0),
            respond: Box::new(respond),
        })
    }

    /// Always returns `value`.
    pub fn returning(name: &str, value: Value) -> Arc<Self> {
        Self::new(name, move |_, _| Ok(value.clone()))
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TaskHandler for Scripted {
    fn name(&self) -> &str {
        &self.name
    }

    async fn invoke(
        &self,
        ctx: &ExecutionContext,
        branch: Option<&BranchIndex>,
    ) -> Result<Value, HandlerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        (self.respond)(ctx, branch)
    }
}

/// Poll count recorded by the previous `GetJobStatus`, if any.
pub fn previous_check_count(ctx: &ExecutionContext) -> u64 {
    ctx.input_at("/status/check_count")
        .and_then(Value::as_u64)
        .unwrap_or(0)
}

/// Status handler reporting `statuses[n]` on poll `n` (the last one repeats).
pub fn status_sequence(statuses: &'static [&'static str]) -> Arc<Scripted> {
    Scripted::new("get-job-status", move |ctx, _| {
        let check_count = previous_check_count(ctx) + 1;
        let index = (check_count as usize - 1).min(statuses.len() - 1);
        Ok(json!({"checkout_status": statuses[index], "check_count": check_count}))
    })
}

/// Handlers for one job; fields are public so tests can swap single tasks.
pub struct Job {
    pub pre_execution_check: Arc<Scripted>,
    pub schedule_copy: Arc<Scripted>,
    pub get_job_status: Arc<Scripted>,
    pub notify_failure: Arc<Scripted>,
    pub notify: Arc<Scripted>,
}

impl Job {
    /// A job that passes its checks, waits 60 seconds per poll and reports
    /// `statuses` in turn.
    pub fn new(statuses: &'static [&'static str]) -> Self {
        Self {
            pre_execution_check: Scripted::returning(
                "pre-execution-check",
                json!({"checkout_status": "PASSED"}),
            ),
            schedule_copy: Scripted::returning("schedule-copy", json!({"wait_time_seconds": 60})),
            get_job_status: status_sequence(statuses),
            notify_failure: Scripted::returning("notify-failure", json!({"sent": true})),
            notify: Scripted::returning("notify", json!({"sent": true})),
        }
    }

    pub fn handlers(&self) -> JobHandlers {
        JobHandlers {
            pre_execution_check: self.pre_execution_check.clone(),
            schedule_copy: self.schedule_copy.clone(),
            get_job_status: self.get_job_status.clone(),
            notify_failure: self.notify_failure.clone(),
            notify: self.notify.clone(),
        }
    }

    pub fn document(&self, options: JobTemplateOptions) -> WorkflowDocument {
        let template = JobTemplate::new(self.handlers(), options);
        let concrete = expand(&template.definition().unwrap()).unwrap();
        WorkflowDocument::from_concrete(&concrete).unwrap()
    }

    pub async fn run(&self, options: JobTemplateOptions) -> Execution {
        executor().run(&self.document(options), json!({})).await
    }
}

pub fn executor() -> Executor {
    Executor::new(Arc::new(HandlerRegistry::new()))
}

/// States entered right after each visit of `state`.
pub fn successors<'e>(execution: &'e Execution, state: &str) -> Vec<&'e str> {
    execution
        .trace
        .windows(2)
        .filter(|pair| pair[0] == state)
        .map(|pair| pair[1].as_str())
        .collect()
}
