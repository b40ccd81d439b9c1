//! Local dry-run executor for workflow documents.
//!
//! Walks a document in-process against a virtual clock: Wait states and
//! retry delays advance the clock instead of sleeping, so a run that would
//! take an hour finishes immediately. Task states invoke the handler bound
//! in the document, or the registry entry for their `Resource`.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use copyflow_tasks::{
    BranchIndex, ExecutionContext, HandlerError, HandlerRegistry, TaskHandler,
    RESULT_PATH_MATCH_FAILURE, RUNTIME, TIMEOUT,
};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::config::AppConfig;
use crate::machine::{
    branch_scope, Catcher, ContextPath, FailState, ParallelState, State, StateMachine, TaskState,
    WaitState, WorkflowDocument, ROOT_SCOPE,
};
use crate::result_ext::OptionResultExt;

use super::evaluator::choose;
use super::retry::{find_catcher, RetryDecision, RetryTracker};
use super::state::{Execution, ExecutionStatus};

/// Error name when a Choice state has no matching rule and no `Default`.
pub const NO_CHOICE_MATCHED: &str = "States.NoChoiceMatched";

/// Error name of a Fail state without `Error`.
pub const FAIL_DEFAULT: &str = "States.Fail";

#[derive(Debug, Clone)]
pub struct ExecutorOptions {
    /// States entered before the run is aborted.
    pub max_transitions: usize,
}

impl Default for ExecutorOptions {
    fn default() -> Self {
        Self {
            max_transitions: 10_000,
        }
    }
}

impl ExecutorOptions {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            max_transitions: config.max_transitions,
        }
    }
}

/// Runs workflow documents. Executions share no state besides the registry.
#[derive(Debug, Clone)]
pub struct Executor {
    registry: Arc<HandlerRegistry>,
    options: ExecutorOptions,
}

/// Where a scope ended up.
enum Outcome {
    Succeeded(Value),
    Failed {
        error: String,
        cause: String,
        output: Value,
    },
    TimedOut(Value),
}

/// What a single state decided.
enum Step {
    Next(String),
    End,
    Fail { error: String, cause: String },
    TimedOut,
}

impl Step {
    fn runtime(cause: impl Into<String>) -> Self {
        Step::Fail {
            error: RUNTIME.to_string(),
            cause: cause.into(),
        }
    }

    fn after(state: &State) -> Self {
        match (state.next(), state.end()) {
            (Some(next), _) => Step::Next(next.to_string()),
            (None, Some(true)) => Step::End,
            _ => Step::runtime(format!("{} state has neither Next nor End", state.kind())),
        }
    }
}

enum Recovery {
    Retry,
    Done(Step),
}

/// Bookkeeping shared by every scope of one execution.
struct Run {
    execution_id: String,
    trace: Vec<String>,
    deadline: Option<u64>,
    transitions: usize,
}

impl Run {
    fn past_deadline(&self, clock: u64) -> bool {
        self.deadline.is_some_and(|deadline| clock > deadline)
    }
}

type ScopeFuture<'a> = Pin<Box<dyn Future<Output = (Outcome, u64)> + Send + 'a>>;

/// A state being executed, with the scope it runs in.
#[derive(Clone, Copy)]
struct At<'a> {
    document: &'a WorkflowDocument,
    scope: &'a str,
    branch: &'a BranchIndex,
    name: &'a str,
}

impl Executor {
    pub fn new(registry: Arc<HandlerRegistry>) -> Self {
        Self {
            registry,
            options: ExecutorOptions::default(),
        }
    }

    pub fn with_options(mut self, options: ExecutorOptions) -> Self {
        self.options = options;
        self
    }

    /// Run `document` from its `StartAt` state with `input` as the context document.
    pub async fn run(&self, document: &WorkflowDocument, input: Value) -> Execution {
        let mut execution = Execution::start(input.clone());
        let mut run = Run {
            execution_id: execution.execution_id.to_string(),
            trace: Vec::new(),
            deadline: document.machine.timeout_seconds,
            transitions: 0,
        };

        info!(
            execution_id = %execution.execution_id,
            start_at = %document.machine.start_at,
            "Starting execution"
        );

        let root = BranchIndex::default();
        let (outcome, clock) = self
            .run_scope(
                &mut run,
                document,
                &document.machine,
                ROOT_SCOPE.to_string(),
                root,
                input,
                0,
            )
            .await;

        execution.trace = run.trace;
        match outcome {
            Outcome::Succeeded(output) => {
                execution.output = output;
                execution.finish(ExecutionStatus::Succeeded, None, clock);
            }
            Outcome::Failed {
                error,
                cause,
                output,
            } => {
                execution.output = output;
                execution.finish(ExecutionStatus::Failed, Some((error, cause)), clock);
            }
            Outcome::TimedOut(output) => {
                let cause = format!(
                    "execution exceeded {} seconds",
                    run.deadline.unwrap_or_default()
                );
                execution.output = output;
                execution.finish(
                    ExecutionStatus::TimedOut,
                    Some((TIMEOUT.to_string(), cause)),
                    clock,
                );
            }
        }

        info!(
            execution_id = %execution.execution_id,
            status = %execution.status,
            transitions = execution.transitions(),
            elapsed_seconds = execution.elapsed_seconds,
            "Execution finished"
        );
        if let Some(error) = &execution.error {
            warn!(
                execution_id = %execution.execution_id,
                error = %error,
                cause = execution.cause.as_deref().unwrap_or_default(),
                "Execution did not succeed"
            );
        }

        execution
    }

    #[allow(clippy::too_many_arguments)]
    fn run_scope<'a>(
        &'a self,
        run: &'a mut Run,
        document: &'a WorkflowDocument,
        machine: &'a StateMachine,
        scope: String,
        branch: BranchIndex,
        mut doc: Value,
        mut clock: u64,
    ) -> ScopeFuture<'a> {
        Box::pin(async move {
            let mut current = machine.start_at.clone();
            loop {
                if run.past_deadline(clock) {
                    return (Outcome::TimedOut(doc), clock);
                }
                run.transitions += 1;
                if run.transitions > self.options.max_transitions {
                    let cause = format!(
                        "exceeded {} state transitions",
                        self.options.max_transitions
                    );
                    return (Outcome::failed(RUNTIME, cause, doc), clock);
                }
                run.trace.push(scoped(&scope, &current));

                let Some(state) = machine.states.get(&current) else {
                    let cause = format!("state '{}' does not exist", current);
                    return (Outcome::failed(RUNTIME, cause, doc), clock);
                };
                debug!(scope = %scope, state = %current, kind = state.kind(), "Entering state");

                let at = At {
                    document,
                    scope: &scope,
                    branch: &branch,
                    name: &current,
                };
                let step = match state {
                    State::Task(task) => {
                        self.run_task(run, at, state, task, &mut doc, &mut clock)
                            .await
                    }
                    State::Parallel(parallel) => {
                        self.run_parallel(run, at, state, parallel, &mut doc, &mut clock)
                            .await
                    }
                    State::Wait(wait) => run_wait(state, wait, &doc, &mut clock),
                    State::Choice(choice) => match choose(choice, &doc) {
                        Ok(Some(next)) => Step::Next(next.to_string()),
                        Ok(None) => Step::Fail {
                            error: NO_CHOICE_MATCHED.to_string(),
                            cause: format!("no choice rule matched in '{}'", current),
                        },
                        Err(e) => Step::runtime(e.to_string()),
                    },
                    State::Succeed(_) => Step::End,
                    State::Fail(fail) => fail_step(fail),
                };

                match step {
                    Step::Next(next) => current = next,
                    Step::End if run.past_deadline(clock) => {
                        return (Outcome::TimedOut(doc), clock)
                    }
                    Step::End => return (Outcome::Succeeded(doc), clock),
                    Step::Fail { error, cause } => {
                        return (Outcome::failed(&error, cause, doc), clock)
                    }
                    Step::TimedOut => return (Outcome::TimedOut(doc), clock),
                }
            }
        })
    }

    async fn run_task(
        &self,
        run: &Run,
        at: At<'_>,
        state: &State,
        task: &TaskState,
        doc: &mut Value,
        clock: &mut u64,
    ) -> Step {
        let mut tracker = RetryTracker::new(&task.retry);
        loop {
            let ctx = ExecutionContext::new(run.execution_id.clone(), at.name, doc.clone())
                .with_attempt(tracker.total_attempts())
                .with_parameters(task.parameters.clone());

            match self.invoke(at, task, &ctx).await {
                Ok(output) => {
                    let Err(cause) = write_at(doc, task.result_path.as_deref(), output) else {
                        return Step::after(state);
                    };
                    // Storing the same result again cannot succeed, so only Catch applies.
                    let error = RESULT_PATH_MATCH_FAILURE.to_string();
                    return catch(at, &task.catch, error, cause, doc);
                }
                Err(err) => {
                    let error = err.error_name().to_string();
                    let cause = err.cause();
                    match recover(run, at, &mut tracker, &task.catch, error, cause, doc, clock) {
                        Recovery::Retry => continue,
                        Recovery::Done(step) => return step,
                    }
                }
            }
        }
    }

    async fn invoke(
        &self,
        at: At<'_>,
        task: &TaskState,
        ctx: &ExecutionContext,
    ) -> Result<Value, HandlerError> {
        let handler: Arc<dyn TaskHandler> = match at.document.handler(at.scope, at.name) {
            Some(handler) => Arc::clone(handler),
            None => self
                .registry
                .get(&task.resource)
                .log_none(format!("resolving resource '{}'", task.resource))
                .ok_or_else(|| HandlerError::NotFound(task.resource.clone()))?,
        };

        let branch = (!at.branch.is_empty() && handler.accepts_branch_index()).then_some(at.branch);
        match task.timeout_seconds {
            Some(seconds) => {
                tokio::time::timeout(Duration::from_secs(seconds), handler.invoke(ctx, branch))
                    .await
                    .unwrap_or(Err(HandlerError::Timeout(seconds)))
            }
            None => handler.invoke(ctx, branch).await,
        }
    }

    async fn run_parallel(
        &self,
        run: &mut Run,
        at: At<'_>,
        state: &State,
        parallel: &ParallelState,
        doc: &mut Value,
        clock: &mut u64,
    ) -> Step {
        let mut tracker = RetryTracker::new(&parallel.retry);
        loop {
            // Branches start together; the state ends when the slowest does.
            let start = *clock;
            let mut end = start;
            let mut outputs = Vec::with_capacity(parallel.branches.len());
            let mut failure = None;

            for (index, branch) in parallel.branches.iter().enumerate() {
                let scope = branch_scope(at.scope, at.name, index);
                let mut indices = at.branch.as_slice().to_vec();
                indices.push(index);

                let (outcome, branch_clock) = self
                    .run_scope(
                        run,
                        at.document,
                        branch,
                        scope.clone(),
                        BranchIndex::new(indices),
                        doc.clone(),
                        start,
                    )
                    .await;
                end = end.max(branch_clock);

                match outcome {
                    Outcome::Succeeded(output) => outputs.push(output),
                    Outcome::Failed { error, cause, .. } => {
                        warn!(branch = %scope, error = %error, cause = %cause, "Branch failed");
                        failure = Some((error, format!("{}: {}", scope, cause)));
                        break;
                    }
                    Outcome::TimedOut(_) => {
                        *clock = end;
                        return Step::TimedOut;
                    }
                }
            }
            *clock = end;

            let Some((error, cause)) = failure else {
                let outputs = Value::Array(outputs);
                return match write_at(doc, parallel.result_path.as_deref(), outputs) {
                    Ok(()) => Step::after(state),
                    Err(cause) => Step::runtime(cause),
                };
            };
            match recover(run, at, &mut tracker, &parallel.catch, error, cause, doc, clock) {
                Recovery::Retry => continue,
                Recovery::Done(step) => return step,
            }
        }
    }
}

impl Outcome {
    fn failed(error: &str, cause: String, output: Value) -> Self {
        Outcome::Failed {
            error: error.to_string(),
            cause,
            output,
        }
    }
}

/// Apply the state's Retry, then Catch, policies to a failed attempt.
#[allow(clippy::too_many_arguments)]
fn recover(
    run: &Run,
    at: At<'_>,
    tracker: &mut RetryTracker<'_>,
    catchers: &[Catcher],
    error: String,
    cause: String,
    doc: &mut Value,
    clock: &mut u64,
) -> Recovery {
    if let RetryDecision::Retry {
        delay_seconds,
        attempt,
    } = tracker.on_error(&error)
    {
        warn!(
            scope = %at.scope,
            state = %at.name,
            error = %error,
            attempt,
            delay_seconds,
            "Retrying state"
        );
        *clock = clock.saturating_add(delay_seconds);
        if run.past_deadline(*clock) {
            return Recovery::Done(Step::TimedOut);
        }
        return Recovery::Retry;
    }
    Recovery::Done(catch(at, catchers, error, cause, doc))
}

/// Route an unrecovered error to the first matching catcher.
fn catch(at: At<'_>, catchers: &[Catcher], error: String, cause: String, doc: &mut Value) -> Step {
    let Some(catcher) = find_catcher(catchers, &error) else {
        return Step::Fail { error, cause };
    };

    warn!(
        scope = %at.scope,
        state = %at.name,
        error = %error,
        next = %catcher.next,
        "Caught error"
    );
    let caught = json!({"Error": error, "Cause": cause});
    match write_at(doc, catcher.result_path.as_deref(), caught) {
        Ok(()) => Step::Next(catcher.next.clone()),
        Err(cause) => Step::runtime(cause),
    }
}

fn run_wait(state: &State, wait: &WaitState, doc: &Value, clock: &mut u64) -> Step {
    let seconds = match (&wait.seconds, &wait.seconds_path) {
        (Some(seconds), _) => *seconds,
        (None, Some(path)) => {
            let value = ContextPath::parse(path)
                .ok()
                .and_then(|p| p.read(doc).and_then(Value::as_u64));
            match value {
                Some(seconds) => seconds,
                None => {
                    return Step::runtime(format!(
                        "SecondsPath '{}' does not hold a non-negative integer",
                        path
                    ))
                }
            }
        }
        (None, None) => return Step::runtime("Wait state has no duration"),
    };

    *clock = clock.saturating_add(seconds);
    Step::after(state)
}

fn fail_step(fail: &FailState) -> Step {
    Step::Fail {
        error: fail.error.clone().unwrap_or_else(|| FAIL_DEFAULT.to_string()),
        cause: fail.cause.clone().unwrap_or_default(),
    }
}

/// Write `value` at `path` (default `$`).
fn write_at(doc: &mut Value, path: Option<&str>, value: Value) -> Result<(), String> {
    let path = match path {
        Some(path) => ContextPath::parse(path)?,
        None => ContextPath::root(),
    };
    path.write(doc, value)
}

fn scoped(scope: &str, state: &str) -> String {
    if scope.is_empty() {
        state.to_string()
    } else {
        format!("{}/{}", scope, state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machine::parse_machine;
    use async_trait::async_trait;

    /// Fails with `error` the first `failures` times, then succeeds.
    struct Flaky {
        name: &'static str,
        error: fn() -> HandlerError,
        failures: u32,
    }

    #[async_trait]
    impl TaskHandler for Flaky {
        fn name(&self) -> &str {
            self.name
        }

        async fn invoke(
            &self,
            ctx: &ExecutionContext,
            _branch: Option<&BranchIndex>,
        ) -> Result<Value, HandlerError> {
            if ctx.attempt < self.failures {
                Err((self.error)())
            } else {
                Ok(json!({"attempt": ctx.attempt}))
            }
        }
    }

    fn executor(handlers: Vec<Flaky>) -> Executor {
        let mut registry = HandlerRegistry::new();
        for handler in handlers {
            registry.register(handler);
        }
        Executor::new(Arc::new(registry))
    }

    fn document(yaml: &str) -> WorkflowDocument {
        WorkflowDocument::from_machine(parse_machine(yaml).unwrap())
    }

    const RETRYING: &str = r#"
StartAt: Work
States:
  Work:
    Type: Task
    Resource: work
    ResultPath: $.work
    Next: Done
    Retry:
      - ErrorEquals: [States.TaskFailed]
        MaxAttempts: 2
        IntervalSeconds: 5
        BackoffRate: 2.0
    Catch:
      - ErrorEquals: [States.ALL]
        Next: Recover
        ResultPath: $.error
  Recover:
    Type: Fail
    Error: Recovered
  Done:
    Type: Succeed
"#;

    #[tokio::test]
    async fn test_retry_then_succeed_advances_clock() {
        let executor = executor(vec![Flaky {
            name: "work",
            error: || HandlerError::TaskFailed("flaky".to_string()),
            failures: 2,
        }]);

        let execution = executor.run(&document(RETRYING), json!({})).await;

        assert_eq!(execution.status, ExecutionStatus::Succeeded);
        assert_eq!(execution.output, json!({"work": {"attempt": 2}}));
        assert_eq!(execution.elapsed_seconds, 5 + 10);
        assert_eq!(execution.trace, vec!["Work", "Done"]);
    }

    #[tokio::test]
    async fn test_exhausted_retries_are_caught() {
        let executor = executor(vec![Flaky {
            name: "work",
            error: || HandlerError::TaskFailed("down".to_string()),
            failures: 10,
        }]);

        let execution = executor.run(&document(RETRYING), json!({})).await;

        assert_eq!(execution.status, ExecutionStatus::Failed);
        assert_eq!(execution.error.as_deref(), Some("Recovered"));
        assert_eq!(execution.trace, vec!["Work", "Recover"]);
        assert_eq!(execution.output["error"]["Error"], json!("States.TaskFailed"));
        assert_eq!(execution.output["error"]["Cause"], json!("Task failed: down"));
    }

    #[tokio::test]
    async fn test_unknown_resource_is_not_caught_by_all() {
        let execution = executor(vec![]).run(&document(RETRYING), json!({})).await;

        assert_eq!(execution.status, ExecutionStatus::Failed);
        assert_eq!(execution.error.as_deref(), Some(RUNTIME));
        assert_eq!(execution.trace, vec!["Work"]);
    }

    #[tokio::test]
    async fn test_choice_without_match_fails() {
        let yaml = r#"
StartAt: Pick
States:
  Pick:
    Type: Choice
    Choices:
      - Variable: $.go
        BooleanEquals: true
        Next: Done
  Done:
    Type: Succeed
"#;
        let execution = executor(vec![]).run(&document(yaml), json!({"go": false})).await;

        assert_eq!(execution.status, ExecutionStatus::Failed);
        assert_eq!(execution.error.as_deref(), Some(NO_CHOICE_MATCHED));
    }

    #[tokio::test]
    async fn test_timeout_on_virtual_clock() {
        let yaml = r#"
StartAt: Pause
TimeoutSeconds: 100
States:
  Pause:
    Type: Wait
    Seconds: 30
    Next: Pause
"#;
        let execution = executor(vec![]).run(&document(yaml), json!({})).await;

        assert_eq!(execution.status, ExecutionStatus::TimedOut);
        assert_eq!(execution.error.as_deref(), Some(TIMEOUT));
        assert_eq!(execution.visits("Pause"), 4);
        assert_eq!(execution.elapsed_seconds, 120);
    }

    #[tokio::test]
    async fn test_transition_ceiling() {
        let yaml = r#"
StartAt: Pause
States:
  Pause:
    Type: Wait
    Seconds: 1
    Next: Pause
"#;
        let execution = executor(vec![])
            .with_options(ExecutorOptions { max_transitions: 50 })
            .run(&document(yaml), json!({}))
            .await;

        assert_eq!(execution.status, ExecutionStatus::Failed);
        assert_eq!(execution.error.as_deref(), Some(RUNTIME));
        assert_eq!(execution.trace.len(), 50);
    }

    #[tokio::test]
    async fn test_wait_seconds_path() {
        let yaml = r#"
StartAt: Pause
States:
  Pause:
    Type: Wait
    SecondsPath: $.schedule.wait_time_seconds
    End: true
"#;
        let doc = document(yaml);
        let executor = executor(vec![]);

        let ok = executor
            .run(&doc, json!({"schedule": {"wait_time_seconds": 45}}))
            .await;
        assert_eq!(ok.status, ExecutionStatus::Succeeded);
        assert_eq!(ok.elapsed_seconds, 45);

        let missing = executor.run(&doc, json!({})).await;
        assert_eq!(missing.status, ExecutionStatus::Failed);
        assert!(missing.cause.unwrap().contains("SecondsPath"));
    }

    #[tokio::test]
    async fn test_parallel_branches_get_own_input_and_scope() {
        let yaml = r#"
StartAt: Workers
States:
  Workers:
    Type: Parallel
    ResultPath: $.workers
    End: true
    Branches:
      - StartAt: Short
        States:
          Short:
            Type: Wait
            Seconds: 10
            End: true
      - StartAt: Long
        States:
          Long:
            Type: Wait
            Seconds: 40
            End: true
"#;
        let execution = executor(vec![]).run(&document(yaml), json!({"n": 1})).await;

        assert_eq!(execution.status, ExecutionStatus::Succeeded);
        assert_eq!(
            execution.trace,
            vec!["Workers", "Workers[0]/Short", "Workers[1]/Long"]
        );
        assert_eq!(execution.elapsed_seconds, 40);
        assert_eq!(
            execution.output,
            json!({"n": 1, "workers": [{"n": 1}, {"n": 1}]})
        );
    }

    #[tokio::test]
    async fn test_unwritable_result_is_caught() {
        let yaml = r#"
StartAt: Work
States:
  Work:
    Type: Task
    Resource: work
    ResultPath: $.status.detail
    Next: Done
    Catch:
      - ErrorEquals: [States.ALL]
        Next: Recover
        ResultPath: $.error
  Recover:
    Type: Fail
    Error: Recovered
  Done:
    Type: Succeed
"#;
        let executor = executor(vec![Flaky {
            name: "work",
            error: || HandlerError::TaskFailed("unused".to_string()),
            failures: 0,
        }]);

        let execution = executor.run(&document(yaml), json!({"status": "busy"})).await;

        assert_eq!(execution.trace, vec!["Work", "Recover"]);
        assert_eq!(
            execution.output["error"]["Error"],
            json!(RESULT_PATH_MATCH_FAILURE)
        );
        assert_eq!(execution.output["status"], json!("busy"));
    }

    #[tokio::test]
    async fn test_huge_wait_saturates_clock() {
        let unbounded = r#"
StartAt: Short
States:
  Short:
    Type: Wait
    Seconds: 10
    Next: Forever
  Forever:
    Type: Wait
    Seconds: 18446744073709551615
    End: true
"#;
        let execution = executor(vec![]).run(&document(unbounded), json!({})).await;
        assert_eq!(execution.status, ExecutionStatus::Succeeded);
        assert_eq!(execution.elapsed_seconds, u64::MAX);

        let bounded = format!("TimeoutSeconds: 3600\n{}", unbounded.trim_start());
        let execution = executor(vec![]).run(&document(&bounded), json!({})).await;
        assert_eq!(execution.status, ExecutionStatus::TimedOut);
        assert_eq!(execution.error.as_deref(), Some(TIMEOUT));
    }

    #[tokio::test]
    async fn test_huge_backoff_saturates_clock() {
        let yaml = r#"
StartAt: Work
TimeoutSeconds: 3600
States:
  Work:
    Type: Task
    Resource: work
    End: true
    Retry:
      - ErrorEquals: [States.TaskFailed]
        MaxAttempts: 3
        IntervalSeconds: 1
        BackoffRate: 1.0e308
"#;
        let executor = executor(vec![Flaky {
            name: "work",
            error: || HandlerError::TaskFailed("slow".to_string()),
            failures: 3,
        }]);

        let execution = executor.run(&document(yaml), json!({})).await;

        assert_eq!(execution.status, ExecutionStatus::TimedOut);
        assert_eq!(execution.elapsed_seconds, u64::MAX);
    }

    #[test]
    fn test_scoped() {
        assert_eq!(scoped("", "Wait"), "Wait");
        assert_eq!(scoped("CopyWorkers[1]", "Wait"), "CopyWorkers[1]/Wait");
    }
}
