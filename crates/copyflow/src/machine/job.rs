//! Copy-job orchestration template.
//!
//! Monitors a long-running external copy job by polling:
//!
//! ```text
//! PreExecutionCheck -> PreExecutionCheckPassed -> ScheduleCopy -> Wait
//!   -> GetJobStatus -> JobDone -> (Wait | Notify -> Succeed | NotifyFailure -> Fail)
//! ```
//!
//! A job still `IN_PROGRESS` after `max_status_checks` polls is failed the
//! same way as an explicit `FAILURE`. Every Task state carries the standard
//! retry classification and routes unrecovered errors to `NotifyFailure`.

use std::sync::Arc;

use copyflow_tasks::{ResourceRef, TaskHandler, PERMISSIONS, TASK_FAILED, TIMEOUT};
use serde_json::{json, Value};

use crate::config::AppConfig;
use crate::error::{AppError, AppResult};
use crate::template::AnnotatedNode;

use super::types::{
    Catcher, ChoiceRule, ChoiceState, Comparator, FailState, ParallelState, Retrier, State,
    StateMachine, SucceedState, TaskState, WaitState, ALL_ERRORS,
};

pub const PRE_EXECUTION_CHECK: &str = "PreExecutionCheck";
pub const PRE_EXECUTION_CHECK_PASSED: &str = "PreExecutionCheckPassed";
pub const SCHEDULE_COPY: &str = "ScheduleCopy";
pub const WAIT: &str = "Wait";
pub const GET_JOB_STATUS: &str = "GetJobStatus";
pub const JOB_DONE: &str = "JobDone";
pub const NOTIFY_FAILURE: &str = "NotifyFailure";
pub const NOTIFY: &str = "Notify";
pub const SUCCEED: &str = "Succeed";
pub const FAIL: &str = "Fail";

/// Parallel state hosting replicated copy workers.
pub const FAN_OUT_STATE: &str = "CopyWorkers";

pub const VALIDATION_PATH: &str = "$.validation";
pub const SCHEDULE_PATH: &str = "$.schedule";
pub const STATUS_PATH: &str = "$.status";
pub const ERROR_PATH: &str = "$.error";
pub const NOTIFICATION_PATH: &str = "$.notification";
pub const WORKERS_PATH: &str = "$.workers";

pub const STATUS_PASSED: &str = "PASSED";
pub const STATUS_IN_PROGRESS: &str = "IN_PROGRESS";
pub const STATUS_SUCCESS: &str = "SUCCESS";
pub const STATUS_FAILURE: &str = "FAILURE";

/// Error reported by the terminal `Fail` state.
pub const JOB_FAILED_ERROR: &str = "CopyJobFailed";

/// Retry classification shared by every Task state, first match wins.
///
/// Permission failures come first with zero attempts so the catch-all
/// never retries them.
pub fn standard_retriers() -> Vec<Retrier> {
    vec![
        Retrier::new(&[PERMISSIONS], 0, 1, 1.0),
        Retrier::new(&[TIMEOUT], 3, 30, 1.5),
        Retrier::new(&[TASK_FAILED], 5, 5, 1.5),
        Retrier::new(&[ALL_ERRORS], 5, 5, 2.0),
    ]
}

/// Route every unrecovered error to `next`, recording it at `$.error`.
pub fn failure_catchers(next: &str) -> Vec<Catcher> {
    vec![Catcher {
        error_equals: vec![ALL_ERRORS.to_string()],
        next: next.to_string(),
        result_path: Some(ERROR_PATH.to_string()),
    }]
}

/// The five task handlers a copy job is built from.
#[derive(Debug, Clone)]
pub struct JobHandlers {
    pub pre_execution_check: Arc<dyn TaskHandler>,
    pub schedule_copy: Arc<dyn TaskHandler>,
    pub get_job_status: Arc<dyn TaskHandler>,
    pub notify_failure: Arc<dyn TaskHandler>,
    pub notify: Arc<dyn TaskHandler>,
}

impl JobHandlers {
    /// Handlers that only name remote resources, e.g. for rendering.
    pub fn remote(resource_name: impl Fn(&str) -> String) -> Self {
        let remote = |task: &str| -> Arc<dyn TaskHandler> {
            Arc::new(ResourceRef::new(resource_name(task)))
        };
        Self {
            pre_execution_check: remote("pre-execution-check"),
            schedule_copy: remote("schedule-copy"),
            get_job_status: remote("get-job-status"),
            notify_failure: remote("notify-failure"),
            notify: remote("notify"),
        }
    }

    fn by_state(&self) -> [(&'static str, &Arc<dyn TaskHandler>); 5] {
        [
            (PRE_EXECUTION_CHECK, &self.pre_execution_check),
            (SCHEDULE_COPY, &self.schedule_copy),
            (GET_JOB_STATUS, &self.get_job_status),
            (NOTIFY_FAILURE, &self.notify_failure),
            (NOTIFY, &self.notify),
        ]
    }
}

#[derive(Debug, Clone)]
pub struct JobTemplateOptions {
    pub comment: String,
    /// Polls allowed while the job stays `IN_PROGRESS`.
    pub max_status_checks: u32,
    /// Wall-clock limit for the whole execution.
    pub timeout_seconds: Option<u64>,
}

impl Default for JobTemplateOptions {
    fn default() -> Self {
        Self {
            comment: "Copy job orchestration".to_string(),
            max_status_checks: 10,
            timeout_seconds: Some(3600),
        }
    }
}

/// Builds copy-job definitions.
#[derive(Debug, Clone)]
pub struct JobTemplate {
    handlers: JobHandlers,
    options: JobTemplateOptions,
}

impl JobTemplate {
    pub fn new(handlers: JobHandlers, options: JobTemplateOptions) -> Self {
        Self { handlers, options }
    }

    pub fn from_config(config: &AppConfig, handlers: JobHandlers) -> Self {
        Self::new(
            handlers,
            JobTemplateOptions {
                comment: config.comment.clone(),
                max_status_checks: config.max_status_checks,
                timeout_seconds: Some(config.timeout_seconds),
            },
        )
    }

    pub fn options(&self) -> &JobTemplateOptions {
        &self.options
    }

    /// Typed single-job machine, with resources named after the handlers.
    pub fn machine(&self) -> StateMachine {
        self.build(
            self.options.comment.clone(),
            self.options.timeout_seconds,
            None,
        )
    }

    /// Annotated single-job definition carrying the handlers themselves.
    pub fn definition(&self) -> AppResult<AnnotatedNode> {
        self.annotate(&self.machine())
    }

    /// `pool_size` copy workers as branches of one Parallel state.
    ///
    /// Each branch receives `{"shard": token, "pool_size": pool_size}` as
    /// task parameters; expansion replaces `token` with the worker index and
    /// binds every branch handler to it.
    pub fn fan_out(&self, pool_size: i64, token: &str) -> AppResult<AnnotatedNode> {
        let branch = self.build(
            format!("{} (worker {})", self.options.comment, token),
            None,
            Some(json!({"shard": token, "pool_size": pool_size})),
        );
        let branch = self.annotate(&branch)?;

        let parallel = State::Parallel(ParallelState {
            branches: Vec::new(),
            result_path: Some(WORKERS_PATH.to_string()),
            next: None,
            end: Some(true),
            retry: Vec::new(),
            catch: Vec::new(),
            comment: None,
        });
        let root = StateMachine {
            comment: Some(format!("{} ({} workers)", self.options.comment, pool_size)),
            start_at: FAN_OUT_STATE.to_string(),
            timeout_seconds: self.options.timeout_seconds,
            states: [(FAN_OUT_STATE.to_string(), parallel)].into_iter().collect(),
        };

        let mut node = AnnotatedNode::from_json(serde_json::to_value(&root)?);
        let inserted = node
            .get_mut("States")
            .and_then(|states| states.get_mut(FAN_OUT_STATE))
            .map(|state| state.insert("Branches", AnnotatedNode::replicate(token, pool_size, branch)))
            .unwrap_or(false);
        if !inserted {
            return Err(AppError::Validation(format!(
                "fan-out state '{}' missing from definition",
                FAN_OUT_STATE
            )));
        }
        Ok(node)
    }

    /// Replace each Task's resource name with its handler.
    fn annotate(&self, machine: &StateMachine) -> AppResult<AnnotatedNode> {
        let mut node = AnnotatedNode::from_json(serde_json::to_value(machine)?);
        for (state, handler) in self.handlers.by_state() {
            let inserted = node
                .get_mut("States")
                .and_then(|states| states.get_mut(state))
                .map(|task| task.insert("Resource", AnnotatedNode::handler(Arc::clone(handler))))
                .unwrap_or(false);
            if !inserted {
                return Err(AppError::Validation(format!(
                    "Task '{}' missing from job definition",
                    state
                )));
            }
        }
        Ok(node)
    }

    fn build(
        &self,
        comment: String,
        timeout_seconds: Option<u64>,
        parameters: Option<Value>,
    ) -> StateMachine {
        let task = |handler: &Arc<dyn TaskHandler>, result_path: &str, next: &str, catch_to: &str| {
            State::Task(TaskState {
                resource: handler.name().to_string(),
                parameters: parameters.clone(),
                result_path: Some(result_path.to_string()),
                timeout_seconds: None,
                next: Some(next.to_string()),
                end: None,
                retry: standard_retriers(),
                catch: failure_catchers(catch_to),
                comment: None,
            })
        };
        let status = format!("{}.checkout_status", STATUS_PATH);
        let check_count = format!("{}.check_count", STATUS_PATH);
        let in_progress = || Comparator::StringEquals(STATUS_IN_PROGRESS.to_string());

        let states = [
            (
                PRE_EXECUTION_CHECK,
                task(
                    &self.handlers.pre_execution_check,
                    VALIDATION_PATH,
                    PRE_EXECUTION_CHECK_PASSED,
                    NOTIFY_FAILURE,
                ),
            ),
            (
                PRE_EXECUTION_CHECK_PASSED,
                State::Choice(ChoiceState {
                    choices: vec![ChoiceRule::when(
                        &format!("{}.checkout_status", VALIDATION_PATH),
                        Comparator::StringEquals(STATUS_PASSED.to_string()),
                        SCHEDULE_COPY,
                    )],
                    default: Some(NOTIFY_FAILURE.to_string()),
                    comment: None,
                }),
            ),
            (
                SCHEDULE_COPY,
                task(&self.handlers.schedule_copy, SCHEDULE_PATH, WAIT, NOTIFY_FAILURE),
            ),
            (
                WAIT,
                State::Wait(WaitState {
                    seconds: None,
                    seconds_path: Some(format!("{}.wait_time_seconds", SCHEDULE_PATH)),
                    next: Some(GET_JOB_STATUS.to_string()),
                    end: None,
                    comment: None,
                }),
            ),
            (
                GET_JOB_STATUS,
                task(&self.handlers.get_job_status, STATUS_PATH, JOB_DONE, NOTIFY_FAILURE),
            ),
            (
                JOB_DONE,
                State::Choice(ChoiceState {
                    choices: vec![
                        ChoiceRule::when(
                            &status,
                            Comparator::StringEquals(STATUS_FAILURE.to_string()),
                            NOTIFY_FAILURE,
                        ),
                        ChoiceRule::when_all(
                            vec![
                                ChoiceRule::nested(&status, in_progress()),
                                ChoiceRule::nested(
                                    &check_count,
                                    Comparator::NumericGreaterThan(
                                        self.options.max_status_checks as f64,
                                    ),
                                ),
                            ],
                            NOTIFY_FAILURE,
                        ),
                        ChoiceRule::when(&status, in_progress(), WAIT),
                        ChoiceRule::when(
                            &status,
                            Comparator::StringEquals(STATUS_SUCCESS.to_string()),
                            NOTIFY,
                        ),
                    ],
                    default: Some(WAIT.to_string()),
                    comment: None,
                }),
            ),
            // Its own failures go straight to Fail so the failure path ends.
            (
                NOTIFY_FAILURE,
                task(&self.handlers.notify_failure, NOTIFICATION_PATH, FAIL, FAIL),
            ),
            (
                NOTIFY,
                task(&self.handlers.notify, NOTIFICATION_PATH, SUCCEED, NOTIFY_FAILURE),
            ),
            (SUCCEED, State::Succeed(SucceedState::default())),
            (
                FAIL,
                State::Fail(FailState {
                    error: Some(JOB_FAILED_ERROR.to_string()),
                    cause: Some("Copy job did not complete successfully".to_string()),
                    comment: None,
                }),
            ),
        ];

        StateMachine {
            comment: Some(comment),
            start_at: PRE_EXECUTION_CHECK.to_string(),
            timeout_seconds,
            states: states
                .into_iter()
                .map(|(name, state)| (name.to_string(), state))
                .collect(),
        }
    }
}
