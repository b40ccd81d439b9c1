//! End-to-end runs of the copy-job polling machine.

mod common;

use common::{executor, successors, Job, Scripted};
use copyflow::engine::ExecutionStatus;
use copyflow::machine::job::{
    FAIL, GET_JOB_STATUS, JOB_DONE, JOB_FAILED_ERROR, NOTIFY, NOTIFY_FAILURE,
    PRE_EXECUTION_CHECK, PRE_EXECUTION_CHECK_PASSED, SUCCEED, WAIT,
};
use copyflow::machine::JobTemplateOptions;
use copyflow_tasks::{HandlerError, PERMISSIONS, TASK_FAILED, TIMEOUT};
use serde_json::{json, Value};

#[tokio::test]
async fn test_failed_precheck_reaches_fail_in_two_transitions() {
    let mut job = Job::new(&["SUCCESS"]);
    job.pre_execution_check =
        Scripted::returning("pre-execution-check", json!({"checkout_status": "FAILED"}));

    let execution = job.run(JobTemplateOptions::default()).await;

    assert_eq!(execution.status, ExecutionStatus::Failed);
    assert_eq!(execution.error.as_deref(), Some(JOB_FAILED_ERROR));
    assert_eq!(
        execution.trace,
        vec![PRE_EXECUTION_CHECK, PRE_EXECUTION_CHECK_PASSED, NOTIFY_FAILURE, FAIL]
    );
    assert_eq!(execution.transitions_after(PRE_EXECUTION_CHECK_PASSED), Some(2));
    assert_eq!(job.schedule_copy.calls(), 0);
    assert_eq!(job.notify_failure.calls(), 1);
}

#[tokio::test]
async fn test_polling_is_bounded_by_check_count() {
    let job = Job::new(&["IN_PROGRESS"]);

    let execution = job.run(JobTemplateOptions::default()).await;

    assert_eq!(execution.status, ExecutionStatus::Failed);
    assert_eq!(job.get_job_status.calls(), 11);
    assert_eq!(execution.output["status"]["check_count"], json!(11));

    let mut expected = vec![WAIT; 10];
    expected.push(NOTIFY_FAILURE);
    assert_eq!(successors(&execution, JOB_DONE), expected);
    assert_eq!(successors(&execution, NOTIFY_FAILURE), vec![FAIL]);
    assert_eq!(execution.visits(NOTIFY), 0);
}

#[tokio::test]
async fn test_ceiling_follows_template_options() {
    let job = Job::new(&["IN_PROGRESS"]);
    let options = JobTemplateOptions {
        max_status_checks: 3,
        ..JobTemplateOptions::default()
    };

    let execution = job.run(options).await;

    assert_eq!(execution.status, ExecutionStatus::Failed);
    assert_eq!(execution.visits(GET_JOB_STATUS), 4);
}

#[tokio::test]
async fn test_success_path_goes_through_notify() {
    let job = Job::new(&["IN_PROGRESS", "IN_PROGRESS", "SUCCESS"]);

    let execution = job.run(JobTemplateOptions::default()).await;

    assert_eq!(execution.status, ExecutionStatus::Succeeded);
    assert!(execution.error.is_none());
    assert_eq!(execution.visits(NOTIFY_FAILURE), 0);
    assert_eq!(execution.visits(GET_JOB_STATUS), 3);
    assert_eq!(successors(&execution, JOB_DONE), vec![WAIT, WAIT, NOTIFY]);
    assert_eq!(&execution.trace[execution.trace.len() - 2..], &[NOTIFY, SUCCEED]);
    assert_eq!(execution.elapsed_seconds, 3 * 60);
    assert_eq!(execution.output["notification"], json!({"sent": true}));
}

#[tokio::test]
async fn test_explicit_failure_status() {
    let job = Job::new(&["IN_PROGRESS", "FAILURE"]);

    let execution = job.run(JobTemplateOptions::default()).await;

    assert_eq!(execution.status, ExecutionStatus::Failed);
    assert_eq!(successors(&execution, JOB_DONE), vec![WAIT, NOTIFY_FAILURE]);
}

#[tokio::test]
async fn test_permission_failure_is_not_retried() {
    let mut job = Job::new(&["SUCCESS"]);
    job.schedule_copy = Scripted::new("schedule-copy", |_, _| {
        Err(HandlerError::PermissionDenied("bucket policy".to_string()))
    });

    let execution = job.run(JobTemplateOptions::default()).await;

    assert_eq!(job.schedule_copy.calls(), 1);
    assert_eq!(execution.status, ExecutionStatus::Failed);
    assert_eq!(execution.output["error"]["Error"], json!(PERMISSIONS));
    assert_eq!(successors(&execution, "ScheduleCopy"), vec![NOTIFY_FAILURE]);
    assert_eq!(execution.elapsed_seconds, 0);
}

#[tokio::test]
async fn test_transient_failure_is_retried() {
    let mut job = Job::new(&["SUCCESS"]);
    job.schedule_copy = Scripted::new("schedule-copy", |ctx, _| {
        if ctx.attempt < 2 {
            Err(HandlerError::TaskFailed("throttled".to_string()))
        } else {
            Ok(json!({"wait_time_seconds": 60}))
        }
    });

    let execution = job.run(JobTemplateOptions::default()).await;

    assert_eq!(execution.status, ExecutionStatus::Succeeded);
    assert_eq!(job.schedule_copy.calls(), 3);
    // 5s, then 5s * 1.5, then one 60s wait.
    assert_eq!(execution.elapsed_seconds, 5 + 8 + 60);
}

#[tokio::test]
async fn test_malformed_handler_json_converges_on_notify_failure() {
    let mut job = Job::new(&["SUCCESS"]);
    job.schedule_copy = Scripted::new("schedule-copy", |_, _| {
        let response: Value = serde_json::from_str("{")?;
        Ok(response)
    });

    let execution = job.run(JobTemplateOptions::default()).await;

    assert_eq!(execution.status, ExecutionStatus::Failed);
    assert_eq!(execution.error.as_deref(), Some(JOB_FAILED_ERROR));
    assert_eq!(execution.output["error"]["Error"], json!(TASK_FAILED));
    assert_eq!(successors(&execution, "ScheduleCopy"), vec![NOTIFY_FAILURE]);
    assert_eq!(successors(&execution, NOTIFY_FAILURE), vec![FAIL]);
    assert_eq!(job.schedule_copy.calls(), 6);
    assert_eq!(job.notify_failure.calls(), 1);
    // 5, 8, 11, 17 and 25 seconds of backoff.
    assert_eq!(execution.elapsed_seconds, 66);
}

#[tokio::test]
async fn test_task_timeouts_use_their_own_budget() {
    let mut job = Job::new(&["SUCCESS"]);
    job.get_job_status = Scripted::new("get-job-status", |_, _| Err(HandlerError::Timeout(30)));

    let execution = job.run(JobTemplateOptions::default()).await;

    assert_eq!(job.get_job_status.calls(), 4);
    assert_eq!(execution.status, ExecutionStatus::Failed);
    assert_eq!(execution.output["error"]["Error"], json!(TIMEOUT));
    assert_eq!(execution.elapsed_seconds, 60 + 30 + 45 + 68);
}

#[tokio::test]
async fn test_failing_notifier_still_terminates() {
    let mut job = Job::new(&["FAILURE"]);
    job.notify_failure = Scripted::new("notify-failure", |_, _| {
        Err(HandlerError::PermissionDenied("topic".to_string()))
    });

    let execution = job.run(JobTemplateOptions::default()).await;

    assert_eq!(execution.status, ExecutionStatus::Failed);
    assert_eq!(execution.error.as_deref(), Some(JOB_FAILED_ERROR));
    assert_eq!(successors(&execution, NOTIFY_FAILURE), vec![FAIL]);
}

#[tokio::test]
async fn test_execution_timeout_is_independent_of_check_count() {
    let mut job = Job::new(&["IN_PROGRESS"]);
    job.schedule_copy = Scripted::returning("schedule-copy", json!({"wait_time_seconds": 600}));
    let options = JobTemplateOptions {
        max_status_checks: 1000,
        ..JobTemplateOptions::default()
    };

    let execution = job.run(options).await;

    assert_eq!(execution.status, ExecutionStatus::TimedOut);
    assert_eq!(execution.error.as_deref(), Some(TIMEOUT));
    assert_eq!(job.get_job_status.calls(), 6);
    assert!(execution.elapsed_seconds > 3600);
}

#[tokio::test]
async fn test_executions_share_no_state() {
    let mut job = Job::new(&["IN_PROGRESS", "SUCCESS"]);
    job.pre_execution_check = Scripted::new("pre-execution-check", |ctx, _| {
        let status = if ctx.input["job"] == json!("broken") {
            "FAILED"
        } else {
            "PASSED"
        };
        Ok(json!({"checkout_status": status}))
    });
    let document = job.document(JobTemplateOptions::default());
    let executor = executor();

    let (good, bad) = tokio::join!(
        executor.run(&document, json!({"job": "ok"})),
        executor.run(&document, json!({"job": "broken"})),
    );

    assert_ne!(good.execution_id, bad.execution_id);
    assert_eq!(good.status, ExecutionStatus::Succeeded);
    assert_eq!(good.output["status"]["check_count"], json!(2));
    assert_eq!(bad.status, ExecutionStatus::Failed);
    assert!(bad.output.get("status").is_none());
}
