//! Workflow document parsing and validation.
//!
//! Validation rejects documents the execution engine could not run:
//! - `StartAt` and every transition target name an existing state
//! - non-terminal states carry exactly one of `Next` / `End: true`
//! - Wait states carry exactly one of `Seconds` / `SecondsPath`
//! - `States.ALL` appears alone and only in the last retrier or catcher
//! - every state is reachable from `StartAt`
//! - Parallel branches are validated the same way

use std::collections::{BTreeSet, HashSet, VecDeque};

use crate::error::{AppError, AppResult};

use super::path::ContextPath;
use super::types::{
    Catcher, ChoiceRule, Condition, ParallelState, Retrier, State, StateMachine, ALL_ERRORS,
};

/// Parse a JSON or YAML workflow document and validate it.
pub fn parse_machine(content: &str) -> AppResult<StateMachine> {
    let machine: StateMachine = if content.trim_start().starts_with('{') {
        serde_json::from_str(content).map_err(|e| AppError::Parse(e.to_string()))?
    } else {
        serde_yaml::from_str(content).map_err(|e| AppError::Parse(e.to_string()))?
    };

    validate_machine(&machine)?;

    Ok(machine)
}

/// Validate the structure of a parsed state machine.
pub fn validate_machine(machine: &StateMachine) -> AppResult<()> {
    validate_scope(machine, "")
}

/// Require Retry and Catch blocks on every Task state, branches included.
pub fn validate_task_policies(machine: &StateMachine) -> AppResult<()> {
    for (name, state) in &machine.states {
        match state {
            State::Task(task) => {
                if task.retry.is_empty() {
                    return Err(AppError::Validation(format!(
                        "Task '{}' has no Retry policy",
                        name
                    )));
                }
                if task.catch.is_empty() {
                    return Err(AppError::Validation(format!(
                        "Task '{}' has no Catch policy",
                        name
                    )));
                }
            }
            State::Parallel(parallel) => {
                for branch in &parallel.branches {
                    validate_task_policies(branch)?;
                }
            }
            _ => {}
        }
    }
    Ok(())
}

fn validate_scope(machine: &StateMachine, scope: &str) -> AppResult<()> {
    if machine.states.is_empty() {
        return Err(AppError::Validation(format!(
            "{}state machine has no states",
            scope
        )));
    }

    if !machine.states.contains_key(&machine.start_at) {
        return Err(AppError::Validation(format!(
            "{}StartAt '{}' does not name a state",
            scope, machine.start_at
        )));
    }

    if machine.timeout_seconds == Some(0) {
        return Err(AppError::Validation(format!(
            "{}TimeoutSeconds must be positive",
            scope
        )));
    }

    for (name, state) in &machine.states {
        let at = format!("{}State '{}'", scope, name);
        if name.trim().is_empty() {
            return Err(AppError::Validation(format!(
                "{}state names must not be empty",
                scope
            )));
        }

        validate_state(state, &at)?;

        for target in state.targets() {
            if !machine.states.contains_key(target) {
                return Err(AppError::Validation(format!(
                    "{}: transition to unknown state '{}'",
                    at, target
                )));
            }
        }

        if let State::Parallel(parallel) = state {
            validate_branches(parallel, &at)?;
        }
    }

    let unreachable = unreachable_states(machine);
    if let Some(name) = unreachable.first() {
        return Err(AppError::Validation(format!(
            "{}State '{}' is not reachable from '{}'",
            scope, name, machine.start_at
        )));
    }

    Ok(())
}

fn validate_state(state: &State, at: &str) -> AppResult<()> {
    match state {
        State::Task(task) => {
            validate_transition(state, at)?;
            validate_path(task.result_path.as_deref(), at, "ResultPath")?;
            if task.timeout_seconds == Some(0) {
                return Err(AppError::Validation(format!(
                    "{}: TimeoutSeconds must be positive",
                    at
                )));
            }
            if task.resource.trim().is_empty() {
                return Err(AppError::Validation(format!("{}: Resource is empty", at)));
            }
            validate_retriers(&task.retry, at)?;
            validate_catchers(&task.catch, at)?;
        }
        State::Parallel(parallel) => {
            validate_transition(state, at)?;
            validate_path(parallel.result_path.as_deref(), at, "ResultPath")?;
            if parallel.branches.is_empty() {
                return Err(AppError::Validation(format!(
                    "{}: Parallel state has no branches",
                    at
                )));
            }
            validate_retriers(&parallel.retry, at)?;
            validate_catchers(&parallel.catch, at)?;
        }
        State::Wait(wait) => {
            validate_transition(state, at)?;
            match (&wait.seconds, &wait.seconds_path) {
                (Some(_), None) => {}
                (None, Some(path)) => validate_path(Some(path), at, "SecondsPath")?,
                _ => {
                    return Err(AppError::Validation(format!(
                        "{}: Wait state needs exactly one of Seconds or SecondsPath",
                        at
                    )))
                }
            }
        }
        State::Choice(choice) => {
            if choice.choices.is_empty() {
                return Err(AppError::Validation(format!(
                    "{}: Choice state has no rules",
                    at
                )));
            }
            for rule in &choice.choices {
                if rule.next.is_none() {
                    return Err(AppError::Validation(format!(
                        "{}: top-level choice rule has no Next",
                        at
                    )));
                }
                validate_rule(rule, at)?;
            }
        }
        State::Succeed(_) | State::Fail(_) => {}
    }
    Ok(())
}

fn validate_transition(state: &State, at: &str) -> AppResult<()> {
    match (state.next(), state.end()) {
        (Some(_), None) | (Some(_), Some(false)) | (None, Some(true)) => Ok(()),
        (Some(_), Some(true)) => Err(AppError::Validation(format!(
            "{}: Next and End are mutually exclusive",
            at
        ))),
        (None, _) => Err(AppError::Validation(format!(
            "{}: {} state needs Next or End",
            at,
            state.kind()
        ))),
    }
}

fn validate_rule(rule: &ChoiceRule, at: &str) -> AppResult<()> {
    match &rule.condition {
        Condition::And { and: rules } | Condition::Or { or: rules } => {
            if rules.is_empty() {
                return Err(AppError::Validation(format!(
                    "{}: And/Or needs at least one rule",
                    at
                )));
            }
            for nested in rules {
                validate_nested_rule(nested, at)?;
            }
            Ok(())
        }
        Condition::Not { not } => validate_nested_rule(not, at),
        Condition::Compare { variable, .. } => validate_path(Some(variable), at, "Variable"),
    }
}

fn validate_nested_rule(rule: &ChoiceRule, at: &str) -> AppResult<()> {
    if rule.next.is_some() {
        return Err(AppError::Validation(format!(
            "{}: nested choice rules must not carry Next",
            at
        )));
    }
    validate_rule(rule, at)
}

fn validate_path(path: Option<&str>, at: &str, field: &str) -> AppResult<()> {
    match path {
        Some(path) => ContextPath::parse(path)
            .map(|_| ())
            .map_err(|e| AppError::Validation(format!("{}: {}: {}", at, field, e))),
        None => Ok(()),
    }
}

fn validate_retriers(retriers: &[Retrier], at: &str) -> AppResult<()> {
    for (index, retrier) in retriers.iter().enumerate() {
        validate_error_names(&retrier.error_equals, index + 1 == retriers.len(), at, "Retry")?;
        if retrier.interval_seconds < 1 {
            return Err(AppError::Validation(format!(
                "{}: Retry IntervalSeconds must be at least 1",
                at
            )));
        }
        if !retrier.backoff_rate.is_finite() || retrier.backoff_rate < 1.0 {
            return Err(AppError::Validation(format!(
                "{}: Retry BackoffRate must be a finite number of at least 1.0, got {}",
                at, retrier.backoff_rate
            )));
        }
    }
    Ok(())
}

fn validate_catchers(catchers: &[Catcher], at: &str) -> AppResult<()> {
    for (index, catcher) in catchers.iter().enumerate() {
        validate_error_names(&catcher.error_equals, index + 1 == catchers.len(), at, "Catch")?;
        validate_path(catcher.result_path.as_deref(), at, "Catch ResultPath")?;
    }
    Ok(())
}

fn validate_error_names(names: &[String], is_last: bool, at: &str, block: &str) -> AppResult<()> {
    if names.is_empty() {
        return Err(AppError::Validation(format!(
            "{}: {} ErrorEquals is empty",
            at, block
        )));
    }
    if names.iter().any(|n| n == ALL_ERRORS) && (names.len() > 1 || !is_last) {
        return Err(AppError::Validation(format!(
            "{}: {} '{}' must appear alone in the last entry",
            at, block, ALL_ERRORS
        )));
    }
    Ok(())
}

fn validate_branches(parallel: &ParallelState, at: &str) -> AppResult<()> {
    for (index, branch) in parallel.branches.iter().enumerate() {
        if branch.timeout_seconds.is_some() {
            return Err(AppError::Validation(format!(
                "{} branch {}: TimeoutSeconds is not allowed on a branch",
                at, index
            )));
        }
        validate_scope(branch, &format!("{} branch {}: ", at, index))?;
    }
    Ok(())
}

/// States no path from `StartAt` leads to, in name order.
fn unreachable_states(machine: &StateMachine) -> Vec<&str> {
    let mut seen: HashSet<&str> = HashSet::new();
    let mut queue: VecDeque<&str> = VecDeque::from([machine.start_at.as_str()]);

    while let Some(name) = queue.pop_front() {
        if !seen.insert(name) {
            continue;
        }
        if let Some(state) = machine.states.get(name) {
            queue.extend(state.targets());
        }
    }

    let all: BTreeSet<&str> = machine.states.keys().map(String::as_str).collect();
    all.into_iter().filter(|name| !seen.contains(name)).collect()
}
