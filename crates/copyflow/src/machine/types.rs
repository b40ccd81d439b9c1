//! Workflow document types.
//!
//! Serde model of the concrete document handed to the execution engine:
//! a `StartAt` state name, a map of named states, and per-state transition,
//! Retry, Catch and Choice blocks. Field names are PascalCase on the wire.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Error name matching every error (except `States.Runtime`).
pub const ALL_ERRORS: &str = "States.ALL";

// ============================================================================
// State machine
// ============================================================================

/// A named directed graph of states.
///
/// Also used for the branches of a `Parallel` state, which never carry
/// `TimeoutSeconds`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct StateMachine {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,

    /// Initial state.
    pub start_at: String,

    /// Hard wall-clock limit for the whole execution.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,

    pub states: BTreeMap<String, State>,
}

impl StateMachine {
    /// Look up a state by name.
    pub fn state(&self, name: &str) -> Option<&State> {
        self.states.get(name)
    }

    /// Pretty-printed JSON.
    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }
}

// ============================================================================
// States
// ============================================================================

/// A state, tagged by its `Type` field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "Type")]
pub enum State {
    Task(TaskState),
    Choice(ChoiceState),
    Wait(WaitState),
    Parallel(ParallelState),
    Succeed(SucceedState),
    Fail(FailState),
}

impl State {
    /// The `Type` name.
    pub fn kind(&self) -> &'static str {
        match self {
            State::Task(_) => "Task",
            State::Choice(_) => "Choice",
            State::Wait(_) => "Wait",
            State::Parallel(_) => "Parallel",
            State::Succeed(_) => "Succeed",
            State::Fail(_) => "Fail",
        }
    }

    /// `Next` of states with a single successor.
    pub fn next(&self) -> Option<&str> {
        match self {
            State::Task(s) => s.next.as_deref(),
            State::Wait(s) => s.next.as_deref(),
            State::Parallel(s) => s.next.as_deref(),
            State::Choice(_) | State::Succeed(_) | State::Fail(_) => None,
        }
    }

    /// `End` flag of states with a single successor.
    pub fn end(&self) -> Option<bool> {
        match self {
            State::Task(s) => s.end,
            State::Wait(s) => s.end,
            State::Parallel(s) => s.end,
            State::Choice(_) | State::Succeed(_) | State::Fail(_) => None,
        }
    }

    /// Whether this state ends the execution by itself.
    pub fn is_terminal(&self) -> bool {
        matches!(self, State::Succeed(_) | State::Fail(_))
    }

    pub fn retriers(&self) -> &[Retrier] {
        match self {
            State::Task(s) => &s.retry,
            State::Parallel(s) => &s.retry,
            _ => &[],
        }
    }

    pub fn catchers(&self) -> &[Catcher] {
        match self {
            State::Task(s) => &s.catch,
            State::Parallel(s) => &s.catch,
            _ => &[],
        }
    }

    /// Every state name this state can transition to.
    pub fn targets(&self) -> Vec<&str> {
        let mut targets: Vec<&str> = self.next().into_iter().collect();
        targets.extend(self.catchers().iter().map(|c| c.next.as_str()));
        if let State::Choice(choice) = self {
            targets.extend(choice.choices.iter().filter_map(|r| r.next.as_deref()));
            targets.extend(choice.default.as_deref());
        }
        targets
    }
}

/// Invokes a task handler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TaskState {
    /// Task handler identifier.
    pub resource: String,

    /// Static input handed to the handler.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<serde_json::Value>,

    /// Where the handler's output is written (default `$`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_path: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<bool>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub retry: Vec<Retrier>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub catch: Vec<Catcher>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

/// Branches on the context document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ChoiceState {
    /// Rules evaluated in order; the first match wins.
    pub choices: Vec<ChoiceRule>,

    /// Target when no rule matches.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

/// Suspends the execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct WaitState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seconds: Option<u64>,

    /// Context path holding the wait duration in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seconds_path: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

/// Runs independent branches over copies of the same input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ParallelState {
    pub branches: Vec<StateMachine>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_path: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<bool>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub retry: Vec<Retrier>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub catch: Vec<Catcher>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SucceedState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct FailState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

// ============================================================================
// Retry / Catch
// ============================================================================

/// Retry policy for a class of errors.
///
/// The delay before retry `n` (0-based) is
/// `interval_seconds * backoff_rate^n`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Retrier {
    pub error_equals: Vec<String>,

    #[serde(default = "default_interval_seconds")]
    pub interval_seconds: u32,

    /// Zero means the matched errors are never retried.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_backoff_rate")]
    pub backoff_rate: f64,
}

fn default_interval_seconds() -> u32 {
    1
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff_rate() -> f64 {
    2.0
}

impl Retrier {
    pub fn new(
        error_equals: &[&str],
        max_attempts: u32,
        interval_seconds: u32,
        backoff_rate: f64,
    ) -> Self {
        Self {
            error_equals: error_equals.iter().map(|e| e.to_string()).collect(),
            interval_seconds,
            max_attempts,
            backoff_rate,
        }
    }
}

/// Fallback transition for errors left over after retries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Catcher {
    pub error_equals: Vec<String>,

    pub next: String,

    /// Where `{Error, Cause}` is written (default `$`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_path: Option<String>,
}

// ============================================================================
// Choice rules
// ============================================================================

/// A choice rule. Top-level rules carry `Next`; rules nested in
/// `And`/`Or`/`Not` do not.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChoiceRule {
    #[serde(flatten)]
    pub condition: Condition,

    #[serde(rename = "Next", default, skip_serializing_if = "Option::is_none")]
    pub next: Option<String>,
}

impl ChoiceRule {
    /// `Variable <comparator>` → `next`.
    pub fn when(variable: &str, comparator: Comparator, next: &str) -> Self {
        Self {
            condition: Condition::compare(variable, comparator),
            next: Some(next.to_string()),
        }
    }

    /// All of `rules` → `next`.
    pub fn when_all(rules: Vec<ChoiceRule>, next: &str) -> Self {
        Self {
            condition: Condition::And { and: rules },
            next: Some(next.to_string()),
        }
    }

    /// Nested rule without a transition.
    pub fn nested(variable: &str, comparator: Comparator) -> Self {
        Self {
            condition: Condition::compare(variable, comparator),
            next: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Condition {
    And {
        #[serde(rename = "And")]
        and: Vec<ChoiceRule>,
    },
    Or {
        #[serde(rename = "Or")]
        or: Vec<ChoiceRule>,
    },
    Not {
        #[serde(rename = "Not")]
        not: Box<ChoiceRule>,
    },
    Compare {
        #[serde(rename = "Variable")]
        variable: String,
        #[serde(flatten)]
        comparator: Comparator,
    },
}

impl Condition {
    pub fn compare(variable: &str, comparator: Comparator) -> Self {
        Condition::Compare {
            variable: variable.to_string(),
            comparator,
        }
    }
}

/// Comparison applied to the value at a choice rule's `Variable`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Comparator {
    StringEquals(String),
    NumericEquals(f64),
    NumericGreaterThan(f64),
    NumericGreaterThanEquals(f64),
    NumericLessThan(f64),
    NumericLessThanEquals(f64),
    BooleanEquals(bool),
    IsPresent(bool),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_task_state_wire_format() {
        let state = State::Task(TaskState {
            resource: "copyflow-schedule-copy".to_string(),
            parameters: None,
            result_path: Some("$.schedule".to_string()),
            timeout_seconds: None,
            next: Some("Wait".to_string()),
            end: None,
            retry: vec![Retrier::new(&["States.Timeout"], 3, 30, 1.5)],
            catch: vec![Catcher {
                error_equals: vec![ALL_ERRORS.to_string()],
                next: "NotifyFailure".to_string(),
                result_path: None,
            }],
            comment: None,
        });

        assert_eq!(
            serde_json::to_value(&state).unwrap(),
            json!({
                "Type": "Task",
                "Resource": "copyflow-schedule-copy",
                "ResultPath": "$.schedule",
                "Next": "Wait",
                "Retry": [{
                    "ErrorEquals": ["States.Timeout"],
                    "IntervalSeconds": 30,
                    "MaxAttempts": 3,
                    "BackoffRate": 1.5
                }],
                "Catch": [{"ErrorEquals": ["States.ALL"], "Next": "NotifyFailure"}]
            })
        );
    }

    #[test]
    fn test_choice_rules_round_trip() {
        let value = json!({
            "Type": "Choice",
            "Choices": [
                {"Variable": "$.status.checkout_status", "StringEquals": "FAILURE", "Next": "NotifyFailure"},
                {
                    "And": [
                        {"Variable": "$.status.checkout_status", "StringEquals": "IN_PROGRESS"},
                        {"Variable": "$.status.check_count", "NumericGreaterThan": 10}
                    ],
                    "Next": "NotifyFailure"
                }
            ],
            "Default": "Wait"
        });

        let state: State = serde_json::from_value(value).unwrap();
        let State::Choice(choice) = &state else {
            panic!("expected choice state");
        };
        assert_eq!(
            choice.choices[0],
            ChoiceRule::when(
                "$.status.checkout_status",
                Comparator::StringEquals("FAILURE".to_string()),
                "NotifyFailure"
            )
        );
        assert!(matches!(
            &choice.choices[1].condition,
            Condition::And { and } if and.len() == 2 && and[1].next.is_none()
        ));
        assert_eq!(state.targets(), vec!["NotifyFailure", "NotifyFailure", "Wait"]);

        let back: State = serde_json::from_value(serde_json::to_value(&state).unwrap()).unwrap();
        assert_eq!(back, state);
    }

    #[test]
    fn test_retrier_defaults() {
        let retrier: Retrier =
            serde_json::from_value(json!({"ErrorEquals": ["States.ALL"]})).unwrap();
        assert_eq!(retrier.interval_seconds, 1);
        assert_eq!(retrier.max_attempts, 3);
        assert_eq!(retrier.backoff_rate, 2.0);
    }

    #[test]
    fn test_wait_and_terminal_states_parse() {
        let machine: StateMachine = serde_json::from_value(json!({
            "StartAt": "Wait",
            "TimeoutSeconds": 3600,
            "States": {
                "Wait": {"Type": "Wait", "SecondsPath": "$.schedule.wait_time_seconds", "Next": "Done"},
                "Done": {"Type": "Succeed"},
                "Broken": {"Type": "Fail", "Error": "CopyJobFailed"}
            }
        }))
        .unwrap();

        assert_eq!(machine.timeout_seconds, Some(3600));
        assert_eq!(machine.state("Wait").unwrap().next(), Some("Done"));
        assert!(machine.state("Done").unwrap().is_terminal());
        assert_eq!(machine.state("Broken").unwrap().kind(), "Fail");
    }
}
