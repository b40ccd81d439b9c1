//! Choice rule evaluation.

use serde_json::Value;

use crate::error::{AppError, AppResult};
use crate::machine::{ChoiceRule, ChoiceState, Comparator, Condition, ContextPath};

/// Target of the first matching rule, else the state's `Default`.
///
/// `Ok(None)` means nothing matched and there is no default.
pub fn choose<'c>(choice: &'c ChoiceState, doc: &Value) -> AppResult<Option<&'c str>> {
    for rule in &choice.choices {
        if evaluate_rule(rule, doc)? {
            return Ok(rule.next.as_deref());
        }
    }
    Ok(choice.default.as_deref())
}

pub fn evaluate_rule(rule: &ChoiceRule, doc: &Value) -> AppResult<bool> {
    evaluate_condition(&rule.condition, doc)
}

/// Evaluate a condition against the context document.
///
/// A missing variable or a value of the wrong type never matches,
/// except under `IsPresent: false`.
pub fn evaluate_condition(condition: &Condition, doc: &Value) -> AppResult<bool> {
    match condition {
        Condition::And { and } => {
            for rule in and {
                if !evaluate_rule(rule, doc)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        Condition::Or { or } => {
            for rule in or {
                if evaluate_rule(rule, doc)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        Condition::Not { not } => Ok(!evaluate_rule(not, doc)?),
        Condition::Compare {
            variable,
            comparator,
        } => {
            let path = ContextPath::parse(variable).map_err(AppError::Validation)?;
            Ok(compare(path.read(doc), comparator))
        }
    }
}

fn compare(value: Option<&Value>, comparator: &Comparator) -> bool {
    if let Comparator::IsPresent(expected) = comparator {
        return value.is_some() == *expected;
    }
    let Some(value) = value else {
        return false;
    };

    match comparator {
        Comparator::StringEquals(expected) => value.as_str() == Some(expected.as_str()),
        Comparator::BooleanEquals(expected) => value.as_bool() == Some(*expected),
        Comparator::NumericEquals(expected) => numeric(value, |n| n == *expected),
        Comparator::NumericGreaterThan(expected) => numeric(value, |n| n > *expected),
        Comparator::NumericGreaterThanEquals(expected) => numeric(value, |n| n >= *expected),
        Comparator::NumericLessThan(expected) => numeric(value, |n| n < *expected),
        Comparator::NumericLessThanEquals(expected) => numeric(value, |n| n <= *expected),
        Comparator::IsPresent(_) => true,
    }
}

fn numeric(value: &Value, test: impl Fn(f64) -> bool) -> bool {
    value.as_f64().map(test).unwrap_or(false)
}
