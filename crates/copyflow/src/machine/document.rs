//! Concrete workflow documents with their bound task handlers.

use std::collections::HashMap;
use std::sync::Arc;

use copyflow_tasks::TaskHandler;
use serde_json::Value;

use crate::error::{AppError, AppResult};
use crate::template::ConcreteNode;

use super::types::{State, StateMachine};

/// Scope of the top-level machine.
pub const ROOT_SCOPE: &str = "";

/// Scope name of branch `index` of Parallel state `state`.
///
/// Top-level branches are `CopyWorkers[1]`; nested ones are joined with `/`
/// (`Outer[0]/Inner[2]`).
pub fn branch_scope(parent: &str, state: &str, index: usize) -> String {
    if parent.is_empty() {
        format!("{}[{}]", state, index)
    } else {
        format!("{}/{}[{}]", parent, state, index)
    }
}

/// Task handlers captured from a concrete document, keyed by
/// `(scope, state name)`.
#[derive(Debug, Clone, Default)]
pub struct HandlerTable {
    handlers: HashMap<(String, String), Arc<dyn TaskHandler>>,
}

impl HandlerTable {
    pub fn get(&self, scope: &str, state: &str) -> Option<&Arc<dyn TaskHandler>> {
        self.handlers.get(&(scope.to_string(), state.to_string()))
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    fn insert(&mut self, scope: String, state: String, handler: Arc<dyn TaskHandler>) {
        self.handlers.insert((scope, state), handler);
    }
}

/// A typed state machine plus the handlers its Task states were built with.
///
/// Documents read from JSON or YAML carry no handlers; their `Resource`
/// names are resolved at execution time instead.
#[derive(Debug, Clone)]
pub struct WorkflowDocument {
    pub machine: StateMachine,
    pub handlers: HandlerTable,
}

impl WorkflowDocument {
    pub fn from_machine(machine: StateMachine) -> Self {
        Self {
            machine,
            handlers: HandlerTable::default(),
        }
    }

    /// Convert expansion output into a typed document.
    ///
    /// Handler leaves found at a Task state's `Resource` are kept in the
    /// handler table, including handlers inside Parallel branches.
    pub fn from_concrete(node: &ConcreteNode) -> AppResult<Self> {
        let machine: StateMachine = serde_json::from_value(node.to_json())
            .map_err(|e| AppError::Parse(format!("invalid workflow document: {}", e)))?;

        let mut handlers = HandlerTable::default();
        collect_handlers(node, ROOT_SCOPE, &mut handlers);

        Ok(Self { machine, handlers })
    }

    /// Handler bound to `state` in `scope`, if the document carries one.
    pub fn handler(&self, scope: &str, state: &str) -> Option<&Arc<dyn TaskHandler>> {
        self.handlers.get(scope, state)
    }

    pub fn to_json(&self) -> Value {
        serde_json::to_value(&self.machine).unwrap_or(Value::Null)
    }
}

fn collect_handlers(machine: &ConcreteNode, scope: &str, table: &mut HandlerTable) {
    let Some(ConcreteNode::Mapping(states)) = machine.get("States") else {
        return;
    };

    for (name, state) in states {
        if let Some(handler) = state.get("Resource").and_then(ConcreteNode::as_handler) {
            table.insert(scope.to_string(), name.clone(), Arc::clone(handler));
        }

        let branches = state.get("Branches").and_then(ConcreteNode::as_sequence);
        for (index, branch) in branches.unwrap_or_default().iter().enumerate() {
            collect_handlers(branch, &branch_scope(scope, name, index), table);
        }
    }
}

impl StateMachine {
    /// Typed view of expansion output, without its handlers.
    pub fn from_concrete(node: &ConcreteNode) -> AppResult<Self> {
        WorkflowDocument::from_concrete(node).map(|doc| doc.machine)
    }

    /// States of Parallel branches are not included.
    pub fn task_states(&self) -> impl Iterator<Item = (&String, &State)> {
        self.states
            .iter()
            .filter(|(_, state)| matches!(state, State::Task(_)))
    }
}
