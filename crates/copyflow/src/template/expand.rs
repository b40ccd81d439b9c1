//! Depth-first expansion of annotated documents.

use std::collections::BTreeMap;
use std::sync::Arc;

use copyflow_tasks::{BranchIndex, TaskHandler};
use tracing::debug;

use super::bound::BoundHandler;
use super::error::ExpansionError;
use super::node::{AnnotatedNode, ConcreteNode, Replication};

/// Ordered `(token, index)` bindings, outermost replication first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubstitutionContext {
    bindings: Vec<(String, usize)>,
}

impl SubstitutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    pub fn bindings(&self) -> &[(String, usize)] {
        &self.bindings
    }

    /// Whether `token` is bound by an enclosing replication.
    pub fn binds(&self, token: &str) -> bool {
        self.bindings.iter().any(|(t, _)| t == token)
    }

    /// A copy of this context with one more binding appended.
    pub fn extended(&self, token: &str, index: usize) -> Self {
        let mut bindings = self.bindings.clone();
        bindings.push((token.to_string(), index));
        Self { bindings }
    }

    /// Replace every bound token in `text`, outermost binding first.
    pub fn apply(&self, text: &str) -> String {
        self.bindings
            .iter()
            .fold(text.to_string(), |acc, (token, index)| {
                if acc.contains(token.as_str()) {
                    acc.replace(token.as_str(), &index.to_string())
                } else {
                    acc
                }
            })
    }

    /// The indices of this context as a branch-index tuple.
    pub fn branch_index(&self) -> BranchIndex {
        BranchIndex::new(self.bindings.iter().map(|(_, i)| *i).collect())
    }
}

/// Expand an annotated document into a concrete one.
pub fn expand(node: &AnnotatedNode) -> Result<ConcreteNode, ExpansionError> {
    expand_node(node, &SubstitutionContext::new())
}

/// Expand `node` as if it were nested inside replications already bound in `ctx`.
pub fn expand_in(
    node: &AnnotatedNode,
    ctx: &SubstitutionContext,
) -> Result<ConcreteNode, ExpansionError> {
    expand_node(node, ctx)
}

fn expand_node(
    node: &AnnotatedNode,
    ctx: &SubstitutionContext,
) -> Result<ConcreteNode, ExpansionError> {
    match node {
        AnnotatedNode::Mapping(map) => {
            let mut out = BTreeMap::new();
            for (key, value) in map {
                let key = ctx.apply(key);
                let value = expand_node(value, ctx)?;
                if out.insert(key.clone(), value).is_some() {
                    return Err(ExpansionError::DuplicateKey(key));
                }
            }
            Ok(ConcreteNode::Mapping(out))
        }
        AnnotatedNode::Sequence(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                match item {
                    // Copies are spliced into the enclosing sequence.
                    AnnotatedNode::Replicate(replication) => {
                        out.extend(replicate(replication, ctx)?)
                    }
                    other => out.push(expand_node(other, ctx)?),
                }
            }
            Ok(ConcreteNode::Sequence(out))
        }
        AnnotatedNode::Text(s) => Ok(ConcreteNode::Text(ctx.apply(s))),
        AnnotatedNode::Handler(handler) => bind_handler(handler, ctx),
        AnnotatedNode::Replicate(replication) => {
            replicate(replication, ctx).map(ConcreteNode::Sequence)
        }
        AnnotatedNode::Scalar(scalar) => Ok(ConcreteNode::Scalar(scalar.clone())),
    }
}

fn replicate(
    replication: &Replication,
    ctx: &SubstitutionContext,
) -> Result<Vec<ConcreteNode>, ExpansionError> {
    let token = &replication.template_string;
    if token.is_empty() {
        return Err(ExpansionError::EmptyToken);
    }
    if replication.pool_size < 0 {
        return Err(ExpansionError::NegativePoolSize {
            token: token.clone(),
            pool_size: replication.pool_size,
        });
    }
    if ctx.binds(token) {
        return Err(ExpansionError::TokenCollision(token.clone()));
    }

    debug!(
        token = %token,
        pool_size = replication.pool_size,
        depth = ctx.bindings().len(),
        "Expanding replication"
    );

    // Each copy is built from scratch under its own context; no output
    // container is shared between copies.
    (0..replication.pool_size as usize)
        .map(|index| {
            let branch_ctx = ctx.extended(token, index);
            expand_node(&replication.node, &branch_ctx)
        })
        .collect()
}

fn bind_handler(
    handler: &Arc<dyn TaskHandler>,
    ctx: &SubstitutionContext,
) -> Result<ConcreteNode, ExpansionError> {
    if ctx.is_empty() {
        return Ok(ConcreteNode::Handler(Arc::clone(handler)));
    }
    if !handler.accepts_branch_index() {
        return Err(ExpansionError::HandlerArity(handler.name().to_string()));
    }
    Ok(ConcreteNode::Handler(BoundHandler::bind(
        Arc::clone(handler),
        ctx.branch_index(),
    )))
}
