//! Annotated and concrete document trees.

use std::collections::BTreeMap;
use std::sync::Arc;

use copyflow_tasks::{HandlerResolver, TaskHandler};
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Serialize, Serializer};
use serde_json::Value;

use super::error::ExpansionError;

/// Annotation key for a task handler reference.
pub const HANDLER_ANNOTATION: &str = "$handler";
/// Annotation key for a replication.
pub const REPLICATE_ANNOTATION: &str = "$replicate";

/// Pass-through literal: number, boolean or null.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Null,
    Bool(bool),
    Number(serde_json::Number),
}

impl Scalar {
    pub fn to_json(&self) -> Value {
        match self {
            Scalar::Null => Value::Null,
            Scalar::Bool(b) => Value::Bool(*b),
            Scalar::Number(n) => Value::Number(n.clone()),
        }
    }
}

impl From<i64> for Scalar {
    fn from(n: i64) -> Self {
        Scalar::Number(n.into())
    }
}

impl From<u64> for Scalar {
    fn from(n: u64) -> Self {
        Scalar::Number(n.into())
    }
}

impl From<bool> for Scalar {
    fn from(b: bool) -> Self {
        Scalar::Bool(b)
    }
}

/// Request to instantiate `node` `pool_size` times.
///
/// Copy `i` sees every occurrence of `template_string` replaced by `i`.
#[derive(Debug, Clone)]
pub struct Replication {
    pub template_string: String,
    pub pool_size: i64,
    pub node: Box<AnnotatedNode>,
}

impl Replication {
    pub fn new(template_string: impl Into<String>, pool_size: i64, node: AnnotatedNode) -> Self {
        Self {
            template_string: template_string.into(),
            pool_size,
            node: Box::new(node),
        }
    }
}

/// A workflow-definition fragment that may still contain annotations.
#[derive(Debug, Clone)]
pub enum AnnotatedNode {
    /// Unique keys to values; key order carries no meaning.
    Mapping(BTreeMap<String, AnnotatedNode>),
    /// Ordered elements.
    Sequence(Vec<AnnotatedNode>),
    /// String that may contain replication tokens.
    Text(String),
    Handler(Arc<dyn TaskHandler>),
    Replicate(Replication),
    Scalar(Scalar),
}

impl AnnotatedNode {
    pub fn text(s: impl Into<String>) -> Self {
        AnnotatedNode::Text(s.into())
    }

    pub fn handler(handler: Arc<dyn TaskHandler>) -> Self {
        AnnotatedNode::Handler(handler)
    }

    pub fn replicate(template_string: impl Into<String>, pool_size: i64, node: AnnotatedNode) -> Self {
        AnnotatedNode::Replicate(Replication::new(template_string, pool_size, node))
    }

    pub fn mapping<K, I>(entries: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, AnnotatedNode)>,
    {
        AnnotatedNode::Mapping(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    pub fn sequence(items: impl IntoIterator<Item = AnnotatedNode>) -> Self {
        AnnotatedNode::Sequence(items.into_iter().collect())
    }

    /// Convert plain JSON into an annotation-free tree.
    ///
    /// `$`-prefixed keys are kept as ordinary keys.
    pub fn from_json(value: Value) -> Self {
        match value {
            Value::Null => AnnotatedNode::Scalar(Scalar::Null),
            Value::Bool(b) => AnnotatedNode::Scalar(Scalar::Bool(b)),
            Value::Number(n) => AnnotatedNode::Scalar(Scalar::Number(n)),
            Value::String(s) => AnnotatedNode::Text(s),
            Value::Array(items) => {
                AnnotatedNode::Sequence(items.into_iter().map(Self::from_json).collect())
            }
            Value::Object(map) => AnnotatedNode::Mapping(
                map.into_iter().map(|(k, v)| (k, Self::from_json(v))).collect(),
            ),
        }
    }

    /// Parse JSON carrying annotations.
    ///
    /// An object with a single `$`-prefixed key is an annotation:
    ///
    /// ```json
    /// {"$handler": "copyflow-notify"}
    /// {"$replicate": {"template_string": "{shard}", "pool_size": 4, "node": {}}}
    /// ```
    ///
    /// Handler names are resolved through `resolver`.
    pub fn from_value(value: Value, resolver: &dyn HandlerResolver) -> Result<Self, ExpansionError> {
        match value {
            Value::Array(items) => items
                .into_iter()
                .map(|item| Self::from_value(item, resolver))
                .collect::<Result<Vec<_>, _>>()
                .map(AnnotatedNode::Sequence),
            Value::Object(map) => {
                let annotation = match map.keys().next() {
                    Some(key) if map.len() == 1 && key.starts_with('$') => Some(key.clone()),
                    _ => None,
                };

                match annotation {
                    Some(key) => {
                        let body = map.into_iter().next().map(|(_, v)| v).unwrap_or(Value::Null);
                        parse_annotation(&key, body, resolver)
                    }
                    None => map
                        .into_iter()
                        .map(|(k, v)| -> Result<(String, AnnotatedNode), ExpansionError> {
                            Ok((k, Self::from_value(v, resolver)?))
                        })
                        .collect::<Result<BTreeMap<_, _>, _>>()
                        .map(AnnotatedNode::Mapping),
                }
            }
            other => Ok(Self::from_json(other)),
        }
    }

    /// Mutable access to a mapping entry.
    pub fn get_mut(&mut self, key: &str) -> Option<&mut AnnotatedNode> {
        match self {
            AnnotatedNode::Mapping(map) => map.get_mut(key),
            _ => None,
        }
    }

    /// Insert into a mapping; returns `false` if this node is not a mapping.
    pub fn insert(&mut self, key: impl Into<String>, node: AnnotatedNode) -> bool {
        match self {
            AnnotatedNode::Mapping(map) => {
                map.insert(key.into(), node);
                true
            }
            _ => false,
        }
    }
}

fn parse_annotation(
    key: &str,
    body: Value,
    resolver: &dyn HandlerResolver,
) -> Result<AnnotatedNode, ExpansionError> {
    let malformed = |reason: &str| ExpansionError::MalformedAnnotation {
        annotation: key.to_string(),
        reason: reason.to_string(),
    };

    match key {
        HANDLER_ANNOTATION => {
            let name = body.as_str().ok_or_else(|| malformed("expected a handler name"))?;
            resolver
                .resolve(name)
                .map(AnnotatedNode::Handler)
                .ok_or_else(|| ExpansionError::UnknownHandler(name.to_string()))
        }
        REPLICATE_ANNOTATION => {
            let Value::Object(mut fields) = body else {
                return Err(malformed("expected an object"));
            };
            let template_string = fields
                .get("template_string")
                .and_then(Value::as_str)
                .ok_or_else(|| malformed("missing string field 'template_string'"))?
                .to_string();
            let pool_size = fields
                .get("pool_size")
                .and_then(Value::as_i64)
                .ok_or_else(|| malformed("missing integer field 'pool_size'"))?;
            let node = fields
                .remove("node")
                .ok_or_else(|| malformed("missing field 'node'"))?;

            Ok(AnnotatedNode::Replicate(Replication::new(
                template_string,
                pool_size,
                AnnotatedNode::from_value(node, resolver)?,
            )))
        }
        other => Err(ExpansionError::UnhandledAnnotation(other.to_string())),
    }
}

/// A fully expanded fragment, ready for serialization.
#[derive(Debug, Clone)]
pub enum ConcreteNode {
    Mapping(BTreeMap<String, ConcreteNode>),
    Sequence(Vec<ConcreteNode>),
    Text(String),
    /// Handler as written, or bound to a branch index.
    Handler(Arc<dyn TaskHandler>),
    Scalar(Scalar),
}

impl ConcreteNode {
    /// JSON form; handlers become their resource identifiers.
    pub fn to_json(&self) -> Value {
        match self {
            ConcreteNode::Mapping(map) => Value::Object(
                map.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
            ConcreteNode::Sequence(items) => {
                Value::Array(items.iter().map(ConcreteNode::to_json).collect())
            }
            ConcreteNode::Text(s) => Value::String(s.clone()),
            ConcreteNode::Handler(h) => Value::String(h.name().to_string()),
            ConcreteNode::Scalar(s) => s.to_json(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&ConcreteNode> {
        match self {
            ConcreteNode::Mapping(map) => map.get(key),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ConcreteNode::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_sequence(&self) -> Option<&[ConcreteNode]> {
        match self {
            ConcreteNode::Sequence(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_handler(&self) -> Option<&Arc<dyn TaskHandler>> {
        match self {
            ConcreteNode::Handler(h) => Some(h),
            _ => None,
        }
    }

    /// All handler leaves, in document order.
    pub fn handlers(&self) -> Vec<Arc<dyn TaskHandler>> {
        let mut found = Vec::new();
        self.collect_handlers(&mut found);
        found
    }

    fn collect_handlers(&self, found: &mut Vec<Arc<dyn TaskHandler>>) {
        match self {
            ConcreteNode::Mapping(map) => map.values().for_each(|v| v.collect_handlers(found)),
            ConcreteNode::Sequence(items) => items.iter().for_each(|v| v.collect_handlers(found)),
            ConcreteNode::Handler(h) => found.push(Arc::clone(h)),
            ConcreteNode::Text(_) | ConcreteNode::Scalar(_) => {}
        }
    }
}

impl Serialize for ConcreteNode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            ConcreteNode::Mapping(map) => {
                let mut out = serializer.serialize_map(Some(map.len()))?;
                for (k, v) in map {
                    out.serialize_entry(k, v)?;
                }
                out.end()
            }
            ConcreteNode::Sequence(items) => {
                let mut out = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    out.serialize_element(item)?;
                }
                out.end()
            }
            ConcreteNode::Text(s) => serializer.serialize_str(s),
            ConcreteNode::Handler(h) => serializer.serialize_str(h.name()),
            ConcreteNode::Scalar(s) => s.to_json().serialize(serializer),
        }
    }
}
