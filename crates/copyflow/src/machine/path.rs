//! Context-document paths (`$`, `$.status.check_count`).

use serde_json::{Map, Value};

/// A `$`-rooted dotted path into the context document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextPath {
    segments: Vec<String>,
}

impl ContextPath {
    /// The whole document.
    pub fn root() -> Self {
        Self {
            segments: Vec::new(),
        }
    }

    pub fn parse(path: &str) -> Result<Self, String> {
        let rest = path
            .strip_prefix('$')
            .ok_or_else(|| format!("path '{}' must start with '$'", path))?;
        if rest.is_empty() {
            return Ok(Self::root());
        }

        let rest = rest
            .strip_prefix('.')
            .ok_or_else(|| format!("path '{}' must continue with '.' after '$'", path))?;
        let segments: Vec<String> = rest.split('.').map(str::to_string).collect();
        if segments.iter().any(|s| s.is_empty()) {
            return Err(format!("path '{}' has an empty segment", path));
        }
        Ok(Self { segments })
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn read<'v>(&self, doc: &'v Value) -> Option<&'v Value> {
        self.segments
            .iter()
            .try_fold(doc, |value, segment| value.get(segment.as_str()))
    }

    /// Write `value` at this path, creating intermediate objects.
    ///
    /// Fails if an intermediate value exists and is not an object.
    pub fn write(&self, doc: &mut Value, value: Value) -> Result<(), String> {
        let Some((last, parents)) = self.segments.split_last() else {
            *doc = value;
            return Ok(());
        };

        let mut cursor: &mut Value = doc;
        for segment in parents {
            if cursor.is_null() {
                *cursor = Value::Object(Map::new());
            }
            cursor = match cursor {
                Value::Object(map) => map.entry(segment.clone()).or_insert(Value::Null),
                _ => return Err(format!("cannot descend into '{}' of {}", segment, self)),
            };
        }

        if cursor.is_null() {
            *cursor = Value::Object(Map::new());
        }
        match cursor {
            Value::Object(map) => {
                map.insert(last.clone(), value);
                Ok(())
            }
            _ => Err(format!("cannot write '{}' of {}", last, self)),
        }
    }
}

impl std::fmt::Display for ContextPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "$")?;
        for segment in &self.segments {
            write!(f, ".{}", segment)?;
        }
        Ok(())
    }
}
