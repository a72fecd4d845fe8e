//! Traversal stacks and canonical keys

use serde_json::Value;
use std::fmt;

/// One step of a traversal through a document
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Segment {
    Key(String),
    Index(usize),
}

/// The path from the root of a document to the value being visited
pub type Stack = Vec<Segment>;

impl From<&str> for Segment {
    fn from(key: &str) -> Self {
        Segment::Key(key.to_string())
    }
}

impl From<String> for Segment {
    fn from(key: String) -> Self {
        Segment::Key(key)
    }
}

impl From<usize> for Segment {
    fn from(index: usize) -> Self {
        Segment::Index(index)
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Segment::Key(key) => f.write_str(key),
            Segment::Index(index) => write!(f, "{index}"),
        }
    }
}

/// Copy of `stack` with one more segment
pub fn push(stack: &[Segment], segment: impl Into<Segment>) -> Stack {
    let mut next = stack.to_vec();
    next.push(segment.into());
    next
}

/// Canonical key of a stack: the named segments joined by dots.
///
/// Array indices and `$`-prefixed markers are left out, so every element of
/// an array maps to the same foreign key.
pub fn stack_to_key(stack: &[Segment]) -> String {
    stack
        .iter()
        .filter_map(|segment| match segment {
            Segment::Key(key) if !key.starts_with('$') => Some(key.as_str()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join(".")
}

/// Canonical key of a foreign key path such as `books.$.id`
pub fn path_to_key(path: &[String]) -> String {
    path.iter()
        .filter(|segment| segment.as_str() != "$")
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join(".")
}

/// Read a dotted path, with numeric segments indexing arrays
pub fn get_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return Some(value);
    }
    path.split('.').try_fold(value, |current, part| match current {
        Value::Object(map) => map.get(part),
        Value::Array(items) => part.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

/// Collect every value found at a foreign key path, descending into arrays
/// at `$` segments. Missing fields and nulls are skipped; a terminal array is
/// flattened since it holds several keys.
pub fn values_at(value: &Value, path: &[String]) -> Vec<Value> {
    let mut found = Vec::new();
    collect_values(value, path, &mut found);
    found
}

fn collect_values(value: &Value, path: &[String], found: &mut Vec<Value>) {
    let Some((head, rest)) = path.split_first() else {
        match value {
            Value::Null => {}
            Value::Array(items) => found.extend(items.iter().filter(|v| !v.is_null()).cloned()),
            other => found.push(other.clone()),
        }
        return;
    };
    match (head.as_str(), value) {
        ("$", Value::Array(items)) => {
            for item in items {
                collect_values(item, rest, found);
            }
        }
        ("$", _) => {}
        (key, Value::Object(map)) => {
            if let Some(child) = map.get(key) {
                collect_values(child, rest, found);
            }
        }
        _ => {}
    }
}
