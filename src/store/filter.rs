//! Filter query evaluation
//!
//! Follows the usual document-database rules: a dotted path may traverse
//! arrays of subdocuments, equality against an array matches the whole array
//! or any element, and a null condition matches a missing field.

use regex::RegexBuilder;
use serde_json::{Map, Value};
use std::cmp::Ordering;
use thiserror::Error;

/// A malformed filter query
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{0}")]
pub struct QueryError(pub String);

pub type MatchResult = std::result::Result<bool, QueryError>;

/// Evaluate a filter query against a document
pub fn matches(doc: &Value, filter: &Value) -> MatchResult {
    let Value::Object(filter) = filter else {
        return Err(QueryError(format!("filter query must be an object, got <{filter}>")));
    };
    for (key, condition) in filter {
        let holds = match key.as_str() {
            "$and" => logical(doc, condition, key)?.iter().all(|b| *b),
            "$or" => logical(doc, condition, key)?.iter().any(|b| *b),
            "$nor" => !logical(doc, condition, key)?.iter().any(|b| *b),
            op if op.starts_with('$') => {
                return Err(QueryError(format!("unsupported top-level operator <{op}>")))
            }
            path => {
                let candidates = lookup(doc, path);
                matches_condition(&candidates, condition)?
            }
        };
        if !holds {
            return Ok(false);
        }
    }
    Ok(true)
}

fn logical(doc: &Value, clauses: &Value, op: &str) -> Result<Vec<bool>, QueryError> {
    let Value::Array(clauses) = clauses else {
        return Err(QueryError(format!("<{op}> expects an array of filter queries")));
    };
    clauses.iter().map(|clause| matches(doc, clause)).collect()
}

/// Values found at a dotted path; `None` stands for a missing field
pub fn lookup<'a>(doc: &'a Value, path: &str) -> Vec<Option<&'a Value>> {
    let parts: Vec<&str> = path.split('.').collect();
    let mut found = Vec::new();
    collect(doc, &parts, &mut found);
    found
}

fn collect<'a>(value: &'a Value, parts: &[&str], found: &mut Vec<Option<&'a Value>>) {
    let Some((head, rest)) = parts.split_first() else {
        found.push(Some(value));
        return;
    };
    match value {
        Value::Object(map) => match map.get(*head) {
            Some(child) => collect(child, rest, found),
            None => found.push(None),
        },
        Value::Array(items) => {
            let before = found.len();
            if let Some(item) = head.parse::<usize>().ok().and_then(|i| items.get(i)) {
                collect(item, rest, found);
            }
            for item in items.iter().filter(|item| item.is_object()) {
                collect(item, parts, found);
            }
            if found.len() == before {
                found.push(None);
            }
        }
        _ => found.push(None),
    }
}

/// Whether `condition` is an operator object like `{ "$in": [...] }`
pub fn is_operator_object(condition: &Value) -> bool {
    match condition {
        Value::Object(map) => !map.is_empty() && map.keys().all(|k| k.starts_with('$')),
        _ => false,
    }
}

/// Evaluate the condition of one field against its candidate values
pub fn matches_condition(candidates: &[Option<&Value>], condition: &Value) -> MatchResult {
    match condition {
        Value::Object(ops) if is_operator_object(condition) => {
            for (op, arg) in ops {
                if !operator_holds(op, arg, ops, candidates)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        target => Ok(candidates.iter().any(|c| equals_candidate(*c, target))),
    }
}

fn operator_holds(
    op: &str,
    arg: &Value,
    siblings: &Map<String, Value>,
    candidates: &[Option<&Value>],
) -> MatchResult {
    let any = |test: &dyn Fn(&Value) -> bool| {
        candidates
            .iter()
            .flatten()
            .copied()
            .any(|value| match value {
                Value::Array(items) => test(value) || items.iter().any(|item| test(item)),
                other => test(other),
            })
    };

    let holds = match op {
        "$eq" => candidates.iter().any(|c| equals_candidate(*c, arg)),
        "$ne" => !candidates.iter().any(|c| equals_candidate(*c, arg)),
        "$in" => {
            let list = as_list(op, arg)?;
            candidates
                .iter()
                .any(|c| list.iter().any(|target| equals_candidate(*c, target)))
        }
        "$nin" => {
            let list = as_list(op, arg)?;
            !candidates
                .iter()
                .any(|c| list.iter().any(|target| equals_candidate(*c, target)))
        }
        "$gt" => any(&|v| compare(v, arg) == Some(Ordering::Greater)),
        "$gte" => any(&|v| matches!(compare(v, arg), Some(Ordering::Greater | Ordering::Equal))),
        "$lt" => any(&|v| compare(v, arg) == Some(Ordering::Less)),
        "$lte" => any(&|v| matches!(compare(v, arg), Some(Ordering::Less | Ordering::Equal))),
        "$exists" => {
            let present = candidates.iter().any(Option::is_some);
            present == truthy(arg)
        }
        "$size" => {
            let size = arg
                .as_u64()
                .ok_or_else(|| QueryError("<$size> expects a non-negative integer".into()))?;
            candidates
                .iter()
                .flatten()
                .any(|v| v.as_array().is_some_and(|items| items.len() as u64 == size))
        }
        "$elemMatch" => {
            let mut found = false;
            for items in candidates.iter().flatten().filter_map(|v| v.as_array()) {
                for item in items {
                    let hit = if is_operator_object(arg) {
                        matches_condition(&[Some(item)], arg)?
                    } else {
                        item.is_object() && matches(item, arg)?
                    };
                    if hit {
                        found = true;
                        break;
                    }
                }
            }
            found
        }
        "$regex" => {
            let pattern = arg
                .as_str()
                .ok_or_else(|| QueryError("<$regex> expects a string".into()))?;
            let options = siblings.get("$options").and_then(Value::as_str).unwrap_or("");
            let regex = RegexBuilder::new(pattern)
                .case_insensitive(options.contains('i'))
                .multi_line(options.contains('m'))
                .dot_matches_new_line(options.contains('s'))
                .ignore_whitespace(options.contains('x'))
                .build()
                .map_err(|e| QueryError(format!("invalid <$regex>: {e}")))?;
            any(&|v| v.as_str().is_some_and(|s| regex.is_match(s)))
        }
        "$options" => true,
        "$not" => {
            if !is_operator_object(arg) {
                return Err(QueryError("<$not> expects an operator object".into()));
            }
            !matches_condition(candidates, arg)?
        }
        other => return Err(QueryError(format!("unsupported operator <{other}>"))),
    };
    Ok(holds)
}

fn as_list<'a>(op: &str, arg: &'a Value) -> Result<&'a Vec<Value>, QueryError> {
    arg.as_array()
        .ok_or_else(|| QueryError(format!("<{op}> expects an array")))
}

fn equals_candidate(candidate: Option<&Value>, target: &Value) -> bool {
    match candidate {
        None => target.is_null(),
        Some(whole @ Value::Array(items)) => {
            values_equal(whole, target) || items.iter().any(|item| values_equal(item, target))
        }
        Some(value) => values_equal(value, target),
    }
}

/// Structural equality where numbers compare by value
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_f64(), y.as_f64()) {
            (Some(x), Some(y)) => x == y,
            _ => x == y,
        },
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(a, b)| values_equal(a, b))
        }
        (Value::Object(x), Value::Object(y)) => {
            x.len() == y.len()
                && x.iter()
                    .zip(y)
                    .all(|((ka, va), (kb, vb))| ka == kb && values_equal(va, vb))
        }
        _ => a == b,
    }
}

/// Ordering between values of the same kind
pub fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Null => false,
        Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
        _ => true,
    }
}
