//! Inclusion projections on dotted paths

use serde_json::{Map, Value};

/// Field every projection keeps
pub const ID_FIELD: &str = "_id";

/// Drop duplicates and every path lying under another one, so `items`
/// absorbs `items.name`. First occurrences keep their order.
pub fn absorb_prefixes(paths: impl IntoIterator<Item = String>) -> Vec<String> {
    let paths: Vec<String> = paths.into_iter().collect();
    let mut kept: Vec<String> = Vec::with_capacity(paths.len());
    for path in &paths {
        let covered = paths.iter().any(|other| is_below(path, other));
        if !covered && !kept.contains(path) {
            kept.push(path.clone());
        }
    }
    kept
}

/// Whether `path` lies strictly under `parent`
fn is_below(path: &str, parent: &str) -> bool {
    path.len() > parent.len() && path.starts_with(parent) && path.as_bytes()[parent.len()] == b'.'
}

/// Keep only `paths` (and `_id`) of `doc`.
///
/// Paths traverse arrays element by element and every element keeps its
/// position: subdocuments are projected (to `{}` when the path is missing)
/// and anything else is kept whole. A path stopping on a null or scalar
/// keeps that value.
pub fn project(doc: &Value, paths: &[String]) -> Value {
    let mut result = Value::Object(Map::new());
    let paths = absorb_prefixes(std::iter::once(ID_FIELD.to_string()).chain(paths.iter().cloned()));
    for path in &paths {
        let parts: Vec<&str> = path.split('.').collect();
        if let Some(included) = include(doc, &parts) {
            merge(&mut result, included);
        }
    }
    result
}

fn include(value: &Value, parts: &[&str]) -> Option<Value> {
    let Some((head, rest)) = parts.split_first() else {
        return Some(value.clone());
    };
    match value {
        Value::Object(map) => {
            let child = include(map.get(*head)?, rest)?;
            let mut wrapped = Map::new();
            wrapped.insert(head.to_string(), child);
            Some(Value::Object(wrapped))
        }
        Value::Array(items) => Some(Value::Array(
            items
                .iter()
                .map(|item| include(item, parts).unwrap_or_else(|| Value::Object(Map::new())))
                .collect(),
        )),
        other => Some(other.clone()),
    }
}

/// Merge two projections of the same document. Arrays line up element by
/// element since projecting never moves an element.
fn merge(target: &mut Value, source: Value) {
    match (target, source) {
        (Value::Object(target), Value::Object(source)) => {
            for (key, value) in source {
                match target.get_mut(&key) {
                    Some(existing) => merge(existing, value),
                    None => {
                        target.insert(key, value);
                    }
                }
            }
        }
        (Value::Array(target), Value::Array(source)) => {
            for (existing, value) in target.iter_mut().zip(source) {
                merge(existing, value);
            }
        }
        (target, source) => *target = source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_project_fields() {
        let doc = json!({ "_id": "a1", "name": "Ursula", "born": 1929, "meta": { "x": 1, "y": 2 } });
        let projected = project(&doc, &["name".into(), "meta.y".into()]);
        assert_eq!(projected, json!({ "_id": "a1", "name": "Ursula", "meta": { "y": 2 } }));
    }

    #[test]
    fn test_project_through_arrays_keeps_positions() {
        let doc = json!({
            "_id": 1,
            "books": [{ "title": "A", "year": 1 }, { "year": 2 }, "loose", [{ "title": "B" }]]
        });
        let projected = project(&doc, &["books.title".into(), "books.year".into()]);
        assert_eq!(
            projected,
            json!({ "_id": 1, "books": [{ "title": "A", "year": 1 }, { "year": 2 }, "loose", [{ "title": "B" }]] })
        );

        let projected = project(&doc, &["books.title".into()]);
        assert_eq!(projected, json!({ "_id": 1, "books": [{ "title": "A" }, {}, "loose", [{ "title": "B" }]] }));
    }

    #[test]
    fn test_project_missing_path() {
        let doc = json!({ "_id": 1, "a": 1 });
        assert_eq!(project(&doc, &["b.c".into()]), json!({ "_id": 1 }));
    }

    #[test]
    fn test_null_and_scalar_intermediates_are_kept() {
        let doc = json!({ "_id": 1, "address": null, "code": 7, "other": true });
        let projected = project(&doc, &["address.city".into(), "code.digits".into()]);
        assert_eq!(projected, json!({ "_id": 1, "address": null, "code": 7 }));
    }

    #[test]
    fn test_overlapping_paths() {
        let doc = json!({ "_id": 1, "items": ["x", { "name": "n", "qty": 1 }] });
        let projected = project(&doc, &["items.name".into(), "items".into()]);
        assert_eq!(projected, doc);
    }

    #[test]
    fn test_absorb_prefixes() {
        let paths = ["items.name", "items", "name", "items.qty", "names", "name"].map(String::from);
        assert_eq!(absorb_prefixes(paths), vec!["items", "name", "names"]);
    }
}
