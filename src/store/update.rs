//! Update operators: `$set`, `$unset`, `$pull`, `$push`
//!
//! Targets are dotted paths that may contain positional segments: `$[]`
//! visits every element of an array and `$[id]` visits the elements that
//! match the array filter bound to `id`.

use serde_json::{Map, Value};

use super::filter::{is_operator_object, matches, matches_condition, values_equal, QueryError};

/// Apply an update document to `doc`, returning whether anything changed
pub fn apply_update(doc: &mut Value, update: &Value, array_filters: &[Value]) -> Result<bool, QueryError> {
    let Value::Object(operators) = update else {
        return Err(QueryError("update must be an object of update operators".into()));
    };
    let filters = ArrayFilters(array_filters);
    let mut modified = false;

    for (op, fields) in operators {
        let Value::Object(fields) = fields else {
            return Err(QueryError(format!("<{op}> expects an object of paths")));
        };
        for (path, arg) in fields {
            let parts: Vec<&str> = path.split('.').collect();
            modified |= match op.as_str() {
                "$set" => for_each_target(doc, &parts, &filters, true, &mut |slot| Ok(set(slot, arg)))?,
                "$unset" => for_each_target(doc, &parts, &filters, false, &mut |slot| Ok(unset(slot)))?,
                "$pull" => for_each_target(doc, &parts, &filters, false, &mut |slot| pull(slot, arg))?,
                "$push" => for_each_target(doc, &parts, &filters, true, &mut |slot| push(slot, arg))?,
                other => return Err(QueryError(format!("unsupported update operator <{other}>"))),
            };
        }
    }
    Ok(modified)
}

struct ArrayFilters<'a>(&'a [Value]);

impl ArrayFilters<'_> {
    /// Whether `element` satisfies every array filter condition on `identifier`
    fn matches(&self, identifier: &str, element: &Value) -> Result<bool, QueryError> {
        let mut bound = false;
        for filter in self.0 {
            let Value::Object(conditions) = filter else {
                return Err(QueryError("array filters must be objects".into()));
            };
            for (key, condition) in conditions {
                let (head, rest) = match key.split_once('.') {
                    Some((head, rest)) => (head, Some(rest)),
                    None => (key.as_str(), None),
                };
                if head != identifier {
                    continue;
                }
                bound = true;
                let holds = match rest {
                    None => matches_condition(&[Some(element)], condition)?,
                    Some(rest) => {
                        let mut query = Map::new();
                        query.insert(rest.to_string(), condition.clone());
                        matches(element, &Value::Object(query))?
                    }
                };
                if !holds {
                    return Ok(false);
                }
            }
        }
        if !bound {
            return Err(QueryError(format!(
                "no array filter found for identifier <{identifier}>"
            )));
        }
        Ok(true)
    }
}

/// The location an operator writes to
enum Slot<'a> {
    Field(&'a mut Map<String, Value>, &'a str),
    Element(&'a mut Vec<Value>, usize),
}

enum Positional<'a> {
    All,
    Filtered(&'a str),
    Index(usize),
}

fn positional(part: &str) -> Option<Positional<'_>> {
    if part == "$[]" {
        return Some(Positional::All);
    }
    if let Some(identifier) = part.strip_prefix("$[").and_then(|p| p.strip_suffix(']')) {
        return Some(Positional::Filtered(identifier));
    }
    part.parse().ok().map(Positional::Index)
}

type Apply<'f> = dyn FnMut(Slot<'_>) -> Result<bool, QueryError> + 'f;

fn for_each_target(
    value: &mut Value,
    parts: &[&str],
    filters: &ArrayFilters<'_>,
    create: bool,
    apply: &mut Apply<'_>,
) -> Result<bool, QueryError> {
    let Some((head, rest)) = parts.split_first() else {
        return Ok(false);
    };

    match value {
        Value::Object(map) => {
            if rest.is_empty() {
                return apply(Slot::Field(map, *head));
            }
            let child = if create {
                map.entry(head.to_string())
                    .or_insert_with(|| Value::Object(Map::new()))
            } else {
                match map.get_mut(*head) {
                    Some(child) => child,
                    None => return Ok(false),
                }
            };
            for_each_target(child, rest, filters, create, apply)
        }
        Value::Array(items) => {
            let indices: Vec<usize> = match positional(head) {
                Some(Positional::All) => (0..items.len()).collect(),
                Some(Positional::Filtered(identifier)) => {
                    let mut selected = Vec::new();
                    for (index, item) in items.iter().enumerate() {
                        if filters.matches(identifier, item)? {
                            selected.push(index);
                        }
                    }
                    selected
                }
                Some(Positional::Index(index)) if index < items.len() => vec![index],
                Some(Positional::Index(_)) => Vec::new(),
                None => {
                    return Err(QueryError(format!(
                        "can't create field <{head}> in an array element"
                    )))
                }
            };

            let mut modified = false;
            for index in indices {
                modified |= if rest.is_empty() {
                    apply(Slot::Element(&mut *items, index))?
                } else {
                    for_each_target(&mut items[index], rest, filters, create, apply)?
                };
            }
            Ok(modified)
        }
        _ => Ok(false),
    }
}

fn set(slot: Slot<'_>, value: &Value) -> bool {
    match slot {
        Slot::Field(map, key) => {
            if map.get(key) == Some(value) {
                return false;
            }
            map.insert(key.to_string(), value.clone());
            true
        }
        Slot::Element(items, index) => {
            if items[index] == *value {
                return false;
            }
            items[index] = value.clone();
            true
        }
    }
}

fn unset(slot: Slot<'_>) -> bool {
    match slot {
        Slot::Field(map, key) => map.remove(key).is_some(),
        Slot::Element(items, index) => {
            let changed = !items[index].is_null();
            items[index] = Value::Null;
            changed
        }
    }
}

fn pull(slot: Slot<'_>, condition: &Value) -> Result<bool, QueryError> {
    let target = match slot {
        Slot::Field(map, key) => match map.get_mut(key) {
            Some(target) => target,
            None => return Ok(false),
        },
        Slot::Element(items, index) => &mut items[index],
    };
    let Value::Array(items) = target else {
        return Err(QueryError("<$pull> can only target arrays".into()));
    };

    let before = items.len();
    let mut kept = Vec::with_capacity(before);
    for item in items.drain(..) {
        let hit = if is_operator_object(condition) {
            matches_condition(&[Some(&item)], condition)?
        } else if condition.is_object() {
            item.is_object() && matches(&item, condition)?
        } else {
            values_equal(&item, condition)
        };
        if !hit {
            kept.push(item);
        }
    }
    let changed = kept.len() != before;
    *items = kept;
    Ok(changed)
}

fn push(slot: Slot<'_>, arg: &Value) -> Result<bool, QueryError> {
    let target = match slot {
        Slot::Field(map, key) => map
            .entry(key.to_string())
            .or_insert_with(|| Value::Array(Vec::new())),
        Slot::Element(items, index) => &mut items[index],
    };
    let Value::Array(items) = target else {
        return Err(QueryError("<$push> can only target arrays".into()));
    };
    match arg.get("$each") {
        Some(Value::Array(each)) => items.extend(each.iter().cloned()),
        Some(_) => return Err(QueryError("<$each> expects an array".into())),
        None => items.push(arg.clone()),
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn update(mut doc: Value, update: Value, filters: Value) -> (Value, bool) {
        let filters = filters.as_array().cloned().unwrap_or_default();
        let modified = apply_update(&mut doc, &update, &filters).unwrap();
        (doc, modified)
    }

    #[test]
    fn test_set_creates_nested_fields() {
        let (doc, modified) = update(json!({ "a": 1 }), json!({ "$set": { "b.c": 2 } }), json!([]));
        assert!(modified);
        assert_eq!(doc, json!({ "a": 1, "b": { "c": 2 } }));
    }

    #[test]
    fn test_set_same_value_is_not_a_modification() {
        let (_, modified) = update(json!({ "a": 1 }), json!({ "$set": { "a": 1 } }), json!([]));
        assert!(!modified);
    }

    #[test]
    fn test_unset_field() {
        let (doc, modified) = update(json!({ "a": 1, "b": 2 }), json!({ "$unset": { "a": 1 } }), json!([]));
        assert!(modified);
        assert_eq!(doc, json!({ "b": 2 }));
    }

    #[test]
    fn test_filtered_positional_set() {
        let (doc, _) = update(
            json!({ "items": [{ "product": "p1" }, { "product": "p2" }] }),
            json!({ "$set": { "items.$[f].product": null } }),
            json!([{ "f.product": { "$in": ["p2"] } }]),
        );
        assert_eq!(doc, json!({ "items": [{ "product": "p1" }, { "product": null }] }));
    }

    #[test]
    fn test_filtered_positional_unset_nested() {
        let (doc, _) = update(
            json!({ "a": [{ "b": [{ "c": "x" }, { "c": "y" }] }, { "b": [{ "c": "z" }] }] }),
            json!({ "$unset": { "a.$[].b.$[f].c": 1 } }),
            json!([{ "f.c": { "$in": ["y", "z"] } }]),
        );
        assert_eq!(doc, json!({ "a": [{ "b": [{ "c": "x" }, {}] }, { "b": [{}] }] }));
    }

    #[test]
    fn test_unset_element_sets_null() {
        let (doc, _) = update(
            json!({ "tags": ["a", "b"] }),
            json!({ "$unset": { "tags.$[f]": 1 } }),
            json!([{ "f": { "$in": ["a"] } }]),
        );
        assert_eq!(doc, json!({ "tags": [null, "b"] }));
    }

    #[test]
    fn test_pull_scalars_and_documents() {
        let (doc, _) = update(
            json!({ "books": ["b1", "b2", "b3"] }),
            json!({ "$pull": { "books": { "$in": ["b1", "b3"] } } }),
            json!([]),
        );
        assert_eq!(doc, json!({ "books": ["b2"] }));

        let (doc, _) = update(
            json!({ "items": [{ "product": "p1" }, { "product": "p2" }] }),
            json!({ "$pull": { "items": { "product": { "$in": ["p1"] } } } }),
            json!([]),
        );
        assert_eq!(doc, json!({ "items": [{ "product": "p2" }] }));
    }

    #[test]
    fn test_pull_through_all_positional() {
        let (doc, _) = update(
            json!({ "shelves": [{ "books": ["b1", "b2"] }, { "books": ["b1"] }] }),
            json!({ "$pull": { "shelves.$[].books": { "$in": ["b1"] } } }),
            json!([]),
        );
        assert_eq!(doc, json!({ "shelves": [{ "books": ["b2"] }, { "books": [] }] }));
    }

    #[test]
    fn test_push() {
        let (doc, _) = update(json!({}), json!({ "$push": { "tags": "a" } }), json!([]));
        assert_eq!(doc, json!({ "tags": ["a"] }));
        let (doc, _) = update(doc, json!({ "$push": { "tags": { "$each": ["b", "c"] } } }), json!([]));
        assert_eq!(doc, json!({ "tags": ["a", "b", "c"] }));
    }

    #[test]
    fn test_errors() {
        let mut doc = json!({ "a": [1] });
        assert!(apply_update(&mut doc, &json!({ "$inc": { "a": 1 } }), &[]).is_err());
        assert!(apply_update(&mut doc, &json!({ "$set": { "a.$[g]": 1 } }), &[]).is_err());
        assert!(apply_update(&mut doc, &json!({ "$set": { "a.x": 1 } }), &[]).is_err());
    }
}
