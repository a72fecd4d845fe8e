//! Filter query normalization
//!
//! At a foreign key, `$in` and `$nin` may hold a filter query on the
//! referenced collection instead of keys, or a list mixing both:
//!
//! ```text
//! { "author": { "$in": { "name": "Ursula" } } }
//! { "author": { "$nin": ["a1", { "born": { "$lt": 1900 } }] } }
//! ```
//!
//! Such queries are run first and replaced by the keys they match, leaving a
//! plain filter the store understands.

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::collection::Collection;
use crate::error::{Error, Result};
use crate::path::{stack_to_key, Stack};
use crate::walk::{map_deep, Customizer};

const KEY_SET_OPERATORS: [&str; 2] = ["$in", "$nin"];

/// Replace foreign filter queries in `filter` by the keys they match
pub async fn normalize_filter_query(collection: &Collection, filter: &Value) -> Result<Value> {
    if collection.foreign_keys().is_empty() {
        return Ok(filter.clone());
    }
    map_deep(filter, Stack::new(), &mut ForeignQueries { collection }).await
}

struct ForeignQueries<'a> {
    collection: &'a Collection,
}

#[async_trait]
impl Customizer for ForeignQueries<'_> {
    async fn visit(&mut self, value: &Value, stack: &Stack) -> Result<Option<Value>> {
        let Value::Object(condition) = value else {
            return Ok(None);
        };
        if !KEY_SET_OPERATORS.iter().any(|op| condition.contains_key(*op)) {
            return Ok(None);
        }
        let Some(foreign_key) = self.collection.foreign_keys().get(&stack_to_key(stack)) else {
            return Ok(None);
        };

        let target = self.collection.database().collection(&foreign_key.collection);
        let mut normalized = Map::new();
        for (op, arg) in condition {
            let arg = if KEY_SET_OPERATORS.contains(&op.as_str()) {
                Value::Array(matching_keys(self.collection, &target, op, arg).await?)
            } else {
                arg.clone()
            };
            normalized.insert(op.clone(), arg);
        }
        Ok(Some(Value::Object(normalized)))
    }
}

/// Keys given directly plus the keys of documents matched by queries
async fn matching_keys(collection: &Collection, target: &Collection, op: &str, arg: &Value) -> Result<Vec<Value>> {
    match arg {
        Value::Object(_) => target.keys(arg).await,
        Value::Array(items) => {
            let mut keys = Vec::with_capacity(items.len());
            for item in items {
                if item.is_object() {
                    keys.extend(target.keys(item).await?);
                } else {
                    keys.push(item.clone());
                }
            }
            Ok(keys)
        }
        other => Err(Error::invalid_query(
            collection.name(),
            format!("<{op}> expects keys or a filter query on collection '{}', got {other}", target.name()),
        )),
    }
}
