//! Deep walk over JSON values
//!
//! [`map_deep`] rebuilds a value node by node. At every node the customizer
//! sees the value together with the stack of segments leading to it, and may
//! replace the whole subtree. Nodes it leaves alone are copied, recursing into
//! arrays and objects.

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt};
use serde_json::{Map, Value};

use crate::error::Result;
use crate::path::{push, Stack};

#[async_trait]
pub trait Customizer: Send {
    /// Replacement for `value`, or `None` to keep walking into it
    async fn visit(&mut self, value: &Value, stack: &Stack) -> Result<Option<Value>>;
}

/// Rebuild `value`, letting `customizer` replace any subtree
pub fn map_deep<'a, C>(value: &'a Value, stack: Stack, customizer: &'a mut C) -> BoxFuture<'a, Result<Value>>
where
    C: Customizer + ?Sized,
{
    async move {
        if let Some(replaced) = customizer.visit(value, &stack).await? {
            return Ok(replaced);
        }
        match value {
            Value::Array(items) => {
                let mut mapped = Vec::with_capacity(items.len());
                for (index, item) in items.iter().enumerate() {
                    mapped.push(map_deep(item, push(&stack, index), &mut *customizer).await?);
                }
                Ok(Value::Array(mapped))
            }
            Value::Object(fields) => {
                let mut mapped = Map::new();
                for (key, field) in fields {
                    let child = map_deep(field, push(&stack, key.as_str()), &mut *customizer).await?;
                    mapped.insert(key.clone(), child);
                }
                Ok(Value::Object(mapped))
            }
            other => Ok(other.clone()),
        }
    }
    .boxed()
}
