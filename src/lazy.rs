//! Deferred document sets
//!
//! A [`LazyDocuments`] stands for the documents of one collection matching a
//! conjunction of filter queries. Nothing is read until it is fetched, so a
//! selector can keep narrowing it first.

use serde_json::{json, Value};
use tracing::debug;

use crate::collection::Collection;
use crate::error::Result;
use crate::store::FindOptions;

#[derive(Debug, Clone)]
pub struct LazyDocuments {
    collection: Collection,
    queries: Vec<Value>,
    projection: Option<Vec<String>>,
}

impl LazyDocuments {
    pub fn new(collection: Collection, query: Value) -> Self {
        Self {
            collection,
            queries: vec![query],
            projection: None,
        }
    }

    /// Fields to read when the set is fetched
    pub fn with_projection(mut self, projection: Option<Vec<String>>) -> Self {
        self.projection = projection;
        self
    }

    pub fn collection(&self) -> &Collection {
        &self.collection
    }

    pub fn queries(&self) -> &[Value] {
        &self.queries
    }

    /// A new set further restricted by `query`
    pub fn extend(&self, query: Value) -> Self {
        let mut extended = self.clone();
        extended.queries.push(query);
        extended
    }

    /// The combined filter query. A single conjunct is used as is.
    pub fn query(&self) -> Value {
        match self.queries.as_slice() {
            [] => json!({}),
            [query] => query.clone(),
            queries => json!({ "$and": queries }),
        }
    }

    fn options(&self) -> FindOptions {
        FindOptions {
            projection: self.projection.clone(),
            ..Default::default()
        }
    }

    pub async fn fetch(&self) -> Result<Vec<Value>> {
        let query = self.query();
        debug!(collection = self.collection.name(), query = %query, "fetching lazy documents");
        self.collection.find_with(&query, self.options()).await
    }

    /// The document at `index` in fetch order, or null past the end
    pub async fn fetch_one(&self, index: usize) -> Result<Value> {
        let query = self.query();
        debug!(collection = self.collection.name(), query = %query, index, "fetching one lazy document");
        let options = self.options().skip(index).limit(1);
        let found = self.collection.find_with(&query, options).await?;
        Ok(found.into_iter().next().unwrap_or(Value::Null))
    }
}
