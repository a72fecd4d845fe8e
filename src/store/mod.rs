//! Document store collaborator
//!
//! docrel never stores documents itself. Every read and write goes through a
//! [`DocumentStore`], which evaluates filter queries and applies update
//! operators. [`MemoryStore`] is the in-process implementation.

pub mod filter;
pub mod memory;
pub mod projection;
pub mod update;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use crate::error::Result;

pub use memory::MemoryStore;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindOptions {
    pub skip: usize,
    pub limit: Option<usize>,
    /// Inclusion projection on dotted paths, all fields when `None`
    pub projection: Option<Vec<String>>,
}

impl FindOptions {
    pub fn skip(mut self, skip: usize) -> Self {
        self.skip = skip;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn projection(mut self, paths: Vec<String>) -> Self {
        self.projection = Some(paths);
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateOptions {
    /// Update every matching document instead of the first one
    pub multi: bool,
    pub array_filters: Vec<Value>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UpdateResult {
    pub matched: usize,
    pub modified: usize,
}

/// A replaced document before and after the replacement
#[derive(Debug, Clone, PartialEq)]
pub struct Replaced {
    pub previous: Value,
    pub current: Value,
}

/// CRUD primitives of the underlying document database
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Documents matching `filter`, in insertion order
    async fn find(&self, collection: &str, filter: &Value, options: FindOptions) -> Result<Vec<Value>>;

    async fn find_one(&self, collection: &str, filter: &Value) -> Result<Option<Value>> {
        let found = self
            .find(collection, filter, FindOptions::default().limit(1))
            .await?;
        Ok(found.into_iter().next())
    }

    /// Number of matching documents, counting at most `limit`
    async fn count(&self, collection: &str, filter: &Value, limit: Option<usize>) -> Result<usize>;

    /// Insert a document and return it as stored, with its generated `_id`
    async fn insert_one(&self, collection: &str, doc: Value) -> Result<Value>;

    async fn insert_many(&self, collection: &str, docs: Vec<Value>) -> Result<Vec<Value>>;

    async fn update(
        &self,
        collection: &str,
        filter: &Value,
        update: &Value,
        options: UpdateOptions,
    ) -> Result<UpdateResult>;

    /// Replace the first matching document by `doc`, which keeps the `_id`
    /// of the document it replaces
    async fn replace_one(&self, collection: &str, filter: &Value, doc: Value) -> Result<Option<Replaced>>;

    /// Delete every matching document, returning how many were deleted
    async fn delete_many(&self, collection: &str, filter: &Value) -> Result<usize>;

    /// Remove a collection altogether. Returns whether it existed.
    async fn drop_collection(&self, collection: &str) -> Result<bool>;

    /// Names of the collections holding documents
    async fn collection_names(&self) -> Result<Vec<String>>;
}
