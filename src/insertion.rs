//! Inserts that honour foreign keys
//!
//! A document may carry whole documents where a foreign key is expected.
//! Those are inserted into the referenced collection first and replaced by
//! their keys. Every verified foreign key must then point at existing
//! documents. If anything fails, the documents inserted along the way are
//! deleted again.

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::collection::Collection;
use crate::error::{Error, Result};
use crate::path::{get_path, stack_to_key, values_at, Stack};
use crate::schema::InsertPolicy;
use crate::store::filter::values_equal;
use crate::store::Replaced;
use crate::walk::{map_deep, Customizer};
use crate::Database;

/// Documents inserted as dependencies of an insert still in progress
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DependencyCollector {
    inserted: Vec<(String, Value)>,
}

impl DependencyCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, collection: impl Into<String>, key: Value) {
        self.inserted.push((collection.into(), key));
    }

    /// Inserted `(collection, key)` pairs, oldest first
    pub fn entries(&self) -> &[(String, Value)] {
        &self.inserted
    }

    pub fn len(&self) -> usize {
        self.inserted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inserted.is_empty()
    }

    /// Delete every collected document, newest first. Nothing references
    /// them yet, so no propagation is involved.
    pub async fn rollback(&self, database: &Database) -> Result<()> {
        for (name, key) in self.inserted.iter().rev() {
            let collection = database.collection(name);
            let filter = json!({ collection.key(): key });
            database.store().delete_many(name, &filter).await?;
        }
        Ok(())
    }
}

/// Insert `docs` into `collection` along with their nested dependencies
pub(crate) async fn insert_documents(collection: &Collection, docs: Vec<Value>) -> Result<Vec<Value>> {
    let mut collector = DependencyCollector::new();
    let result = insert_with(collection, docs, &mut collector).await;
    settle(collection, &collector, result).await
}

async fn insert_with(
    collection: &Collection,
    docs: Vec<Value>,
    collector: &mut DependencyCollector,
) -> Result<Vec<Value>> {
    let mut prepared = Vec::with_capacity(docs.len());
    for doc in docs {
        prepared.push(prepare(collection, doc, collector).await?);
    }
    collection.store().insert_many(collection.name(), prepared).await
}

/// Replace the first document matching an already normalized `filter`,
/// inserting the dependencies nested in `doc` first
pub(crate) async fn replace_document(collection: &Collection, filter: &Value, doc: Value) -> Result<Option<Replaced>> {
    let mut collector = DependencyCollector::new();
    let result = replace_with(collection, filter, doc, &mut collector).await;
    if let Ok(None) = &result {
        // Nothing was replaced, so nothing refers to the nested documents
        collector.rollback(collection.database()).await?;
    }
    settle(collection, &collector, result).await
}

async fn replace_with(
    collection: &Collection,
    filter: &Value,
    doc: Value,
    collector: &mut DependencyCollector,
) -> Result<Option<Replaced>> {
    let doc = prepare(collection, doc, collector).await?;
    collection.store().replace_one(collection.name(), filter, doc).await
}

/// Roll the collected documents back when `result` failed. The failure is
/// returned either way; a failing rollback is only logged.
async fn settle<T>(collection: &Collection, collector: &DependencyCollector, result: Result<T>) -> Result<T> {
    if let Err(err) = &result {
        if !collector.is_empty() {
            warn!(
                collection = collection.name(),
                error = %err,
                dependencies = collector.len(),
                "insert failed, rolling back nested documents"
            );
            if let Err(rollback) = collector.rollback(collection.database()).await {
                warn!(
                    collection = collection.name(),
                    error = %rollback,
                    "rollback failed, nested documents were left behind"
                );
            }
        }
    }
    result
}

/// Replace nested documents by their keys, then verify the foreign keys
fn prepare<'a>(
    collection: &'a Collection,
    doc: Value,
    collector: &'a mut DependencyCollector,
) -> BoxFuture<'a, Result<Value>> {
    async move {
        let mut nested = NestedDocuments { collection, collector };
        let doc = map_deep(&doc, Stack::new(), &mut nested).await?;
        verify_foreign_keys(collection, &doc).await?;
        Ok(doc)
    }
    .boxed()
}

struct NestedDocuments<'a> {
    collection: &'a Collection,
    collector: &'a mut DependencyCollector,
}

#[async_trait]
impl Customizer for NestedDocuments<'_> {
    async fn visit(&mut self, value: &Value, stack: &Stack) -> Result<Option<Value>> {
        if !value.is_object() {
            return Ok(None);
        }
        let key = stack_to_key(stack);
        let Some(foreign_key) = self.collection.foreign_keys().get(&key) else {
            return Ok(None);
        };

        let target = self.collection.database().collection(&foreign_key.collection);
        let doc = prepare(&target, value.clone(), &mut *self.collector).await?;
        let stored = target.store().insert_one(target.name(), doc).await?;
        let Some(inserted_key) = get_path(&stored, target.key()).cloned() else {
            return Err(Error::ForeignKeyViolation {
                collection: self.collection.name().to_string(),
                foreign_key: key,
                message: format!(
                    "nested document has no '{}' key for collection '{}'",
                    target.key(),
                    target.name()
                ),
            });
        };
        self.collector.add(target.name(), inserted_key.clone());
        debug!(
            collection = self.collection.name(),
            foreign_key = %key,
            target = target.name(),
            "inserted nested document"
        );
        Ok(Some(inserted_key))
    }
}

/// Check every verified foreign key of `doc` points at existing documents.
/// Null and missing values are accepted.
pub async fn verify_foreign_keys(collection: &Collection, doc: &Value) -> Result<()> {
    for (key, foreign_key) in collection.foreign_keys() {
        if foreign_key.on_insert != InsertPolicy::Verify {
            continue;
        }
        let mut values: Vec<Value> = Vec::new();
        for value in values_at(doc, &foreign_key.path) {
            if !values.iter().any(|seen| values_equal(seen, &value)) {
                values.push(value);
            }
        }
        if values.is_empty() {
            continue;
        }

        let target = collection.database().collection(&foreign_key.collection);
        if !target.has_all_keys(&values).await? {
            return Err(Error::ForeignKeyViolation {
                collection: collection.name().to_string(),
                foreign_key: key.clone(),
                message: format!(
                    "some of {} don't match any document in collection '{}'",
                    Value::Array(values),
                    target.name()
                ),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{CollectionSchema, ForeignKeySchema, Schema};
    use crate::store::{DocumentStore, FindOptions, MemoryStore, UpdateOptions, UpdateResult};
    use std::sync::Arc;

    fn library() -> Database {
        library_on(Arc::new(fixture()))
    }

    fn fixture() -> MemoryStore {
        MemoryStore::from_fixture(json!({
            "authors": [{ "_id": "a1", "name": "Ursula", "publisher": null }],
            "publishers": [{ "_id": "p1", "name": "Ace" }]
        }))
        .unwrap()
    }

    fn library_on(store: Arc<dyn DocumentStore>) -> Database {
        let schema = Schema::new()
            .collection(
                "books",
                CollectionSchema::new()
                    .foreign_key("author", ForeignKeySchema::to("authors"))
                    .foreign_key("tags.$", ForeignKeySchema::to("tags").on_insert(InsertPolicy::Bypass)),
            )
            .collection(
                "authors",
                CollectionSchema::new().foreign_key("publisher", ForeignKeySchema::to("publishers")),
            );
        Database::with_schema(store, &schema).unwrap()
    }

    /// A store whose deletes always fail
    struct NoDeletes(MemoryStore);

    #[async_trait]
    impl DocumentStore for NoDeletes {
        async fn find(&self, collection: &str, filter: &Value, options: FindOptions) -> Result<Vec<Value>> {
            self.0.find(collection, filter, options).await
        }

        async fn count(&self, collection: &str, filter: &Value, limit: Option<usize>) -> Result<usize> {
            self.0.count(collection, filter, limit).await
        }

        async fn insert_one(&self, collection: &str, doc: Value) -> Result<Value> {
            self.0.insert_one(collection, doc).await
        }

        async fn insert_many(&self, collection: &str, docs: Vec<Value>) -> Result<Vec<Value>> {
            self.0.insert_many(collection, docs).await
        }

        async fn update(
            &self,
            collection: &str,
            filter: &Value,
            update: &Value,
            options: UpdateOptions,
        ) -> Result<UpdateResult> {
            self.0.update(collection, filter, update, options).await
        }

        async fn replace_one(&self, collection: &str, filter: &Value, doc: Value) -> Result<Option<Replaced>> {
            self.0.replace_one(collection, filter, doc).await
        }

        async fn delete_many(&self, collection: &str, _filter: &Value) -> Result<usize> {
            Err(Error::store(collection, "deletes are disabled"))
        }

        async fn drop_collection(&self, collection: &str) -> Result<bool> {
            Err(Error::store(collection, "deletes are disabled"))
        }

        async fn collection_names(&self) -> Result<Vec<String>> {
            self.0.collection_names().await
        }
    }

    #[tokio::test]
    async fn test_verified_keys_must_exist() {
        let db = library();
        let books = db.collection("books");
        books.insert(json!({ "title": "Earthsea", "author": "a1" })).await.unwrap();
        books.insert(json!({ "title": "Anonymous", "author": null })).await.unwrap();

        let err = books.insert(json!({ "title": "Ghost", "author": "a9" })).await.unwrap_err();
        assert!(matches!(err, Error::ForeignKeyViolation { .. }));
        assert_eq!(books.count(&json!({})).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_bypassed_keys_are_not_checked() {
        let db = library();
        let books = db.collection("books");
        books
            .insert(json!({ "title": "Earthsea", "author": "a1", "tags": ["fantasy"] }))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_nested_documents_are_inserted_first() {
        let db = library();
        let books = db.collection("books");
        let book = books
            .insert(json!({
                "title": "Dune",
                "author": { "_id": "a2", "name": "Frank", "publisher": { "_id": "p2", "name": "Chilton" } }
            }))
            .await
            .unwrap();
        assert_eq!(book["author"], "a2");

        let author = db.collection("authors").find_by_key(&json!("a2")).await.unwrap().unwrap();
        assert_eq!(author["publisher"], "p2");
        assert!(db.collection("publishers").has_key(&json!("p2")).await.unwrap());
    }

    #[tokio::test]
    async fn test_failed_insert_rolls_back_nested_documents() {
        let db = library();
        let books = db.collection("books");
        let err = books
            .insert(json!({
                "title": "Dune",
                "author": { "_id": "a2", "name": "Frank", "publisher": "missing" }
            }))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ForeignKeyViolation { .. }));
        assert!(!db.collection("authors").has_key(&json!("a2")).await.unwrap());

        // The nested author is fine but the book itself is rejected
        let err = books
            .insert_many(vec![
                json!({ "title": "Dune", "author": { "_id": "a3", "name": "Frank" } }),
                json!({ "title": "Ghost", "author": "a9" }),
            ])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ForeignKeyViolation { .. }));
        assert!(!db.collection("authors").has_key(&json!("a3")).await.unwrap());
        assert_eq!(books.count(&json!({})).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_failed_rollback_keeps_the_insert_error() {
        let db = library_on(Arc::new(NoDeletes(fixture())));
        let err = db
            .collection("books")
            .insert_many(vec![
                json!({ "title": "Dune", "author": { "_id": "a3", "name": "Frank" } }),
                json!({ "title": "Ghost", "author": "a9" }),
            ])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ForeignKeyViolation { .. }), "{err:?}");
        assert!(db.collection("authors").has_key(&json!("a3")).await.unwrap());
    }

    #[tokio::test]
    async fn test_replace_inserts_nested_documents() {
        let db = library();
        let books = db.collection("books");
        books.insert(json!({ "_id": "b1", "title": "Earthsea", "author": "a1" })).await.unwrap();

        let replaced = replace_document(
            &books,
            &json!({ "_id": "b1" }),
            json!({ "title": "Dune", "author": { "_id": "a2", "name": "Frank" } }),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(replaced.previous["author"], "a1");
        assert_eq!(replaced.current, json!({ "_id": "b1", "title": "Dune", "author": "a2" }));
        assert!(db.collection("authors").has_key(&json!("a2")).await.unwrap());
    }

    #[tokio::test]
    async fn test_failed_replace_rolls_back_nested_documents() {
        let db = library();
        let books = db.collection("books");
        books.insert(json!({ "_id": "b1", "title": "Earthsea", "author": "a1" })).await.unwrap();

        // The nested author goes in, then the store refuses the new _id
        let doc = json!({ "_id": "b7", "title": "Dune", "author": { "_id": "a2" } });
        let err = replace_document(&books, &json!({ "_id": "b1" }), doc).await.unwrap_err();
        assert!(matches!(err, Error::InvalidQuery { .. }));
        assert!(!db.collection("authors").has_key(&json!("a2")).await.unwrap());

        // No match: the nested author has nothing left referencing it
        let doc = json!({ "title": "Dune", "author": { "_id": "a3" } });
        assert!(replace_document(&books, &json!({ "_id": "b9" }), doc).await.unwrap().is_none());
        assert!(!db.collection("authors").has_key(&json!("a3")).await.unwrap());
        assert_eq!(books.find_by_key(&json!("b1")).await.unwrap().unwrap()["title"], "Earthsea");
    }

    #[test]
    fn test_collector_entries() {
        let mut collector = DependencyCollector::new();
        collector.add("authors", json!("a1"));
        collector.add("books", json!("b1"));
        assert_eq!(collector.len(), 2);
        assert_eq!(collector.entries()[1], ("books".to_string(), json!("b1")));
    }
}
