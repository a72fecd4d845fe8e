//! Collection handles
//!
//! A [`Collection`] pairs a collection name with its database. Every read and
//! write goes through it so that foreign keys are honoured: filters are
//! normalized, inserts are verified and deletes are propagated.

use docsel::Selector;
use serde_json::{json, Value};
use std::fmt;

use crate::error::Result;
use crate::graph::{CollectionConfig, ForeignKeys, References};
use crate::insertion;
use crate::lazy::LazyDocuments;
use crate::normalize::normalize_filter_query;
use crate::path::get_path;
use crate::propagate::{plan_delete, DeleteOptions, RemovalPlan};
use crate::references::{find_references, FindReferencesOptions, ReferencingDocuments};
use crate::resolve::{projection, resolve, Resolvable, SelectionOptions};
use crate::store::filter::{lookup, values_equal};
use crate::store::{DocumentStore, FindOptions, UpdateOptions, UpdateResult};
use crate::Database;

#[derive(Clone)]
pub struct Collection {
    name: String,
    database: Database,
}

impl fmt::Debug for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collection").field("name", &self.name).finish()
    }
}

impl Collection {
    pub(crate) fn new(name: impl Into<String>, database: Database) -> Self {
        Self {
            name: name.into(),
            database,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn database(&self) -> &Database {
        &self.database
    }

    pub(crate) fn store(&self) -> &dyn DocumentStore {
        self.database.store()
    }

    pub fn config(&self) -> &CollectionConfig {
        self.database.graph().config(&self.name)
    }

    /// Name of the primary key field
    pub fn key(&self) -> &str {
        &self.config().key
    }

    pub fn foreign_keys(&self) -> &ForeignKeys {
        &self.config().foreign_keys
    }

    pub fn references(&self) -> &References {
        &self.config().references
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub async fn find(&self, filter: &Value) -> Result<Vec<Value>> {
        self.find_with(filter, FindOptions::default()).await
    }

    pub async fn find_with(&self, filter: &Value, options: FindOptions) -> Result<Vec<Value>> {
        let filter = normalize_filter_query(self, filter).await?;
        self.store().find(&self.name, &filter, options).await
    }

    pub async fn find_one(&self, filter: &Value) -> Result<Option<Value>> {
        let filter = normalize_filter_query(self, filter).await?;
        self.store().find_one(&self.name, &filter).await
    }

    pub async fn find_by_key(&self, key: &Value) -> Result<Option<Value>> {
        self.store().find_one(&self.name, &self.key_query(key)).await
    }

    pub async fn count(&self, filter: &Value) -> Result<usize> {
        let filter = normalize_filter_query(self, filter).await?;
        self.store().count(&self.name, &filter, None).await
    }

    pub async fn has(&self, filter: &Value) -> Result<bool> {
        let filter = normalize_filter_query(self, filter).await?;
        Ok(self.store().count(&self.name, &filter, Some(1)).await? > 0)
    }

    pub async fn has_key(&self, key: &Value) -> Result<bool> {
        Ok(self.store().count(&self.name, &self.key_query(key), Some(1)).await? > 0)
    }

    /// Whether every key in `keys` names a document. Repeated keys count once.
    pub async fn has_all_keys(&self, keys: &[Value]) -> Result<bool> {
        let mut unique: Vec<Value> = Vec::with_capacity(keys.len());
        for key in keys {
            if !unique.iter().any(|seen| values_equal(seen, key)) {
                unique.push(key.clone());
            }
        }
        if unique.is_empty() {
            return Ok(true);
        }
        let filter = json!({ self.key(): { "$in": unique } });
        let found = self.store().count(&self.name, &filter, None).await?;
        Ok(found == unique.len())
    }

    /// Distinct values of `field` among the documents matching `filter`.
    /// Array values contribute their elements.
    pub async fn distinct(&self, field: &str, filter: &Value) -> Result<Vec<Value>> {
        let filter = normalize_filter_query(self, filter).await?;
        let options = FindOptions::default().projection(vec![field.to_string()]);
        let docs = self.store().find(&self.name, &filter, options).await?;

        let mut values: Vec<Value> = Vec::new();
        for doc in &docs {
            for found in lookup(doc, field).into_iter().flatten() {
                let items = match found {
                    Value::Array(items) => items.as_slice(),
                    other => std::slice::from_ref(other),
                };
                for item in items {
                    if !values.iter().any(|seen| values_equal(seen, item)) {
                        values.push(item.clone());
                    }
                }
            }
        }
        Ok(values)
    }

    /// Primary keys of the documents matching `filter`
    pub async fn keys(&self, filter: &Value) -> Result<Vec<Value>> {
        let filter = normalize_filter_query(self, filter).await?;
        self.raw_keys(&filter, None).await
    }

    /// Primary keys matching an already normalized filter
    pub(crate) async fn raw_keys(&self, filter: &Value, limit: Option<usize>) -> Result<Vec<Value>> {
        let options = FindOptions {
            limit,
            projection: Some(vec![self.key().to_string()]),
            ..Default::default()
        };
        let docs = self.store().find(&self.name, filter, options).await?;
        Ok(docs
            .iter()
            .filter_map(|doc| get_path(doc, self.key()).cloned())
            .collect())
    }

    pub(crate) fn key_query(&self, key: &Value) -> Value {
        json!({ self.key(): key })
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Insert a document, first inserting any documents nested at foreign
    /// keys and checking every verified foreign key
    pub async fn insert(&self, doc: Value) -> Result<Value> {
        let mut inserted = insertion::insert_documents(self, vec![doc]).await?;
        Ok(inserted.pop().unwrap_or(Value::Null))
    }

    pub async fn insert_many(&self, docs: Vec<Value>) -> Result<Vec<Value>> {
        insertion::insert_documents(self, docs).await
    }

    pub async fn update(&self, filter: &Value, update: &Value, options: UpdateOptions) -> Result<UpdateResult> {
        let filter = normalize_filter_query(self, filter).await?;
        self.store().update(&self.name, &filter, update, options).await
    }

    /// Replace the first matching document. Documents nested at foreign keys
    /// are inserted first, as for [`Collection::insert`].
    pub async fn replace_one(&self, filter: &Value, doc: Value) -> Result<UpdateResult> {
        let filter = normalize_filter_query(self, filter).await?;
        let replaced = insertion::replace_document(self, &filter, doc).await?;
        Ok(match replaced {
            Some(replaced) => UpdateResult {
                matched: 1,
                modified: usize::from(replaced.previous != replaced.current),
            },
            None => UpdateResult::default(),
        })
    }

    /// Replace the first matching document and return it as it was
    pub async fn find_one_and_replace(&self, filter: &Value, doc: Value) -> Result<Option<Value>> {
        let filter = normalize_filter_query(self, filter).await?;
        let replaced = insertion::replace_document(self, &filter, doc).await?;
        Ok(replaced.map(|replaced| replaced.previous))
    }

    pub async fn find_by_key_and_replace(&self, key: &Value, doc: Value) -> Result<Option<Value>> {
        let replaced = insertion::replace_document(self, &self.key_query(key), doc).await?;
        Ok(replaced.map(|replaced| replaced.previous))
    }

    /// Delete matching documents along with whatever their delete policies
    /// require elsewhere. Returns how many documents of this collection went.
    pub async fn delete(&self, filter: &Value, options: DeleteOptions) -> Result<usize> {
        let plan = self.plan_delete(filter, options).await?;
        plan.execute(self.store()).await
    }

    pub async fn delete_one(&self, filter: &Value) -> Result<usize> {
        let options = DeleteOptions {
            single: true,
            ..Default::default()
        };
        self.delete(filter, options).await
    }

    pub async fn delete_by_key(&self, key: &Value) -> Result<usize> {
        self.delete(&self.key_query(key), DeleteOptions::default()).await
    }

    /// Delete the first matching document, propagating like
    /// [`Collection::delete`], and return it
    pub async fn find_one_and_delete(&self, filter: &Value) -> Result<Option<Value>> {
        let filter = normalize_filter_query(self, filter).await?;
        self.take_one(filter).await
    }

    pub async fn find_by_key_and_delete(&self, key: &Value) -> Result<Option<Value>> {
        self.take_one(self.key_query(key)).await
    }

    async fn take_one(&self, filter: Value) -> Result<Option<Value>> {
        let options = DeleteOptions {
            single: true,
            ..Default::default()
        };
        let plan = plan_delete(self, filter, options).await?;
        // The first key marked is the document the plan was made for
        let Some(key) = plan.deleted_keys.get(&self.name).first() else {
            return Ok(None);
        };
        let doc = self.find_by_key(key).await?;
        plan.execute(self.store()).await?;
        Ok(doc)
    }

    /// Delete every document, with propagation, then remove the collection
    /// from the store. Returns how many documents were deleted.
    pub async fn drop(&self) -> Result<usize> {
        let deleted = self.delete(&json!({}), DeleteOptions::default()).await?;
        self.store().drop_collection(&self.name).await?;
        Ok(deleted)
    }

    /// Walk the reference graph for a delete without changing anything
    pub async fn plan_delete(&self, filter: &Value, options: DeleteOptions) -> Result<RemovalPlan> {
        let filter = normalize_filter_query(self, filter).await?;
        plan_delete(self, filter, options).await
    }

    /// Documents elsewhere whose foreign keys point at `keys`
    pub async fn find_references(
        &self,
        keys: &[Value],
        options: FindReferencesOptions,
    ) -> Result<ReferencingDocuments> {
        find_references(self, keys, &options).await
    }

    // =========================================================================
    // Selection
    // =========================================================================

    /// Documents matching `filter`, not fetched yet
    pub fn lazy(&self, filter: Value) -> LazyDocuments {
        LazyDocuments::new(self.clone(), filter)
    }

    /// Resolve `selector` against a value of this collection
    pub async fn resolve(&self, selector: &Selector, value: Value) -> Result<Value> {
        self.resolve_with(selector, value, &SelectionOptions::default()).await
    }

    pub async fn resolve_with(&self, selector: &Selector, value: Value, options: &SelectionOptions) -> Result<Value> {
        resolve(selector, Resolvable::Value(value), self, Vec::new(), options).await
    }

    /// Resolve `selector` over the documents matching `filter`, reading only
    /// the fields it needs
    pub async fn select(&self, filter: Value, selector: &Selector) -> Result<Value> {
        self.select_with(filter, selector, &SelectionOptions::default()).await
    }

    pub async fn select_with(&self, filter: Value, selector: &Selector, options: &SelectionOptions) -> Result<Value> {
        let foreign_keys = if options.resolve_foreign_keys {
            self.foreign_keys().clone()
        } else {
            ForeignKeys::new()
        };
        let documents = self
            .lazy(filter)
            .with_projection(projection(selector, &foreign_keys).into_paths());
        resolve(selector, Resolvable::Lazy(documents), self, Vec::new(), options).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::schema::{CollectionSchema, DeletePolicy, ForeignKeySchema, Schema};
    use crate::store::MemoryStore;
    use std::sync::Arc;

    fn shop() -> Database {
        let schema = Schema::new()
            .collection("products", CollectionSchema::new().key("sku"))
            .collection(
                "orders",
                CollectionSchema::new()
                    .foreign_key("items.$", ForeignKeySchema::to("products").on_delete(DeletePolicy::Pull)),
            );
        let store = MemoryStore::from_fixture(json!({
            "products": [
                { "_id": 1, "sku": "p1", "name": "Lamp", "price": 30 },
                { "_id": 2, "sku": "p2", "name": "Desk", "price": 120 },
                { "_id": 3, "sku": "p3", "name": "Chair", "price": 80 }
            ],
            "orders": [
                { "_id": "o1", "items": ["p1", "p2"] },
                { "_id": "o2", "items": ["p3"] }
            ]
        }))
        .unwrap();
        Database::with_schema(Arc::new(store), &schema).unwrap()
    }

    #[test]
    fn test_config_accessors() {
        let db = shop();
        assert_eq!(db.collection("products").key(), "sku");
        assert_eq!(db.collection("unknown").key(), "_id");
        assert!(db.collection("orders").foreign_keys().contains_key("items"));
        assert!(db.collection("products").references().contains_key("orders"));
    }

    #[tokio::test]
    async fn test_keys_and_existence() {
        let products = shop().collection("products");
        assert_eq!(
            products.keys(&json!({ "price": { "$gte": 80 } })).await.unwrap(),
            vec![json!("p2"), json!("p3")]
        );
        assert!(products.has_key(&json!("p1")).await.unwrap());
        assert!(!products.has_key(&json!("p9")).await.unwrap());
        assert!(products.has_all_keys(&[json!("p1"), json!("p3"), json!("p1")]).await.unwrap());
        assert!(!products.has_all_keys(&[json!("p1"), json!("p9")]).await.unwrap());
        assert!(products.has(&json!({ "name": "Desk" })).await.unwrap());
    }

    #[tokio::test]
    async fn test_select_reads_through_the_foreign_key() {
        let orders = shop().collection("orders");
        let names = orders
            .select(json!({}), &docsel::parse("items $ name").unwrap())
            .await
            .unwrap();
        assert_eq!(names, json!(["Lamp", "Desk", "Chair"]));

        let totals = orders
            .select(json!({ "_id": "o1" }), &docsel::parse("{ _id, items price }").unwrap())
            .await
            .unwrap();
        assert_eq!(totals, json!([{ "_id": "o1", "items": [30, 120] }]));
    }

    #[tokio::test]
    async fn test_filter_by_referenced_documents() {
        let orders = shop().collection("orders");
        let filter = json!({ "items": { "$in": { "price": { "$gt": 100 } } } });
        let found = orders.find(&filter).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0]["_id"], "o1");
        assert_eq!(orders.count(&filter).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_update_goes_through_the_store() {
        let products = shop().collection("products");
        let result = products
            .update(&json!({ "sku": "p1" }), &json!({ "$set": { "price": 35 } }), UpdateOptions::default())
            .await
            .unwrap();
        assert_eq!(result.modified, 1);
        let lamp = products.find_by_key(&json!("p1")).await.unwrap().unwrap();
        assert_eq!(lamp["price"], 35);
    }

    #[tokio::test]
    async fn test_distinct_unwinds_arrays() {
        let db = shop();
        let items = db.collection("orders").distinct("items", &json!({})).await.unwrap();
        assert_eq!(items, vec![json!("p1"), json!("p2"), json!("p3")]);

        let prices = db
            .collection("products")
            .distinct("price", &json!({ "price": { "$gt": 50 } }))
            .await
            .unwrap();
        assert_eq!(prices, vec![json!(120), json!(80)]);
    }

    #[tokio::test]
    async fn test_replace_operations() {
        let db = shop();
        let products = db.collection("products");

        let same = json!({ "sku": "p1", "name": "Lamp", "price": 30 });
        let result = products.replace_one(&json!({ "sku": "p1" }), same).await.unwrap();
        assert_eq!(result, UpdateResult { matched: 1, modified: 0 });

        let previous = products
            .find_one_and_replace(&json!({ "sku": "p1" }), json!({ "sku": "p1", "name": "Lamp", "price": 35 }))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(previous["price"], 30);
        let lamp = products.find_by_key(&json!("p1")).await.unwrap().unwrap();
        assert_eq!(lamp, json!({ "_id": 1, "sku": "p1", "name": "Lamp", "price": 35 }));

        let missing = products.find_by_key_and_replace(&json!("p9"), json!({ "sku": "p9" })).await.unwrap();
        assert!(missing.is_none());

        let err = db
            .collection("orders")
            .replace_one(&json!({ "_id": "o1" }), json!({ "items": ["p9"] }))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ForeignKeyViolation { .. }));
    }

    #[tokio::test]
    async fn test_find_one_and_delete_propagates() {
        let db = shop();
        let products = db.collection("products");
        let removed = products.find_one_and_delete(&json!({ "price": { "$gte": 80 } })).await.unwrap();
        assert_eq!(removed.unwrap()["sku"], "p2");
        assert_eq!(products.count(&json!({})).await.unwrap(), 2);

        let order = db.collection("orders").find_by_key(&json!("o1")).await.unwrap().unwrap();
        assert_eq!(order["items"], json!(["p1"]));

        assert!(products.find_by_key_and_delete(&json!("p9")).await.unwrap().is_none());
        let chair = products.find_by_key_and_delete(&json!("p3")).await.unwrap().unwrap();
        assert_eq!(chair["name"], "Chair");
    }

    #[tokio::test]
    async fn test_drop_detaches_references() {
        let db = shop();
        assert_eq!(db.collection("products").drop().await.unwrap(), 3);
        assert!(!db.store().collection_names().await.unwrap().contains(&"products".to_string()));

        let orders = db.collection("orders").find(&json!({})).await.unwrap();
        assert!(orders.iter().all(|order| order["items"] == json!([])));
    }
}
