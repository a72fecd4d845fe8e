//! Cascading deletes
//!
//! Deleting documents first walks every reference to them and decides, per
//! foreign key delete policy, what must happen elsewhere. The walk only reads;
//! it produces a [`RemovalPlan`] of store operations that run afterwards, so
//! every check sees the data as it was before the delete. A rejected delete
//! leaves the plan unbuilt and nothing changes.

use futures::future::{BoxFuture, FutureExt};
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use tracing::{debug, info};

use crate::collection::Collection;
use crate::error::{Error, Result};
use crate::graph::ForeignKeyConfig;
use crate::schema::DeletePolicy;
use crate::store::filter::values_equal;
use crate::store::{DocumentStore, UpdateOptions};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeleteOptions {
    /// Apply the delete policies of referencing foreign keys
    pub propagate: bool,
    /// Delete only the first matching document
    pub single: bool,
}

impl Default for DeleteOptions {
    fn default() -> Self {
        Self {
            propagate: true,
            single: false,
        }
    }
}

/// One store write of a removal plan
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "operation", rename_all = "camelCase")]
pub enum Operation {
    #[serde(rename_all = "camelCase")]
    Update {
        collection: String,
        filter: Value,
        update: Value,
        array_filters: Vec<Value>,
    },
    Delete { collection: String, filter: Value },
}

impl Operation {
    /// Run against the store, returning how many documents changed
    pub async fn execute(&self, store: &dyn DocumentStore) -> Result<usize> {
        match self {
            Operation::Update {
                collection,
                filter,
                update,
                array_filters,
            } => {
                let options = UpdateOptions {
                    multi: true,
                    array_filters: array_filters.clone(),
                };
                Ok(store.update(collection, filter, update, options).await?.modified)
            }
            Operation::Delete { collection, filter } => store.delete_many(collection, filter).await,
        }
    }
}

/// Primary keys already scheduled for deletion, per collection
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct DeletedKeys(BTreeMap<String, Vec<Value>>);

impl DeletedKeys {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep the keys of `keys` not seen before in `collection`, and mark them
    pub fn mark(&mut self, collection: &str, keys: Vec<Value>) -> Vec<Value> {
        let seen = self.0.entry(collection.to_string()).or_default();
        let mut fresh = Vec::with_capacity(keys.len());
        for key in keys {
            if !seen.iter().any(|s| values_equal(s, &key)) {
                seen.push(key.clone());
                fresh.push(key);
            }
        }
        fresh
    }

    pub fn get(&self, collection: &str) -> &[Value] {
        self.0.get(collection).map(Vec::as_slice).unwrap_or_default()
    }
}

/// Store operations realizing a delete, in execution order
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RemovalPlan {
    /// Writes on referencing documents, cascades included
    pub operations: Vec<Operation>,
    /// The delete on the collection the plan was made for
    pub delete: Operation,
    pub deleted_keys: DeletedKeys,
}

impl RemovalPlan {
    /// Run every scheduled operation then the final delete. Returns how many
    /// documents the final delete removed.
    pub async fn execute(&self, store: &dyn DocumentStore) -> Result<usize> {
        for operation in &self.operations {
            operation.execute(store).await?;
        }
        let deleted = self.delete.execute(store).await?;
        info!(operations = self.operations.len(), deleted, "removal plan executed");
        Ok(deleted)
    }
}

pub(crate) async fn plan_delete(collection: &Collection, filter: Value, options: DeleteOptions) -> Result<RemovalPlan> {
    let mut operations = Vec::new();
    let mut deleted_keys = DeletedKeys::new();
    let delete = propagate_delete(
        collection,
        filter,
        options.single,
        &options,
        &mut operations,
        &mut deleted_keys,
    )
    .await?;
    Ok(RemovalPlan {
        operations,
        delete,
        deleted_keys,
    })
}

/// Schedule what deleting `filter` from `collection` requires elsewhere and
/// return the delete itself, which the caller runs last
pub fn propagate_delete<'a>(
    collection: &'a Collection,
    filter: Value,
    single: bool,
    options: &'a DeleteOptions,
    scheduler: &'a mut Vec<Operation>,
    deleted_keys: &'a mut DeletedKeys,
) -> BoxFuture<'a, Result<Operation>> {
    async move {
        let limit = single.then_some(1);
        let found = collection.raw_keys(&filter, limit).await?;
        let keys = deleted_keys.mark(collection.name(), found);

        if options.propagate && !keys.is_empty() {
            for (referencing, foreign_keys) in collection.references() {
                let source = collection.database().collection(referencing);
                for (foreign_key, config) in foreign_keys {
                    if config.on_delete == DeletePolicy::Bypass {
                        continue;
                    }
                    let query = json!({ foreign_key.as_str(): { "$in": &keys } });
                    if source.store().count(referencing, &query, Some(1)).await? == 0 {
                        continue;
                    }

                    match config.on_delete {
                        DeletePolicy::Bypass => {}
                        DeletePolicy::Reject => {
                            return Err(Error::DeleteRejected {
                                collection: collection.name().to_string(),
                                referencing: referencing.clone(),
                                foreign_key: foreign_key.clone(),
                            })
                        }
                        DeletePolicy::Delete => {
                            let cascade = propagate_delete(
                                &source,
                                query,
                                false,
                                options,
                                &mut *scheduler,
                                &mut *deleted_keys,
                            )
                            .await?;
                            scheduler.push(cascade);
                        }
                        policy => {
                            let operation = referencing_update(referencing, foreign_key, config, policy, query, &keys)?;
                            debug!(
                                collection = collection.name(),
                                referencing = %referencing,
                                foreign_key = %foreign_key,
                                policy = %policy,
                                "scheduled reference update"
                            );
                            scheduler.push(operation);
                        }
                    }
                }
            }
        }

        debug!(collection = collection.name(), keys = keys.len(), "scheduled delete");
        Ok(Operation::Delete {
            collection: collection.name().to_string(),
            filter: json!({ collection.key(): { "$in": keys } }),
        })
    }
    .boxed()
}

/// The update detaching referencing documents for UNSET, NULLIFY and PULL
fn referencing_update(
    referencing: &str,
    foreign_key: &str,
    config: &ForeignKeyConfig,
    policy: DeletePolicy,
    filter: Value,
    keys: &[Value],
) -> Result<Operation> {
    let Some(updater) = &config.updater else {
        return Err(Error::IncoherentPolicy {
            collection: referencing.to_string(),
            foreign_key: foreign_key.to_string(),
            policy: policy.as_str(),
            reason: "no update target was compiled for this foreign key",
        });
    };

    let (update, array_filters) = match policy {
        DeletePolicy::Pull => {
            let condition = match &updater.filter {
                Some(path) => json!({ path.as_str(): { "$in": keys } }),
                None => json!({ "$in": keys }),
            };
            (json!({ "$pull": { updater.target.as_str(): condition } }), Vec::new())
        }
        _ => {
            let update = if policy == DeletePolicy::Unset {
                json!({ "$unset": { updater.target.as_str(): 1 } })
            } else {
                json!({ "$set": { updater.target.as_str(): null } })
            };
            let array_filters = match &updater.filter {
                Some(path) => vec![json!({ path.as_str(): { "$in": keys } })],
                None => Vec::new(),
            };
            (update, array_filters)
        }
    };

    Ok(Operation::Update {
        collection: referencing.to_string(),
        filter,
        update,
        array_filters,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{CollectionSchema, ForeignKeySchema, Schema};
    use crate::store::MemoryStore;
    use crate::Database;
    use std::sync::Arc;

    fn database(policy: DeletePolicy) -> Database {
        let schema = Schema::new()
            .collection("authors", CollectionSchema::new())
            .collection(
                "books",
                CollectionSchema::new()
                    .foreign_key("author", ForeignKeySchema::to("authors").on_delete(policy))
                    .foreign_key("coauthors.$", ForeignKeySchema::to("authors").on_delete(DeletePolicy::Pull)),
            );
        let store = MemoryStore::from_fixture(json!({
            "authors": [{ "_id": "a1" }, { "_id": "a2" }],
            "books": [
                { "_id": "b1", "author": "a1", "coauthors": ["a2"] },
                { "_id": "b2", "author": "a2", "coauthors": ["a1", "a2"] }
            ]
        }))
        .unwrap();
        Database::with_schema(Arc::new(store), &schema).unwrap()
    }

    #[test]
    fn test_deleted_keys_mark_only_new_keys() {
        let mut deleted = DeletedKeys::new();
        assert_eq!(deleted.mark("a", vec![json!(1), json!(2)]), vec![json!(1), json!(2)]);
        assert_eq!(deleted.mark("a", vec![json!(2), json!(3)]), vec![json!(3)]);
        assert_eq!(deleted.mark("b", vec![json!(2)]), vec![json!(2)]);
        assert_eq!(deleted.get("a").len(), 3);
        assert!(deleted.get("c").is_empty());
    }

    #[tokio::test]
    async fn test_plan_nullify_and_pull() {
        let db = database(DeletePolicy::Nullify);
        let plan = db
            .collection("authors")
            .plan_delete(&json!({ "_id": "a1" }), DeleteOptions::default())
            .await
            .unwrap();
        assert_eq!(
            plan.operations,
            vec![
                Operation::Update {
                    collection: "books".into(),
                    filter: json!({ "author": { "$in": ["a1"] } }),
                    update: json!({ "$set": { "author": null } }),
                    array_filters: vec![],
                },
                Operation::Update {
                    collection: "books".into(),
                    filter: json!({ "coauthors": { "$in": ["a1"] } }),
                    update: json!({ "$pull": { "coauthors": { "$in": ["a1"] } } }),
                    array_filters: vec![],
                },
            ]
        );
        assert_eq!(
            plan.delete,
            Operation::Delete {
                collection: "authors".into(),
                filter: json!({ "_id": { "$in": ["a1"] } })
            }
        );
    }

    #[tokio::test]
    async fn test_unreferenced_keys_schedule_nothing() {
        let db = database(DeletePolicy::Reject);
        db.collection("authors").insert(json!({ "_id": "a3" })).await.unwrap();
        let plan = db
            .collection("authors")
            .plan_delete(&json!({ "_id": "a3" }), DeleteOptions::default())
            .await
            .unwrap();
        assert!(plan.operations.is_empty());
    }

    #[tokio::test]
    async fn test_reject_aborts_before_any_write() {
        let db = database(DeletePolicy::Reject);
        let authors = db.collection("authors");
        let err = authors.delete(&json!({}), DeleteOptions::default()).await.unwrap_err();
        assert!(matches!(err, Error::DeleteRejected { .. }));
        assert_eq!(authors.count(&json!({})).await.unwrap(), 2);
        assert_eq!(db.collection("books").count(&json!({ "coauthors": "a1" })).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_unset_executes() {
        let db = database(DeletePolicy::Unset);
        let deleted = db.collection("authors").delete_by_key(&json!("a2")).await.unwrap();
        assert_eq!(deleted, 1);
        let books = db.collection("books").find(&json!({})).await.unwrap();
        assert_eq!(
            books,
            vec![
                json!({ "_id": "b1", "author": "a1", "coauthors": [] }),
                json!({ "_id": "b2", "coauthors": ["a1"] })
            ]
        );
    }

    #[tokio::test]
    async fn test_single_and_unpropagated_deletes() {
        let db = database(DeletePolicy::Reject);
        let authors = db.collection("authors");
        let options = DeleteOptions {
            propagate: false,
            single: true,
        };
        let plan = authors.plan_delete(&json!({}), options).await.unwrap();
        assert!(plan.operations.is_empty());
        assert_eq!(plan.deleted_keys.get("authors"), &[json!("a1")]);
    }
}
