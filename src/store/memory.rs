//! In-memory document store

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tokio::sync::RwLock;
use tracing::trace;
use uuid::Uuid;

use super::filter::{matches, values_equal, QueryError};
use super::projection::{project, ID_FIELD};
use super::update::apply_update;
use super::{DocumentStore, FindOptions, Replaced, UpdateOptions, UpdateResult};
use crate::error::{Error, Result};

/// Collections of JSON documents held in insertion order
#[derive(Debug, Default)]
pub struct MemoryStore {
    collections: RwLock<BTreeMap<String, Vec<Value>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a fixture shaped as `{ "collection": [documents] }`. Documents
    /// keep their `_id` when they carry one.
    pub fn from_fixture(fixture: Value) -> Result<Self> {
        let Value::Object(collections) = fixture else {
            return Err(Error::JsonParseError {
                message: "fixture must map collection names to arrays of documents".into(),
            });
        };
        let mut loaded = BTreeMap::new();
        for (name, docs) in collections {
            let Value::Array(docs) = docs else {
                return Err(Error::store(&name, "fixture collection must be an array"));
            };
            let mut stored: Vec<Value> = Vec::with_capacity(docs.len());
            for doc in docs {
                let doc = prepare(&name, doc, &stored)?;
                stored.push(doc);
            }
            loaded.insert(name, stored);
        }
        Ok(Self {
            collections: RwLock::new(loaded),
        })
    }

    pub fn from_fixture_str(content: &str) -> Result<Self> {
        Self::from_fixture(serde_json::from_str(content)?)
    }

    /// Snapshot of every collection
    pub async fn dump(&self) -> Value {
        let collections = self.collections.read().await;
        Value::Object(
            collections
                .iter()
                .map(|(name, docs)| (name.clone(), Value::Array(docs.clone())))
                .collect(),
        )
    }

    /// Every document of a collection
    pub async fn documents(&self, collection: &str) -> Vec<Value> {
        let collections = self.collections.read().await;
        collections.get(collection).cloned().unwrap_or_default()
    }
}

fn query_error(collection: &str) -> impl Fn(QueryError) -> Error + '_ {
    move |err| Error::invalid_query(collection, err.0)
}

/// Give `doc` an `_id` when it has none and check it is not taken
fn prepare(collection: &str, doc: Value, existing: &[Value]) -> Result<Value> {
    let Value::Object(fields) = doc else {
        return Err(Error::store(collection, "documents must be objects"));
    };
    let doc = if fields.contains_key(ID_FIELD) {
        Value::Object(fields)
    } else {
        let mut with_id = Map::new();
        with_id.insert(ID_FIELD.to_string(), Value::String(Uuid::new_v4().to_string()));
        with_id.extend(fields);
        Value::Object(with_id)
    };

    let id = &doc[ID_FIELD];
    if existing.iter().any(|other| values_equal(&other[ID_FIELD], id)) {
        return Err(Error::store(collection, format!("duplicate _id {id}")));
    }
    Ok(doc)
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn find(&self, collection: &str, filter: &Value, options: FindOptions) -> Result<Vec<Value>> {
        let collections = self.collections.read().await;
        let Some(docs) = collections.get(collection) else {
            return Ok(Vec::new());
        };

        let mut found = Vec::new();
        let mut skipped = 0;
        for doc in docs {
            if options.limit.is_some_and(|limit| found.len() >= limit) {
                break;
            }
            if !matches(doc, filter).map_err(query_error(collection))? {
                continue;
            }
            if skipped < options.skip {
                skipped += 1;
                continue;
            }
            found.push(match &options.projection {
                Some(paths) => project(doc, paths),
                None => doc.clone(),
            });
        }
        trace!(collection, filter = %filter, found = found.len(), "find");
        Ok(found)
    }

    async fn count(&self, collection: &str, filter: &Value, limit: Option<usize>) -> Result<usize> {
        let collections = self.collections.read().await;
        let Some(docs) = collections.get(collection) else {
            return Ok(0);
        };

        let mut count = 0;
        for doc in docs {
            if limit.is_some_and(|limit| count >= limit) {
                break;
            }
            if matches(doc, filter).map_err(query_error(collection))? {
                count += 1;
            }
        }
        Ok(count)
    }

    async fn insert_one(&self, collection: &str, doc: Value) -> Result<Value> {
        let mut collections = self.collections.write().await;
        let docs = collections.entry(collection.to_string()).or_default();
        let doc = prepare(collection, doc, docs)?;
        docs.push(doc.clone());
        trace!(collection, id = %doc[ID_FIELD], "insert");
        Ok(doc)
    }

    async fn insert_many(&self, collection: &str, docs: Vec<Value>) -> Result<Vec<Value>> {
        let mut collections = self.collections.write().await;
        let stored = collections.entry(collection.to_string()).or_default();

        // Nothing is written unless every document is accepted
        let mut prepared: Vec<Value> = Vec::with_capacity(docs.len());
        for doc in docs {
            let doc = prepare(collection, doc, stored)?;
            if prepared.iter().any(|other| values_equal(&other[ID_FIELD], &doc[ID_FIELD])) {
                return Err(Error::store(collection, format!("duplicate _id {}", doc[ID_FIELD])));
            }
            prepared.push(doc);
        }
        stored.extend(prepared.iter().cloned());
        Ok(prepared)
    }

    async fn update(
        &self,
        collection: &str,
        filter: &Value,
        update: &Value,
        options: UpdateOptions,
    ) -> Result<UpdateResult> {
        let mut collections = self.collections.write().await;
        let Some(docs) = collections.get_mut(collection) else {
            return Ok(UpdateResult::default());
        };

        let mut result = UpdateResult::default();
        for doc in docs.iter_mut() {
            if !matches(doc, filter).map_err(query_error(collection))? {
                continue;
            }
            result.matched += 1;

            // Work on a copy so a failing operator leaves the document intact
            let mut updated = doc.clone();
            if apply_update(&mut updated, update, &options.array_filters).map_err(query_error(collection))? {
                if !values_equal(&updated[ID_FIELD], &doc[ID_FIELD]) {
                    return Err(Error::invalid_query(collection, "the _id field is immutable"));
                }
                *doc = updated;
                result.modified += 1;
            }
            if !options.multi {
                break;
            }
        }
        trace!(collection, matched = result.matched, modified = result.modified, "update");
        Ok(result)
    }

    async fn replace_one(&self, collection: &str, filter: &Value, doc: Value) -> Result<Option<Replaced>> {
        let mut collections = self.collections.write().await;
        let Some(docs) = collections.get_mut(collection) else {
            return Ok(None);
        };
        let Value::Object(mut fields) = doc else {
            return Err(Error::store(collection, "documents must be objects"));
        };

        for stored in docs.iter_mut() {
            if !matches(stored, filter).map_err(query_error(collection))? {
                continue;
            }
            let id = stored[ID_FIELD].clone();
            match fields.get(ID_FIELD) {
                Some(given) if !values_equal(given, &id) => {
                    return Err(Error::invalid_query(collection, "the _id field is immutable"));
                }
                Some(_) => {}
                None => {
                    let mut with_id = Map::new();
                    with_id.insert(ID_FIELD.to_string(), id);
                    with_id.extend(fields);
                    fields = with_id;
                }
            }
            let current = Value::Object(fields);
            let previous = std::mem::replace(stored, current.clone());
            trace!(collection, id = %current[ID_FIELD], "replace");
            return Ok(Some(Replaced { previous, current }));
        }
        Ok(None)
    }

    async fn delete_many(&self, collection: &str, filter: &Value) -> Result<usize> {
        let mut collections = self.collections.write().await;
        let Some(docs) = collections.get_mut(collection) else {
            return Ok(0);
        };

        // Evaluate every document first so a malformed filter loses nothing
        let hits = docs
            .iter()
            .map(|doc| matches(doc, filter))
            .collect::<std::result::Result<Vec<bool>, QueryError>>()
            .map_err(query_error(collection))?;
        let before = docs.len();
        let mut hits = hits.into_iter();
        docs.retain(|_| !hits.next().unwrap_or(false));
        let deleted = before - docs.len();
        trace!(collection, deleted, "delete");
        Ok(deleted)
    }

    async fn drop_collection(&self, collection: &str) -> Result<bool> {
        let dropped = self.collections.write().await.remove(collection).is_some();
        trace!(collection, dropped, "drop");
        Ok(dropped)
    }

    async fn collection_names(&self) -> Result<Vec<String>> {
        Ok(self.collections.read().await.keys().cloned().collect())
    }
}
