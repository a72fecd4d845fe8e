//! Selector resolution
//!
//! Walks a [`Selector`] over a value while tracking the collection the value
//! belongs to and the path from the document root. Whenever the path lands on
//! a foreign key, the referenced documents are fetched and resolution carries
//! on inside the target collection.

pub mod projection;

use docsel::{ObjectKey, Predicate, Selector};
use futures::future::{try_join_all, BoxFuture, FutureExt};
use serde_json::{json, Map, Value};
use tracing::debug;

use crate::collection::Collection;
use crate::error::{Error, Result};
use crate::lazy::LazyDocuments;
use crate::path::{push, stack_to_key, Stack};
use crate::store::FindOptions;

pub use projection::{projection, Projection};

/// A value under resolution, either materialized or still a query
#[derive(Debug, Clone)]
pub enum Resolvable {
    Value(Value),
    Lazy(LazyDocuments),
}

impl Resolvable {
    async fn materialize(self) -> Result<Value> {
        match self {
            Resolvable::Value(value) => Ok(value),
            Resolvable::Lazy(lazy) => Ok(Value::Array(lazy.fetch().await?)),
        }
    }

    fn is_array_like(&self) -> bool {
        matches!(self, Resolvable::Lazy(_) | Resolvable::Value(Value::Array(_)))
    }
}

impl From<Value> for Resolvable {
    fn from(value: Value) -> Self {
        Resolvable::Value(value)
    }
}

impl From<LazyDocuments> for Resolvable {
    fn from(lazy: LazyDocuments) -> Self {
        Resolvable::Lazy(lazy)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectionOptions {
    /// Follow foreign keys into the referenced collections
    pub resolve_foreign_keys: bool,
}

impl Default for SelectionOptions {
    fn default() -> Self {
        Self {
            resolve_foreign_keys: true,
        }
    }
}

/// Resolve `selector` against `value`, a value of `collection` found at `stack`
pub fn resolve<'a>(
    selector: &'a Selector,
    value: Resolvable,
    collection: &'a Collection,
    stack: Stack,
    options: &'a SelectionOptions,
) -> BoxFuture<'a, Result<Value>> {
    async move {
        match selector {
            Selector::Identity => value.materialize().await,

            Selector::Field { name, next } => {
                if value.is_array_like() {
                    return map(selector, value, true, collection, stack, options).await;
                }
                let value = value.materialize().await?;
                let Value::Object(fields) = &value else {
                    return Err(Error::resolution(
                        collection.name(),
                        format!("Can't select field <{name}> in primitive value {value}"),
                    ));
                };
                field(name, next, fields, collection, &stack, options).await
            }

            Selector::Index { index, next } => {
                let item = match value {
                    Resolvable::Lazy(lazy) => lazy.fetch_one(*index).await?,
                    Resolvable::Value(Value::Array(items)) => {
                        items.into_iter().nth(*index).unwrap_or(Value::Null)
                    }
                    Resolvable::Value(other) => {
                        return Err(Error::resolution(
                            collection.name(),
                            format!("Can't select index <{index}> in non-array value {other}"),
                        ))
                    }
                };
                resolve(next, item.into(), collection, push(&stack, *index), options).await
            }

            Selector::Shortcut(next) => match value {
                Resolvable::Value(Value::Null) => Ok(Value::Null),
                value => resolve(next, value, collection, stack, options).await,
            },

            Selector::Map(next) => map(next, value, true, collection, stack, options).await,

            Selector::HardMap(next) => map(next, value, false, collection, stack, options).await,

            Selector::Filter { predicate, next } => {
                let items = array(value, collection, "filter").await?;
                let kept = filter(predicate, items).await;
                resolve(next, Value::Array(kept).into(), collection, stack, options).await
            }

            Selector::Switch {
                predicate,
                then,
                otherwise,
            } => {
                let value = value.materialize().await?;
                let branch = if predicate.test(&value, None, &[]).await {
                    then
                } else {
                    otherwise
                };
                resolve(branch, value.into(), collection, stack, options).await
            }

            Selector::FilterQuery { query, next } => match value {
                Resolvable::Lazy(lazy) => {
                    let narrowed = lazy.extend(query.clone());
                    resolve(next, narrowed.into(), collection, stack, options).await
                }
                Resolvable::Value(other) => Err(Error::resolution(
                    collection.name(),
                    format!("Filter query {query} can only narrow documents referenced by a foreign key, got {other}"),
                )),
            },

            Selector::Tuple(children) => {
                let resolved = try_join_all(
                    children
                        .iter()
                        .map(|child| resolve(child, value.clone(), collection, stack.clone(), options)),
                )
                .await?;
                Ok(Value::Array(resolved))
            }

            Selector::Object(entries) => {
                if value.is_array_like() {
                    return map(selector, value, true, collection, stack, options).await;
                }
                let value = value.materialize().await?;
                let Value::Object(fields) = &value else {
                    return Err(Error::resolution(
                        collection.name(),
                        format!("Can't build an object from primitive value {value}"),
                    ));
                };
                object(entries, fields, collection, &stack, options).await
            }
        }
    }
    .boxed()
}

/// Materialize `value`, which must be an array
async fn array(value: Resolvable, collection: &Collection, operation: &str) -> Result<Vec<Value>> {
    match value.materialize().await? {
        Value::Array(items) => Ok(items),
        other => Err(Error::resolution(
            collection.name(),
            format!("Can't {operation} non-array value {other}"),
        )),
    }
}

async fn map(
    child: &Selector,
    value: Resolvable,
    flatten: bool,
    collection: &Collection,
    stack: Stack,
    options: &SelectionOptions,
) -> Result<Value> {
    let items = array(value, collection, "map over").await?;
    let resolved = try_join_all(
        items
            .into_iter()
            .enumerate()
            .map(|(index, item)| resolve(child, item.into(), collection, push(&stack, index), options)),
    )
    .await?;

    if !flatten {
        return Ok(Value::Array(resolved));
    }
    let mut flat = Vec::with_capacity(resolved.len());
    for item in resolved {
        match item {
            Value::Array(items) => flat.extend(items),
            other => flat.push(other),
        }
    }
    Ok(Value::Array(flat))
}

async fn filter(predicate: &Predicate, items: Vec<Value>) -> Vec<Value> {
    let mut keep = Vec::with_capacity(items.len());
    for (index, item) in items.iter().enumerate() {
        keep.push(predicate.test(item, Some(index), &items).await);
    }
    items
        .into_iter()
        .zip(keep)
        .filter_map(|(item, keep)| keep.then_some(item))
        .collect()
}

/// Select `name` in `fields`, following it when it is a foreign key
async fn field(
    name: &str,
    next: &Selector,
    fields: &Map<String, Value>,
    collection: &Collection,
    stack: &Stack,
    options: &SelectionOptions,
) -> Result<Value> {
    let Some(child) = fields.get(name) else {
        return Err(Error::resolution(
            collection.name(),
            format!("Can't select missing field <{name}>"),
        ));
    };
    let stack = push(stack, name);
    let key = stack_to_key(&stack);

    let foreign_key = match collection.foreign_keys().get(&key) {
        Some(foreign_key) if options.resolve_foreign_keys => foreign_key,
        _ => return resolve(next, child.clone().into(), collection, stack, options).await,
    };

    let target = collection.database().collection(&foreign_key.collection);
    let projection = projection(next, target.foreign_keys()).into_paths();
    debug!(
        collection = collection.name(),
        foreign_key = %key,
        target = target.name(),
        "following foreign key"
    );

    let referenced: Resolvable = match child {
        Value::Null => Value::Null.into(),
        Value::Array(keys) => {
            let query = json!({ target.key(): { "$in": keys } });
            LazyDocuments::new(target.clone(), query)
                .with_projection(projection)
                .into()
        }
        key => {
            let query = json!({ target.key(): key });
            let mut options = FindOptions::default().limit(1);
            options.projection = projection;
            let found = target.find_with(&query, options).await?;
            found.into_iter().next().unwrap_or(Value::Null).into()
        }
    };
    resolve(next, referenced, &target, Stack::new(), options).await
}

async fn object(
    entries: &[(ObjectKey, Selector)],
    fields: &Map<String, Value>,
    collection: &Collection,
    stack: &Stack,
    options: &SelectionOptions,
) -> Result<Value> {
    let listed: Vec<&str> = entries
        .iter()
        .filter_map(|(key, _)| match key {
            ObjectKey::Field(name) => Some(name.as_str()),
            ObjectKey::Wildcard => None,
        })
        .collect();

    let mut selections: Vec<(&str, &Selector)> = Vec::new();
    for (key, child) in entries {
        match key {
            ObjectKey::Field(name) => selections.push((name.as_str(), child)),
            ObjectKey::Wildcard => {
                for name in fields.keys() {
                    if !listed.contains(&name.as_str()) {
                        selections.push((name.as_str(), child));
                    }
                }
            }
        }
    }

    let resolved = try_join_all(
        selections
            .iter()
            .map(|(name, child)| field(name, child, fields, collection, stack, options)),
    )
    .await?;

    Ok(Value::Object(
        selections
            .iter()
            .map(|(name, _)| name.to_string())
            .zip(resolved)
            .collect(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{CollectionSchema, ForeignKeySchema, Schema};
    use crate::store::MemoryStore;
    use crate::Database;
    use std::sync::Arc;

    fn library() -> Database {
        let schema = Schema::new()
            .collection(
                "authors",
                CollectionSchema::new().foreign_key("favoriteBooks.$", ForeignKeySchema::to("books")),
            )
            .collection(
                "books",
                CollectionSchema::new().foreign_key("author", ForeignKeySchema::to("authors")),
            );
        let store = MemoryStore::from_fixture(json!({
            "authors": [
                { "_id": "a1", "name": "Ursula", "favoriteBooks": ["b2", "b3"], "address": null },
                { "_id": "a2", "name": "Philip", "favoriteBooks": [], "address": { "city": "Chicago" } }
            ],
            "books": [
                { "_id": "b1", "title": "Earthsea", "author": "a1", "year": 1968 },
                { "_id": "b2", "title": "Ubik", "author": "a2", "year": 1969 },
                { "_id": "b3", "title": "Solaris", "author": null, "year": 1961 }
            ]
        }))
        .unwrap();
        Database::with_schema(Arc::new(store), &schema).unwrap()
    }

    async fn select_one(db: &Database, collection: &str, id: &str, selector: &str) -> Result<Value> {
        let collection = db.collection(collection);
        let doc = collection.find_by_key(&json!(id)).await?.unwrap();
        collection.resolve(&docsel::parse(selector)?, doc).await
    }

    #[tokio::test]
    async fn test_identity_and_plain_fields() {
        let db = library();
        let doc = db.collection("books").find_by_key(&json!("b1")).await.unwrap().unwrap();
        let books = db.collection("books");
        assert_eq!(books.resolve(&Selector::Identity, doc.clone()).await.unwrap(), doc);
        assert_eq!(
            books.resolve(&docsel::parse("title").unwrap(), doc.clone()).await.unwrap(),
            doc["title"]
        );
    }

    #[tokio::test]
    async fn test_follows_scalar_and_array_foreign_keys() {
        let db = library();
        assert_eq!(select_one(&db, "books", "b1", "author name").await.unwrap(), "Ursula");
        assert_eq!(
            select_one(&db, "books", "b1", "author favoriteBooks $ title").await.unwrap(),
            json!(["Ubik", "Solaris"])
        );
        assert_eq!(
            select_one(&db, "authors", "a1", "favoriteBooks title").await.unwrap(),
            json!(["Ubik", "Solaris"])
        );
    }

    #[tokio::test]
    async fn test_index_fetches_one_referenced_document() {
        let db = library();
        assert_eq!(select_one(&db, "authors", "a1", "favoriteBooks 1 title").await.unwrap(), "Solaris");
        assert_eq!(select_one(&db, "authors", "a1", "favoriteBooks 7").await.unwrap(), Value::Null);
    }

    #[tokio::test]
    async fn test_foreign_keys_can_be_left_unresolved() {
        let db = library();
        let books = db.collection("books");
        let doc = books.find_by_key(&json!("b1")).await.unwrap().unwrap();
        let options = SelectionOptions {
            resolve_foreign_keys: false,
        };
        let selected = books
            .resolve_with(&docsel::parse("author").unwrap(), doc, &options)
            .await
            .unwrap();
        assert_eq!(selected, "a1");
    }

    #[tokio::test]
    async fn test_shortcut_stops_on_null() {
        let db = library();
        assert_eq!(select_one(&db, "books", "b3", "author > name").await.unwrap(), Value::Null);
        assert_eq!(select_one(&db, "authors", "a1", "address > city").await.unwrap(), Value::Null);
        assert_eq!(select_one(&db, "authors", "a2", "address > city").await.unwrap(), "Chicago");
        assert!(select_one(&db, "authors", "a1", "address city").await.is_err());
    }

    #[tokio::test]
    async fn test_resolution_errors() {
        let db = library();
        let err = select_one(&db, "books", "b1", "title length").await.unwrap_err();
        assert!(matches!(err, Error::Resolution { .. }));
        let err = select_one(&db, "books", "b1", "missing").await.unwrap_err();
        assert!(matches!(err, Error::Resolution { .. }));
        let err = select_one(&db, "books", "b1", "year 0").await.unwrap_err();
        assert!(matches!(err, Error::Resolution { .. }));
    }

    #[tokio::test]
    async fn test_tuple_and_object() {
        let db = library();
        assert_eq!(
            select_one(&db, "books", "b2", "[title, author name]").await.unwrap(),
            json!(["Ubik", "Philip"])
        );
        assert_eq!(
            select_one(&db, "books", "b2", "{ title, author name }").await.unwrap(),
            json!({ "title": "Ubik", "author": "Philip" })
        );
        assert_eq!(
            select_one(&db, "books", "b2", "{ *, author name }").await.unwrap(),
            json!({ "_id": "b2", "title": "Ubik", "year": 1969, "author": "Philip" })
        );
    }

    #[tokio::test]
    async fn test_map_flattens_and_hard_map_does_not() {
        let db = library();
        let books = db.collection("books");
        let doc = json!({ "shelves": [{ "tags": ["a", "b"] }, { "tags": ["c"] }] });
        let flat = books.resolve(&docsel::parse("shelves $ tags").unwrap(), doc.clone()).await.unwrap();
        assert_eq!(flat, json!(["a", "b", "c"]));
        let nested = books.resolve(&docsel::parse("shelves $$ tags").unwrap(), doc).await.unwrap();
        assert_eq!(nested, json!([["a", "b"], ["c"]]));
    }

    #[tokio::test]
    async fn test_filter_and_switch_predicates() {
        let db = library();
        let authors = db.collection("authors");
        let doc = authors.find_by_key(&json!("a1")).await.unwrap().unwrap();

        let recent = Predicate::new(|book: &Value, _, _| book["year"].as_i64().is_some_and(|y| y > 1965));
        let selector = docsel::select!("favoriteBooks ", recent, " $ title").unwrap();
        assert_eq!(authors.resolve(&selector, doc.clone()).await.unwrap(), json!(["Ubik"]));

        let has_address = Predicate::new(|author: &Value, _, _| !author["address"].is_null());
        let selector = docsel::select!("", has_address, " ? address city : name").unwrap();
        assert_eq!(authors.resolve(&selector, doc).await.unwrap(), "Ursula");
    }

    #[tokio::test]
    async fn test_filter_query_narrows_lazy_documents() {
        let db = library();
        let authors = db.collection("authors");
        let doc = authors.find_by_key(&json!("a1")).await.unwrap().unwrap();

        let selector = docsel::select!("favoriteBooks ", json!({ "year": { "$gt": 1965 } }), " title").unwrap();
        assert_eq!(authors.resolve(&selector, doc.clone()).await.unwrap(), json!(["Ubik"]));

        let selector = docsel::select!("name ", json!({ "year": 1 })).unwrap();
        let err = authors.resolve(&selector, doc).await.unwrap_err();
        assert!(matches!(err, Error::Resolution { .. }));
    }
}
