//! Reference lookups and dangling key scans

use serde_json::{json, Value};
use std::collections::BTreeMap;
use tracing::debug;

use crate::collection::Collection;
use crate::error::Result;
use crate::path::{path_to_key, values_at};
use crate::store::filter::values_equal;
use crate::store::FindOptions;
use crate::Database;

/// Referencing collection to foreign key to documents (or their keys)
pub type ReferencingDocuments = BTreeMap<String, BTreeMap<String, Vec<Value>>>;

/// Collection to foreign key to values matching no target document
pub type DanglingKeys = BTreeMap<String, BTreeMap<String, Vec<Value>>>;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FindReferencesOptions {
    /// Report the keys of referencing documents instead of the documents
    pub keys_only: bool,
    /// Only look in these collections
    pub collections: Option<Vec<String>>,
    pub exclude_collections: Vec<String>,
}

impl FindReferencesOptions {
    fn includes(&self, collection: &str) -> bool {
        let listed = self
            .collections
            .as_ref()
            .map_or(true, |names| names.iter().any(|name| name == collection));
        listed && !self.exclude_collections.iter().any(|name| name == collection)
    }
}

pub(crate) async fn find_references(
    collection: &Collection,
    keys: &[Value],
    options: &FindReferencesOptions,
) -> Result<ReferencingDocuments> {
    let mut found = ReferencingDocuments::new();
    if keys.is_empty() {
        return Ok(found);
    }

    for (referencing, foreign_keys) in collection.references() {
        if !options.includes(referencing) {
            continue;
        }
        let source = collection.database().collection(referencing);
        for foreign_key in foreign_keys.keys() {
            let query = json!({ foreign_key.as_str(): { "$in": keys } });
            let documents = if options.keys_only {
                source.raw_keys(&query, None).await?
            } else {
                source.store().find(referencing, &query, FindOptions::default()).await?
            };
            if !documents.is_empty() {
                found
                    .entry(referencing.clone())
                    .or_default()
                    .insert(foreign_key.clone(), documents);
            }
        }
    }
    Ok(found)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanOptions {
    /// Documents read per query
    pub batch_size: usize,
    /// Stop after this many documents per collection
    pub limit: Option<usize>,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            batch_size: 100,
            limit: None,
        }
    }
}

/// Scan every collection with foreign keys for values matching no document
/// of the target collection
pub(crate) async fn find_dangling_keys(database: &Database, options: ScanOptions) -> Result<DanglingKeys> {
    let mut dangling = DanglingKeys::new();
    let batch_size = options.batch_size.max(1);

    for (name, config) in database.graph().collections() {
        if config.foreign_keys.is_empty() {
            continue;
        }
        let projection: Vec<String> = config.foreign_keys.values().map(|fk| path_to_key(&fk.path)).collect();

        // Distinct values per foreign key across the whole collection
        let mut values: BTreeMap<&str, Vec<Value>> = BTreeMap::new();
        let mut scanned = 0;
        loop {
            let remaining = options.limit.map_or(batch_size, |limit| batch_size.min(limit - scanned));
            if remaining == 0 {
                break;
            }
            let page = FindOptions {
                skip: scanned,
                limit: Some(remaining),
                projection: Some(projection.clone()),
            };
            let docs = database.store().find(name, &json!({}), page).await?;
            scanned += docs.len();

            for doc in &docs {
                for (key, foreign_key) in &config.foreign_keys {
                    let seen = values.entry(key.as_str()).or_default();
                    for value in values_at(doc, &foreign_key.path) {
                        if !seen.iter().any(|s| values_equal(s, &value)) {
                            seen.push(value);
                        }
                    }
                }
            }
            if docs.len() < remaining {
                break;
            }
        }
        debug!(collection = %name, scanned, "scanned foreign keys");

        for (key, found) in values {
            if found.is_empty() {
                continue;
            }
            let foreign_key = &config.foreign_keys[key];
            let target = database.collection(&foreign_key.collection);
            let existing = target.raw_keys(&json!({ target.key(): { "$in": &found } }), None).await?;
            let missing: Vec<Value> = found
                .into_iter()
                .filter(|value| !existing.iter().any(|e| values_equal(e, value)))
                .collect();
            if !missing.is_empty() {
                dangling
                    .entry(name.clone())
                    .or_default()
                    .insert(key.to_string(), missing);
            }
        }
    }
    Ok(dangling)
}
