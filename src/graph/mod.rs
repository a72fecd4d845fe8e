//! Dependency graph between collections
//!
//! Built once from a [`Schema`]. Each collection knows its own foreign keys and,
//! for every other collection, which of their foreign keys point at it.

pub mod updater;

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::OnceLock;
use tracing::debug;

use crate::error::{Error, Result};
use crate::path::path_to_key;
use crate::schema::{DeletePolicy, InsertPolicy, Schema};
use crate::validation::{self, ValidationError};

pub use updater::{to_pull_updater, to_set_updater, Updater};

/// Primary key field used when a collection declares none
pub const DEFAULT_KEY: &str = "_id";

/// One compiled foreign key
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ForeignKeyConfig {
    pub path: Vec<String>,
    pub collection: String,
    pub on_insert: InsertPolicy,
    pub on_delete: DeletePolicy,
    /// Precomputed update target for UNSET, NULLIFY and PULL
    pub updater: Option<Updater>,
}

impl ForeignKeyConfig {
    /// Whether the path ends with an array wildcard, holding several keys
    pub fn is_array(&self) -> bool {
        self.path.last().is_some_and(|s| s == "$")
    }
}

/// Foreign key canonical path to its config
pub type ForeignKeys = BTreeMap<String, ForeignKeyConfig>;

/// Referencing collection name to the foreign keys it points here with
pub type References = BTreeMap<String, ForeignKeys>;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionConfig {
    pub key: String,
    pub foreign_keys: ForeignKeys,
    pub references: References,
}

impl Default for CollectionConfig {
    fn default() -> Self {
        Self {
            key: DEFAULT_KEY.to_string(),
            foreign_keys: BTreeMap::new(),
            references: BTreeMap::new(),
        }
    }
}

/// The compiled dependency graph
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Graph {
    collections: BTreeMap<String, CollectionConfig>,
}

/// Build the dependency graph of a schema
pub fn build_graph(schema: &Schema) -> Result<Graph> {
    Graph::build(schema)
}

impl Graph {
    /// Validate `schema` and compile it. Nothing is built unless every
    /// collection and foreign key is valid.
    pub fn build(schema: &Schema) -> Result<Self> {
        validate(schema)?;

        let mut graph = Graph::default();
        for (name, declared) in &schema.collections {
            graph.entry(name).key = declared
                .key
                .clone()
                .unwrap_or_else(|| DEFAULT_KEY.to_string());

            for (raw_path, declared_fk) in &declared.foreign_keys {
                let path: Vec<String> = raw_path.split('.').map(String::from).collect();
                let foreign_key = path_to_key(&path);
                let on_delete = declared_fk.on_delete.unwrap_or_default();
                let updater = match on_delete {
                    DeletePolicy::Unset | DeletePolicy::Nullify => Some(to_set_updater(&path)),
                    DeletePolicy::Pull => to_pull_updater(&path),
                    _ => None,
                };
                let config = ForeignKeyConfig {
                    collection: declared_fk.collection.clone().unwrap_or_else(|| name.clone()),
                    on_insert: declared_fk.on_insert.unwrap_or_default(),
                    on_delete,
                    updater,
                    path,
                };

                let target = config.collection.clone();
                graph
                    .entry(name)
                    .foreign_keys
                    .insert(foreign_key.clone(), config.clone());
                graph
                    .entry(&target)
                    .references
                    .entry(name.clone())
                    .or_default()
                    .insert(foreign_key, config);
            }
        }

        debug!(collections = graph.collections.len(), "Built dependency graph");
        Ok(graph)
    }

    fn entry(&mut self, name: &str) -> &mut CollectionConfig {
        self.collections.entry(name.to_string()).or_default()
    }

    pub fn get(&self, name: &str) -> Option<&CollectionConfig> {
        self.collections.get(name)
    }

    /// Config of a collection; unknown collections get the default config
    pub fn config(&self, name: &str) -> &CollectionConfig {
        static DEFAULT: OnceLock<CollectionConfig> = OnceLock::new();
        self.collections
            .get(name)
            .unwrap_or_else(|| DEFAULT.get_or_init(CollectionConfig::default))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.collections.contains_key(name)
    }

    pub fn collections(&self) -> impl Iterator<Item = (&String, &CollectionConfig)> {
        self.collections.iter()
    }

    pub fn len(&self) -> usize {
        self.collections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.collections.is_empty()
    }
}

// =============================================================================
// Schema validation
// =============================================================================

fn validate(schema: &Schema) -> Result<()> {
    for (name, declared) in &schema.collections {
        validation::validate_identifier(name)
            .map_err(|e| invalid(name, "collection name", e))?;

        if let Some(key) = &declared.key {
            validation::validate_key_path(key).map_err(|e| invalid(name, "primary key", e))?;
        }

        let mut canonical: BTreeMap<String, &str> = BTreeMap::new();
        for (raw_path, declared_fk) in &declared.foreign_keys {
            validation::validate_foreign_key_path(raw_path)
                .map_err(|e| invalid(name, "foreign key path", e))?;

            if let Some(target) = &declared_fk.collection {
                validation::validate_identifier(target)
                    .map_err(|e| invalid(name, "foreign collection name", e))?;
            }

            let path: Vec<String> = raw_path.split('.').map(String::from).collect();
            let foreign_key = path_to_key(&path);
            if let Some(previous) = canonical.insert(foreign_key.clone(), raw_path) {
                return Err(Error::InvalidSchema {
                    message: format!(
                        "foreign keys <{previous}> and <{raw_path}> in collection <{name}> both resolve to <{foreign_key}>"
                    ),
                });
            }

            check_policy(name, &foreign_key, &path, declared_fk.on_delete.unwrap_or_default())?;
        }
    }
    Ok(())
}

fn check_policy(collection: &str, foreign_key: &str, path: &[String], policy: DeletePolicy) -> Result<()> {
    let incoherent = |reason| Error::IncoherentPolicy {
        collection: collection.to_string(),
        foreign_key: foreign_key.to_string(),
        policy: policy.as_str(),
        reason,
    };
    let ends_with_wildcard = path.last().is_some_and(|s| s == "$");
    match policy {
        DeletePolicy::Pull if !path.iter().any(|s| s == "$") => {
            Err(incoherent("the path has no '$' segment to pull from"))
        }
        DeletePolicy::Unset | DeletePolicy::Nullify if ends_with_wildcard => {
            Err(incoherent("the path ends with a '$' array wildcard, use PULL"))
        }
        _ => Ok(()),
    }
}

fn invalid(collection: &str, kind: &'static str, err: ValidationError) -> Error {
    let (value, reason) = match err {
        ValidationError::InvalidIdentifier(value, reason) => (value, reason),
        ValidationError::InvalidPath(value, reason) => (value, reason),
        ValidationError::Empty => (String::new(), "cannot be empty"),
    };
    Error::InvalidIdentifier {
        collection: collection.to_string(),
        kind,
        value,
        reason,
    }
}
