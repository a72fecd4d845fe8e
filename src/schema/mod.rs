//! Schema declarations for docrel
//!
//! A schema maps collection names to their primary key and foreign keys:
//!
//! ```yaml
//! Author:
//!   foreignKeys:
//!     favoriteBooks.$:
//!       collection: Book
//!       onDelete: PULL
//! Book:
//!   foreignKeys:
//!     author:
//!       collection: Author
//!       onDelete: DELETE
//! ```
//!
//! Schemas load from a single JSON/YAML file, or from a directory holding one
//! `<collection>.{json,yaml,yml}` file per collection.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use walkdir::WalkDir;

use crate::error::{Error, Result};

/// What happens when a document holding a foreign key is inserted
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum InsertPolicy {
    /// No check
    Bypass,
    /// Every key must match an existing document in the target collection
    #[default]
    Verify,
}

/// What happens to referencing documents when a referenced document is deleted
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DeletePolicy {
    #[default]
    Bypass,
    /// Abort the delete
    Reject,
    /// Cascade-delete the referencing documents
    Delete,
    /// Remove the field
    Unset,
    /// Set the field to null
    Nullify,
    /// Remove the matching elements from the array
    Pull,
}

impl DeletePolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeletePolicy::Bypass => "BYPASS",
            DeletePolicy::Reject => "REJECT",
            DeletePolicy::Delete => "DELETE",
            DeletePolicy::Unset => "UNSET",
            DeletePolicy::Nullify => "NULLIFY",
            DeletePolicy::Pull => "PULL",
        }
    }
}

impl fmt::Display for DeletePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Declaration of one foreign key
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ForeignKeySchema {
    /// Target collection, the owning collection when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_insert: Option<InsertPolicy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_delete: Option<DeletePolicy>,
}

impl ForeignKeySchema {
    /// A foreign key into `collection`
    pub fn to(collection: impl Into<String>) -> Self {
        Self {
            collection: Some(collection.into()),
            ..Default::default()
        }
    }

    pub fn on_insert(mut self, policy: InsertPolicy) -> Self {
        self.on_insert = Some(policy);
        self
    }

    pub fn on_delete(mut self, policy: DeletePolicy) -> Self {
        self.on_delete = Some(policy);
        self
    }
}

/// Declaration of one collection
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CollectionSchema {
    /// Primary key field, `_id` when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    /// Foreign key path (`a.$.b`) to its declaration
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub foreign_keys: BTreeMap<String, ForeignKeySchema>,
}

impl CollectionSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn foreign_key(mut self, path: impl Into<String>, config: ForeignKeySchema) -> Self {
        self.foreign_keys.insert(path.into(), config);
        self
    }
}

/// A whole database schema
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Schema {
    pub collections: BTreeMap<String, CollectionSchema>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a collection declaration
    pub fn collection(mut self, name: impl Into<String>, config: CollectionSchema) -> Self {
        self.collections.insert(name.into(), config);
        self
    }

    pub fn get(&self, name: &str) -> Option<&CollectionSchema> {
        self.collections.get(name)
    }

    pub fn from_json_str(content: &str) -> Result<Self> {
        Ok(serde_json::from_str(content)?)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        Ok(serde_json::from_value(value)?)
    }

    /// Load a schema file, or a directory of per-collection files
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if path.is_dir() {
            return Self::load_dir(path);
        }
        let content = std::fs::read_to_string(path).map_err(|e| load_error(path, e))?;
        match extension(path) {
            Some("json") => Self::from_json_str(&content),
            Some("yaml") | Some("yml") => Self::from_yaml_str(&content),
            other => Err(Error::SchemaLoad {
                path: path.to_path_buf(),
                message: format!("unsupported schema extension {:?}", other.unwrap_or("")),
            }),
        }
        .map_err(|e| match e {
            Error::SchemaLoad { .. } => e,
            other => load_error(path, other),
        })
    }

    fn load_dir(dir: &Path) -> Result<Self> {
        let mut schema = Schema::new();
        let entries = WalkDir::new(dir)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name();

        for entry in entries {
            let entry = entry.map_err(|e| load_error(dir, e))?;
            let path = entry.path();
            if !entry.file_type().is_file() {
                continue;
            }
            let ext = extension(path);
            if !matches!(ext, Some("json") | Some("yaml") | Some("yml")) {
                continue;
            }
            let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if schema.collections.contains_key(name) {
                return Err(Error::SchemaLoad {
                    path: path.to_path_buf(),
                    message: format!("collection '{name}' is declared by more than one file"),
                });
            }
            let content = std::fs::read_to_string(path).map_err(|e| load_error(path, e))?;
            let config: CollectionSchema = if ext == Some("json") {
                serde_json::from_str(&content).map_err(|e| load_error(path, e))?
            } else {
                serde_yaml::from_str(&content).map_err(|e| load_error(path, e))?
            };
            schema.collections.insert(name.to_string(), config);
        }

        Ok(schema)
    }
}

fn extension(path: &Path) -> Option<&str> {
    path.extension().and_then(|e| e.to_str())
}

fn load_error(path: &Path, err: impl fmt::Display) -> Error {
    Error::SchemaLoad {
        path: path.to_path_buf(),
        message: err.to_string(),
    }
}
