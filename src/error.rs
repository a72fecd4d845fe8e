//! Error types for docrel
//!
//! Every error names the collection and the field or key involved so that a
//! failed insert, delete or selection can be traced back to the schema.

use std::path::PathBuf;
use thiserror::Error;

/// The main error type for docrel operations
#[derive(Debug, Error)]
pub enum Error {
    // ==========================================================================
    // Schema Errors
    // ==========================================================================
    #[error("Invalid schema: {message}")]
    InvalidSchema { message: String },

    #[error("Invalid {kind} '{value}' in collection '{collection}': {reason}")]
    InvalidIdentifier {
        collection: String,
        kind: &'static str,
        value: String,
        reason: &'static str,
    },

    #[error("Foreign key '{foreign_key}' in collection '{collection}' can't implement the {policy} delete policy: {reason}")]
    IncoherentPolicy {
        collection: String,
        foreign_key: String,
        policy: &'static str,
        reason: &'static str,
    },

    #[error("Failed to load schema from '{path}': {message}")]
    SchemaLoad { path: PathBuf, message: String },

    // ==========================================================================
    // Selector Errors
    // ==========================================================================
    #[error(transparent)]
    Parse(#[from] docsel::ParseError),

    #[error("Selector resolution failed in collection '{collection}': {message}")]
    Resolution { collection: String, message: String },

    // ==========================================================================
    // Integrity Errors
    // ==========================================================================
    #[error("Invalid foreign key '{foreign_key}' in collection '{collection}': {message}")]
    ForeignKeyViolation {
        collection: String,
        foreign_key: String,
        message: String,
    },

    #[error("Delete in collection '{collection}' rejected: foreign key '{foreign_key}' in collection '{referencing}' points to targeted documents")]
    DeleteRejected {
        collection: String,
        referencing: String,
        foreign_key: String,
    },

    // ==========================================================================
    // Store Errors
    // ==========================================================================
    #[error("Invalid query in collection '{collection}': {message}")]
    InvalidQuery { collection: String, message: String },

    #[error("Store error in collection '{collection}': {message}")]
    Store { collection: String, message: String },

    // ==========================================================================
    // Serialization Errors
    // ==========================================================================
    #[error("Failed to parse YAML: {message}")]
    YamlParseError { message: String },

    #[error("Failed to parse JSON: {message}")]
    JsonParseError { message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for docrel operations
pub type Result<T> = std::result::Result<T, Error>;

// =============================================================================
// Conversions from external error types
// =============================================================================

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Self {
        Error::YamlParseError {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::JsonParseError {
            message: err.to_string(),
        }
    }
}

// =============================================================================
// Error Display Helpers
// =============================================================================

impl Error {
    pub(crate) fn resolution(collection: &str, message: impl Into<String>) -> Self {
        Error::Resolution {
            collection: collection.to_string(),
            message: message.into(),
        }
    }

    pub(crate) fn invalid_query(collection: &str, message: impl Into<String>) -> Self {
        Error::InvalidQuery {
            collection: collection.to_string(),
            message: message.into(),
        }
    }

    pub(crate) fn store(collection: &str, message: impl Into<String>) -> Self {
        Error::Store {
            collection: collection.to_string(),
            message: message.into(),
        }
    }

    /// Returns a user-friendly suggestion for fixing the error
    pub fn suggestion(&self) -> Option<&'static str> {
        match self {
            Error::InvalidIdentifier { .. } => {
                Some("Identifiers must match [A-Za-z_-][A-Za-z0-9_-]*, paths join them with dots")
            }
            Error::IncoherentPolicy { .. } => {
                Some("PULL needs a '$' segment in the path; UNSET and NULLIFY can't end with '$'")
            }
            Error::ForeignKeyViolation { .. } => {
                Some("Insert the referenced document first, or set the foreign key's onInsert to BYPASS")
            }
            Error::DeleteRejected { .. } => {
                Some("Delete or update the referencing documents first, or use find_references to list them")
            }
            Error::Parse(_) => Some("Check the selector syntax around the reported position"),
            _ => None,
        }
    }

    /// Returns true if this error is recoverable
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::Parse(_)
                | Error::Resolution { .. }
                | Error::ForeignKeyViolation { .. }
                | Error::DeleteRejected { .. }
                | Error::InvalidQuery { .. }
        )
    }
}
