//! Input validation for schema declarations
//!
//! Collection names, primary key paths and foreign key paths are checked
//! against the identifier grammar before any graph is built, so a bad schema
//! never produces a partial graph.

use thiserror::Error;

/// Validation errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Invalid identifier '{0}': {1}")]
    InvalidIdentifier(String, &'static str),

    #[error("Identifier cannot be empty")]
    Empty,

    #[error("Invalid path '{0}': {1}")]
    InvalidPath(String, &'static str),
}

/// Validate a collection or field name: `[A-Za-z_-][A-Za-z0-9_-]*`
pub fn validate_identifier(name: &str) -> Result<(), ValidationError> {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return Err(ValidationError::Empty);
    };

    if !(first.is_ascii_alphabetic() || first == '_' || first == '-') {
        return Err(ValidationError::InvalidIdentifier(
            name.to_string(),
            "must start with a letter, underscore, or hyphen",
        ));
    }

    if chars.any(|c| !(c.is_ascii_alphanumeric() || c == '_' || c == '-')) {
        return Err(ValidationError::InvalidIdentifier(
            name.to_string(),
            "contains invalid characters (only alphanumeric, underscore, and hyphen allowed)",
        ));
    }

    Ok(())
}

/// Validate a primary key path: identifiers joined by dots
pub fn validate_key_path(path: &str) -> Result<(), ValidationError> {
    for segment in path.split('.') {
        validate_identifier(segment)
            .map_err(|_| ValidationError::InvalidPath(path.to_string(), "segments must be identifiers"))?;
    }
    Ok(())
}

/// Validate a foreign key path: an identifier followed by dot-separated
/// identifiers or `$` array wildcards
pub fn validate_foreign_key_path(path: &str) -> Result<(), ValidationError> {
    let mut segments = path.split('.');
    let Some(first) = segments.next() else {
        return Err(ValidationError::Empty);
    };
    if validate_identifier(first).is_err() {
        return Err(ValidationError::InvalidPath(
            path.to_string(),
            "must start with an identifier",
        ));
    }
    for segment in segments {
        if segment != "$" && validate_identifier(segment).is_err() {
            return Err(ValidationError::InvalidPath(
                path.to_string(),
                "segments must be identifiers or '$'",
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_identifiers() {
        assert!(validate_identifier("Author").is_ok());
        assert!(validate_identifier("_id").is_ok());
        assert!(validate_identifier("-weird-").is_ok());
        assert!(validate_identifier("book2").is_ok());
    }

    #[test]
    fn test_invalid_identifiers() {
        assert_eq!(validate_identifier(""), Err(ValidationError::Empty));
        assert!(validate_identifier("2books").is_err());
        assert!(validate_identifier("a.b").is_err());
        assert!(validate_identifier("a b").is_err());
        assert!(validate_identifier("$").is_err());
    }

    #[test]
    fn test_key_path() {
        assert!(validate_key_path("_id").is_ok());
        assert!(validate_key_path("meta.slug").is_ok());
        assert!(validate_key_path("meta..slug").is_err());
        assert!(validate_key_path("meta.$").is_err());
    }

    #[test]
    fn test_foreign_key_path() {
        assert!(validate_foreign_key_path("author").is_ok());
        assert!(validate_foreign_key_path("books.$").is_ok());
        assert!(validate_foreign_key_path("a.$.b.$.c").is_ok());
        assert!(validate_foreign_key_path("$.a").is_err());
        assert!(validate_foreign_key_path("a.$$").is_err());
        assert!(validate_foreign_key_path("a.").is_err());
        assert!(validate_foreign_key_path("").is_err());
    }

    #[test]
    fn test_foreign_key_path_errors_name_the_path() {
        let err = validate_foreign_key_path("$.a").unwrap_err();
        assert!(matches!(err, ValidationError::InvalidPath(path, _) if path == "$.a"));
        let err = validate_foreign_key_path("").unwrap_err();
        assert!(matches!(err, ValidationError::InvalidPath(path, _) if path.is_empty()));
    }
}
