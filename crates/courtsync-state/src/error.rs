//! Error types for courtsync-state

use thiserror::Error;

/// Errors that can occur in the case persistence layer
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// Database connection error
    #[error("Database connection failed: {0}")]
    Connection(String),

    /// Backend query or transport error
    #[error("Storage backend error: {0}")]
    Backend(String),

    /// Serialization error
    #[error("Serialization failed: {0}")]
    Serialization(String),

    /// Case not found
    #[error("Case not found: {case_id}")]
    CaseNotFound { case_id: String },

    /// A unique field collided with an existing case
    #[error("Duplicate {field}: {value}")]
    Duplicate { field: &'static str, value: String },

    /// Schema setup error
    #[error("Schema setup failed: {0}")]
    SchemaSetup(String),
}

impl From<surrealdb::Error> for StorageError {
    fn from(err: surrealdb::Error) -> Self {
        StorageError::Backend(err.to_string())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_case_not_found_display() {
        let err = StorageError::CaseNotFound {
            case_id: "case-42".to_string(),
        };
        assert_eq!(err.to_string(), "Case not found: case-42");
    }

    #[test]
    fn test_duplicate_display_names_field() {
        let err = StorageError::Duplicate {
            field: "cnr_number",
            value: "BIHC01-1-2024".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("cnr_number"));
        assert!(msg.contains("BIHC01-1-2024"));
    }
}
