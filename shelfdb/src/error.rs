use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ShelfError {
    /// A schema rule was violated (required, range, length, enum, pattern, duplicate id).
    #[error("Validation error at '{field}': {message}")]
    Validation { field: String, message: String },

    /// The value has the wrong shape for the field.
    #[error("Type error at '{field}': {message}")]
    Type { field: String, message: String },

    #[error("Collection '{0}' not found in schema")]
    UnknownCollection(String),

    #[error("Document not found: {collection}/{id}")]
    NotFound { collection: String, id: String },

    #[error("Schema error at '{field}': {message}")]
    SchemaCompile { field: String, message: String },

    #[error("Capacity exceeded: {0}")]
    Capacity(String),

    #[error("Query error: {0}")]
    Query(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Glob error: {0}")]
    Glob(#[from] glob::PatternError),
}

pub type Result<T> = std::result::Result<T, ShelfError>;

impl ShelfError {
    pub(crate) fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        ShelfError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    pub(crate) fn type_error(field: impl Into<String>, message: impl Into<String>) -> Self {
        ShelfError::Type {
            field: field.into(),
            message: message.into(),
        }
    }

    pub(crate) fn not_found(collection: impl Into<String>, id: impl ToString) -> Self {
        ShelfError::NotFound {
            collection: collection.into(),
            id: id.to_string(),
        }
    }

    pub(crate) fn schema(field: impl Into<String>, message: impl Into<String>) -> Self {
        ShelfError::SchemaCompile {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// The plain `{error, message}` object handed back across the store boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorReport {
    pub error: bool,
    pub message: String,
}

impl From<&ShelfError> for ErrorReport {
    fn from(err: &ShelfError) -> Self {
        ErrorReport {
            error: true,
            message: err.to_string(),
        }
    }
}

impl From<ShelfError> for ErrorReport {
    fn from(err: ShelfError) -> Self {
        ErrorReport::from(&err)
    }
}
