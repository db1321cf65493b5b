//! Error types for storage operations.
//!
//! Provides a unified error type covering store access, value conversion,
//! filter construction, key-value access, and schema version checks.

use modelstore_core::SchemaError;
use thiserror::Error;

/// Errors that can occur while mapping records to and from the store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// SQLite operation failure, surfaced unchanged (missing relations,
    /// constraint violations, lock timeouts).
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// JSON (de)serialization failure.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML (de)serialization failure.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// File I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A record description could not be turned into columns.
    #[error("schema error: {0}")]
    Schema(#[from] SchemaError),

    /// A field type has no storage mapping.
    #[error("cannot recognize type of column '{column}': {description}")]
    UnrecognizedType {
        /// Column being derived.
        column: String,
        /// Rendered type description.
        description: String,
    },

    /// A value does not fit the column it is written to or read from.
    #[error("cannot convert value for column '{column}': {message}")]
    Conversion {
        /// Column being converted.
        column: String,
        /// What went wrong.
        message: String,
    },

    /// The call would run an unsafe or ill-formed statement, such as an
    /// update or delete without a filter.
    #[error("programming error: {0}")]
    Programming(String),

    /// A table, view, index or column name is not a plain identifier.
    #[error("invalid identifier '{0}': must start with a letter or underscore and contain only alphanumeric characters and underscores")]
    InvalidIdentifier(String),

    /// A column is not declared by the relation's record type.
    #[error("column {column} does not exist in '{relation}'")]
    UnknownColumn {
        /// Relation name.
        relation: String,
        /// Missing column, quoted.
        column: String,
    },

    /// The store file cannot be opened as requested.
    #[error("operational error: {0}")]
    Operational(String),

    /// Schema version is missing, skewed, or cannot be upgraded.
    #[error("version error: {0}")]
    Version(String),

    /// A key-value access used a field the record type does not declare.
    #[error("'{model}' object has no attribute {key}")]
    UnknownAttribute {
        /// Record type name.
        model: String,
        /// Offending key(s), quoted.
        key: String,
    },

    /// Stored rows do not reassemble into a valid record.
    #[error("invalid '{model}' record: {message}")]
    Validation {
        /// Record type name.
        model: String,
        /// Validation failure.
        message: String,
    },

    /// The relation does not support the operation (e.g. writing to a view).
    #[error("operation '{operation}' is not supported by '{relation}'")]
    NotSupported {
        /// Operation name.
        operation: &'static str,
        /// Relation name.
        relation: String,
    },

    /// A query referenced a field outside the allowed set.
    #[error("invalid field name {0}")]
    InvalidField(String),
}

/// Convenience alias for results with [`StoreError`].
pub type Result<T> = std::result::Result<T, StoreError>;
