//! Error types for record descriptions and schema versions.

use thiserror::Error;

/// Errors raised while building or parsing record descriptions.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    /// A field's type description has no entry in the leaf registry.
    #[error("cannot recognize type of field '{field}' from schema {description}")]
    UnrecognizedType {
        /// Field the description belongs to.
        field: String,
        /// The offending description, rendered as JSON.
        description: String,
    },

    /// A `$ref` points at a definition that does not exist.
    #[error("field '{field}' references undefined schema '{reference}'")]
    UnresolvedReference {
        /// Field holding the reference.
        field: String,
        /// The reference string.
        reference: String,
    },

    /// The document is not an object schema with properties.
    #[error("invalid schema document: {0}")]
    InvalidDocument(String),

    /// A version string is not of the form `major[.minor[.patch]]`.
    #[error("invalid version '{0}'")]
    InvalidVersion(String),
}
