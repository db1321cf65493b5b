//! Record-type descriptions for the modelstore mapping layer.
//!
//! This crate defines the declarative side of the mapping between
//! application records and storage columns:
//!
//! - [`LeafKind`] and [`FieldType`]: what a single field holds.
//! - [`FieldSpec`] and [`RecordSchema`]: the ordered fields of a record.
//! - [`Model`]: implemented by record types to declare their schema once.
//! - [`SchemaVersion`]: the version number persisted alongside a schema.
//!
//! Descriptions can also be read from JSON-Schema documents with
//! [`RecordSchema::from_json_schema`].
//!
//! # Example
//!
//! ```
//! use modelstore_core::*;
//!
//! let schema = RecordSchema::new("Event")
//!     .field("id", FieldType::INTEGER)
//!     .field("time", FieldType::TIMESTAMP)
//!     .field("data", FieldType::optional(FieldType::Object));
//!
//! assert!(schema.get("data").unwrap().field_type.accepts_null());
//! assert!(!schema.get("time").unwrap().field_type.accepts_null());
//! ```

mod error;
mod json_schema;
mod types;
mod version;

pub use error::SchemaError;
pub use types::*;
pub use version::SchemaVersion;
