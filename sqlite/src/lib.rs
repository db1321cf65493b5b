//! SQLite storage for typed records.
//!
//! This crate maps records described by a
//! [`RecordSchema`](modelstore_core::RecordSchema) onto SQLite tables so that
//! routine reads and writes need no hand-written SQL. Column definitions are
//! derived from the schema once, values are converted at the storage
//! boundary, and every filter is compiled to a parameterized where clause.
//!
//! # Architecture
//!
//! - **`column`**: column definitions and value converters
//! - **`filter`**: where-clause synthesis from raw SQL, field maps and records
//! - **`cursor`**: lazy decoding of result rows
//! - **`table`**, **`view`**, **`keys_table`**: the relations
//! - **`query`**: a small query language compiled to where clauses
//! - **`migration`**: version-range upgrade chains
//! - **`database`**: the connection, transactions and the exclusivity check
//!
//! # Quick start
//!
//! ```
//! use modelstore_core::{FieldType, Model, RecordSchema};
//! use modelstore_sqlite::{
//!     CreateOptions, Database, FieldMap, Filter, OnExists, Order, Relation, SelectOptions, Table,
//! };
//! use serde::{Deserialize, Serialize};
//! use serde_json::json;
//!
//! #[derive(Debug, PartialEq, Serialize, Deserialize)]
//! struct Item {
//!     id: i64,
//!     name: String,
//!     tags: Option<Vec<String>>,
//! }
//!
//! impl Model for Item {
//!     fn schema() -> RecordSchema {
//!         RecordSchema::new("Item")
//!             .field("id", FieldType::INTEGER)
//!             .field("name", FieldType::TEXT)
//!             .field("tags", FieldType::optional(FieldType::array(FieldType::TEXT)))
//!     }
//! }
//!
//! let db = Database::open_in_memory().unwrap();
//! let items = Table::<Item>::builder(&db, "items").primary_key("id").build().unwrap();
//! items.create(CreateOptions::new()).unwrap();
//!
//! items
//!     .insert(
//!         &[
//!             Item { id: 2, name: "b".into(), tags: None },
//!             Item { id: 1, name: "a".into(), tags: Some(vec!["x".into()]) },
//!         ],
//!         OnExists::Error,
//!     )
//!     .unwrap();
//! db.commit().unwrap();
//!
//! let rows = items
//!     .select(
//!         Filter::fields(FieldMap::new().with("id", json!([1, 2]))),
//!         SelectOptions::new().order_by("id", Order::Asc),
//!     )
//!     .unwrap()
//!     .fetch_all()
//!     .unwrap();
//! assert_eq!(rows[0].tags, Some(vec!["x".to_string()]));
//! assert_eq!(rows[1].tags, None);
//! ```

mod column;
mod config;
mod cursor;
mod database;
mod error;
mod filter;
mod keys_table;
pub mod migration;
pub mod query;
mod relation;
mod schema;
mod table;
mod view;

pub use column::{ColumnSpec, Converter, SqlType};
pub use config::DatabaseConfig;
pub use cursor::{Cursor, CursorIter};
pub use database::Database;
pub use error::{Result, StoreError};
pub use filter::{FieldMap, Filter, OnExists, Order, SelectOptions, SqlValue, WhereClause};
pub use keys_table::{KeyValue, KeysTable};
pub use migration::{METADATA_TABLE, Metadata, Migrator, MigratorBuilder};
pub use query::{Operation, QueryToken, TokenValue, tokenize, tokens_to_where};
pub use relation::Relation;
pub use schema::CreateOptions;
pub use table::{Table, TableBuilder};
pub use view::{View, ViewBuilder};
