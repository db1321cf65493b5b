//! Single records stored as key/value rows.
//!
//! A [`KeysTable`] keeps one logical record of type `M` as one row per
//! field. Writes replace existing rows for the same key. Reading the whole
//! record reassembles the rows and deserializes them into `M`, so partial
//! data surfaces as a [`Validation`](StoreError::Validation) error rather
//! than a silently defaulted record.

use std::marker::PhantomData;

use modelstore_core::{FieldType, Model, RecordSchema};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::filter::{Filter, OnExists, SelectOptions};
use crate::relation::Relation;
use crate::schema::CreateOptions;
use crate::table::Table;

/// One row of a [`KeysTable`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyValue {
    /// Field name.
    pub key: String,
    /// Field value; `null` is stored as SQL `NULL`.
    pub value: Value,
}

impl Model for KeyValue {
    fn schema() -> RecordSchema {
        RecordSchema::new("KeyValue")
            .field("key", FieldType::TEXT)
            .field("value", FieldType::optional(FieldType::Any))
    }
}

/// A record of type `M` stored as one row per field.
///
/// # Examples
///
/// ```
/// use modelstore_core::{FieldType, Model, RecordSchema};
/// use modelstore_sqlite::{CreateOptions, Database, KeysTable};
/// use serde::{Deserialize, Serialize};
/// use serde_json::json;
///
/// #[derive(Debug, PartialEq, Serialize, Deserialize)]
/// struct Settings {
///     theme: String,
///     retries: i64,
/// }
///
/// impl Model for Settings {
///     fn schema() -> RecordSchema {
///         RecordSchema::new("Settings")
///             .field("theme", FieldType::TEXT)
///             .field("retries", FieldType::INTEGER)
///     }
/// }
///
/// let db = Database::open_in_memory().unwrap();
/// let settings = KeysTable::<Settings>::new(&db, "settings").unwrap();
/// settings.create(CreateOptions::new()).unwrap();
/// assert_eq!(settings.get().unwrap(), None);
///
/// settings.set(&Settings { theme: "dark".into(), retries: 3 }).unwrap();
/// settings.set_field("retries", json!(5)).unwrap();
/// assert_eq!(settings.get_field("retries").unwrap(), Some(json!(5)));
/// assert!(settings.set_field("colour", json!("red")).is_err());
/// ```
pub struct KeysTable<'db, M> {
    table: Table<'db, KeyValue>,
    schema: RecordSchema,
    _marker: PhantomData<fn() -> M>,
}

impl<'db, M: Model> KeysTable<'db, M> {
    /// Binds a key-value store to `name`.
    pub fn new(db: &'db Database, name: impl Into<String>) -> Result<Self> {
        Ok(Self {
            table: Table::builder(db, name).primary_key("key").build()?,
            schema: M::schema(),
            _marker: PhantomData,
        })
    }

    /// Name of the table in the store.
    pub fn name(&self) -> &str {
        self.table.name()
    }

    /// The `CREATE TABLE` statement.
    pub fn create_sql(&self, options: CreateOptions) -> String {
        self.table.create_sql(options)
    }

    /// Creates the table.
    pub fn create(&self, options: CreateOptions) -> Result<()> {
        self.table.create(options)
    }

    /// Stores every field of `record`.
    pub fn set(&self, record: &M) -> Result<usize> {
        let rows = match serde_json::to_value(record)? {
            Value::Object(object) => object
                .into_iter()
                .map(|(key, value)| KeyValue { key, value })
                .collect::<Vec<_>>(),
            other => {
                return Err(StoreError::Validation {
                    model: self.schema.name.clone(),
                    message: format!("expected an object, got {other}"),
                });
            }
        };
        self.table.insert(&rows, OnExists::Replace)
    }

    /// Stores one field.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::UnknownAttribute`] if `M` has no such field.
    pub fn set_field(&self, key: &str, value: Value) -> Result<usize> {
        self.check_keys([key])?;
        self.table.insert(
            &[KeyValue {
                key: key.to_string(),
                value,
            }],
            OnExists::Replace,
        )
    }

    /// Stores several fields at once.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::UnknownAttribute`] naming every unknown field;
    /// nothing is written in that case.
    pub fn update<I, K>(&self, fields: I) -> Result<usize>
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        let rows: Vec<KeyValue> = fields
            .into_iter()
            .map(|(key, value)| KeyValue {
                key: key.into(),
                value,
            })
            .collect();
        self.check_keys(rows.iter().map(|r| r.key.as_str()))?;
        self.table.insert(&rows, OnExists::Replace)
    }

    /// Reassembles the record.
    ///
    /// Returns `None` only when no rows are stored.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Validation`] if the stored rows do not form a
    /// valid `M`.
    pub fn get(&self) -> Result<Option<M>> {
        let Some(object) = self.load()? else {
            return Ok(None);
        };
        serde_json::from_value(Value::Object(object))
            .map(Some)
            .map_err(|e| StoreError::Validation {
                model: self.schema.name.clone(),
                message: e.to_string(),
            })
    }

    /// Reads one field of the reassembled record.
    ///
    /// Returns `None` only when no rows are stored.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::UnknownAttribute`] if `M` has no such field,
    /// before touching storage, and [`StoreError::Validation`] if the stored
    /// rows do not form a valid `M`.
    pub fn get_field(&self, key: &str) -> Result<Option<Value>> {
        self.check_keys([key])?;
        let Some(record) = self.get()? else {
            return Ok(None);
        };
        match serde_json::to_value(&record)? {
            Value::Object(mut object) => Ok(Some(object.remove(key).unwrap_or(Value::Null))),
            _ => Ok(Some(Value::Null)),
        }
    }

    /// Stored rows as `(key, value)` pairs.
    pub fn entries(&self) -> Result<Vec<(String, Value)>> {
        Ok(self
            .table
            .select(Filter::All, SelectOptions::new())?
            .fetch_all()?
            .into_iter()
            .map(|kv| (kv.key, kv.value))
            .collect())
    }

    fn load(&self) -> Result<Option<Map<String, Value>>> {
        let entries = self.entries()?;
        if entries.is_empty() {
            return Ok(None);
        }
        Ok(Some(entries.into_iter().collect()))
    }

    fn check_keys<'k>(&self, keys: impl IntoIterator<Item = &'k str>) -> Result<()> {
        let unknown: Vec<String> = keys
            .into_iter()
            .filter(|k| !self.schema.contains(k))
            .map(|k| format!("'{k}'"))
            .collect();
        if unknown.is_empty() {
            Ok(())
        } else {
            Err(StoreError::UnknownAttribute {
                model: self.schema.name.clone(),
                key: unknown.join(", "),
            })
        }
    }
}
