//! Column derivation and value conversion.
//!
//! A [`ColumnSpec`] is derived once per field of a record description. It
//! fixes the column's SQL type, its nullability, and the [`Converter`] used
//! to move values between their in-memory JSON form and SQLite primitives.
//!
//! # Storage mapping
//!
//! | field type | SQL type | stored as |
//! |---|---|---|
//! | text, path | `text` | the string |
//! | timestamp | `text` | the ISO-8601 string, validated |
//! | uuid | `text` | hyphenated lowercase form |
//! | integer | `integer` | 64-bit integer |
//! | real | `real` | double |
//! | boolean | `boolean` | `0` / `1` |
//! | bytes | `blob` | raw bytes |
//! | array, object, any | `text` | compact JSON |
//! | null | `text` | scalar passed through unchanged |
//!
//! # Round-trip guarantees
//!
//! For every value a field type accepts, `from_sql(to_sql(v)) == v`,
//! including `null`.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use modelstore_core::{FieldType, LeafKind, RecordSchema};
use rusqlite::types::{Value as SqlValue, ValueRef};
use serde_json::{Map, Number, Value};

use crate::error::{Result, StoreError};
use crate::schema::validate_identifier;

/// SQL storage type of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SqlType {
    /// `text`
    Text,
    /// `integer`
    Integer,
    /// `real`
    Real,
    /// `boolean` (numeric affinity)
    Boolean,
    /// `blob`
    Blob,
}

impl SqlType {
    /// Returns the type name used in DDL.
    pub fn as_sql(self) -> &'static str {
        match self {
            SqlType::Text => "text",
            SqlType::Integer => "integer",
            SqlType::Real => "real",
            SqlType::Boolean => "boolean",
            SqlType::Blob => "blob",
        }
    }
}

/// Conversion pair between in-memory values and storage primitives.
///
/// The set is closed: every field type maps to exactly one converter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Converter {
    /// Scalars pass through unchanged.
    Passthrough,
    /// Strings.
    Text,
    /// Signed integers.
    Integer,
    /// Floating point numbers.
    Real,
    /// Booleans stored as `0`/`1`.
    Boolean,
    /// Byte arrays stored as blobs.
    Bytes,
    /// ISO-8601 timestamps stored as text.
    Timestamp,
    /// Paths stored as text.
    Path,
    /// UUIDs stored as hyphenated text.
    Uuid,
    /// Structured values stored as JSON text.
    Json,
}

/// A storage column derived from a field description.
///
/// # Examples
///
/// ```
/// use modelstore_core::FieldType;
/// use modelstore_sqlite::{ColumnSpec, Converter, SqlType};
///
/// let tags = ColumnSpec::from_field("tags", &FieldType::optional(FieldType::array(FieldType::TEXT))).unwrap();
/// assert_eq!(tags.sql_type, SqlType::Text);
/// assert_eq!(tags.converter, Converter::Json);
/// assert!(tags.nullable);
/// assert_eq!(tags.spec_sql(), "tags text");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSpec {
    /// Column name.
    pub name: String,
    /// SQL storage type.
    pub sql_type: SqlType,
    /// Whether the column accepts `NULL`.
    pub nullable: bool,
    /// Value converter.
    pub converter: Converter,
}

impl ColumnSpec {
    /// Derives a column from a field name and type description.
    ///
    /// Nullability comes solely from the presence of a null alternative.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::UnrecognizedType`] for a union with no
    /// alternatives.
    pub fn from_field(name: &str, field_type: &FieldType) -> Result<Self> {
        let (sql_type, converter) = storage_mapping(name, field_type)?;
        Ok(Self {
            name: name.to_string(),
            sql_type,
            nullable: field_type.accepts_null(),
            converter,
        })
    }

    /// Derives the columns of a record description, skipping ignored fields.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidIdentifier`] for field names that cannot
    /// be used as column names, or any error from
    /// [`from_field`](Self::from_field).
    pub fn from_schema(schema: &RecordSchema, ignore: &[String]) -> Result<Vec<Self>> {
        schema
            .fields
            .iter()
            .filter(|f| !ignore.contains(&f.name))
            .map(|f| {
                validate_identifier(&f.name)?;
                Self::from_field(&f.name, &f.field_type)
            })
            .collect()
    }

    /// The column definition used in `CREATE TABLE`.
    pub fn spec_sql(&self) -> String {
        if self.nullable {
            format!("{} {}", self.name, self.sql_type.as_sql())
        } else {
            format!("{} {} NOT NULL", self.name, self.sql_type.as_sql())
        }
    }

    /// Converts an in-memory value into a storage primitive.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Conversion`] if the value does not have the
    /// shape the column expects.
    pub fn to_sql(&self, value: &Value) -> Result<SqlValue> {
        if value.is_null() {
            return Ok(SqlValue::Null);
        }

        let converted = match (self.converter, value) {
            (Converter::Json, v) => SqlValue::Text(serde_json::to_string(v)?),
            (Converter::Passthrough, Value::Bool(b)) => SqlValue::Integer(i64::from(*b)),
            (Converter::Passthrough, Value::Number(n)) => number_to_sql(n),
            (Converter::Passthrough, Value::String(s)) => SqlValue::Text(s.clone()),
            (Converter::Passthrough, v) => SqlValue::Text(serde_json::to_string(v)?),
            (Converter::Text | Converter::Path, Value::String(s)) => SqlValue::Text(s.clone()),
            (Converter::Integer, Value::Number(n)) => match n.as_i64() {
                Some(i) => SqlValue::Integer(i),
                None => return Err(self.conversion(format!("{n} is not a 64-bit integer"))),
            },
            (Converter::Real, Value::Number(n)) => match n.as_f64() {
                Some(f) => SqlValue::Real(f),
                None => return Err(self.conversion(format!("{n} is not a number"))),
            },
            (Converter::Boolean, Value::Bool(b)) => SqlValue::Integer(i64::from(*b)),
            (Converter::Bytes, Value::Array(items)) => SqlValue::Blob(self.bytes_from_json(items)?),
            (Converter::Timestamp, Value::String(s)) => {
                if !is_timestamp(s) {
                    return Err(self.conversion(format!("'{s}' is not an ISO-8601 timestamp")));
                }
                SqlValue::Text(s.clone())
            }
            (Converter::Uuid, Value::String(s)) => match uuid::Uuid::parse_str(s) {
                Ok(id) => SqlValue::Text(id.hyphenated().to_string()),
                Err(e) => return Err(self.conversion(format!("'{s}' is not a UUID: {e}"))),
            },
            (converter, v) => {
                return Err(self.conversion(format!(
                    "{} cannot hold {}",
                    converter_name(converter),
                    json_kind(v)
                )));
            }
        };
        Ok(converted)
    }

    /// Converts a storage primitive back into an in-memory value.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Conversion`] if the stored value cannot be
    /// represented by the column's type.
    pub fn from_sql(&self, value: ValueRef<'_>) -> Result<Value> {
        let converted = match (self.converter, value) {
            (_, ValueRef::Null) => Value::Null,
            (Converter::Json, ValueRef::Text(text)) => serde_json::from_slice(text)?,
            (Converter::Json, ValueRef::Blob(blob)) => serde_json::from_slice(blob)?,
            (Converter::Boolean, ValueRef::Integer(i)) => Value::Bool(i != 0),
            (Converter::Boolean, ValueRef::Real(f)) => Value::Bool(f != 0.0),
            (Converter::Integer, ValueRef::Integer(i)) => Value::from(i),
            (Converter::Integer, ValueRef::Real(f)) if f.fract() == 0.0 => Value::from(f as i64),
            (Converter::Real, ValueRef::Real(f)) => self.float_to_json(f)?,
            (Converter::Real, ValueRef::Integer(i)) => self.float_to_json(i as f64)?,
            (Converter::Bytes, ValueRef::Blob(blob)) => bytes_to_json(blob),
            (
                Converter::Text | Converter::Path | Converter::Timestamp | Converter::Uuid,
                ValueRef::Text(text),
            ) => Value::String(self.utf8(text)?),
            (Converter::Text | Converter::Path, ValueRef::Integer(i)) => Value::String(i.to_string()),
            (Converter::Text | Converter::Path, ValueRef::Real(f)) => Value::String(f.to_string()),
            (Converter::Passthrough, ValueRef::Integer(i)) => Value::from(i),
            (Converter::Passthrough, ValueRef::Real(f)) => self.float_to_json(f)?,
            (Converter::Passthrough, ValueRef::Text(text)) => Value::String(self.utf8(text)?),
            (Converter::Passthrough, ValueRef::Blob(blob)) => bytes_to_json(blob),
            (converter, other) => {
                return Err(self.conversion(format!(
                    "{} cannot read stored {}",
                    converter_name(converter),
                    other.data_type()
                )));
            }
        };
        Ok(converted)
    }

    /// Converts the column's field of a serialized record.
    ///
    /// Fields absent from the object are treated as `null`.
    pub(crate) fn to_sql_from(&self, record: &Map<String, Value>) -> Result<SqlValue> {
        self.to_sql(record.get(&self.name).unwrap_or(&Value::Null))
    }

    fn conversion(&self, message: String) -> StoreError {
        StoreError::Conversion {
            column: self.name.clone(),
            message,
        }
    }

    fn utf8(&self, text: &[u8]) -> Result<String> {
        String::from_utf8(text.to_vec()).map_err(|e| self.conversion(e.to_string()))
    }

    fn float_to_json(&self, f: f64) -> Result<Value> {
        Number::from_f64(f)
            .map(Value::Number)
            .ok_or_else(|| self.conversion(format!("{f} is not representable")))
    }

    fn bytes_from_json(&self, items: &[Value]) -> Result<Vec<u8>> {
        items
            .iter()
            .map(|item| {
                item.as_u64()
                    .and_then(|b| u8::try_from(b).ok())
                    .ok_or_else(|| self.conversion(format!("{item} is not a byte")))
            })
            .collect()
    }
}

fn storage_mapping(name: &str, field_type: &FieldType) -> Result<(SqlType, Converter)> {
    match field_type {
        FieldType::Leaf(kind) => Ok(leaf_mapping(*kind)),
        FieldType::Null => Ok((SqlType::Text, Converter::Passthrough)),
        FieldType::Array(_) | FieldType::Object | FieldType::Any => {
            Ok((SqlType::Text, Converter::Json))
        }
        FieldType::Union(_) => match field_type.non_null_alternatives().as_slice() {
            [] if field_type.accepts_null() => Ok((SqlType::Text, Converter::Passthrough)),
            [] => Err(StoreError::UnrecognizedType {
                column: name.to_string(),
                description: "empty union".to_string(),
            }),
            [single] => storage_mapping(name, single),
            _ => Ok((SqlType::Text, Converter::Json)),
        },
    }
}

fn leaf_mapping(kind: LeafKind) -> (SqlType, Converter) {
    match kind {
        LeafKind::Text => (SqlType::Text, Converter::Text),
        LeafKind::Integer => (SqlType::Integer, Converter::Integer),
        LeafKind::Real => (SqlType::Real, Converter::Real),
        LeafKind::Boolean => (SqlType::Boolean, Converter::Boolean),
        LeafKind::Bytes => (SqlType::Blob, Converter::Bytes),
        LeafKind::Timestamp => (SqlType::Text, Converter::Timestamp),
        LeafKind::Path => (SqlType::Text, Converter::Path),
        LeafKind::Uuid => (SqlType::Text, Converter::Uuid),
    }
}

fn number_to_sql(n: &Number) -> SqlValue {
    match n.as_i64() {
        Some(i) => SqlValue::Integer(i),
        None => SqlValue::Real(n.as_f64().unwrap_or(f64::NAN)),
    }
}

fn bytes_to_json(blob: &[u8]) -> Value {
    Value::Array(blob.iter().map(|b| Value::from(*b)).collect())
}

/// Accepts RFC 3339 timestamps and the offset-less forms naive date-times
/// and dates serialize to.
fn is_timestamp(s: &str) -> bool {
    DateTime::parse_from_rfc3339(s).is_ok()
        || NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f").is_ok()
        || NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f").is_ok()
        || NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok()
}

fn converter_name(converter: Converter) -> &'static str {
    match converter {
        Converter::Passthrough => "passthrough column",
        Converter::Text => "text column",
        Converter::Integer => "integer column",
        Converter::Real => "real column",
        Converter::Boolean => "boolean column",
        Converter::Bytes => "bytes column",
        Converter::Timestamp => "timestamp column",
        Converter::Path => "path column",
        Converter::Uuid => "uuid column",
        Converter::Json => "structured column",
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
