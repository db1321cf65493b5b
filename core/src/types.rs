//! Record-type descriptions.
//!
//! A [`RecordSchema`] is the declarative shape a table, view, or key-value
//! store is generated from: an ordered list of named fields, each with a
//! [`FieldType`]. Descriptions are built once per type, usually from a
//! [`Model::schema`] implementation, and never change afterwards.

use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Atomic value kinds with a fixed storage mapping.
///
/// # Examples
///
/// ```
/// use modelstore_core::LeafKind;
///
/// assert_eq!(LeafKind::Timestamp.name(), "timestamp");
/// assert_eq!(LeafKind::Uuid.to_string(), "uuid");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LeafKind {
    /// UTF-8 text.
    Text,
    /// 64-bit signed integer.
    Integer,
    /// Double precision floating point.
    Real,
    /// Boolean flag.
    Boolean,
    /// Raw byte blob.
    Bytes,
    /// Point in time, ISO-8601 encoded.
    Timestamp,
    /// Filesystem path.
    Path,
    /// Unique identifier (UUID).
    Uuid,
}

impl LeafKind {
    /// Every leaf kind, in declaration order.
    pub const ALL: [LeafKind; 8] = [
        LeafKind::Text,
        LeafKind::Integer,
        LeafKind::Real,
        LeafKind::Boolean,
        LeafKind::Bytes,
        LeafKind::Timestamp,
        LeafKind::Path,
        LeafKind::Uuid,
    ];

    /// Returns the lowercase name of the kind.
    pub fn name(self) -> &'static str {
        match self {
            LeafKind::Text => "text",
            LeafKind::Integer => "integer",
            LeafKind::Real => "real",
            LeafKind::Boolean => "boolean",
            LeafKind::Bytes => "bytes",
            LeafKind::Timestamp => "timestamp",
            LeafKind::Path => "path",
            LeafKind::Uuid => "uuid",
        }
    }
}

impl fmt::Display for LeafKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Declarative description of a field's type.
///
/// Leaves map to a single storage primitive. Arrays, objects and `Any` are
/// structured kinds and are stored as serialized text. A union with exactly
/// one non-null alternative plus [`FieldType::Null`] describes an optional
/// value of that alternative.
///
/// # Examples
///
/// ```
/// use modelstore_core::FieldType;
///
/// let tags = FieldType::optional(FieldType::array(FieldType::TEXT));
/// assert!(tags.accepts_null());
/// assert_eq!(tags.to_string(), "array<text> | null");
/// assert!(!FieldType::INTEGER.accepts_null());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldType {
    /// A leaf kind.
    Leaf(LeafKind),
    /// The null marker.
    Null,
    /// Homogeneous array of the inner type.
    Array(Box<FieldType>),
    /// Object with arbitrary keys.
    Object,
    /// Any JSON value.
    Any,
    /// One of several alternatives.
    Union(Vec<FieldType>),
}

impl FieldType {
    /// Text leaf.
    pub const TEXT: FieldType = FieldType::Leaf(LeafKind::Text);
    /// Integer leaf.
    pub const INTEGER: FieldType = FieldType::Leaf(LeafKind::Integer);
    /// Floating point leaf.
    pub const REAL: FieldType = FieldType::Leaf(LeafKind::Real);
    /// Boolean leaf.
    pub const BOOLEAN: FieldType = FieldType::Leaf(LeafKind::Boolean);
    /// Byte blob leaf.
    pub const BYTES: FieldType = FieldType::Leaf(LeafKind::Bytes);
    /// Timestamp leaf.
    pub const TIMESTAMP: FieldType = FieldType::Leaf(LeafKind::Timestamp);
    /// Path leaf.
    pub const PATH: FieldType = FieldType::Leaf(LeafKind::Path);
    /// UUID leaf.
    pub const UUID: FieldType = FieldType::Leaf(LeafKind::Uuid);

    /// Wraps a type in a union with [`FieldType::Null`].
    ///
    /// Wrapping a type that already accepts null returns it unchanged.
    pub fn optional(inner: FieldType) -> Self {
        match inner {
            FieldType::Null => FieldType::Null,
            FieldType::Union(mut alternatives) => {
                if !alternatives.contains(&FieldType::Null) {
                    alternatives.push(FieldType::Null);
                }
                FieldType::Union(alternatives)
            }
            other => FieldType::Union(vec![other, FieldType::Null]),
        }
    }

    /// Array of `items`.
    pub fn array(items: FieldType) -> Self {
        FieldType::Array(Box::new(items))
    }

    /// Returns `true` for arrays, objects and `Any`.
    pub fn is_structured(&self) -> bool {
        matches!(self, FieldType::Array(_) | FieldType::Object | FieldType::Any)
    }

    /// Returns `true` when the description contains a null alternative.
    pub fn accepts_null(&self) -> bool {
        match self {
            FieldType::Null => true,
            FieldType::Union(alternatives) => alternatives.iter().any(|a| *a == FieldType::Null),
            _ => false,
        }
    }

    /// Alternatives of a union other than the null marker.
    ///
    /// Non-union types return themselves.
    pub fn non_null_alternatives(&self) -> Vec<&FieldType> {
        match self {
            FieldType::Union(alternatives) => alternatives
                .iter()
                .filter(|a| **a != FieldType::Null)
                .collect(),
            FieldType::Null => Vec::new(),
            other => vec![other],
        }
    }
}

impl From<LeafKind> for FieldType {
    fn from(kind: LeafKind) -> Self {
        FieldType::Leaf(kind)
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldType::Leaf(kind) => write!(f, "{kind}"),
            FieldType::Null => f.write_str("null"),
            FieldType::Array(items) => write!(f, "array<{items}>"),
            FieldType::Object => f.write_str("object"),
            FieldType::Any => f.write_str("any"),
            FieldType::Union(alternatives) => {
                for (i, alternative) in alternatives.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" | ")?;
                    }
                    write!(f, "{alternative}")?;
                }
                Ok(())
            }
        }
    }
}

/// A named field of a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    /// Field name, also used as the column name.
    pub name: String,
    /// Declared type.
    pub field_type: FieldType,
}

impl FieldSpec {
    /// Creates a field.
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
        }
    }
}

/// Ordered description of a record type.
///
/// Built with chained [`field`](RecordSchema::field) calls; declaring the same
/// field twice replaces the earlier declaration in place.
///
/// # Examples
///
/// ```
/// use modelstore_core::{FieldType, RecordSchema};
///
/// let schema = RecordSchema::new("Item")
///     .field("id", FieldType::INTEGER)
///     .field("name", FieldType::TEXT)
///     .field("tags", FieldType::optional(FieldType::array(FieldType::TEXT)));
///
/// assert_eq!(schema.len(), 3);
/// assert!(schema.contains("tags"));
/// assert_eq!(schema.field_names().collect::<Vec<_>>(), ["id", "name", "tags"]);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordSchema {
    /// Name of the record type, used in error messages.
    pub name: String,
    /// Fields in declaration order.
    pub fields: Vec<FieldSpec>,
}

impl RecordSchema {
    /// Creates an empty description.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
        }
    }

    /// Adds a field.
    pub fn field(mut self, name: impl Into<String>, field_type: FieldType) -> Self {
        let spec = FieldSpec::new(name, field_type);
        match self.fields.iter_mut().find(|f| f.name == spec.name) {
            Some(existing) => *existing = spec,
            None => self.fields.push(spec),
        }
        self
    }

    /// Looks up a field by name.
    pub fn get(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Returns `true` if a field with this name is declared.
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Field names in declaration order.
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }

    /// Number of declared fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Returns `true` if no fields are declared.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Builds a description from the declared column types of an existing
    /// relation, as reported by `pragma table_info`.
    ///
    /// Each item is `(column, declared type, not null)`. Nullable columns
    /// become optional fields.
    ///
    /// # Examples
    ///
    /// ```
    /// use modelstore_core::{FieldType, RecordSchema};
    ///
    /// let schema = RecordSchema::from_declared_types(
    ///     "files",
    ///     [("size", "integer", true), ("puid", "varchar(20)", false), ("n", "", false)],
    /// );
    /// assert_eq!(schema.get("size").unwrap().field_type, FieldType::INTEGER);
    /// assert_eq!(
    ///     schema.get("puid").unwrap().field_type,
    ///     FieldType::optional(FieldType::TEXT)
    /// );
    /// assert_eq!(schema.get("n").unwrap().field_type, FieldType::Null);
    /// ```
    pub fn from_declared_types<'a>(
        name: impl Into<String>,
        columns: impl IntoIterator<Item = (&'a str, &'a str, bool)>,
    ) -> Self {
        columns
            .into_iter()
            .fold(RecordSchema::new(name), |schema, (column, declared, not_null)| {
                let field_type = FieldType::from_declared_type(declared);
                let field_type = if not_null {
                    field_type
                } else {
                    FieldType::optional(field_type)
                };
                schema.field(column, field_type)
            })
    }
}

impl FieldType {
    /// Maps a declared SQL column type to a field type by SQLite affinity.
    ///
    /// Types with no recognisable affinity, including the empty declared
    /// type of computed view columns, map to [`FieldType::Null`], whose
    /// values pass through storage unchanged.
    pub fn from_declared_type(declared: &str) -> FieldType {
        let declared = declared.to_ascii_lowercase();
        if declared.contains("int") {
            FieldType::INTEGER
        } else if declared.contains("bool") {
            FieldType::BOOLEAN
        } else if ["char", "clob", "text"].iter().any(|t| declared.contains(t)) {
            FieldType::TEXT
        } else if declared.contains("blob") {
            FieldType::BYTES
        } else if ["real", "floa", "doub"].iter().any(|t| declared.contains(t)) {
            FieldType::REAL
        } else {
            FieldType::Null
        }
    }
}

/// A record type that can be stored in a table.
///
/// Records cross the storage boundary through `serde`: they are serialized
/// into a JSON object whose keys are the field names declared by
/// [`schema`](Model::schema), and deserialized back from one. The schema is
/// the static registry that decides how each field becomes a column.
///
/// # Examples
///
/// ```
/// use modelstore_core::{FieldType, Model, RecordSchema};
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Serialize, Deserialize)]
/// struct Item {
///     id: i64,
///     name: String,
///     tags: Option<Vec<String>>,
/// }
///
/// impl Model for Item {
///     fn schema() -> RecordSchema {
///         RecordSchema::new("Item")
///             .field("id", FieldType::INTEGER)
///             .field("name", FieldType::TEXT)
///             .field("tags", FieldType::optional(FieldType::array(FieldType::TEXT)))
///     }
/// }
///
/// assert_eq!(Item::schema().len(), 3);
/// ```
pub trait Model: Serialize + DeserializeOwned {
    /// Describes the fields of the record.
    fn schema() -> RecordSchema;
}
