//! Ingestion of JSON-Schema documents into record descriptions.
//!
//! Lets record types that are only known at runtime (for example, a schema
//! file shipped next to a database) be described without a [`Model`]
//! implementation. The supported subset is what serde-style model exporters
//! emit: `properties`, `type`, `format`, `items`, `anyOf`/`oneOf` and
//! `$ref` into `$defs`/`definitions`.
//!
//! Leaf types are looked up by `format` first and `type` second; a
//! combination without a registry entry is rejected.
//!
//! [`Model`]: crate::Model

use serde_json::{Map, Value};

use crate::error::SchemaError;
use crate::types::{FieldType, LeafKind, RecordSchema};

/// Maps a `format` or `type` keyword to a leaf, `None` when unknown.
fn leaf_from_name(name: &str) -> Option<FieldType> {
    let kind = match name {
        "string" => LeafKind::Text,
        "integer" => LeafKind::Integer,
        "number" => LeafKind::Real,
        "boolean" => LeafKind::Boolean,
        "date-time" => LeafKind::Timestamp,
        "path" => LeafKind::Path,
        "uuid" | "uuid4" => LeafKind::Uuid,
        "binary" => LeafKind::Bytes,
        "null" => return Some(FieldType::Null),
        _ => return None,
    };
    Some(FieldType::Leaf(kind))
}

impl RecordSchema {
    /// Builds a description from a JSON-Schema object document.
    ///
    /// The record name is taken from `title`, defaulting to `"Record"`.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::InvalidDocument`] if the document has no
    /// `properties` object, and [`SchemaError::UnrecognizedType`] or
    /// [`SchemaError::UnresolvedReference`] for fields that cannot be
    /// described.
    ///
    /// # Examples
    ///
    /// ```
    /// use modelstore_core::{FieldType, RecordSchema};
    /// use serde_json::json;
    ///
    /// let schema = RecordSchema::from_json_schema(&json!({
    ///     "title": "File",
    ///     "properties": {
    ///         "uuid": {"type": "string", "format": "uuid4"},
    ///         "size": {"type": "integer"},
    ///         "warning": {"anyOf": [{"type": "string"}, {"type": "null"}]}
    ///     }
    /// })).unwrap();
    ///
    /// assert_eq!(schema.name, "File");
    /// assert_eq!(schema.get("uuid").unwrap().field_type, FieldType::UUID);
    /// assert!(schema.get("warning").unwrap().field_type.accepts_null());
    /// ```
    pub fn from_json_schema(document: &Value) -> Result<Self, SchemaError> {
        let properties = document
            .get("properties")
            .and_then(Value::as_object)
            .ok_or_else(|| SchemaError::InvalidDocument("missing 'properties' object".into()))?;
        let defs = document
            .get("$defs")
            .or_else(|| document.get("definitions"))
            .and_then(Value::as_object);

        let name = document
            .get("title")
            .and_then(Value::as_str)
            .unwrap_or("Record");

        let mut schema = RecordSchema::new(name);
        for (field, description) in properties {
            let field_type = FieldType::from_json_schema(field, description, defs)?;
            schema = schema.field(field.as_str(), field_type);
        }
        Ok(schema)
    }
}

impl FieldType {
    /// Describes a single field from its JSON-Schema fragment.
    ///
    /// `defs` holds the document's definitions for `$ref` resolution. A
    /// reference met again while it is still being resolved describes a
    /// recursive structure and becomes [`FieldType::Any`].
    pub fn from_json_schema(
        field: &str,
        description: &Value,
        defs: Option<&Map<String, Value>>,
    ) -> Result<Self, SchemaError> {
        describe(field, description, defs, &mut Vec::new())
    }
}

fn describe(
    field: &str,
    description: &Value,
    defs: Option<&Map<String, Value>>,
    resolving: &mut Vec<String>,
) -> Result<FieldType, SchemaError> {
    let reference = description.get("$ref").and_then(Value::as_str);
    if let Some(reference) = reference {
        if resolving.iter().any(|r| r == reference) {
            return Ok(FieldType::Any);
        }
    }

    let resolved = resolve_reference(field, description, defs)?;
    if let Some(reference) = reference {
        resolving.push(reference.to_string());
    }
    let described = describe_resolved(field, &resolved, defs, resolving);
    if reference.is_some() {
        resolving.pop();
    }
    described
}

fn describe_resolved(
    field: &str,
    resolved: &Value,
    defs: Option<&Map<String, Value>>,
    resolving: &mut Vec<String>,
) -> Result<FieldType, SchemaError> {
    let unrecognized = || SchemaError::UnrecognizedType {
        field: field.to_string(),
        description: resolved.to_string(),
    };

    let Some(object) = resolved.as_object() else {
        return Err(unrecognized());
    };

    if let Some(type_keyword) = object.get("type") {
        return match type_keyword {
            Value::String(type_name) => {
                type_from_keyword(field, type_name, object, defs, resolving)
                    .ok_or_else(unrecognized)?
            }
            // `"type": ["string", "null"]` is shorthand for a union.
            Value::Array(names) => {
                let mut alternatives = Vec::with_capacity(names.len());
                for name in names {
                    let name = name.as_str().ok_or_else(unrecognized)?;
                    let alternative = type_from_keyword(field, name, object, defs, resolving)
                        .ok_or_else(unrecognized)??;
                    alternatives.push(alternative);
                }
                Ok(FieldType::Union(alternatives))
            }
            _ => Err(unrecognized()),
        };
    }

    let any_of = object
        .get("anyOf")
        .or_else(|| object.get("oneOf"))
        .and_then(Value::as_array);
    if let Some(branches) = any_of {
        let mut alternatives = Vec::with_capacity(branches.len());
        for branch in branches {
            alternatives.push(describe(field, branch, defs, resolving)?);
        }
        return Ok(FieldType::Union(alternatives));
    }

    // A fragment that constrains nothing accepts any value.
    let constrains_nothing = object
        .keys()
        .all(|k| matches!(k.as_str(), "title" | "description" | "default" | "examples"));
    if constrains_nothing {
        return Ok(FieldType::Any);
    }

    Err(unrecognized())
}

/// Resolves a type keyword, `None` if it is not in the registry.
fn type_from_keyword(
    field: &str,
    type_name: &str,
    object: &Map<String, Value>,
    defs: Option<&Map<String, Value>>,
    resolving: &mut Vec<String>,
) -> Option<Result<FieldType, SchemaError>> {
    match type_name {
        "object" => Some(Ok(FieldType::Object)),
        "array" => {
            // Arrays are stored as serialized text whatever their items are,
            // so an item description outside the registry degrades to `Any`.
            let items = object
                .get("items")
                .and_then(|items| describe(field, items, defs, resolving).ok())
                .unwrap_or(FieldType::Any);
            Some(Ok(FieldType::array(items)))
        }
        _ => {
            let lookup = object
                .get("format")
                .and_then(Value::as_str)
                .unwrap_or(type_name);
            leaf_from_name(lookup).map(Ok)
        }
    }
}

/// Merges a `$ref` target into the fragment that references it.
fn resolve_reference(
    field: &str,
    description: &Value,
    defs: Option<&Map<String, Value>>,
) -> Result<Value, SchemaError> {
    let Some(reference) = description.get("$ref").and_then(Value::as_str) else {
        return Ok(description.clone());
    };

    let target = reference
        .strip_prefix("#/$defs/")
        .or_else(|| reference.strip_prefix("#/definitions/"))
        .and_then(|name| defs.and_then(|d| d.get(name)))
        .and_then(Value::as_object)
        .ok_or_else(|| SchemaError::UnresolvedReference {
            field: field.to_string(),
            reference: reference.to_string(),
        })?;

    let mut merged = target.clone();
    if let Some(overrides) = description.as_object() {
        for (key, value) in overrides {
            if key != "$ref" {
                merged.insert(key.clone(), value.clone());
            }
        }
    }
    Ok(Value::Object(merged))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn field_type(description: Value) -> Result<FieldType, SchemaError> {
        FieldType::from_json_schema("f", &description, None)
    }

    #[test]
    fn test_leaf_lookup_prefers_format() {
        assert_eq!(field_type(json!({"type": "string"})).unwrap(), FieldType::TEXT);
        assert_eq!(
            field_type(json!({"type": "string", "format": "date-time"})).unwrap(),
            FieldType::TIMESTAMP
        );
        assert_eq!(
            field_type(json!({"type": "string", "format": "path"})).unwrap(),
            FieldType::PATH
        );
        assert_eq!(
            field_type(json!({"type": "string", "format": "binary"})).unwrap(),
            FieldType::BYTES
        );
        assert_eq!(field_type(json!({"type": "number"})).unwrap(), FieldType::REAL);
        assert_eq!(field_type(json!({"type": "null"})).unwrap(), FieldType::Null);
    }

    #[test]
    fn test_unknown_format_is_rejected() {
        let err = field_type(json!({"type": "string", "format": "email"})).unwrap_err();
        assert!(matches!(err, SchemaError::UnrecognizedType { ref field, .. } if field == "f"));
    }

    #[test]
    fn test_unknown_type_is_rejected() {
        assert!(field_type(json!({"type": "decimal"})).is_err());
        assert!(field_type(json!({"enum": ["a", "b"]})).is_err());
    }

    #[test]
    fn test_structured_types() {
        assert_eq!(field_type(json!({"type": "object"})).unwrap(), FieldType::Object);
        assert_eq!(
            field_type(json!({"type": "array", "items": {"type": "integer"}})).unwrap(),
            FieldType::array(FieldType::INTEGER)
        );
        assert_eq!(
            field_type(json!({"type": "array", "items": {"type": "string", "format": "email"}}))
                .unwrap(),
            FieldType::array(FieldType::Any)
        );
        assert_eq!(field_type(json!({})).unwrap(), FieldType::Any);
    }

    #[test]
    fn test_any_of_and_type_list_become_unions() {
        let expected = FieldType::Union(vec![FieldType::TEXT, FieldType::Null]);
        assert_eq!(
            field_type(json!({"anyOf": [{"type": "string"}, {"type": "null"}]})).unwrap(),
            expected
        );
        assert_eq!(field_type(json!({"type": ["string", "null"]})).unwrap(), expected);
    }

    #[test]
    fn test_reference_resolution() {
        let document = json!({
            "properties": {
                "action": {"$ref": "#/$defs/Action"},
                "missing": {"type": "integer"}
            },
            "$defs": {"Action": {"type": "object", "title": "Action"}}
        });
        let schema = RecordSchema::from_json_schema(&document).unwrap();
        assert_eq!(schema.name, "Record");
        assert_eq!(schema.get("action").unwrap().field_type, FieldType::Object);

        let broken = json!({"properties": {"a": {"$ref": "#/$defs/Nope"}}});
        assert!(matches!(
            RecordSchema::from_json_schema(&broken),
            Err(SchemaError::UnresolvedReference { .. })
        ));
    }

    #[test]
    fn test_recursive_definitions_terminate() {
        let document = json!({
            "properties": {
                "children": {"type": "array", "items": {"$ref": "#/$defs/Node"}},
                "parent": {"anyOf": [{"$ref": "#/$defs/Tree"}, {"type": "null"}]}
            },
            "$defs": {
                "Node": {"type": "array", "items": {"$ref": "#/$defs/Node"}},
                "Tree": {"anyOf": [{"$ref": "#/$defs/Tree"}, {"type": "string"}]}
            }
        });
        let schema = RecordSchema::from_json_schema(&document).unwrap();
        assert_eq!(
            schema.get("children").unwrap().field_type,
            FieldType::array(FieldType::array(FieldType::Any))
        );
        assert_eq!(
            schema.get("parent").unwrap().field_type,
            FieldType::Union(vec![
                FieldType::Union(vec![FieldType::Any, FieldType::TEXT]),
                FieldType::Null,
            ])
        );
    }

    #[test]
    fn test_document_without_properties() {
        assert!(matches!(
            RecordSchema::from_json_schema(&json!({"type": "object"})),
            Err(SchemaError::InvalidDocument(_))
        ));
    }

    #[test]
    fn test_property_order_is_preserved() {
        let document = json!({
            "properties": {
                "zeta": {"type": "string"},
                "alpha": {"type": "string"},
                "mid": {"type": "integer"}
            }
        });
        let schema = RecordSchema::from_json_schema(&document).unwrap();
        assert_eq!(schema.field_names().collect::<Vec<_>>(), ["zeta", "alpha", "mid"]);
    }
}
