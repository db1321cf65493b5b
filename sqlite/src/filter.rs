//! Where-clause synthesis.
//!
//! Every read and write that targets a subset of rows takes a [`Filter`].
//! The three input shapes (a raw expression with parameters, a field/value
//! map, a record matched by primary key) all compile to the same
//! [`WhereClause`]: expression text plus positional parameters. Values are
//! never spliced into the text; only `IS NULL` is emitted literally.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use crate::column::ColumnSpec;
use crate::error::{Result, StoreError};
use crate::schema::validate_identifier;

pub use rusqlite::types::Value as SqlValue;

static LEADING_WHERE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^\s*where\s+").expect("static regex must compile"));

/// A compiled filter expression and its positional parameters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WhereClause {
    /// Expression text, without the `WHERE` keyword.
    pub sql: String,
    /// Positional parameters, in placeholder order.
    pub params: Vec<SqlValue>,
}

impl WhereClause {
    /// Creates a clause from expression text and parameters.
    pub fn new(sql: impl Into<String>, params: Vec<SqlValue>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }

    /// Returns `true` if the clause matches every row.
    pub fn is_empty(&self) -> bool {
        self.sql.trim().is_empty()
    }

    /// The clause as a statement suffix: ` WHERE <sql>`, or nothing.
    pub(crate) fn to_suffix(&self) -> String {
        if self.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", self.sql)
        }
    }
}

/// Ordered field/value pairs matched by equality.
///
/// A [`Value::Array`] value matches any of its elements; [`Value::Null`]
/// compiles to `IS NULL`. Distinct fields are combined with `AND`.
///
/// # Examples
///
/// ```
/// use modelstore_sqlite::FieldMap;
/// use serde_json::json;
///
/// let fields = FieldMap::new().with("id", json!([1, 2])).with("name", json!("a"));
/// assert_eq!(fields.len(), 2);
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldMap {
    entries: Vec<(String, Value)>,
}

impl FieldMap {
    /// Creates an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a field; a repeated field replaces the earlier value in place.
    pub fn with(mut self, field: impl Into<String>, value: Value) -> Self {
        self.insert(field, value);
        self
    }

    /// Inserts a field; a repeated field replaces the earlier value in place.
    pub fn insert(&mut self, field: impl Into<String>, value: Value) {
        let field = field.into();
        match self.entries.iter_mut().find(|(f, _)| *f == field) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((field, value)),
        }
    }

    /// Number of fields.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if no fields are set.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates over the pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(f, v)| (f.as_str(), v))
    }
}

impl<K: Into<String>> FromIterator<(K, Value)> for FieldMap {
    fn from_iter<I: IntoIterator<Item = (K, Value)>>(iter: I) -> Self {
        let mut map = FieldMap::new();
        for (field, value) in iter {
            map.insert(field, value);
        }
        map
    }
}

impl From<serde_json::Map<String, Value>> for FieldMap {
    fn from(map: serde_json::Map<String, Value>) -> Self {
        map.into_iter().collect()
    }
}

/// Row selection for reads and writes.
#[derive(Debug)]
pub enum Filter<'a, M> {
    /// Every row.
    All,
    /// A raw expression with positional parameters. A leading `where`
    /// keyword is stripped.
    Raw {
        /// Expression text.
        sql: String,
        /// Parameters bound to its placeholders.
        params: Vec<SqlValue>,
    },
    /// Equality over field/value pairs.
    Fields(FieldMap),
    /// Equality over the primary-key fields of a record.
    ByPrimaryKey(&'a M),
}

impl<M> Clone for Filter<'_, M> {
    fn clone(&self) -> Self {
        match self {
            Filter::All => Filter::All,
            Filter::Raw { sql, params } => Filter::Raw {
                sql: sql.clone(),
                params: params.clone(),
            },
            Filter::Fields(fields) => Filter::Fields(fields.clone()),
            Filter::ByPrimaryKey(record) => Filter::ByPrimaryKey(record),
        }
    }
}

impl<'a, M> Filter<'a, M> {
    /// A raw expression with parameters.
    pub fn raw(sql: impl Into<String>, params: Vec<SqlValue>) -> Self {
        Filter::Raw {
            sql: sql.into(),
            params,
        }
    }

    /// Equality over field/value pairs.
    pub fn fields(fields: impl Into<FieldMap>) -> Self {
        Filter::Fields(fields.into())
    }

    /// Equality over a record's primary keys.
    pub fn record(record: &'a M) -> Self {
        Filter::ByPrimaryKey(record)
    }
}

impl<M> From<WhereClause> for Filter<'_, M> {
    fn from(clause: WhereClause) -> Self {
        Filter::Raw {
            sql: clause.sql,
            params: clause.params,
        }
    }
}

impl<M> From<FieldMap> for Filter<'_, M> {
    fn from(fields: FieldMap) -> Self {
        Filter::Fields(fields)
    }
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Order {
    /// Ascending.
    Asc,
    /// Descending.
    Desc,
}

impl Order {
    fn as_sql(self) -> &'static str {
        match self {
            Order::Asc => "ASC",
            Order::Desc => "DESC",
        }
    }
}

/// Ordering and paging for `select` and `count`.
///
/// # Examples
///
/// ```
/// use modelstore_sqlite::{Order, SelectOptions};
///
/// let options = SelectOptions::new().order_by("id", Order::Desc).limit(10).offset(20);
/// assert_eq!(options.limit, Some(10));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectOptions {
    /// Sort columns and directions, applied in order.
    pub order_by: Vec<(String, Order)>,
    /// Maximum number of rows.
    pub limit: Option<u64>,
    /// Rows to skip.
    pub offset: Option<u64>,
}

impl SelectOptions {
    /// No ordering or paging.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a sort column.
    pub fn order_by(mut self, column: impl Into<String>, order: Order) -> Self {
        self.order_by.push((column.into(), order));
        self
    }

    /// Limits the number of rows.
    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Skips rows.
    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    /// `ORDER BY`, `LIMIT` and `OFFSET` suffix, with validated column names.
    pub(crate) fn to_suffix(&self) -> Result<String> {
        let mut sql = String::new();
        if !self.order_by.is_empty() {
            let mut terms = Vec::with_capacity(self.order_by.len());
            for (column, order) in &self.order_by {
                validate_identifier(column)?;
                terms.push(format!("{column} {}", order.as_sql()));
            }
            sql.push_str(" ORDER BY ");
            sql.push_str(&terms.join(", "));
        }
        match (self.limit, self.offset) {
            (Some(limit), _) => sql.push_str(&format!(" LIMIT {limit}")),
            // SQLite needs a LIMIT before OFFSET; -1 means unbounded
            (None, Some(_)) => sql.push_str(" LIMIT -1"),
            (None, None) => {}
        }
        if let Some(offset) = self.offset {
            sql.push_str(&format!(" OFFSET {offset}"));
        }
        Ok(sql)
    }
}

/// Policy for inserts that collide with an existing key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OnExists {
    /// Keep the existing row.
    Ignore,
    /// Replace the existing row.
    Replace,
    /// Fail with the store's uniqueness violation.
    #[default]
    Error,
}

impl OnExists {
    pub(crate) fn insert_verb(self) -> &'static str {
        match self {
            OnExists::Ignore => "INSERT OR IGNORE",
            OnExists::Replace => "INSERT OR REPLACE",
            OnExists::Error => "INSERT",
        }
    }
}

/// Column context a filter is compiled against.
pub(crate) struct FilterContext<'c> {
    pub relation: &'c str,
    pub columns: &'c [ColumnSpec],
    pub primary_keys: &'c [ColumnSpec],
}

impl FilterContext<'_> {
    /// Compiles a filter into a where clause.
    ///
    /// `record_to_object` serializes a record for primary-key matching.
    pub(crate) fn compile<M>(
        &self,
        filter: &Filter<'_, M>,
        record_to_object: impl FnOnce(&M) -> Result<serde_json::Map<String, Value>>,
    ) -> Result<WhereClause> {
        match filter {
            Filter::All => Ok(WhereClause::default()),
            Filter::Raw { sql, params } => Ok(compile_raw(sql, params)),
            Filter::Fields(fields) => self.compile_fields(fields.iter()),
            Filter::ByPrimaryKey(record) => {
                if self.primary_keys.is_empty() {
                    return Err(StoreError::Programming(format!(
                        "'{}' has no primary keys to match a record by",
                        self.relation
                    )));
                }
                let object = record_to_object(*record)?;
                let mut clauses = Vec::with_capacity(self.primary_keys.len());
                let mut params = Vec::new();
                for key in self.primary_keys {
                    match key.to_sql_from(&object)? {
                        SqlValue::Null => clauses.push(format!("{} IS NULL", key.name)),
                        value => {
                            clauses.push(format!("{} = ?", key.name));
                            params.push(value);
                        }
                    }
                }
                Ok(WhereClause::new(clauses.join(" AND "), params))
            }
        }
    }

    fn compile_fields<'f>(
        &self,
        fields: impl Iterator<Item = (&'f str, &'f Value)>,
    ) -> Result<WhereClause> {
        let mut clauses = Vec::new();
        let mut params = Vec::new();

        for (field, value) in fields {
            validate_identifier(field)?;
            let column = self.column(field)?;
            let alternatives: Vec<&Value> = match value {
                Value::Array(values) => values.iter().collect(),
                single => vec![single],
            };

            let mut field_clauses = Vec::with_capacity(alternatives.len());
            for alternative in alternatives {
                match self.to_sql(column, field, alternative)? {
                    SqlValue::Null => field_clauses.push(format!("{field} IS NULL")),
                    converted => {
                        field_clauses.push(format!("{field} = ?"));
                        params.push(converted);
                    }
                }
            }

            match field_clauses.len() {
                0 => {}
                1 => clauses.extend(field_clauses),
                _ => clauses.push(format!("({})", field_clauses.join(" OR "))),
            }
        }

        Ok(WhereClause::new(clauses.join(" AND "), params))
    }

    fn column(&self, field: &str) -> Result<Option<&ColumnSpec>> {
        match self.columns.iter().find(|c| c.name == field) {
            Some(column) => Ok(Some(column)),
            // relations built without a description accept any identifier
            None if self.columns.is_empty() => Ok(None),
            None => Err(StoreError::UnknownColumn {
                relation: self.relation.to_string(),
                column: format!("'{field}'"),
            }),
        }
    }

    fn to_sql(&self, column: Option<&ColumnSpec>, field: &str, value: &Value) -> Result<SqlValue> {
        match column {
            Some(column) => column.to_sql(value),
            None => json_to_sql(field, value),
        }
    }
}

fn compile_raw(sql: &str, params: &[SqlValue]) -> WhereClause {
    if sql.trim().is_empty() {
        return WhereClause::default();
    }
    let stripped = LEADING_WHERE.replace(sql, "");
    WhereClause::new(stripped.trim(), params.to_vec())
}

/// Converts a plain JSON scalar into a parameter.
pub(crate) fn json_to_sql(field: &str, value: &Value) -> Result<SqlValue> {
    Ok(match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => SqlValue::Real(n.as_f64().ok_or_else(|| StoreError::Conversion {
                column: field.to_string(),
                message: format!("{n} is not a number"),
            })?),
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        structured => SqlValue::Text(serde_json::to_string(structured)?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use modelstore_core::{FieldType, RecordSchema};
    use serde_json::json;

    fn columns() -> Vec<ColumnSpec> {
        let schema = RecordSchema::new("Item")
            .field("id", FieldType::INTEGER)
            .field("name", FieldType::TEXT)
            .field("flag", FieldType::optional(FieldType::BOOLEAN));
        ColumnSpec::from_schema(&schema, &[]).unwrap()
    }

    fn compile(filter: &Filter<'_, Value>, primary_keys: &[ColumnSpec]) -> Result<WhereClause> {
        let columns = columns();
        let context = FilterContext {
            relation: "items",
            columns: &columns,
            primary_keys,
        };
        context.compile(filter, |record| {
            record
                .as_object()
                .cloned()
                .ok_or_else(|| StoreError::Programming("not an object".to_string()))
        })
    }

    #[test]
    fn test_all_is_empty() {
        let clause = compile(&Filter::All, &[]).unwrap();
        assert!(clause.is_empty());
        assert_eq!(clause.to_suffix(), "");
    }

    #[test]
    fn test_raw_strips_leading_where() {
        let clause = compile(
            &Filter::raw("  WHERE name = ?", vec![SqlValue::Text("a".to_string())]),
            &[],
        )
        .unwrap();
        assert_eq!(clause.sql, "name = ?");
        assert_eq!(clause.params.len(), 1);
        assert_eq!(clause.to_suffix(), " WHERE name = ?");
    }

    #[test]
    fn test_blank_raw_drops_params() {
        let clause = compile(&Filter::raw("   ", vec![SqlValue::Integer(1)]), &[]).unwrap();
        assert!(clause.is_empty());
        assert!(clause.params.is_empty());
    }

    #[test]
    fn test_raw_keeps_where_inside_expression() {
        let clause = compile(&Filter::raw("nowhere = 1", vec![]), &[]).unwrap();
        assert_eq!(clause.sql, "nowhere = 1");
    }

    #[test]
    fn test_field_map_or_groups_and_null() {
        let fields = FieldMap::new()
            .with("id", json!([1, 2, null]))
            .with("name", json!("a"))
            .with("flag", json!(true));
        let clause = compile(&Filter::fields(fields), &[]).unwrap();
        assert_eq!(
            clause.sql,
            "(id = ? OR id = ? OR id IS NULL) AND name = ? AND flag = ?"
        );
        assert_eq!(
            clause.params,
            vec![
                SqlValue::Integer(1),
                SqlValue::Integer(2),
                SqlValue::Text("a".to_string()),
                SqlValue::Integer(1),
            ]
        );
    }

    #[test]
    fn test_field_map_rejects_unknown_and_unsafe_names() {
        let unknown = compile(&Filter::fields(FieldMap::new().with("size", json!(1))), &[]);
        assert!(matches!(unknown, Err(StoreError::UnknownColumn { .. })));

        let unsafe_name = compile(
            &Filter::fields(FieldMap::new().with("id = 1 or 1", json!(1))),
            &[],
        );
        assert!(matches!(unsafe_name, Err(StoreError::InvalidIdentifier(_))));
    }

    #[test]
    fn test_empty_list_matches_nothing_extra() {
        let clause = compile(&Filter::fields(FieldMap::new().with("id", json!([]))), &[]).unwrap();
        assert!(clause.is_empty());
    }

    #[test]
    fn test_record_uses_primary_keys_only() {
        let columns = columns();
        let record = json!({"id": 7, "name": "x", "flag": null});
        let clause = compile(&Filter::record(&record), &columns[..1]).unwrap();
        assert_eq!(clause.sql, "id = ?");
        assert_eq!(clause.params, vec![SqlValue::Integer(7)]);
    }

    #[test]
    fn test_record_without_primary_keys_is_a_programming_error() {
        let record = json!({"id": 7});
        assert!(matches!(
            compile(&Filter::record(&record), &[]),
            Err(StoreError::Programming(_))
        ));
    }

    #[test]
    fn test_select_options_suffix() {
        let options = SelectOptions::new()
            .order_by("id", Order::Asc)
            .order_by("name", Order::Desc)
            .limit(5)
            .offset(10);
        assert_eq!(
            options.to_suffix().unwrap(),
            " ORDER BY id ASC, name DESC LIMIT 5 OFFSET 10"
        );
        assert_eq!(
            SelectOptions::new().offset(3).to_suffix().unwrap(),
            " LIMIT -1 OFFSET 3"
        );
        assert!(
            SelectOptions::new()
                .order_by("id; drop table t", Order::Asc)
                .to_suffix()
                .is_err()
        );
    }
}
