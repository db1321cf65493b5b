//! Typed tables.
//!
//! A [`Table`] binds a record type to a named table in a [`Database`]. Its
//! columns are derived once, when the table is built, from the record's
//! [`RecordSchema`]; primary keys and indices refer to those columns by
//! name and are checked at the same time.
//!
//! Reads and writes go through the [`Relation`] trait. Every statement is
//! parameterized; names spliced into SQL are validated identifiers.

use std::marker::PhantomData;

use modelstore_core::{Model, RecordSchema};
use rusqlite::params_from_iter;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tracing::debug;

use crate::column::ColumnSpec;
use crate::cursor::Cursor;
use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::filter::{Filter, FilterContext, OnExists, SelectOptions, SqlValue, WhereClause};
use crate::relation::Relation;
use crate::schema::{
    CreateOptions, create_indices_sql, create_table_sql, drop_sql, validate_identifier,
};

/// Builder for [`Table`].
///
/// # Examples
///
/// ```
/// use modelstore_core::{FieldType, Model, RecordSchema};
/// use modelstore_sqlite::{Database, Table};
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Serialize, Deserialize)]
/// struct Event {
///     id: i64,
///     file_uuid: String,
///     operation: String,
/// }
///
/// impl Model for Event {
///     fn schema() -> RecordSchema {
///         RecordSchema::new("Event")
///             .field("id", FieldType::INTEGER)
///             .field("file_uuid", FieldType::UUID)
///             .field("operation", FieldType::TEXT)
///     }
/// }
///
/// let db = Database::open_in_memory().unwrap();
/// let log = Table::<Event>::builder(&db, "log")
///     .primary_key("id")
///     .index("uuid", ["file_uuid"])
///     .index("operation", ["operation"])
///     .build()
///     .unwrap();
/// assert_eq!(log.indices_sql(false).len(), 2);
/// ```
pub struct TableBuilder<'db, M> {
    db: &'db Database,
    name: String,
    schema: RecordSchema,
    primary_keys: Vec<String>,
    indices: Vec<(String, Vec<String>)>,
    ignore: Vec<String>,
    _marker: PhantomData<fn() -> M>,
}

impl<'db, M> TableBuilder<'db, M> {
    /// Adds a primary-key column.
    pub fn primary_key(mut self, column: impl Into<String>) -> Self {
        self.primary_keys.push(column.into());
        self
    }

    /// Adds several primary-key columns, in order.
    pub fn primary_keys<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.primary_keys.extend(columns.into_iter().map(Into::into));
        self
    }

    /// Declares a secondary index over `columns`.
    pub fn index<I, S>(mut self, name: impl Into<String>, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.indices
            .push((name.into(), columns.into_iter().map(Into::into).collect()));
        self
    }

    /// Excludes a field of the record description from the table.
    pub fn ignore(mut self, field: impl Into<String>) -> Self {
        self.ignore.push(field.into());
        self
    }

    /// Derives the columns and checks keys and indices against them.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidIdentifier`] for unsafe table, index or
    /// column names, [`StoreError::UnknownColumn`] if a primary key or index
    /// names a column the table does not have, and any column derivation
    /// error.
    pub fn build(self) -> Result<Table<'db, M>> {
        validate_identifier(&self.name)?;
        let columns = ColumnSpec::from_schema(&self.schema, &self.ignore)?;

        let lookup = |column: &str| -> Result<ColumnSpec> {
            columns
                .iter()
                .find(|c| c.name == column)
                .cloned()
                .ok_or_else(|| StoreError::UnknownColumn {
                    relation: self.name.clone(),
                    column: format!("'{column}'"),
                })
        };

        let primary_keys = self
            .primary_keys
            .iter()
            .map(|k| lookup(k))
            .collect::<Result<Vec<_>>>()?;

        let mut indices = Vec::with_capacity(self.indices.len());
        for (index, index_columns) in &self.indices {
            validate_identifier(index)?;
            let index_columns = index_columns
                .iter()
                .map(|c| lookup(c))
                .collect::<Result<Vec<_>>>()?;
            indices.push((index.clone(), index_columns));
        }

        Ok(Table {
            db: self.db,
            model: self.schema.name.clone(),
            name: self.name,
            columns,
            primary_keys,
            indices,
            _marker: PhantomData,
        })
    }
}

/// A table of records of type `M`.
///
/// # Examples
///
/// ```
/// use modelstore_core::{FieldType, Model, RecordSchema};
/// use modelstore_sqlite::{CreateOptions, Database, FieldMap, Filter, Relation, SelectOptions, Table};
/// use serde::{Deserialize, Serialize};
/// use serde_json::json;
///
/// #[derive(Debug, PartialEq, Serialize, Deserialize)]
/// struct Item {
///     id: i64,
///     name: String,
/// }
///
/// impl Model for Item {
///     fn schema() -> RecordSchema {
///         RecordSchema::new("Item")
///             .field("id", FieldType::INTEGER)
///             .field("name", FieldType::TEXT)
///     }
/// }
///
/// let db = Database::open_in_memory().unwrap();
/// let items = Table::<Item>::builder(&db, "items").primary_key("id").build().unwrap();
/// items.create(CreateOptions::new()).unwrap();
///
/// let a = Item { id: 1, name: "a".into() };
/// items.insert(&[a], Default::default()).unwrap();
///
/// let found = items.get(Filter::fields(FieldMap::new().with("name", json!("a")))).unwrap();
/// assert_eq!(found.map(|i| i.id), Some(1));
/// assert_eq!(items.len().unwrap(), 1);
/// ```
pub struct Table<'db, M> {
    db: &'db Database,
    model: String,
    name: String,
    columns: Vec<ColumnSpec>,
    primary_keys: Vec<ColumnSpec>,
    indices: Vec<(String, Vec<ColumnSpec>)>,
    _marker: PhantomData<fn() -> M>,
}

impl<'db, M: Model> Table<'db, M> {
    /// Starts building a table for a statically described record type.
    pub fn builder(db: &'db Database, name: impl Into<String>) -> TableBuilder<'db, M> {
        Table::builder_with_schema(db, name, M::schema())
    }
}

impl<'db, M> Table<'db, M> {
    /// Starts building a table from a description known only at runtime.
    ///
    /// Useful with `M = serde_json::Map<String, Value>` for relations whose
    /// shape comes from a JSON-Schema document or from the store itself.
    pub fn builder_with_schema(
        db: &'db Database,
        name: impl Into<String>,
        schema: RecordSchema,
    ) -> TableBuilder<'db, M> {
        TableBuilder {
            db,
            name: name.into(),
            schema,
            primary_keys: Vec::new(),
            indices: Vec::new(),
            ignore: Vec::new(),
            _marker: PhantomData,
        }
    }

    /// Name of the table in the store.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The database the table is bound to.
    pub fn database(&self) -> &'db Database {
        self.db
    }

    /// Columns in declaration order.
    pub fn columns(&self) -> &[ColumnSpec] {
        &self.columns
    }

    /// Primary-key columns, in key order.
    pub fn primary_keys(&self) -> &[ColumnSpec] {
        &self.primary_keys
    }

    /// Declared indices.
    pub fn indices(&self) -> &[(String, Vec<ColumnSpec>)] {
        &self.indices
    }

    /// Name of the record type, used in error messages.
    pub fn model_name(&self) -> &str {
        &self.model
    }

    /// The `CREATE TABLE` statement.
    pub fn create_sql(&self, options: CreateOptions) -> String {
        create_table_sql(&self.name, &self.columns, &self.primary_keys, options)
    }

    /// The `CREATE INDEX` statements.
    pub fn indices_sql(&self, exist_ok: bool) -> Vec<String> {
        create_indices_sql(&self.name, &self.indices, exist_ok)
    }

    /// Creates the table and its indices.
    pub fn create(&self, options: CreateOptions) -> Result<()> {
        self.db.execute_batch(&self.create_sql(options))?;
        for sql in self.indices_sql(options.exist_ok) {
            self.db.execute_batch(&sql)?;
        }
        Ok(())
    }

    /// Drops the table.
    pub fn drop(&self, missing_ok: bool) -> Result<()> {
        self.db.execute_batch(&drop_sql("TABLE", &self.name, missing_ok))
    }
}

impl<M: Serialize> Table<'_, M> {
    /// Compiles a filter against this table's columns and primary keys.
    pub fn compile(&self, filter: &Filter<'_, M>) -> Result<WhereClause> {
        FilterContext {
            relation: &self.name,
            columns: &self.columns,
            primary_keys: &self.primary_keys,
        }
        .compile(filter, |record| self.to_object(record))
    }

    fn to_object(&self, record: &M) -> Result<Map<String, Value>> {
        match serde_json::to_value(record)? {
            Value::Object(object) => Ok(object),
            other => Err(StoreError::Validation {
                model: self.model.clone(),
                message: format!("expected an object, got {other}"),
            }),
        }
    }

    fn row_params(&self, record: &M) -> Result<Vec<SqlValue>> {
        let object = self.to_object(record)?;
        self.columns.iter().map(|c| c.to_sql_from(&object)).collect()
    }

    fn column_list(&self) -> String {
        self.columns
            .iter()
            .map(|c| c.name.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn write(&self, sql: &str, params: Vec<SqlValue>) -> Result<usize> {
        self.db.ensure_transaction()?;
        debug!(table = %self.name, sql, "write");
        let mut stmt = self.db.connection().prepare_cached(sql)?;
        Ok(stmt.execute(params_from_iter(params))?)
    }
}

impl<'db, M: Serialize + DeserializeOwned> Relation<'db, M> for Table<'db, M> {
    fn name(&self) -> &str {
        &self.name
    }

    fn select(&self, filter: Filter<'_, M>, options: SelectOptions) -> Result<Cursor<'db, M>> {
        let clause = self.compile(&filter)?;
        let sql = format!(
            "SELECT * FROM {}{}{}",
            self.name,
            clause.to_suffix(),
            options.to_suffix()?
        );
        debug!(table = %self.name, sql, "select");
        let stmt = self.db.connection().prepare_cached(&sql)?;
        Ok(Cursor::new(stmt, clause.params, self.columns.clone(), self.model.clone()))
    }

    fn count(&self, filter: Filter<'_, M>, options: SelectOptions) -> Result<u64> {
        let clause = self.compile(&filter)?;
        let sql = format!(
            "SELECT COUNT(*) FROM (SELECT * FROM {}{}{})",
            self.name,
            clause.to_suffix(),
            options.to_suffix()?
        );
        debug!(table = %self.name, sql, "count");
        let mut stmt = self.db.connection().prepare_cached(&sql)?;
        let count: i64 = stmt.query_row(params_from_iter(clause.params), |row| row.get(0))?;
        Ok(u64::try_from(count).unwrap_or_default())
    }

    fn contains(&self, filter: Filter<'_, M>) -> Result<bool> {
        let clause = self.compile(&filter)?;
        let sql = format!("SELECT 1 FROM {}{} LIMIT 1", self.name, clause.to_suffix());
        debug!(table = %self.name, sql, "contains");
        let mut stmt = self.db.connection().prepare_cached(&sql)?;
        let mut rows = stmt.query(params_from_iter(clause.params))?;
        Ok(rows.next()?.is_some())
    }

    fn insert(&self, records: &[M], on_exists: OnExists) -> Result<usize> {
        if records.is_empty() {
            return Ok(0);
        }
        let placeholders = vec!["?"; self.columns.len()].join(", ");
        let sql = format!(
            "{} INTO {} ({}) VALUES ({placeholders})",
            on_exists.insert_verb(),
            self.name,
            self.column_list()
        );

        self.db.ensure_transaction()?;
        debug!(table = %self.name, sql, rows = records.len(), "insert");
        let mut stmt = self.db.connection().prepare_cached(&sql)?;
        let mut affected = 0;
        for record in records {
            affected += stmt.execute(params_from_iter(self.row_params(record)?))?;
        }
        Ok(affected)
    }

    fn update(&self, record: &M) -> Result<usize> {
        self.update_where(record, Filter::ByPrimaryKey(record))
    }

    fn update_where(&self, record: &M, filter: Filter<'_, M>) -> Result<usize> {
        let clause = self.compile(&filter)?;
        if clause.is_empty() {
            return Err(StoreError::Programming(format!(
                "update of '{}' without a filter",
                self.name
            )));
        }
        let assignments = self
            .columns
            .iter()
            .map(|c| format!("{} = ?", c.name))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!("UPDATE {} SET {assignments}{}", self.name, clause.to_suffix());

        let mut params = self.row_params(record)?;
        params.extend(clause.params);
        self.write(&sql, params)
    }

    fn delete(&self, filter: Filter<'_, M>) -> Result<usize> {
        let clause = self.compile(&filter)?;
        if clause.is_empty() {
            return Err(StoreError::Programming(format!(
                "delete from '{}' without a filter",
                self.name
            )));
        }
        let sql = format!("DELETE FROM {}{}", self.name, clause.to_suffix());
        self.write(&sql, clause.params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use modelstore_core::FieldType;
    use serde::Deserialize;
    use serde_json::json;

    use crate::filter::{FieldMap, Order};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct File {
        relative_path: String,
        uuid: String,
        size: i64,
        puid: Option<String>,
        root: Option<String>,
    }

    impl Model for File {
        fn schema() -> RecordSchema {
            RecordSchema::new("File")
                .field("relative_path", FieldType::PATH)
                .field("uuid", FieldType::UUID)
                .field("size", FieldType::INTEGER)
                .field("puid", FieldType::optional(FieldType::TEXT))
                .field("root", FieldType::optional(FieldType::PATH))
        }
    }

    fn file(path: &str, size: i64, puid: Option<&str>) -> File {
        File {
            relative_path: path.to_string(),
            uuid: format!("00000000-0000-4000-8000-{size:012}"),
            size,
            puid: puid.map(str::to_string),
            root: None,
        }
    }

    fn files(db: &Database) -> Table<'_, File> {
        let table = Table::<File>::builder(db, "files")
            .primary_key("relative_path")
            .index("uuid", ["uuid"])
            .ignore("root")
            .build()
            .unwrap();
        table.create(CreateOptions::new()).unwrap();
        table
    }

    #[test]
    fn test_create_sql_skips_ignored_fields() {
        let db = Database::open_in_memory().unwrap();
        let table = files(&db);
        assert_eq!(
            table.create_sql(CreateOptions::new()),
            "CREATE TABLE files (relative_path text NOT NULL, uuid text NOT NULL, size integer NOT NULL, puid text, PRIMARY KEY (relative_path))"
        );
        assert_eq!(
            table.indices_sql(true),
            vec!["CREATE INDEX IF NOT EXISTS idx_files_uuid ON files (uuid)"]
        );
    }

    #[test]
    fn test_create_is_idempotent_with_exist_ok() {
        let db = Database::open_in_memory().unwrap();
        let table = files(&db);
        table.create(CreateOptions::new().exist_ok()).unwrap();
        assert!(table.create(CreateOptions::new()).is_err());
    }

    #[test]
    fn test_unknown_key_columns_are_rejected() {
        let db = Database::open_in_memory().unwrap();
        let pk = Table::<File>::builder(&db, "files").primary_key("id").build();
        assert!(matches!(pk, Err(StoreError::UnknownColumn { .. })));

        let index = Table::<File>::builder(&db, "files")
            .index("by_root", ["root"])
            .ignore("root")
            .build();
        assert!(matches!(index, Err(StoreError::UnknownColumn { .. })));

        let name = Table::<File>::builder(&db, "files; drop").build();
        assert!(matches!(name, Err(StoreError::InvalidIdentifier(_))));
    }

    #[test]
    fn test_insert_select_round_trip() {
        let db = Database::open_in_memory().unwrap();
        let table = files(&db);
        let rows = vec![file("a.txt", 1, Some("fmt/1")), file("b.txt", 2, None)];
        assert_eq!(table.insert(&rows, OnExists::Error).unwrap(), 2);

        let back = table
            .select(Filter::All, SelectOptions::new().order_by("size", Order::Asc))
            .unwrap()
            .fetch_all()
            .unwrap();
        assert_eq!(back, rows);
    }

    #[test]
    fn test_on_exists_policies() {
        let db = Database::open_in_memory().unwrap();
        let table = files(&db);
        table.insert(&[file("a.txt", 1, None)], OnExists::Error).unwrap();

        let dup = table.insert(&[file("a.txt", 5, None)], OnExists::Error);
        assert!(matches!(dup, Err(StoreError::Sqlite(_))));

        assert_eq!(
            table.insert(&[file("a.txt", 5, None)], OnExists::Ignore).unwrap(),
            0
        );
        assert_eq!(table.get(Filter::All).unwrap().unwrap().size, 1);

        assert_eq!(table.upsert(&[file("a.txt", 5, None)]).unwrap(), 1);
        assert_eq!(table.get(Filter::All).unwrap().unwrap().size, 5);
        assert_eq!(table.len().unwrap(), 1);
    }

    #[test]
    fn test_update_by_primary_key() {
        let db = Database::open_in_memory().unwrap();
        let table = files(&db);
        table
            .insert(&[file("a.txt", 1, None), file("b.txt", 2, None)], OnExists::Error)
            .unwrap();

        let mut changed = file("a.txt", 1, None);
        changed.puid = Some("fmt/18".to_string());
        assert_eq!(table.update(&changed).unwrap(), 1);

        let a = table.get(Filter::record(&changed)).unwrap().unwrap();
        assert_eq!(a.puid.as_deref(), Some("fmt/18"));
        let b = table
            .get(Filter::fields(FieldMap::new().with("relative_path", json!("b.txt"))))
            .unwrap()
            .unwrap();
        assert_eq!(b.puid, None);
    }

    #[test]
    fn test_unbounded_mutations_are_refused() {
        let db = Database::open_in_memory().unwrap();
        let table = files(&db);
        table.insert(&[file("a.txt", 1, None)], OnExists::Error).unwrap();
        db.commit().unwrap();

        let record = file("a.txt", 9, None);
        assert!(matches!(
            table.update_where(&record, Filter::raw("", vec![])),
            Err(StoreError::Programming(_))
        ));
        assert!(matches!(
            table.delete(Filter::raw("  ", vec![])),
            Err(StoreError::Programming(_))
        ));
        assert!(matches!(table.delete(Filter::All), Err(StoreError::Programming(_))));
        assert_eq!(db.uncommitted_changes().unwrap(), 0);
        assert_eq!(table.get(Filter::All).unwrap().unwrap().size, 1);
    }

    #[test]
    fn test_update_without_primary_keys_is_refused() {
        let db = Database::open_in_memory().unwrap();
        let table = Table::<File>::builder(&db, "loose").build().unwrap();
        table.create(CreateOptions::new()).unwrap();
        assert!(matches!(
            table.update(&file("a.txt", 1, None)),
            Err(StoreError::Programming(_))
        ));
    }

    #[test]
    fn test_count_honours_paging() {
        let db = Database::open_in_memory().unwrap();
        let table = files(&db);
        let rows: Vec<File> = (1..=5).map(|i| file(&format!("{i}.txt"), i, None)).collect();
        table.insert(&rows, OnExists::Error).unwrap();

        assert_eq!(table.count(Filter::All, SelectOptions::new()).unwrap(), 5);
        assert_eq!(
            table.count(Filter::All, SelectOptions::new().limit(3)).unwrap(),
            3
        );
        assert_eq!(
            table
                .count(Filter::All, SelectOptions::new().offset(4))
                .unwrap(),
            1
        );
        assert_eq!(
            table
                .count(Filter::raw("where size > ?", vec![SqlValue::Integer(2)]), SelectOptions::new())
                .unwrap(),
            3
        );
    }

    #[test]
    fn test_contains_and_delete() {
        let db = Database::open_in_memory().unwrap();
        let table = files(&db);
        let a = file("a.txt", 1, None);
        table.insert(std::slice::from_ref(&a), OnExists::Error).unwrap();

        assert!(table.contains(Filter::record(&a)).unwrap());
        assert_eq!(table.delete(Filter::record(&a)).unwrap(), 1);
        assert!(!table.contains(Filter::record(&a)).unwrap());
        assert!(table.is_empty().unwrap());
    }

    #[test]
    fn test_missing_table_surfaces_store_error() {
        let db = Database::open_in_memory().unwrap();
        let table = Table::<File>::builder(&db, "absent").build().unwrap();
        assert!(matches!(
            table.select(Filter::All, SelectOptions::new()),
            Err(StoreError::Sqlite(_))
        ));
    }

    #[test]
    fn test_dynamic_records() {
        let db = Database::open_in_memory().unwrap();
        let schema = RecordSchema::new("Row")
            .field("k", FieldType::TEXT)
            .field("n", FieldType::optional(FieldType::INTEGER));
        let table = Table::<Map<String, Value>>::builder_with_schema(&db, "rows", schema)
            .primary_key("k")
            .build()
            .unwrap();
        table.create(CreateOptions::new()).unwrap();

        let row = json!({"k": "x", "n": 3}).as_object().cloned().unwrap();
        table.insert(&[row.clone()], OnExists::Error).unwrap();
        assert_eq!(table.get(Filter::record(&row)).unwrap(), Some(row));
    }
}
