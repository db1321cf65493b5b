//! Typed result streams.

use std::marker::PhantomData;

use rusqlite::{CachedStatement, Row, Rows, params_from_iter};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::column::ColumnSpec;
use crate::error::{Result, StoreError};
use crate::filter::SqlValue;

/// A prepared select whose rows decode into records of type `M`.
///
/// Rows are read lazily. Each declared column is fetched by name and passed
/// through its converter, then the assembled object is deserialized into
/// `M`. Columns returned by the statement but not declared by the record
/// description are ignored.
///
/// # Examples
///
/// ```
/// use modelstore_core::{FieldType, Model, RecordSchema};
/// use modelstore_sqlite::{CreateOptions, Database, Filter, Relation, SelectOptions, Table};
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Serialize, Deserialize)]
/// struct Point {
///     x: i64,
///     y: i64,
/// }
///
/// impl Model for Point {
///     fn schema() -> RecordSchema {
///         RecordSchema::new("Point")
///             .field("x", FieldType::INTEGER)
///             .field("y", FieldType::INTEGER)
///     }
/// }
///
/// let db = Database::open_in_memory().unwrap();
/// let points = Table::<Point>::builder(&db, "points").build().unwrap();
/// points.create(CreateOptions::new()).unwrap();
/// points.insert(&[Point { x: 1, y: 2 }, Point { x: 3, y: 4 }], Default::default()).unwrap();
///
/// let mut cursor = points.select(Filter::All, SelectOptions::new()).unwrap();
/// let sum: i64 = cursor.iter().unwrap().map(|p| p.unwrap().x).sum();
/// assert_eq!(sum, 4);
/// ```
pub struct Cursor<'db, M> {
    statement: CachedStatement<'db>,
    params: Vec<SqlValue>,
    columns: Vec<ColumnSpec>,
    model: String,
    _marker: PhantomData<fn() -> M>,
}

impl<'db, M: DeserializeOwned> Cursor<'db, M> {
    pub(crate) fn new(
        statement: CachedStatement<'db>,
        params: Vec<SqlValue>,
        columns: Vec<ColumnSpec>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            statement,
            params,
            columns,
            model: model.into(),
            _marker: PhantomData,
        }
    }

    /// Runs the statement and iterates over the decoded rows.
    ///
    /// Each call re-runs the statement from the start.
    pub fn iter(&mut self) -> Result<CursorIter<'_, M>> {
        let rows = self.statement.query(params_from_iter(self.params.iter()))?;
        Ok(CursorIter {
            rows,
            columns: &self.columns,
            model: &self.model,
            _marker: PhantomData,
        })
    }

    /// Returns the first row, or `None` if there are no rows.
    pub fn fetch_one(mut self) -> Result<Option<M>> {
        let mut rows = self.iter()?;
        rows.next().transpose()
    }

    /// Returns up to `size` rows.
    pub fn fetch_many(mut self, size: usize) -> Result<Vec<M>> {
        let rows = self.iter()?;
        rows.take(size).collect()
    }

    /// Returns every row.
    pub fn fetch_all(mut self) -> Result<Vec<M>> {
        let rows = self.iter()?;
        rows.collect()
    }
}

/// Iterator over the decoded rows of a [`Cursor`].
pub struct CursorIter<'c, M> {
    rows: Rows<'c>,
    columns: &'c [ColumnSpec],
    model: &'c str,
    _marker: PhantomData<fn() -> M>,
}

impl<M: DeserializeOwned> Iterator for CursorIter<'_, M> {
    type Item = Result<M>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.rows.next() {
            Ok(Some(row)) => Some(decode_row(row, self.columns, self.model)),
            Ok(None) => None,
            Err(e) => Some(Err(e.into())),
        }
    }
}

fn decode_row<M: DeserializeOwned>(row: &Row<'_>, columns: &[ColumnSpec], model: &str) -> Result<M> {
    let mut object = Map::with_capacity(columns.len());
    for column in columns {
        let value = column.from_sql(row.get_ref(column.name.as_str())?)?;
        object.insert(column.name.clone(), value);
    }
    serde_json::from_value(Value::Object(object)).map_err(|e| StoreError::Validation {
        model: model.to_string(),
        message: e.to_string(),
    })
}
