//! Read-only views.

use modelstore_core::{Model, RecordSchema};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::cursor::Cursor;
use crate::database::Database;
use crate::error::Result;
use crate::filter::{Filter, SelectOptions};
use crate::relation::Relation;
use crate::schema::{CreateOptions, create_view_sql, drop_sql};
use crate::table::{Table, TableBuilder};

/// Builder for [`View`].
pub struct ViewBuilder<'db, M> {
    select: String,
    table: TableBuilder<'db, M>,
}

impl<'db, M> ViewBuilder<'db, M> {
    /// Excludes a field of the record description from the view's columns.
    pub fn ignore(mut self, field: impl Into<String>) -> Self {
        self.table = self.table.ignore(field);
        self
    }

    /// Derives the columns.
    pub fn build(self) -> Result<View<'db, M>> {
        Ok(View {
            select: self.select.trim().to_string(),
            table: self.table.build()?,
        })
    }
}

/// A view defined by a fixed select statement.
///
/// Reads go through an internal table with no primary keys bound to the
/// view's name. Writes fail with
/// [`NotSupported`](crate::StoreError::NotSupported).
///
/// # Examples
///
/// ```
/// use modelstore_core::{FieldType, Model, RecordSchema};
/// use modelstore_sqlite::{CreateOptions, Database, Filter, Relation, StoreError, View};
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Serialize, Deserialize)]
/// struct PuidCount {
///     puid: Option<String>,
///     count: i64,
/// }
///
/// impl Model for PuidCount {
///     fn schema() -> RecordSchema {
///         RecordSchema::new("PuidCount")
///             .field("puid", FieldType::optional(FieldType::TEXT))
///             .field("count", FieldType::INTEGER)
///     }
/// }
///
/// let db = Database::open_in_memory().unwrap();
/// db.execute_batch("CREATE TABLE files (puid text)").unwrap();
/// let counts = View::<PuidCount>::builder(
///     &db,
///     "puid_count",
///     "select puid, count(*) as count from files group by puid",
/// )
/// .build()
/// .unwrap();
/// counts.create(CreateOptions::new()).unwrap();
///
/// assert_eq!(counts.len().unwrap(), 0);
/// assert!(matches!(
///     counts.delete(Filter::All),
///     Err(StoreError::NotSupported { .. })
/// ));
/// ```
pub struct View<'db, M> {
    select: String,
    table: Table<'db, M>,
}

impl<'db, M: Model> View<'db, M> {
    /// Starts building a view for a statically described record type.
    pub fn builder(
        db: &'db Database,
        name: impl Into<String>,
        select: impl Into<String>,
    ) -> ViewBuilder<'db, M> {
        ViewBuilder {
            select: select.into(),
            table: Table::builder(db, name),
        }
    }
}

impl<'db, M> View<'db, M> {
    /// Starts building a view from a description known only at runtime.
    pub fn builder_with_schema(
        db: &'db Database,
        name: impl Into<String>,
        select: impl Into<String>,
        schema: RecordSchema,
    ) -> ViewBuilder<'db, M> {
        ViewBuilder {
            select: select.into(),
            table: Table::builder_with_schema(db, name, schema),
        }
    }

    /// The select body the view is defined by.
    pub fn select_sql(&self) -> &str {
        &self.select
    }

    /// The `CREATE VIEW` statement.
    pub fn create_sql(&self, options: CreateOptions) -> String {
        create_view_sql(self.view_name(), &self.select, options)
    }

    /// Creates the view.
    pub fn create(&self, options: CreateOptions) -> Result<()> {
        self.table
            .database()
            .execute_batch(&self.create_sql(options))
    }

    /// Drops the view.
    pub fn drop(&self, missing_ok: bool) -> Result<()> {
        self.table
            .database()
            .execute_batch(&drop_sql("VIEW", self.view_name(), missing_ok))
    }

    fn view_name(&self) -> &str {
        self.table.name()
    }
}

impl<'db, M: Serialize + DeserializeOwned> Relation<'db, M> for View<'db, M> {
    fn name(&self) -> &str {
        self.view_name()
    }

    fn select(&self, filter: Filter<'_, M>, options: SelectOptions) -> Result<Cursor<'db, M>> {
        self.table.select(filter, options)
    }

    fn count(&self, filter: Filter<'_, M>, options: SelectOptions) -> Result<u64> {
        self.table.count(filter, options)
    }

    fn contains(&self, filter: Filter<'_, M>) -> Result<bool> {
        self.table.contains(filter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use modelstore_core::FieldType;
    use serde::Deserialize;
    use serde_json::json;

    use crate::StoreError;
    use crate::filter::{FieldMap, OnExists, Order};

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Big {
        name: String,
        size: i64,
    }

    impl Model for Big {
        fn schema() -> RecordSchema {
            RecordSchema::new("Big")
                .field("name", FieldType::TEXT)
                .field("size", FieldType::INTEGER)
        }
    }

    fn setup(db: &Database) -> View<'_, Big> {
        db.execute_batch(
            "CREATE TABLE files (name text, size integer);
             INSERT INTO files VALUES ('a', 1), ('b', 100), ('c', 200);",
        )
        .unwrap();
        let view = View::<Big>::builder(db, "big_files", "select * from files where size >= 100")
            .build()
            .unwrap();
        view.create(CreateOptions::new().exist_ok()).unwrap();
        view
    }

    #[test]
    fn test_create_sql() {
        let db = Database::open_in_memory().unwrap();
        let view = View::<Big>::builder(&db, "v", "  select * from t  ").build().unwrap();
        assert_eq!(
            view.create_sql(CreateOptions::new().temporary()),
            "CREATE TEMPORARY VIEW v AS select * from t"
        );
    }

    #[test]
    fn test_reads_delegate_to_inner_table() {
        let db = Database::open_in_memory().unwrap();
        let view = setup(&db);
        assert_eq!(view.len().unwrap(), 2);
        assert!(
            view.contains(Filter::fields(FieldMap::new().with("name", json!("b"))))
                .unwrap()
        );
        assert!(
            !view
                .contains(Filter::fields(FieldMap::new().with("name", json!("a"))))
                .unwrap()
        );
        let rows = view
            .select(Filter::All, SelectOptions::new().order_by("size", Order::Desc))
            .unwrap()
            .fetch_all()
            .unwrap();
        assert_eq!(rows[0].name, "c");
        assert_eq!(db.views().unwrap(), vec!["big_files"]);
    }

    #[test]
    fn test_writes_are_not_supported() {
        let db = Database::open_in_memory().unwrap();
        let view = setup(&db);
        let row = Big {
            name: "d".to_string(),
            size: 500,
        };
        for result in [
            view.insert(std::slice::from_ref(&row), OnExists::Error),
            view.upsert(std::slice::from_ref(&row)),
            view.update(&row),
            view.update_where(&row, Filter::raw("size > 0", vec![])),
            view.delete(Filter::All),
        ] {
            assert!(
                matches!(result, Err(StoreError::NotSupported { ref relation, .. }) if relation == "big_files")
            );
        }
        assert_eq!(view.len().unwrap(), 2);
    }

    #[test]
    fn test_drop() {
        let db = Database::open_in_memory().unwrap();
        let view = setup(&db);
        view.drop(false).unwrap();
        assert!(db.views().unwrap().is_empty());
        view.drop(true).unwrap();
    }
}
