//! The shared surface of tables and views.

use serde::de::DeserializeOwned;

use crate::cursor::Cursor;
use crate::error::{Result, StoreError};
use crate::filter::{Filter, OnExists, SelectOptions};

/// Read and write operations over a named relation of records `M`.
///
/// Reads are required. Writes default to failing with
/// [`StoreError::NotSupported`]; [`Table`](crate::Table) overrides them and
/// [`View`](crate::View) does not.
pub trait Relation<'db, M: DeserializeOwned> {
    /// Name of the relation in the store.
    fn name(&self) -> &str;

    /// Selects matching rows, decoded lazily.
    fn select(&self, filter: Filter<'_, M>, options: SelectOptions) -> Result<Cursor<'db, M>>;

    /// Counts matching rows. `limit` and `offset` apply as they would to
    /// [`select`](Self::select).
    fn count(&self, filter: Filter<'_, M>, options: SelectOptions) -> Result<u64>;

    /// Number of rows.
    fn len(&self) -> Result<u64> {
        self.count(Filter::All, SelectOptions::new())
    }

    /// Returns `true` if the relation has no rows.
    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// The first matching row.
    fn get(&self, filter: Filter<'_, M>) -> Result<Option<M>> {
        self.select(filter, SelectOptions::new().limit(1))?.fetch_one()
    }

    /// Returns `true` if any row matches.
    fn contains(&self, filter: Filter<'_, M>) -> Result<bool> {
        Ok(self.count(filter, SelectOptions::new().limit(1))? > 0)
    }

    /// Inserts records in one batch and returns the number of rows written.
    fn insert(&self, _records: &[M], _on_exists: OnExists) -> Result<usize> {
        Err(self.not_supported("insert"))
    }

    /// Inserts records, replacing rows with the same key.
    fn upsert(&self, records: &[M]) -> Result<usize> {
        self.insert(records, OnExists::Replace)
    }

    /// Updates the row matching the record's primary keys.
    fn update(&self, _record: &M) -> Result<usize> {
        Err(self.not_supported("update"))
    }

    /// Updates every row matching `filter` with the record's values. An
    /// empty filter is refused.
    fn update_where(&self, _record: &M, _filter: Filter<'_, M>) -> Result<usize> {
        Err(self.not_supported("update"))
    }

    /// Deletes matching rows. An empty filter is refused.
    fn delete(&self, _filter: Filter<'_, M>) -> Result<usize> {
        Err(self.not_supported("delete"))
    }

    #[doc(hidden)]
    fn not_supported(&self, operation: &'static str) -> StoreError {
        StoreError::NotSupported {
            operation,
            relation: self.name().to_string(),
        }
    }
}
