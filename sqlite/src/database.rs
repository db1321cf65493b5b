//! The connection wrapper.
//!
//! A [`Database`] owns exactly one SQLite connection. Relations borrow it,
//! so every table, view and key-value store bound to a database lives no
//! longer than the database itself.
//!
//! # Transactions
//!
//! Writes issued through relations (and DML passed to
//! [`execute`](Database::execute)) open a deferred transaction when none is
//! active. Changes stay pending until [`commit`](Database::commit) or
//! [`rollback`](Database::rollback). DDL runs in autocommit mode unless a
//! transaction is already open.
//!
//! [`uncommitted_changes`](Database::uncommitted_changes) reports how many
//! rows were modified since the last commit, which lets callers refuse
//! unsafe operations while work is pending.
//!
//! # Exclusivity
//!
//! When [`DatabaseConfig::check_exclusive`] is set, a read-write open fails
//! with [`StoreError::Operational`] if any process, including the current
//! one, already holds the file open. Read-only opens skip the check. The
//! check inspects `/proc` and is a no-op on other platforms.

use std::cell::Cell;
use std::path::{Path, PathBuf};
use std::time::Duration;

use modelstore_core::{Model, SchemaVersion};
use rusqlite::{Connection, OpenFlags, Params};
use tracing::{debug, info};

use crate::config::DatabaseConfig;
use crate::error::{Result, StoreError};
use crate::keys_table::KeysTable;
use crate::migration::{METADATA_TABLE, Metadata, Migrator};
use crate::schema::CreateOptions;
use crate::table::Table;
use crate::view::View;

/// A single connection to a store file.
///
/// # Examples
///
/// ```
/// use modelstore_sqlite::Database;
///
/// let db = Database::open_in_memory().unwrap();
/// db.execute_batch("CREATE TABLE t (a integer)").unwrap();
/// db.execute("INSERT INTO t (a) VALUES (?1)", [1]).unwrap();
/// assert_eq!(db.uncommitted_changes().unwrap(), 1);
///
/// db.commit().unwrap();
/// assert_eq!(db.uncommitted_changes().unwrap(), 0);
/// assert_eq!(db.tables().unwrap(), vec!["t"]);
/// ```
#[derive(Debug)]
pub struct Database {
    conn: Connection,
    path: Option<PathBuf>,
    read_only: bool,
    committed_changes: Cell<u64>,
}

impl Database {
    /// Opens (or creates) a store file.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Operational`] if the exclusivity check finds
    /// another holder of the file or the timeout is not a valid duration,
    /// and [`StoreError::Sqlite`] if the file cannot be opened.
    pub fn open(path: impl AsRef<Path>, config: &DatabaseConfig) -> Result<Self> {
        let path = std::path::absolute(path.as_ref())?;

        if config.check_exclusive && !config.read_only {
            if let Some(pid) = exclusive::file_processes(&path).first() {
                return Err(StoreError::Operational(format!(
                    "cannot open read-write connection to a database used by another process (pid {pid}): {}",
                    path.display()
                )));
            }
        }

        let flags = if config.read_only {
            OpenFlags::SQLITE_OPEN_READ_ONLY
                | OpenFlags::SQLITE_OPEN_URI
                | OpenFlags::SQLITE_OPEN_NO_MUTEX
        } else {
            OpenFlags::default()
        };
        let conn = Connection::open_with_flags(&path, flags)?;

        let timeout = Duration::try_from_secs_f64(config.timeout).map_err(|e| {
            StoreError::Operational(format!("invalid timeout {}: {e}", config.timeout))
        })?;
        conn.busy_timeout(timeout)?;
        conn.set_prepared_statement_cache_capacity(config.cached_statements);

        info!(path = %path.display(), read_only = config.read_only, "opened database");

        Ok(Self {
            conn,
            path: Some(path),
            read_only: config.read_only,
            committed_changes: Cell::new(0),
        })
    }

    /// Opens a private in-memory store.
    pub fn open_in_memory() -> Result<Self> {
        Ok(Self {
            conn: Connection::open_in_memory()?,
            path: None,
            read_only: false,
            committed_changes: Cell::new(0),
        })
    }

    /// The underlying connection.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Absolute path of the store file; `None` for in-memory stores.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Returns `true` if the connection was opened read-only.
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Executes one statement and returns the number of rows changed.
    ///
    /// `INSERT`, `UPDATE`, `DELETE` and `REPLACE` open a transaction first
    /// if none is active.
    pub fn execute<P: Params>(&self, sql: &str, params: P) -> Result<usize> {
        if is_dml(sql) {
            self.ensure_transaction()?;
        }
        debug!(sql, "execute");
        Ok(self.conn.execute(sql, params)?)
    }

    /// Executes a batch of `;`-separated statements without parameters.
    ///
    /// Outside a pending transaction each statement autocommits, so changes
    /// made by the batch are not counted as uncommitted.
    pub fn execute_batch(&self, sql: &str) -> Result<()> {
        debug!(sql, "execute batch");
        let pending = !self.conn.is_autocommit();
        self.conn.execute_batch(sql)?;
        if !pending && self.conn.is_autocommit() {
            self.committed_changes.set(self.total_changes()?);
        }
        Ok(())
    }

    /// Opens a deferred transaction if none is active.
    pub(crate) fn ensure_transaction(&self) -> Result<()> {
        if self.conn.is_autocommit() {
            self.conn.execute_batch("BEGIN DEFERRED")?;
        }
        Ok(())
    }

    /// Commits the pending transaction, if any.
    pub fn commit(&self) -> Result<()> {
        if !self.conn.is_autocommit() {
            self.conn.execute_batch("COMMIT")?;
            info!("committed");
        }
        self.committed_changes.set(self.total_changes()?);
        Ok(())
    }

    /// Rolls back the pending transaction, if any.
    pub fn rollback(&self) -> Result<()> {
        if !self.conn.is_autocommit() {
            self.conn.execute_batch("ROLLBACK")?;
            info!("rolled back");
        }
        self.committed_changes.set(self.total_changes()?);
        Ok(())
    }

    /// Rows inserted, updated or deleted since the connection was opened.
    pub fn total_changes(&self) -> Result<u64> {
        let changes: i64 = self
            .conn
            .query_row("SELECT total_changes()", [], |row| row.get(0))?;
        Ok(u64::try_from(changes).unwrap_or_default())
    }

    /// Value of [`total_changes`](Self::total_changes) at the last commit.
    pub fn committed_changes(&self) -> u64 {
        self.committed_changes.get()
    }

    /// Rows changed since the last commit or rollback.
    pub fn uncommitted_changes(&self) -> Result<u64> {
        Ok(self.total_changes()?.saturating_sub(self.committed_changes()))
    }

    /// Names of the tables in the store.
    pub fn tables(&self) -> Result<Vec<String>> {
        self.schema_objects("table")
    }

    /// Names of the views in the store.
    pub fn views(&self) -> Result<Vec<String>> {
        self.schema_objects("view")
    }

    fn schema_objects(&self, kind: &str) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT name FROM sqlite_master WHERE type = ?1")?;
        let names = stmt
            .query_map([kind], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(names)
    }

    /// Closes the connection. Pending changes are rolled back by SQLite.
    pub fn close(self) -> Result<()> {
        self.conn.close().map_err(|(_, e)| StoreError::Sqlite(e))
    }

    /// Binds a table with the given primary keys and creates it if missing.
    pub fn create_table<M: Model>(&self, name: &str, primary_keys: &[&str]) -> Result<Table<'_, M>> {
        let table = Table::builder(self, name)
            .primary_keys(primary_keys.iter().copied())
            .build()?;
        table.create(CreateOptions::new().exist_ok())?;
        Ok(table)
    }

    /// Binds a view and creates it if missing.
    pub fn create_view<M: Model>(&self, name: &str, select: &str) -> Result<View<'_, M>> {
        let view = View::builder(self, name, select).build()?;
        view.create(CreateOptions::new().exist_ok())?;
        Ok(view)
    }

    /// Binds a key-value store and creates it if missing.
    pub fn create_keys_table<M: Model>(&self, name: &str) -> Result<KeysTable<'_, M>> {
        let keys = KeysTable::new(self, name)?;
        keys.create(CreateOptions::new().exist_ok())?;
        Ok(keys)
    }

    /// The key-value store holding schema metadata.
    pub fn metadata(&self) -> Result<KeysTable<'_, Metadata>> {
        KeysTable::new(self, METADATA_TABLE)
    }

    /// Returns `true` if the metadata table exists and records a version.
    pub fn is_initialised(&self) -> Result<bool> {
        if !self.tables()?.iter().any(|t| t == METADATA_TABLE) {
            return Ok(false);
        }
        Ok(matches!(self.metadata()?.get(), Ok(Some(_))))
    }

    /// The persisted schema version.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Version`] if the store is not initialised.
    pub fn version(&self) -> Result<SchemaVersion> {
        if !self.is_initialised()? {
            return Err(StoreError::Version("database is not initialised".to_string()));
        }
        match self.metadata()?.get()? {
            Some(metadata) => Ok(metadata.version),
            None => Err(StoreError::Version("database is not initialised".to_string())),
        }
    }

    /// Creates the metadata table and records `version` unless a version is
    /// already present, then commits.
    pub fn init_metadata(&self, version: SchemaVersion) -> Result<()> {
        let metadata = self.create_keys_table::<Metadata>(METADATA_TABLE)?;
        if metadata.get()?.is_none() {
            metadata.set(&Metadata { version })?;
        }
        self.commit()
    }

    /// Upgrades the store with `migrator`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Version`] if the store is not initialised or
    /// has uncommitted changes, and any error raised by the upgrade chain.
    pub fn upgrade(&self, migrator: &Migrator) -> Result<()> {
        if !self.is_initialised()? {
            return Err(StoreError::Version("database is not initialised".to_string()));
        }
        if self.uncommitted_changes()? > 0 {
            return Err(StoreError::Version("database has uncommitted changes".to_string()));
        }
        migrator.upgrade(self)
    }
}

fn is_dml(sql: &str) -> bool {
    let keyword: String = sql
        .trim_start()
        .chars()
        .take_while(|c| c.is_ascii_alphabetic())
        .collect();
    ["insert", "update", "delete", "replace"]
        .iter()
        .any(|k| keyword.eq_ignore_ascii_case(k))
}

mod exclusive {
    use std::path::Path;

    /// Ids of processes holding `path` open.
    #[cfg(target_os = "linux")]
    pub(super) fn file_processes(path: &Path) -> Vec<u32> {
        use std::fs;

        use tracing::warn;

        // a file that does not exist yet is held by nobody
        let Ok(target) = path.canonicalize() else {
            return Vec::new();
        };
        let proc_entries = match fs::read_dir("/proc") {
            Ok(entries) => entries,
            Err(e) => {
                warn!(error = %e, "cannot list processes, skipping exclusivity check");
                return Vec::new();
            }
        };

        let mut holders = Vec::new();
        let mut skipped = 0usize;
        for entry in proc_entries.flatten() {
            let Some(pid) = entry.file_name().to_str().and_then(|s| s.parse::<u32>().ok()) else {
                continue;
            };
            let Ok(fds) = fs::read_dir(entry.path().join("fd")) else {
                skipped += 1;
                continue;
            };
            if fds
                .flatten()
                .any(|fd| fs::read_link(fd.path()).is_ok_and(|link| link == target))
            {
                holders.push(pid);
            }
        }

        if skipped > 0 {
            warn!(skipped, "could not inspect open files of some processes");
        }
        holders
    }

    #[cfg(not(target_os = "linux"))]
    pub(super) fn file_processes(_path: &Path) -> Vec<u32> {
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dml_detection() {
        assert!(is_dml("insert into t values (1)"));
        assert!(is_dml("  UPDATE t SET a = 1"));
        assert!(is_dml("Replace into t values (1)"));
        assert!(!is_dml("create table t (a)"));
        assert!(!is_dml("select * from deleted"));
    }

    #[test]
    fn test_change_counters() {
        let db = Database::open_in_memory().unwrap();
        db.execute_batch("CREATE TABLE t (a integer)").unwrap();
        db.execute("INSERT INTO t (a) VALUES (?1)", [1]).unwrap();
        db.execute("INSERT INTO t (a) VALUES (?1)", [2]).unwrap();
        assert_eq!(db.total_changes().unwrap(), 2);
        assert_eq!(db.uncommitted_changes().unwrap(), 2);
        assert!(!db.connection().is_autocommit());

        db.commit().unwrap();
        assert_eq!(db.committed_changes(), 2);
        assert_eq!(db.uncommitted_changes().unwrap(), 0);
        assert!(db.connection().is_autocommit());
    }

    #[test]
    fn test_autocommitted_batch_is_not_pending() {
        let db = Database::open_in_memory().unwrap();
        db.init_metadata(SchemaVersion::new(1, 0, 0)).unwrap();
        db.execute_batch("CREATE TABLE t (a integer); INSERT INTO t VALUES (1), (2);")
            .unwrap();
        assert_eq!(db.uncommitted_changes().unwrap(), 0);

        let migrator = Migrator::builder(SchemaVersion::new(2, 0, 0)).build().unwrap();
        db.upgrade(&migrator).unwrap();
        assert_eq!(db.version().unwrap(), SchemaVersion::new(2, 0, 0));

        db.execute("INSERT INTO t (a) VALUES (3)", []).unwrap();
        db.execute_batch("INSERT INTO t VALUES (4)").unwrap();
        assert_eq!(db.uncommitted_changes().unwrap(), 2);
    }

    #[test]
    fn test_rollback_discards_pending_rows() {
        let db = Database::open_in_memory().unwrap();
        db.execute_batch("CREATE TABLE t (a integer)").unwrap();
        db.execute("INSERT INTO t (a) VALUES (1)", []).unwrap();
        db.rollback().unwrap();
        let count: i64 = db
            .connection()
            .query_row("SELECT count(*) FROM t", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 0);
        assert_eq!(db.uncommitted_changes().unwrap(), 0);
    }

    #[test]
    fn test_tables_and_views() {
        let db = Database::open_in_memory().unwrap();
        db.execute_batch("CREATE TABLE a (x); CREATE TABLE b (y); CREATE VIEW v AS SELECT x FROM a;")
            .unwrap();
        assert_eq!(db.tables().unwrap(), vec!["a", "b"]);
        assert_eq!(db.views().unwrap(), vec!["v"]);
    }

    #[test]
    fn test_uninitialised_database() {
        let db = Database::open_in_memory().unwrap();
        assert!(!db.is_initialised().unwrap());
        assert!(matches!(db.version(), Err(StoreError::Version(_))));
        let migrator = Migrator::builder(SchemaVersion::new(1, 0, 0)).build().unwrap();
        assert!(matches!(db.upgrade(&migrator), Err(StoreError::Version(_))));
    }

    #[test]
    fn test_init_metadata_keeps_existing_version() {
        let db = Database::open_in_memory().unwrap();
        db.init_metadata(SchemaVersion::new(2, 0, 0)).unwrap();
        db.init_metadata(SchemaVersion::new(3, 0, 0)).unwrap();
        assert!(db.is_initialised().unwrap());
        assert_eq!(db.version().unwrap(), SchemaVersion::new(2, 0, 0));
    }

    #[test]
    fn test_upgrade_refuses_uncommitted_changes() {
        let db = Database::open_in_memory().unwrap();
        db.init_metadata(SchemaVersion::new(1, 0, 0)).unwrap();
        db.execute_batch("CREATE TABLE t (a integer)").unwrap();
        db.execute("INSERT INTO t (a) VALUES (1)", []).unwrap();
        let migrator = Migrator::builder(SchemaVersion::new(2, 0, 0)).build().unwrap();
        let err = db.upgrade(&migrator).unwrap_err();
        assert!(err.to_string().contains("uncommitted"));
    }

    #[test]
    fn test_invalid_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let config = DatabaseConfig {
            timeout: -1.0,
            check_exclusive: false,
            ..DatabaseConfig::default()
        };
        assert!(matches!(
            Database::open(dir.path().join("t.db"), &config),
            Err(StoreError::Operational(_))
        ));
    }
}
