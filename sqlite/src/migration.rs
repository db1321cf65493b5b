//! Schema version upgrades.
//!
//! A [`Migrator`] owns an ordered chain of steps. Each step covers a
//! half-open version range `[floor, ceiling)`: it performs its own schema
//! edits, persists the version it reaches with [`set_db_version`] (which
//! commits), and returns that version. [`Migrator::upgrade`] dispatches on
//! the persisted version until it equals the latest one.
//!
//! Versions at or above the last ceiling but below the latest are brought
//! forward by the reinitialisation hook, for releases that only add tables
//! or views the regular initialisation already knows how to create.
//!
//! # Example
//!
//! ```
//! use modelstore_core::SchemaVersion;
//! use modelstore_sqlite::migration::{Migrator, set_db_version};
//! use modelstore_sqlite::Database;
//!
//! let db = Database::open_in_memory().unwrap();
//! db.init_metadata(SchemaVersion::new(1, 0, 0)).unwrap();
//!
//! let migrator = Migrator::builder(SchemaVersion::new(3, 0, 0))
//!     .step(SchemaVersion::new(1, 0, 0), SchemaVersion::new(2, 0, 0), |db| {
//!         db.execute_batch("CREATE TABLE history (ts text, event text)")?;
//!         set_db_version(db, SchemaVersion::new(2, 0, 0))
//!     })
//!     .build()
//!     .unwrap();
//!
//! db.upgrade(&migrator).unwrap();
//! assert_eq!(db.version().unwrap(), SchemaVersion::new(3, 0, 0));
//! assert!(migrator.is_latest(&db, true).unwrap());
//! ```

use std::fmt;

use modelstore_core::{FieldType, Model, RecordSchema, SchemaVersion};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::schema::validate_identifier;

/// Name of the key-value table holding [`Metadata`].
pub const METADATA_TABLE: &str = "metadata";

/// Schema metadata persisted alongside the data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    /// Version of the schema the store was last written with.
    pub version: SchemaVersion,
}

impl Model for Metadata {
    fn schema() -> RecordSchema {
        RecordSchema::new("Metadata").field("version", FieldType::TEXT)
    }
}

type StepFn = Box<dyn Fn(&Database) -> Result<SchemaVersion>>;
type ReinitFn = Box<dyn Fn(&Database) -> Result<()>>;

struct Step {
    floor: SchemaVersion,
    ceiling: SchemaVersion,
    apply: StepFn,
}

/// Builder for [`Migrator`].
pub struct MigratorBuilder {
    latest: SchemaVersion,
    steps: Vec<Step>,
    reinitialise: Option<ReinitFn>,
}

impl MigratorBuilder {
    /// Registers a step applicable to versions in `[floor, ceiling)`.
    ///
    /// Steps must be registered in ascending order with each floor equal to
    /// the previous ceiling.
    pub fn step<F>(mut self, floor: SchemaVersion, ceiling: SchemaVersion, apply: F) -> Self
    where
        F: Fn(&Database) -> Result<SchemaVersion> + 'static,
    {
        self.steps.push(Step {
            floor,
            ceiling,
            apply: Box::new(apply),
        });
        self
    }

    /// Sets the hook run before jumping from the last ceiling to the latest
    /// version.
    pub fn reinitialise<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Database) -> Result<()> + 'static,
    {
        self.reinitialise = Some(Box::new(hook));
        self
    }

    /// Validates the chain.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Version`] if a range is empty, ranges are not
    /// contiguous and ascending, or a ceiling exceeds the latest version.
    pub fn build(self) -> Result<Migrator> {
        for step in &self.steps {
            if step.floor >= step.ceiling {
                return Err(StoreError::Version(format!(
                    "empty migration range {}..{}",
                    step.floor, step.ceiling
                )));
            }
            if step.ceiling > self.latest {
                return Err(StoreError::Version(format!(
                    "migration range {}..{} goes beyond latest version {}",
                    step.floor, step.ceiling, self.latest
                )));
            }
        }
        for pair in self.steps.windows(2) {
            if pair[0].ceiling != pair[1].floor {
                return Err(StoreError::Version(format!(
                    "migration ranges {}..{} and {}..{} are not contiguous",
                    pair[0].floor, pair[0].ceiling, pair[1].floor, pair[1].ceiling
                )));
            }
        }

        Ok(Migrator {
            latest: self.latest,
            steps: self.steps,
            reinitialise: self.reinitialise,
        })
    }
}

/// A validated chain of upgrade steps ending at a latest version.
pub struct Migrator {
    latest: SchemaVersion,
    steps: Vec<Step>,
    reinitialise: Option<ReinitFn>,
}

impl fmt::Debug for Migrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ranges: Vec<String> = self
            .steps
            .iter()
            .map(|s| format!("{}..{}", s.floor, s.ceiling))
            .collect();
        f.debug_struct("Migrator")
            .field("latest", &self.latest)
            .field("steps", &ranges)
            .field("reinitialise", &self.reinitialise.is_some())
            .finish()
    }
}

impl Migrator {
    /// Starts a chain ending at `latest`.
    pub fn builder(latest: SchemaVersion) -> MigratorBuilder {
        MigratorBuilder {
            latest,
            steps: Vec::new(),
            reinitialise: None,
        }
    }

    /// The version upgrades converge to.
    pub fn latest(&self) -> SchemaVersion {
        self.latest
    }

    /// Checks the persisted version against the latest one.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Version`] if no version is persisted, if the
    /// persisted version is newer than the latest, or, when
    /// `raise_on_difference` is set, if it is older.
    pub fn is_latest(&self, db: &Database, raise_on_difference: bool) -> Result<bool> {
        let Some(current) = get_db_version(db) else {
            return Err(StoreError::Version("cannot detect database version".to_string()));
        };
        if current > self.latest {
            return Err(StoreError::Version(format!(
                "database version {current} is newer than the latest supported version {}",
                self.latest
            )));
        }
        if raise_on_difference && current < self.latest {
            return Err(StoreError::Version(format!(
                "database version {current} is older than the latest version {}",
                self.latest
            )));
        }
        Ok(current == self.latest)
    }

    /// Applies steps until the persisted version equals the latest one.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Version`] if the persisted version is missing,
    /// newer than the latest, or below the first step, and if a step does
    /// not move the version forward within range or does not persist the
    /// version it returns. Errors raised by a step
    /// are returned as is; work it did not commit stays pending.
    pub fn upgrade(&self, db: &Database) -> Result<()> {
        if self.is_latest(db, false)? {
            return Ok(());
        }

        loop {
            let Some(current) = get_db_version(db) else {
                return Err(StoreError::Version("cannot detect database version".to_string()));
            };
            if current == self.latest {
                return Ok(());
            }

            let next = self.apply_next(db, current)?;
            if next <= current || next > self.latest {
                return Err(StoreError::Version(format!(
                    "migration from {current} produced invalid version {next}"
                )));
            }
            let persisted = get_db_version(db);
            if persisted != Some(next) {
                let persisted = persisted.map_or_else(|| "nothing".to_string(), |v| v.to_string());
                return Err(StoreError::Version(format!(
                    "migration from {current} returned {next} but persisted {persisted}"
                )));
            }
            info!(from = %current, to = %next, "upgraded database");
        }
    }

    fn apply_next(&self, db: &Database, current: SchemaVersion) -> Result<SchemaVersion> {
        if let Some(first) = self.steps.first() {
            if current < first.floor {
                return Err(StoreError::Version(format!(
                    "database version {current} is older than the oldest upgradable version {}",
                    first.floor
                )));
            }
        }

        if let Some(step) = self
            .steps
            .iter()
            .find(|s| s.floor <= current && current < s.ceiling)
        {
            return (step.apply)(db);
        }

        if let Some(hook) = &self.reinitialise {
            hook(db)?;
        }
        set_db_version(db, self.latest)
    }
}

/// Reads the persisted version. Any failure, including a missing table,
/// yields `None`.
pub fn get_db_version(db: &Database) -> Option<SchemaVersion> {
    let raw: String = db
        .connection()
        .query_row(
            &format!("SELECT value FROM {METADATA_TABLE} WHERE key = 'version'"),
            [],
            |row| row.get(0),
        )
        .ok()?;
    serde_json::from_str::<String>(&raw).ok()?.parse().ok()
}

/// Persists `version` and commits.
pub fn set_db_version(db: &Database, version: SchemaVersion) -> Result<SchemaVersion> {
    db.execute(
        &format!("INSERT OR REPLACE INTO {METADATA_TABLE} (key, value) VALUES (?1, ?2)"),
        ("version", serde_json::to_string(&version.to_string())?),
    )?;
    db.commit()?;
    Ok(version)
}

/// Lower-cased column names of `table`, in declaration order.
pub fn table_columns(db: &Database, table: &str) -> Result<Vec<String>> {
    validate_identifier(table)?;
    let mut stmt = db
        .connection()
        .prepare(&format!("PRAGMA table_info({table})"))?;
    let columns = stmt
        .query_map([], |row| row.get::<_, String>("name"))?
        .map(|name| name.map(|n| n.to_lowercase()))
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(columns)
}
