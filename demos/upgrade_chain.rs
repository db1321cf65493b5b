//! Schema upgrade chain example.
//!
//! Builds a store at version 1.0.0, then upgrades it through two explicit
//! steps and a reinitialisation to the latest version.
//!
//! # Usage
//!
//! ```bash
//! cargo run -p modelstore-demos --example upgrade_chain
//! ```

use modelstore_core::SchemaVersion;
use modelstore_sqlite::migration::{get_db_version, set_db_version, table_columns};
use modelstore_sqlite::{Database, Migrator};

const LATEST: SchemaVersion = SchemaVersion::new(3, 1, 0);

fn migrator() -> Migrator {
    Migrator::builder(LATEST)
        .step(
            SchemaVersion::new(1, 0, 0),
            SchemaVersion::new(2, 0, 0),
            |db| {
                db.execute_batch("ALTER TABLE files ADD COLUMN puid text")?;
                set_db_version(db, SchemaVersion::new(2, 0, 0))
            },
        )
        .step(
            SchemaVersion::new(2, 0, 0),
            SchemaVersion::new(3, 0, 0),
            |db| {
                db.execute_batch(
                    "ALTER TABLE files RENAME COLUMN path TO relative_path;
                     CREATE INDEX IF NOT EXISTS idx_files_puid ON files (puid);",
                )?;
                set_db_version(db, SchemaVersion::new(3, 0, 0))
            },
        )
        .reinitialise(|db| {
            db.execute_batch(
                "CREATE VIEW IF NOT EXISTS unidentified AS
                 SELECT relative_path FROM files WHERE puid IS NULL",
            )
        })
        .build()
        .unwrap()
}

fn main() {
    let db = Database::open_in_memory().unwrap();
    db.execute_batch(
        "CREATE TABLE files (path text NOT NULL);
         INSERT INTO files VALUES ('a.pdf'), ('b.txt');",
    )
    .unwrap();
    db.init_metadata(SchemaVersion::new(1, 0, 0)).unwrap();

    let migrator = migrator();
    println!("{migrator:?}");
    println!("before: {:?}", get_db_version(&db));
    println!("  columns: {:?}", table_columns(&db, "files").unwrap());
    println!("  latest: {}", migrator.is_latest(&db, false).unwrap());

    db.upgrade(&migrator).unwrap();

    println!("after: {:?}", get_db_version(&db));
    println!("  columns: {:?}", table_columns(&db, "files").unwrap());
    println!("  views: {:?}", db.views().unwrap());
    println!("  latest: {}", migrator.is_latest(&db, true).unwrap());

    // a second upgrade is a no-op
    db.upgrade(&migrator).unwrap();
    assert_eq!(db.version().unwrap(), LATEST);
}
