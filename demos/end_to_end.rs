//! Typed table, view, key-value store and query language walkthrough.
//!
//! # Usage
//!
//! ```bash
//! cargo run -p modelstore-demos --example end_to_end
//! ```

use modelstore_core::{FieldType, Model, RecordSchema};
use modelstore_sqlite::{
    CreateOptions, Database, FieldMap, Filter, OnExists, Order, Relation, SelectOptions, Table,
    tokenize, tokens_to_where,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct File {
    uuid: Uuid,
    relative_path: String,
    size: i64,
    puid: Option<String>,
    warning: Option<Vec<String>>,
}

impl Model for File {
    fn schema() -> RecordSchema {
        RecordSchema::new("File")
            .field("uuid", FieldType::UUID)
            .field("relative_path", FieldType::PATH)
            .field("size", FieldType::INTEGER)
            .field("puid", FieldType::optional(FieldType::TEXT))
            .field("warning", FieldType::optional(FieldType::array(FieldType::TEXT)))
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct PuidCount {
    puid: Option<String>,
    count: i64,
}

impl Model for PuidCount {
    fn schema() -> RecordSchema {
        RecordSchema::new("PuidCount")
            .field("puid", FieldType::optional(FieldType::TEXT))
            .field("count", FieldType::INTEGER)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Settings {
    root: String,
    checksum: bool,
}

impl Model for Settings {
    fn schema() -> RecordSchema {
        RecordSchema::new("Settings")
            .field("root", FieldType::PATH)
            .field("checksum", FieldType::BOOLEAN)
    }
}

fn file(path: &str, size: i64, puid: Option<&str>) -> File {
    File {
        uuid: Uuid::new_v4(),
        relative_path: path.to_string(),
        size,
        puid: puid.map(str::to_string),
        warning: None,
    }
}

fn main() {
    let db = Database::open_in_memory().unwrap();

    // === Table ===
    println!("=== Table ===");
    let files = Table::<File>::builder(&db, "files")
        .primary_key("uuid")
        .index("puid", ["puid"])
        .build()
        .unwrap();
    println!("{}", files.create_sql(CreateOptions::new()));
    for sql in files.indices_sql(false) {
        println!("{sql}");
    }
    files.create(CreateOptions::new()).unwrap();

    let mut unknown = file("data/blob.bin", 512, None);
    unknown.warning = Some(vec!["no match".to_string()]);
    let inserted = files
        .insert(
            &[
                file("docs/report.pdf", 2048, Some("fmt/276")),
                file("docs/scan.pdf", 4096, Some("fmt/276")),
                file("docs/notes.txt", 128, Some("x-fmt/111")),
                unknown.clone(),
            ],
            OnExists::Error,
        )
        .unwrap();
    println!("inserted {inserted} rows, {} uncommitted", db.uncommitted_changes().unwrap());
    db.commit().unwrap();

    let pdfs = files
        .select(
            Filter::fields(FieldMap::new().with("puid", json!("fmt/276"))),
            SelectOptions::new().order_by("size", Order::Desc),
        )
        .unwrap()
        .fetch_all()
        .unwrap();
    for pdf in &pdfs {
        println!("  {} ({} bytes)", pdf.relative_path, pdf.size);
    }

    unknown.puid = Some("fmt/1000".to_string());
    unknown.warning = None;
    files.update(&unknown).unwrap();
    db.commit().unwrap();

    // === View ===
    println!("\n=== View ===");
    let counts = db
        .create_view::<PuidCount>(
            "puid_count",
            "SELECT puid, count(*) AS count FROM files GROUP BY puid",
        )
        .unwrap();
    let mut cursor = counts
        .select(Filter::All, SelectOptions::new().order_by("count", Order::Desc))
        .unwrap();
    for row in cursor.iter().unwrap() {
        let row = row.unwrap();
        println!("  {:<10} {}", row.puid.unwrap_or_default(), row.count);
    }
    if let Err(err) = counts.delete(Filter::All) {
        println!("  writes are rejected: {err}");
    }

    // === Query language ===
    println!("\n=== Query language ===");
    let query = "@puid @like fmt/% @not fmt/1000";
    let tokens = tokenize(query, "relative_path", &["relative_path", "puid"]).unwrap();
    let clause = tokens_to_where(&tokens);
    println!("{query:?} -> {}", clause.sql);
    let matches = files.count(clause.into(), SelectOptions::new()).unwrap();
    println!("  {matches} matching files");

    // === Key-value store ===
    println!("\n=== Key-value store ===");
    let settings = db.create_keys_table::<Settings>("settings").unwrap();
    settings
        .set(&Settings {
            root: "/archive".to_string(),
            checksum: false,
        })
        .unwrap();
    settings.set_field("checksum", json!(true)).unwrap();
    db.commit().unwrap();
    println!("  {:?}", settings.get().unwrap());
    if let Err(err) = settings.set_field("colour", json!("red")) {
        println!("  {err}");
    }

    // === Cleanup ===
    let removed = files
        .delete(Filter::raw("size < ?", vec![1024.into()]))
        .unwrap();
    db.commit().unwrap();
    println!("\nremoved {removed} small files, {} left", files.len().unwrap());
}
