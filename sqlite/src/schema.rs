//! SQL schema generation for tables, indices and views.
//!
//! Generates `CREATE TABLE`, `CREATE INDEX`, `CREATE VIEW` and `DROP`
//! statements from column definitions. Every name spliced into a statement
//! must pass [`validate_identifier`]; values never appear in generated DDL.
//!
//! # Naming
//!
//! Index names are derived from the table: an index called `uuid` on table
//! `files` is created as `idx_files_uuid`.

use crate::column::ColumnSpec;
use crate::error::{Result, StoreError};

/// Validates that a name is a plain SQL identifier.
///
/// Accepts ASCII letters, digits and underscores, not starting with a digit.
pub(crate) fn validate_identifier(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid_start = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    if !valid_start || !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(StoreError::InvalidIdentifier(name.to_string()));
    }
    Ok(())
}

/// Options for `CREATE` statements.
///
/// # Examples
///
/// ```
/// use modelstore_sqlite::CreateOptions;
///
/// let options = CreateOptions::new().temporary().exist_ok();
/// assert!(options.temporary);
/// assert!(options.exist_ok);
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CreateOptions {
    /// Create a temporary relation, removed when the connection closes.
    pub temporary: bool,
    /// Do nothing if a relation with the same name exists.
    pub exist_ok: bool,
}

impl CreateOptions {
    /// Plain `CREATE` with no modifiers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the temporary modifier.
    pub fn temporary(mut self) -> Self {
        self.temporary = true;
        self
    }

    /// Adds `IF NOT EXISTS`.
    pub fn exist_ok(mut self) -> Self {
        self.exist_ok = true;
        self
    }
}

fn create_prefix(kind: &str, options: CreateOptions) -> String {
    let mut sql = String::from("CREATE ");
    if options.temporary {
        sql.push_str("TEMPORARY ");
    }
    sql.push_str(kind);
    if options.exist_ok {
        sql.push_str(" IF NOT EXISTS");
    }
    sql
}

/// Generates the `CREATE TABLE` statement for the given columns.
///
/// A composite `PRIMARY KEY` clause is appended when `primary_keys` is not
/// empty.
pub(crate) fn create_table_sql(
    name: &str,
    columns: &[ColumnSpec],
    primary_keys: &[ColumnSpec],
    options: CreateOptions,
) -> String {
    let mut definitions: Vec<String> = columns.iter().map(ColumnSpec::spec_sql).collect();
    if !primary_keys.is_empty() {
        definitions.push(format!("PRIMARY KEY ({})", column_list(primary_keys)));
    }
    format!(
        "{} {name} ({})",
        create_prefix("TABLE", options),
        definitions.join(", ")
    )
}

/// Generates one `CREATE INDEX` statement per index.
pub(crate) fn create_indices_sql(
    table: &str,
    indices: &[(String, Vec<ColumnSpec>)],
    exist_ok: bool,
) -> Vec<String> {
    let options = CreateOptions {
        temporary: false,
        exist_ok,
    };
    indices
        .iter()
        .map(|(index, columns)| {
            format!(
                "{} idx_{table}_{index} ON {table} ({})",
                create_prefix("INDEX", options),
                column_list(columns)
            )
        })
        .collect()
}

/// Generates the `CREATE VIEW` statement for a select body.
pub(crate) fn create_view_sql(name: &str, select: &str, options: CreateOptions) -> String {
    format!("{} {name} AS {}", create_prefix("VIEW", options), select.trim())
}

/// Generates a `DROP` statement for a table or view.
pub(crate) fn drop_sql(kind: &str, name: &str, missing_ok: bool) -> String {
    if missing_ok {
        format!("DROP {kind} IF EXISTS {name}")
    } else {
        format!("DROP {kind} {name}")
    }
}

fn column_list(columns: &[ColumnSpec]) -> String {
    columns
        .iter()
        .map(|c| c.name.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use modelstore_core::FieldType;

    fn column(name: &str, field_type: FieldType) -> ColumnSpec {
        ColumnSpec::from_field(name, &field_type).unwrap()
    }

    #[test]
    fn test_valid_identifiers() {
        assert!(validate_identifier("files").is_ok());
        assert!(validate_identifier("_tmp1").is_ok());
        assert!(validate_identifier("Files_Master").is_ok());
    }

    #[test]
    fn test_invalid_identifiers() {
        assert!(validate_identifier("").is_err());
        assert!(validate_identifier("1abc").is_err());
        assert!(validate_identifier("drop;--").is_err());
        assert!(validate_identifier("hello world").is_err());
        assert!(validate_identifier("a-b").is_err());
        assert!(validate_identifier("naïve").is_err());
    }

    #[test]
    fn test_create_table_with_composite_key() {
        let columns = vec![
            column("a", FieldType::INTEGER),
            column("b", FieldType::TEXT),
            column("c", FieldType::optional(FieldType::REAL)),
        ];
        let sql = create_table_sql("t", &columns, &columns[..2], CreateOptions::new());
        assert_eq!(
            sql,
            "CREATE TABLE t (a integer NOT NULL, b text NOT NULL, c real, PRIMARY KEY (a, b))"
        );
    }

    #[test]
    fn test_create_table_modifiers() {
        let columns = vec![column("a", FieldType::TEXT)];
        let sql = create_table_sql("t", &columns, &[], CreateOptions::new().temporary().exist_ok());
        assert_eq!(sql, "CREATE TEMPORARY TABLE IF NOT EXISTS t (a text NOT NULL)");
    }

    #[test]
    fn test_create_indices() {
        let indices = vec![(
            "uuid".to_string(),
            vec![column("file_uuid", FieldType::UUID), column("file_type", FieldType::TEXT)],
        )];
        assert_eq!(
            create_indices_sql("log", &indices, true),
            vec!["CREATE INDEX IF NOT EXISTS idx_log_uuid ON log (file_uuid, file_type)"]
        );
        assert_eq!(
            create_indices_sql("log", &indices, false),
            vec!["CREATE INDEX idx_log_uuid ON log (file_uuid, file_type)"]
        );
    }

    #[test]
    fn test_create_view_and_drop() {
        assert_eq!(
            create_view_sql("v", "  select * from t ", CreateOptions::new().exist_ok()),
            "CREATE VIEW IF NOT EXISTS v AS select * from t"
        );
        assert_eq!(drop_sql("TABLE", "t", true), "DROP TABLE IF EXISTS t");
        assert_eq!(drop_sql("VIEW", "v", false), "DROP VIEW v");
    }
}
