use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand};
use modelstore_core::{RecordSchema, SchemaVersion};
use modelstore_sqlite::{
    Database, DatabaseConfig, Migrator, Order, Relation, SelectOptions, Table, tokenize,
    tokens_to_where,
};
use serde_json::{Map, Value};

type Row = Map<String, Value>;

/// Output format for query results.
#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum CliOutputFormat {
    /// One JSON object per line.
    Json,
    /// A YAML sequence.
    Yaml,
}

#[derive(Debug, Parser)]
#[command(name = "modelstore")]
#[command(about = "Inspect and query modelstore SQLite files")]
struct Cli {
    /// YAML connection settings.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List the tables and views of a store.
    Tables(TablesArgs),
    /// Print the schema version of a store.
    Version(VersionArgs),
    /// Create the metadata table and record a schema version.
    Init(InitArgs),
    /// Select rows from a table or view with the query language.
    Query(QueryArgs),
}

#[derive(Debug, Args)]
struct TablesArgs {
    /// Store file path.
    db: PathBuf,
}

#[derive(Debug, Args)]
struct VersionArgs {
    /// Store file path.
    db: PathBuf,
    /// Fail unless the store is at exactly this version.
    #[arg(long)]
    check: Option<SchemaVersion>,
}

#[derive(Debug, Args)]
struct InitArgs {
    /// Store file path.
    db: PathBuf,
    /// Version to record if none is present.
    #[arg(long)]
    version: SchemaVersion,
}

#[derive(Debug, Args)]
struct QueryArgs {
    /// Store file path.
    db: PathBuf,
    /// Table or view to read.
    relation: String,
    /// Query string; selects every row when omitted.
    #[arg(default_value = "")]
    query: String,
    /// Field compared by tokens before the first `@field`.
    #[arg(long)]
    field: Option<String>,
    /// Column to sort by.
    #[arg(long)]
    order_by: Option<String>,
    /// Sort descending.
    #[arg(long, requires = "order_by")]
    desc: bool,
    /// Maximum number of rows.
    #[arg(long)]
    limit: Option<u64>,
    /// Rows to skip.
    #[arg(long)]
    offset: Option<u64>,
    /// Print the number of matching rows instead of the rows.
    #[arg(long)]
    count: bool,
    /// Output format.
    #[arg(long, default_value = "json")]
    format: CliOutputFormat,
}

fn main() {
    let cli = Cli::parse();

    let result = load_config(cli.config.as_ref()).and_then(|config| match cli.command {
        Command::Tables(args) => run_tables(args, &config),
        Command::Version(args) => run_version(args, &config),
        Command::Init(args) => run_init(args, &config),
        Command::Query(args) => run_query(args, &config),
    });

    if let Err(err) = result {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn load_config(path: Option<&PathBuf>) -> Result<DatabaseConfig, String> {
    match path {
        Some(path) => DatabaseConfig::load(path)
            .map_err(|err| format!("Failed to load config '{}': {err}", path.display())),
        None => Ok(DatabaseConfig::default()),
    }
}

fn open_read_only(path: &Path, config: &DatabaseConfig) -> Result<Database, String> {
    if !path.is_file() {
        return Err(format!("Database file not found: {}", path.display()));
    }
    Database::open(path, &config.clone().read_only()).map_err(|err| err.to_string())
}

fn run_tables(args: TablesArgs, config: &DatabaseConfig) -> Result<(), String> {
    let db = open_read_only(&args.db, config)?;
    for table in db.tables().map_err(|err| err.to_string())? {
        println!("table\t{table}");
    }
    for view in db.views().map_err(|err| err.to_string())? {
        println!("view\t{view}");
    }
    Ok(())
}

fn run_version(args: VersionArgs, config: &DatabaseConfig) -> Result<(), String> {
    let db = open_read_only(&args.db, config)?;
    let version = db.version().map_err(|err| err.to_string())?;
    println!("{version}");

    if let Some(expected) = args.check {
        let migrator = Migrator::builder(expected)
            .build()
            .map_err(|err| err.to_string())?;
        migrator
            .is_latest(&db, true)
            .map_err(|err| err.to_string())?;
    }
    Ok(())
}

fn run_init(args: InitArgs, config: &DatabaseConfig) -> Result<(), String> {
    if config.read_only {
        return Err("Cannot initialise a store with a read-only configuration".to_string());
    }
    let db = Database::open(&args.db, config).map_err(|err| err.to_string())?;
    db.init_metadata(args.version)
        .map_err(|err| err.to_string())?;
    let version = db.version().map_err(|err| err.to_string())?;
    println!("Initialised {} at version {version}", args.db.display());
    Ok(())
}

fn run_query(args: QueryArgs, config: &DatabaseConfig) -> Result<(), String> {
    let db = open_read_only(&args.db, config)?;

    let known = db
        .tables()
        .and_then(|mut tables| {
            tables.extend(db.views()?);
            Ok(tables)
        })
        .map_err(|err| err.to_string())?;
    if !known.contains(&args.relation) {
        return Err(format!("No table or view named '{}'", args.relation));
    }

    let schema = relation_schema(&db, &args.relation)?;
    let fields: Vec<&str> = schema.field_names().collect();
    let default_field = match &args.field {
        Some(field) => field.clone(),
        None => fields
            .first()
            .map(|f| f.to_string())
            .ok_or_else(|| format!("'{}' has no columns", args.relation))?,
    };
    if !fields.contains(&default_field.as_str()) {
        return Err(format!("'{}' has no column '{default_field}'", args.relation));
    }

    let tokens = tokenize(&args.query, &default_field, &fields).map_err(|err| err.to_string())?;
    let clause = tokens_to_where(&tokens);

    let relation = Table::<Row>::builder_with_schema(&db, args.relation.clone(), schema.clone())
        .build()
        .map_err(|err| err.to_string())?;

    let mut options = SelectOptions::new();
    if let Some(column) = args.order_by {
        let order = if args.desc { Order::Desc } else { Order::Asc };
        options = options.order_by(column, order);
    }
    if let Some(limit) = args.limit {
        options = options.limit(limit);
    }
    if let Some(offset) = args.offset {
        options = options.offset(offset);
    }

    if args.count {
        let count = relation
            .count(clause.into(), options)
            .map_err(|err| err.to_string())?;
        println!("{count}");
        return Ok(());
    }

    let rows = relation
        .select(clause.into(), options)
        .and_then(|cursor| cursor.fetch_all())
        .map_err(|err| err.to_string())?;

    match args.format {
        CliOutputFormat::Json => {
            for row in &rows {
                let line = serde_json::to_string(row)
                    .map_err(|err| format!("Failed to serialize row: {err}"))?;
                println!("{line}");
            }
        }
        CliOutputFormat::Yaml => {
            let yaml = serde_yaml::to_string(&rows)
                .map_err(|err| format!("Failed to serialize rows: {err}"))?;
            print!("{yaml}");
        }
    }
    Ok(())
}

/// Describes a relation from its declared column types.
fn relation_schema(db: &Database, relation: &str) -> Result<RecordSchema, String> {
    let mut stmt = db
        .connection()
        .prepare(&format!("PRAGMA table_info({relation})"))
        .map_err(|err| err.to_string())?;
    let columns = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, String>("name")?,
                row.get::<_, Option<String>>("type")?.unwrap_or_default(),
                row.get::<_, i64>("notnull")? != 0,
            ))
        })
        .and_then(|rows| rows.collect::<Result<Vec<_>, _>>())
        .map_err(|err| err.to_string())?;

    Ok(RecordSchema::from_declared_types(
        relation,
        columns
            .iter()
            .map(|(name, declared, not_null)| (name.as_str(), declared.as_str(), *not_null)),
    ))
}
