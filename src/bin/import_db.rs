use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use sqlx::postgres::PgPoolOptions;

use fleet_import::config::{ImportConfig, StoreBackend, StoreConfig};
use fleet_import::import::{BulkImporter, EmbeddedDatabase, ImportJob, resolve_import_order};
use fleet_import::routes::helpers::split_list;
use fleet_import::store::{MemoryStore, PgStore, TargetStore, build_store};

#[derive(Parser, Debug)]
#[command(
    name = "import_db",
    about = "Import a legacy fleet SQLite database into the target store"
)]
struct Args {
    /// Path to the .db, .sqlite or .sqlite3 file.
    file: PathBuf,

    /// Comma-separated source tables to import (defaults to every mapped table present).
    #[arg(long)]
    tables: Option<String>,

    /// List discovered tables and their mappings, then exit.
    #[arg(long)]
    list: bool,

    /// Run the full pipeline against an in-memory store instead of the configured one.
    #[arg(long)]
    dry_run: bool,

    /// Rows per insert request.
    #[arg(long)]
    batch_size: Option<usize>,

    /// JSON mapping document replacing the built-in mappings.
    #[arg(long)]
    mappings: Option<PathBuf>,

    /// Store backend (`memory`, `rest` or `postgres`); overrides FLEET_STORE_BACKEND.
    #[arg(long)]
    store: Option<StoreBackend>,

    /// Store URL; overrides FLEET_STORE_URL.
    #[arg(long)]
    url: Option<String>,
}

async fn connect_store(config: &StoreConfig) -> Result<Arc<dyn TargetStore>, Box<dyn std::error::Error>> {
    match config.backend {
        StoreBackend::Postgres => {
            let url = config
                .url
                .clone()
                .or_else(|| std::env::var("DATABASE_URL").ok())
                .ok_or("the postgres store needs --url, FLEET_STORE_URL or DATABASE_URL")?;
            let pool = PgPoolOptions::new().max_connections(5).connect(&url).await?;
            if config.run_migrations {
                fleet_import::db::run_migrations(&pool).await?;
            }
            Ok(Arc::new(PgStore::new(pool)))
        }
        _ => Ok(build_store(config)?),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp(None)
        .init();

    let args = Args::parse();

    let mut import_config = ImportConfig::from_env();
    if let Some(batch_size) = args.batch_size {
        import_config.batch_size = batch_size.max(1);
    }
    if args.mappings.is_some() {
        import_config.mappings_path = args.mappings.clone();
    }
    let registry = Arc::new(fleet_import::load_registry(&import_config)?);

    let path = args.file.clone();
    let database = tokio::task::spawn_blocking(move || EmbeddedDatabase::open(&path)).await??;

    if args.list {
        for table in database.tables() {
            let target = registry
                .get(&table.name)
                .map(|mapping| mapping.target_table.as_str())
                .unwrap_or("(unmapped)");
            writeln!(io::stdout(), "{:<20} {:>8} rows -> {}", table.name, table.row_count, target)?;
        }
        return Ok(());
    }

    let selected: Vec<String> = match &args.tables {
        Some(list) => split_list(list),
        None => database
            .tables()
            .iter()
            .filter(|table| registry.get(&table.name).is_some())
            .map(|table| table.name.clone())
            .collect(),
    };
    if selected.is_empty() {
        writeln!(io::stderr(), "error: no mapped tables to import")?;
        std::process::exit(1);
    }

    let order = resolve_import_order(&registry, &selected);
    log::info!("import order: {}", order.tables.join(" -> "));

    let mut store_config = StoreConfig::from_env();
    if let Some(backend) = args.store {
        store_config.backend = backend;
    }
    if args.url.is_some() {
        store_config.url = args.url.clone();
    }
    let store: Arc<dyn TargetStore> = if args.dry_run {
        Arc::new(MemoryStore::new())
    } else {
        connect_store(&store_config).await?
    };

    let importer = BulkImporter::new(store, Arc::clone(&registry)).with_batch_size(import_config.batch_size);
    let job = ImportJob::new();
    let result = importer.run(Arc::new(database), &selected, &job).await;

    writeln!(io::stdout(), "{}", serde_json::to_string_pretty(&result)?)?;

    if !result.success {
        writeln!(io::stderr(), "error: {}", result.message)?;
        std::process::exit(1);
    }

    Ok(())
}
