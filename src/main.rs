//! alyxraw-migrate CLI - cleanup and re-ingestion of raw Alyx records

use clap::{Parser, Subcommand, ValueEnum};
use indicatif::HumanDuration;
use std::path::{Path, PathBuf};
use std::time::Instant;
use alyxraw_migrate::cleanup::{delete_model, DeleteOptions, DeletePlan, DeleteReport};
use alyxraw_migrate::config::{self, MigrateConfig};
use alyxraw_migrate::dependents::alyxraw_module;
use alyxraw_migrate::{ui, BindingContext, DependencyGraph, DependentTables, RawIngestor, SqliteStore, TableHandle};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "alyxraw-migrate")]
#[command(version)]
#[command(about = "Dependency-aware cleanup and re-ingestion of raw Alyx exports")]
#[command(long_about = r#"
alyxraw-migrate maintains the AlyxRaw key-value tables of a pipeline database:
  • Ingest one model of an alyxfull.json export into AlyxRaw / AlyxRaw.Field
  • Delete previously ingested records together with everything downstream
  • List the tables that depend on any table, following foreign keys

Example usage:
  alyxraw-migrate init
  alyxraw-migrate ingest --model experiments.channel --replace
  alyxraw-migrate dependents --table ibl_alyxraw.alyx_raw
"#)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to the config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a starter config file
    Init {
        /// Overwrite an existing config
        #[arg(long)]
        force: bool,
    },

    /// Ingest the records of one model from an export
    Ingest {
        /// Export file (defaults to data/alyxfull.json)
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Model to ingest (defaults to experiments.channel)
        #[arg(short, long)]
        model: Option<String>,

        /// Delete earlier records of the model first
        #[arg(long)]
        replace: bool,

        /// Skip the confirmation prompt of --replace
        #[arg(long)]
        force: bool,

        /// Rows buffered per insert
        #[arg(long)]
        chunk_size: Option<usize>,
    },

    /// Delete the raw records of a model and everything downstream
    Delete {
        /// Model whose records are deleted
        #[arg(short, long)]
        model: String,

        /// Skip the confirmation prompt
        #[arg(long)]
        force: bool,
    },

    /// List the tables depending on a table
    Dependents {
        /// Table as schema.table
        #[arg(short, long)]
        table: String,

        /// Only tables without a package binding
        #[arg(long)]
        virtual_only: bool,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = Format::Text)]
        format: Format,
    },

    /// Show row counts of the raw tables and the dependency graph
    Stats,
}

#[derive(Clone, Copy, ValueEnum)]
enum Format {
    Text,
    Json,
}

fn main() {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    if let Err(e) = run(cli) {
        ui::error(&format!("{:#}", e));
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let config_path = cli.config.unwrap_or_else(config::default_config_path);
    let mut settings = match cli.command {
        Commands::Init { .. } => MigrateConfig::default(),
        _ => config::load_config(Some(&config_path))?.unwrap_or_default(),
    };

    match cli.command {
        Commands::Init { force } => {
            config::write_config(&config_path, &MigrateConfig::starter(), force)?;
            ui::success(&format!("Wrote {}", config_path.display()));
        }

        Commands::Ingest { input, model, replace, force, chunk_size } => {
            if model.is_some() {
                settings.model = model;
            }
            if chunk_size.is_some() {
                settings.chunk_size = chunk_size;
            }
            let input = input.unwrap_or_else(|| settings.input_path());
            let options = settings.ingest_options();
            let store = open_store(&settings)?;
            let schema = settings.raw_schema();

            ui::header(&format!("Ingesting {} from {}", options.model, input.display()));
            ui::info("Schema", schema);

            if replace {
                let opts = DeleteOptions { safemode: settings.safemode() && !force };
                let report = delete_model(&store, schema, &options.model, opts, confirm_delete)?;
                print_deleted(&report);
            }

            let started = Instant::now();
            let report = RawIngestor::new(&store, schema, options)
                .with_progress(ui::record_bar())
                .ingest_file(&input)?;

            println!("{}", ui::ingest_table(&report));
            ui::timing(&format!("Done in {}", HumanDuration(started.elapsed())));
        }

        Commands::Delete { model, force } => {
            let store = open_store(&settings)?;
            let opts = DeleteOptions { safemode: settings.safemode() && !force };

            ui::header(&format!("Deleting {} from {}", model, settings.raw_schema()));
            let report = delete_model(&store, settings.raw_schema(), &model, opts, confirm_delete)?;
            print_deleted(&report);
        }

        Commands::Dependents { table, virtual_only, format } => {
            let store = open_store(&settings)?;
            let root: TableHandle = table.parse()?;
            let mut ctx = BindingContext::new().with_module(alyxraw_module(settings.raw_schema()));

            let spinner = ui::Spinner::new("Loading dependency graph");
            let dependents = DependentTables::new(&store, root)?;
            spinner.finish_and_clear();

            let tables = dependents.table_list(&mut ctx, virtual_only)?;
            match format {
                Format::Json => println!("{}", serde_json::to_string_pretty(&tables)?),
                Format::Text => {
                    ui::section(&format!(" Dependents of {} ", dependents.root()));
                    for entry in &tables {
                        ui::dependent(entry);
                    }
                    println!();
                    ui::info("Tables", &tables.len().to_string());
                    ui::info("Virtual modules", &ctx.virtual_count().to_string());
                }
            }
        }

        Commands::Stats => {
            let store = open_store(&settings)?;
            let raw = store.raw_stats(settings.raw_schema())?;
            let graph = DependencyGraph::load(&store)?;

            ui::section(&format!(" {} ", raw.schema));
            if raw.models.is_empty() {
                println!("  {}", ui::dim("no raw records"));
            } else {
                println!("{}", ui::stats_table(&raw));
            }
            ui::section(" Dependency graph ");
            print!("{}", graph.stats());
        }
    }

    Ok(())
}

/// Open the main database and attach every configured schema, the raw
/// schema included, then make sure the raw tables exist
fn open_store(settings: &MigrateConfig) -> anyhow::Result<SqliteStore> {
    let db_path = settings.database_path();
    config::ensure_db_dir(&db_path)?;
    let store = SqliteStore::open(&db_path)?;

    for (schema, file) in &settings.schemas {
        let path = Path::new(file);
        config::ensure_db_dir(path)?;
        store.attach_schema(schema, Some(path))?;
    }

    let raw = settings.raw_schema();
    if !store.has_schema(raw)? {
        let path = db_path.with_file_name(format!("{}.db", raw));
        store.attach_schema(raw, Some(&path))?;
    }
    store.declare_alyxraw(raw)?;

    tracing::debug!("Opened {} with schemas {:?}", db_path.display(), store.schemas()?);
    Ok(store)
}

fn confirm_delete(plan: &DeletePlan) -> bool {
    ui::section(&format!(" About to delete {} rows ", plan.total_rows()));
    println!("{}", ui::plan_table(plan));

    let term = console::Term::stdout();
    if !term.is_term() {
        ui::warn("Not a terminal; refusing to delete without --force");
        return false;
    }
    print!("Proceed? [yes/No]: ");
    let _ = std::io::Write::flush(&mut std::io::stdout());
    match term.read_line() {
        Ok(answer) => answer.trim().eq_ignore_ascii_case("yes"),
        Err(e) => {
            tracing::warn!("Could not read answer: {}", e);
            false
        }
    }
}

fn print_deleted(report: &DeleteReport) {
    if report.deleted.is_empty() {
        println!("  {}", ui::dim("nothing to delete"));
        return;
    }
    for (table, rows) in &report.deleted {
        ui::deleted(&table.full_name(), *rows);
    }
    ui::success(&format!("Deleted {} rows", report.total_rows()));
}
