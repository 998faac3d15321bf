use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use clap_verbosity_flag::Verbosity;
use sqlx::sqlite::SqlitePoolOptions;
use strata::editor::sqlite::SqliteEditor;
use strata::registry::{AppDef, Registry};
use strata::store::MigrationStore;
use strata::MigrationEngine;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(flatten)]
    verbose: Verbosity,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Args)]
struct EngineArgs {
    /// Path to the JSON manifest describing the registered apps and
    /// models
    #[arg(long, default_value = "models.json")]
    models: PathBuf,
    /// Directory holding the migration files
    #[arg(long, default_value = "migrations")]
    dir: PathBuf,
    /// Database URL (only sqlite: URLs are supported by this tool)
    #[arg(long, env = "DATABASE_URL", default_value = "sqlite::memory:")]
    database: String,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Write migration files for every model with pending changes
    MakeMigrations {
        #[command(flatten)]
        engine: EngineArgs,
    },
    /// Apply all unapplied migrations to the database
    Migrate {
        #[command(flatten)]
        engine: EngineArgs,
    },
    /// List the models with pending changes without writing anything
    Check {
        #[command(flatten)]
        engine: EngineArgs,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(cli.verbose.tracing_level_filter().into()),
        )
        .finish()
        .init();

    match cli.command {
        Commands::MakeMigrations { engine } => {
            let engine = build_engine(&engine).await?;
            engine
                .make_migrations()
                .await
                .with_context(|| "unable to create migrations")?;
        }
        Commands::Migrate { engine } => {
            let engine = build_engine(&engine).await?;
            engine
                .migrate()
                .await
                .with_context(|| "unable to apply migrations")?;
        }
        Commands::Check { engine } => {
            let engine = build_engine(&engine).await?;
            let pending = engine
                .needs_to_migrate()
                .await
                .with_context(|| "unable to check for pending migrations")?;
            if pending.is_empty() {
                println!("no pending changes");
            } else {
                for identity in pending {
                    println!("{identity}");
                }
            }
        }
    }

    Ok(())
}

async fn build_engine(args: &EngineArgs) -> anyhow::Result<MigrationEngine> {
    let manifest = std::fs::read_to_string(&args.models)
        .with_context(|| format!("unable to read model manifest: {}", args.models.display()))?;
    let apps: Vec<AppDef> = serde_json::from_str(&manifest)
        .with_context(|| format!("unable to parse model manifest: {}", args.models.display()))?;

    let mut registry = Registry::new();
    for app in apps {
        registry.register_app(app);
    }

    if !args.database.starts_with("sqlite:") {
        bail!("unsupported database URL: {}", args.database);
    }
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect(&args.database)
        .await
        .with_context(|| format!("unable to connect to database: {}", args.database))?;

    Ok(MigrationEngine::new(
        registry,
        MigrationStore::new(&args.dir),
        Box::new(SqliteEditor::new(pool)),
    ))
}
