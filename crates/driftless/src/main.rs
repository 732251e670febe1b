//! driftless CLI
//!
//! Command-line tool for reconciling a SQLite database with model
//! declarations and managing the generated migrations.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use driftless::config::{DEFAULT_DATABASE_URL, DEFAULT_MIGRATIONS_DIR};
use driftless::differ::FieldPlan;
use driftless::model::load_manifest;
use driftless::prelude::*;
use driftless_query::{replay_condition, SqlBuilder, SqlValue};

/// Keep SQLite tables in line with declared models.
#[derive(Parser)]
#[command(name = "driftless")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Database URL (SQLite path or connection string).
    #[arg(short, long, env = "DATABASE_URL", default_value = DEFAULT_DATABASE_URL)]
    database: String,

    /// Migrations directory.
    #[arg(short, long, env = "DRIFTLESS_MIGRATIONS_DIR", default_value = DEFAULT_MIGRATIONS_DIR)]
    migrations_dir: PathBuf,

    /// JSON model manifest.
    #[arg(long, env = "DRIFTLESS_MODELS")]
    models: Option<PathBuf>,

    /// Enable verbose output (also `DRIFTLESS_LOG_SQL=1`).
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the migration ledger table.
    Init,

    /// Reconcile every model with its table.
    Reconcile,

    /// Show what reconciliation would change, without changing anything.
    Plan,

    /// Reconcile and fail if any table needs a manual migration.
    Check,

    /// Apply pending migrations from the migrations directory.
    Migrate {
        /// Show SQL without executing (dry run).
        #[arg(long)]
        dry_run: bool,
    },

    /// Roll back the most recently applied migrations.
    Rollback {
        /// Number of migrations to roll back.
        #[arg(short, long, default_value_t = 1)]
        count: usize,

        /// Show SQL without executing (dry run).
        #[arg(long)]
        dry_run: bool,
    },

    /// Show migration status.
    ShowMigrations,

    /// Replay a query AST against a table and count the matching rows.
    Where {
        /// Table to query.
        #[arg(short, long)]
        table: String,

        /// JSON AST, e.g. '["c", ["c", "ident", "age"], ">", 18]'.
        ast: String,
    },
}

fn load_registry(models: Option<&Path>) -> anyhow::Result<Arc<ModelRegistry>> {
    let Some(path) = models else {
        bail!("--models (or DRIFTLESS_MODELS) is required for this command");
    };
    let registry = Arc::new(ModelRegistry::new());
    for model in load_manifest(path)? {
        registry.register(model);
    }
    info!(models = registry.len(), path = %path.display(), "Loaded model manifest");
    Ok(registry)
}

fn print_report(report: &ReconcileReport) {
    for table in &report.created_tables {
        println!(" + created table {table}");
    }
    for version in &report.pending_applied {
        println!(" > applied pending migration {version}");
    }
    for outcome in &report.tables {
        match outcome {
            TableOutcome::Reconciled {
                table,
                migrations,
                indexes,
            } => {
                for name in migrations {
                    println!(" * {table}: {name}");
                }
                for name in &indexes.dropped {
                    println!(" - {table}: index {name}");
                }
                for name in &indexes.created {
                    println!(" + {table}: index {name}");
                }
            }
            TableOutcome::Unreconcilable {
                table,
                orphans,
                new_fields,
            } => {
                println!(" ! {table}: needs a manual migration (orphans {orphans:?}, new fields {new_fields:?})");
            }
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let log_sql = std::env::var("DRIFTLESS_LOG_SQL").is_ok_and(|v| v == "1");
    let log_level = if cli.verbose || log_sql {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .without_time()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = DatabaseConfig::new(cli.database.clone())
        .migrations_dir(cli.migrations_dir.clone())
        .auto_reconcile(false);

    match cli.command {
        Commands::Init => {
            let db = Database::new(config, Arc::new(ModelRegistry::new()));
            info!("Initializing migrations system...");
            db.ledger().await?;
            std::fs::create_dir_all(&cli.migrations_dir)?;
            info!(dir = %cli.migrations_dir.display(), "Migrations table created successfully.");
        }

        Commands::Reconcile => {
            let db = Database::new(config, load_registry(cli.models.as_deref())?);
            let report = db.reconcile().await?;
            print_report(&report);
            if !report.unreconcilable().is_empty() {
                warn!(
                    tables = report.unreconcilable().len(),
                    "Some tables need a manual migration"
                );
            }
        }

        Commands::Plan => {
            let db = Database::new(config, load_registry(cli.models.as_deref())?);
            for plan in db.plan().await? {
                println!("{}:", plan.table);
                if plan.create_table {
                    println!("   create table");
                }
                match &plan.fields {
                    FieldPlan::Unreconcilable {
                        orphans,
                        new_fields,
                    } => {
                        println!("   needs a manual migration (orphans {orphans:?}, new fields {new_fields:?})");
                    }
                    FieldPlan::Reconcilable { migrations, .. } => {
                        for migration in migrations {
                            println!("   migration {}", migration.name);
                            for step in &migration.up {
                                println!("     {}", step.operation.description());
                            }
                        }
                    }
                }
                for operation in &plan.indexes {
                    println!("   {}", operation.description());
                }
            }
        }

        Commands::Check => {
            let db = Database::new(config, load_registry(cli.models.as_deref())?);
            let report = db.reconcile().await?;
            print_report(&report);
            report.ensure_reconciled()?;
            info!("All tables match their models.");
        }

        Commands::Migrate { dry_run } => {
            let db = Database::new(config, Arc::new(ModelRegistry::new()));
            db.ledger().await?;
            let pool = db.raw_pool().await?.clone();
            let executor = MigrationExecutor::new(pool, SqliteDialect::new()).dry_run(dry_run);

            if dry_run {
                info!("Dry run mode - SQL will be printed but not executed.");
            }

            let migrations = db.writer().list()?;
            if migrations.is_empty() {
                info!("No migrations discovered.");
            }
            let applied = executor.run_pending(&migrations).await?;
            info!(count = applied.len(), "Applied pending migrations");
        }

        Commands::Rollback { count, dry_run } => {
            let db = Database::new(config, Arc::new(ModelRegistry::new()));
            db.ledger().await?;
            let pool = db.raw_pool().await?.clone();
            let executor = MigrationExecutor::new(pool, SqliteDialect::new()).dry_run(dry_run);
            let rolled_back = executor.rollback(count, db.writer()).await?;
            for version in &rolled_back {
                info!(version = version, "Rolled back migration");
            }
        }

        Commands::ShowMigrations => {
            let db = Database::new(config, Arc::new(ModelRegistry::new()));
            let ledger = db.ledger().await?;
            let applied = ledger.applied().await?;
            let migrations = db.writer().list()?;

            if migrations.is_empty() && applied.is_empty() {
                info!("No migrations found.");
            } else {
                println!("\nMigrations:");
                println!("{:-<60}", "");
                for migration in &migrations {
                    match applied.iter().find(|a| a.version == migration.version) {
                        Some(record) => println!(
                            " [X] {} ({})",
                            migration.id(),
                            record.applied_at.format("%Y-%m-%d %H:%M:%S")
                        ),
                        None => println!(" [ ] {}", migration.id()),
                    }
                }
                for record in &applied {
                    if !migrations.iter().any(|m| m.version == record.version) {
                        println!(" [?] {}_{} (artifact missing)", record.version, record.name);
                    }
                }
                println!();
            }
        }

        Commands::Where { table, ast } => {
            let ast: serde_json::Value =
                serde_json::from_str(&ast).context("query AST is not valid JSON")?;
            let db = Database::new(config, Arc::new(ModelRegistry::new()));
            let pool = db.raw_pool().await?;
            let introspector = SqliteIntrospector::new(pool.clone());
            let columns = introspector.schema(&table).await?;
            if columns.is_empty() {
                return Err(MigrateError::TableNotFound(table).into());
            }

            let mut builder = SqlBuilder::with_columns(columns.into_iter().map(|c| c.name));
            let condition = replay_condition(&ast, &mut builder)?;
            println!("WHERE {}", condition.to_sql_inline());

            let sql = format!(
                "SELECT COUNT(*) FROM {} WHERE {}",
                SqliteDialect::new().quote_identifier(&table),
                condition.sql()
            );
            let (_, params) = condition.build();
            let mut query = sqlx::query_scalar::<_, i64>(&sql);
            for param in params {
                query = match param {
                    SqlValue::Null => query.bind(None::<String>),
                    SqlValue::Bool(b) => query.bind(b),
                    SqlValue::Int(n) => query.bind(n),
                    SqlValue::Float(f) => query.bind(f),
                    SqlValue::Text(s) => query.bind(s),
                };
            }
            let count = query.fetch_one(pool).await?;
            println!("{count} matching row(s)");
        }
    }

    Ok(())
}
