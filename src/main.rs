use agentdb::config::Config;
use agentdb::db::{Database, MigrationState, Migrator};
use clap::{Parser, Subcommand};
use mimalloc::MiMalloc;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

/// Schema installer for the agent database.
#[derive(Debug, Parser)]
#[command(name = "agentdb", version)]
struct Cli {
    /// Config file (defaults to ./agentdb.toml when present).
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Drop the schema before installing. Test environments only.
    #[arg(long)]
    reset: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Bootstrap the schema and apply pending migrations.
    Install,
    /// Run the down migrations.
    Drop,
    /// Print the migration state and the recorded migrations.
    Status,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let mut cfg = Config::load(cli.config.as_deref())?;
    cfg.database.reset |= cli.reset;

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cfg.basic.loglevel.clone()));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .compact()
                .with_level(true)
                .with_target(false),
        )
        .init();

    info!(
        dialect = %cfg.database.dialect,
        migrations_dir = %cfg.database.migrations_dir.display(),
        max_connections = cfg.database.max_connections,
        reset = cfg.database.reset,
        loglevel = %cfg.basic.loglevel,
    );

    let db = Database::connect(&cfg.database).await?;
    let migrator = Migrator::from_config(db.clone(), &cfg.database);

    match cli.command {
        Command::Install => {
            let report = migrator.install().await?;
            info!(
                bootstrapped = report.bootstrapped,
                applied = report.applied.len(),
                "Install finished"
            );
        }
        Command::Drop => {
            let dropped = migrator.drop_all().await?;
            info!(files = dropped.len(), "Drop finished");
        }
        Command::Status => {
            let state = migrator.state().await?;
            info!(?state, dir = %migrator.dir().display(), "Migration state");
            if state != MigrationState::Unbootstrapped {
                for record in migrator.applied().await? {
                    info!(
                        number = record.number,
                        name = %record.name,
                        applied_at = ?record.applied_at,
                        "Applied"
                    );
                }
            }
        }
    }

    db.close().await;
    Ok(())
}
