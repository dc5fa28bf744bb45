use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use timetable_api::config::{Config, StorageBackend};
use timetable_api::storage::{InMemoryStorage, SqliteStorage, Storage};
use timetable_api::{logging, metrics, server};
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "timetable")]
#[command(about = "University timetable management API")]
#[command(version)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP API
    Serve {
        /// Override the configured listen port
        #[arg(long)]
        port: Option<u16>,
        /// Keep everything in memory (nothing is persisted)
        #[arg(long)]
        in_memory: bool,
    },
    /// Create or upgrade the SQLite schema and exit
    Migrate,
    /// Print every API route
    Routes,
}

fn open_storage(config: &Config, in_memory: bool) -> anyhow::Result<Arc<dyn Storage>> {
    if in_memory || config.database.backend == StorageBackend::Memory {
        warn!("Using in-memory storage; data is lost on exit");
        return Ok(Arc::new(InMemoryStorage::new()));
    }
    Ok(Arc::new(SqliteStorage::open(&config.database.path)?))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;
    let _guard = logging::init_logging(&config.logging);

    match cli.command {
        Commands::Serve { port, in_memory } => {
            if let Some(metrics_port) = config.metrics.port {
                metrics::init_metrics(&config.metrics.host, metrics_port);
            }
            let storage = open_storage(&config, in_memory)?;
            let port = port.unwrap_or(config.server.port);
            server::start_server(storage, &config.server.host, port).await?;
        }
        Commands::Migrate => {
            SqliteStorage::open(&config.database.path)?;
            info!(
                "Database schema is up to date at {}",
                config.database.path.display()
            );
        }
        Commands::Routes => {
            for (method, path) in server::route_table() {
                println!("{method:<7} {path}");
            }
        }
    }
    Ok(())
}
