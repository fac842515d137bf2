//! Taskboard server
//!
//! REST service over task and user collections with self-healing
//! bidirectional assignment.

use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use taskboard::api;
use taskboard::cli::audit::{print_outcome, run_audit};
use taskboard::cli::{Cli, Command};
use taskboard::config::Config;
use taskboard::db::{Database, DocumentStore, MemoryStore};
use taskboard::logging::{self, LogTarget};
use taskboard::services::Services;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    logging::init(&LogTarget::parse(&cli.log), cli.verbose)?;

    let mut config = Config::discover(cli.config.as_deref())?;

    // Override from CLI arguments
    if let Some(db_path) = &cli.database {
        config.server.db_path = db_path.clone();
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }

    let store = open_store(&config, cli.memory)?;
    let services = Services::new(store, &config.query);

    match cli.command {
        Some(Command::Audit(args)) => {
            let outcome = run_audit(services.synchronizer(), &args)?;
            print_outcome(&outcome, std::io::stdout().lock())?;
            if !outcome.is_consistent() {
                std::process::exit(1);
            }
        }
        Some(Command::Serve) | None => {
            let handle = api::start_server(services, &config.server.bind, config.server.port).await?;
            tokio::signal::ctrl_c().await?;
            info!("Received shutdown signal");
            handle.shutdown().await;
        }
    }

    Ok(())
}

fn open_store(config: &Config, memory: bool) -> Result<Arc<dyn DocumentStore>> {
    if memory {
        info!("Using in-memory store");
        return Ok(Arc::new(MemoryStore::new()));
    }

    config.ensure_db_dir()?;
    let db = Database::open(&config.server.db_path)?;
    info!(path = %config.server.db_path.display(), "Opened database");
    Ok(Arc::new(db))
}
