//! TrashClick Server
//!
//! Serves the reporting API and uploaded images.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use trashclick::{Config, DynDatabase, PgStorage, ReferenceDb, TrashClick};

#[derive(Parser, Debug)]
#[command(name = "trashclick-server")]
#[command(about = "TrashClick reporting API server")]
#[command(version)]
struct Args {
    /// Path to the config file
    #[arg(long, short, default_value = "config.toml")]
    config: PathBuf,

    /// Keep all data in memory instead of PostgreSQL
    #[arg(long)]
    in_memory: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    info!("Starting TrashClick Server");

    let config = Config::load_from(&args.config)?;

    let db: DynDatabase = if args.in_memory {
        warn!("Using in-memory storage, data is lost on restart");
        Arc::new(ReferenceDb::new())
    } else {
        let storage = PgStorage::from_env(&config.database).await.map_err(|e| {
            error!("PostgreSQL is required unless --in-memory is given: {}", e);
            e
        })?;
        info!("PostgreSQL storage initialized");
        Arc::new(storage)
    };

    if config.setup_key().is_none() {
        warn!("No admin setup key configured, first admin setup is open to any caller");
    }

    let host = config.server.host.clone();
    let port = config.server.port;

    let service = TrashClick::new(db, config);
    service.media().ensure_bucket().await?;

    trashclick::server::run_server(&host, port, service).await?;

    Ok(())
}
