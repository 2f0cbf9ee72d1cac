use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use imsg_rpc::{
    default_watcher, notifier_for, serve, AppState, NullMessageSender, StubContactDirectory,
    SubscriptionManager,
};
use imsg_store::{ChatCache, Store, StoreError};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "imsg-rpc")]
#[command(version)]
#[command(about = "Read-only JSON-RPC bridge to the macOS Messages database")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the JSON-RPC protocol over stdio
    Rpc {
        /// Path to the Messages database (default: $HOME/Library/Messages/chat.db)
        #[arg(long)]
        db: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Rpc { db } => run_rpc(db).await,
    }
}

fn default_db_path() -> Result<PathBuf> {
    let home = dirs::home_dir().context("could not determine home directory")?;
    Ok(home.join("Library/Messages/chat.db"))
}

async fn run_rpc(db: Option<PathBuf>) -> Result<()> {
    let db_path = match db {
        Some(path) => path,
        None => default_db_path()?,
    };

    info!(db_path = %db_path.display(), "opening Messages store");
    let store = match Store::open(&db_path) {
        Ok(store) => Arc::new(store),
        Err(err @ StoreError::PermissionDenied { .. }) => {
            error!("{err}");
            bail!(err);
        }
        Err(err) => {
            error!("{err}");
            bail!(err);
        }
    };

    let stdout = tokio::io::stdout();
    let stdin = tokio::io::stdin();

    let state = Arc::new(AppState {
        store,
        cache: Arc::new(ChatCache::new()),
        watcher: Arc::new(default_watcher()),
        subscriptions: Arc::new(SubscriptionManager::new()),
        sender: Arc::new(NullMessageSender::default()),
        contacts: Arc::new(StubContactDirectory::new(Vec::new())),
        writer: notifier_for(stdout),
    });

    serve(state, stdin).await;
    info!("input closed, shutting down");
    Ok(())
}
