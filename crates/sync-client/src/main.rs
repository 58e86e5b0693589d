//! tasksync: command-line client for an offline-first task list.
//!
//! Every command works on the local replica first. One-shot commands save
//! and try a single push before exiting; `run` keeps the autosave, push and
//! pull timers going until Ctrl+C.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use tasksync_client::{ClientConfig, HttpTransport, Scheduler, SyncClient};
use tasksync_core::{CollectionId, Item, ItemId, SyncEvent, UserId};

#[derive(Parser, Debug)]
#[command(name = "tasksync")]
#[command(about = "Offline-first task list with server sync")]
struct Args {
    /// User identifier (partition key on the server)
    #[arg(short, long, env = "TASKSYNC_USER")]
    user: UserId,

    /// Sync server base URL (overrides the config file)
    #[arg(long, env = "TASKSYNC_SERVER")]
    server: Option<String>,

    /// Directory for the local data file (overrides the config file)
    #[arg(long, env = "TASKSYNC_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Path to a JSON config file
    #[arg(long, env = "TASKSYNC_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Keep syncing in the background until Ctrl+C
    Run,
    /// Show items, grouped by collection
    List,
    /// Add an item
    Add {
        title: String,
        /// Name of the collection to add the item to
        #[arg(short, long)]
        collection: Option<String>,
    },
    /// Mark an item completed
    Complete { id: String },
    /// Mark an item not completed
    Reopen { id: String },
    /// Change an item's title
    Rename { id: String, title: String },
    /// Delete an item
    Delete { id: String },
    /// List collections
    Collections,
    /// Create a collection
    NewCollection { name: String },
    /// Push local changes, then pull the server state
    Sync,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // RUST_LOG wins; otherwise warn for one-shot commands, info for run
    let default_filter = match (args.verbose, &args.command) {
        (true, _) => "debug,tasksync_client=debug",
        (false, Command::Run) => "info,tasksync_client=info",
        (false, _) => "warn",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut config = match &args.config {
        Some(path) => ClientConfig::load(path)?,
        None => ClientConfig::default(),
    };
    if let Some(server) = args.server {
        config.server_url = server;
    }
    if let Some(dir) = args.data_dir {
        config.data_dir = dir;
    }

    let transport = HttpTransport::new(
        &config.server_url,
        config.connect_timeout(),
        config.request_timeout(),
    )
    .context("Failed to create HTTP transport")?;
    let client = Arc::new(
        SyncClient::open(config, args.user, Arc::new(transport))
            .context("Failed to open local replica")?,
    );

    match args.command {
        Command::Run => return run(client).await,
        Command::List => {
            print_items(&client);
            return Ok(());
        }
        Command::Collections => {
            for collection in client.snapshot().collections() {
                println!("{}  {}", collection.id, collection.name);
            }
            return Ok(());
        }
        Command::Sync => {
            client.push_cycle().await?;
            client.pull_cycle().await?;
            client.save(false)?;
            let counts = client.counts();
            println!(
                "Synced: {} open, {} done, {} collections",
                counts.uncompleted, counts.completed, counts.collections
            );
            return Ok(());
        }
        Command::Add { title, collection } => {
            let owner = match collection {
                Some(name) => Some(collection_by_name(&client, &name)?),
                None => None,
            };
            let id = client.add_item(&title, owner.as_ref())?;
            println!("{}", id);
        }
        Command::Complete { id } => client.set_completed(&ItemId::from(id), true)?,
        Command::Reopen { id } => client.set_completed(&ItemId::from(id), false)?,
        Command::Rename { id, title } => client.set_title(&ItemId::from(id), &title)?,
        Command::Delete { id } => client.delete_item(&ItemId::from(id))?,
        Command::NewCollection { name } => {
            let id = client.create_collection(&name)?;
            println!("{}", id);
        }
    }

    client.save(false)?;
    if let Err(e) = client.push_cycle().await {
        warn!("Saved locally, push failed: {}", e);
    }
    Ok(())
}

async fn run(client: Arc<SyncClient>) -> Result<()> {
    let _subscription = client.events().subscribe(|event| match event {
        SyncEvent::SyncApplied { report, counts } => info!(
            "Merged {} remote changes ({} open, {} done)",
            report.change_count(),
            counts.uncompleted,
            counts.completed
        ),
        SyncEvent::StatusChanged(status) => info!(
            "Status: {}{}",
            if status.online { "online" } else { "offline" },
            status
                .last_error
                .as_ref()
                .map(|e| format!(" ({})", e))
                .unwrap_or_default()
        ),
        SyncEvent::Error { source, message } => warn!("{:?} error: {}", source, message),
        _ => {}
    });

    let scheduler = Scheduler::start(Arc::clone(&client));
    info!("Syncing as {}; press Ctrl+C to stop", client.user());

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")?;
    info!("Shutting down");
    scheduler.shutdown().await?;
    Ok(())
}

fn collection_by_name(client: &SyncClient, name: &str) -> Result<CollectionId> {
    match client.snapshot().collection_named(name) {
        Some(collection) => Ok(collection.id.clone()),
        None => bail!("No collection named {:?}", name),
    }
}

fn print_items(client: &SyncClient) {
    let snapshot = client.snapshot();
    let line = |item: &Item| {
        let mark = if item.completed { "x" } else { " " };
        println!("[{}] {}  {}", mark, item.id, item.title);
    };

    snapshot.uncompleted().for_each(line);
    snapshot.completed().for_each(line);
    for collection in snapshot.collections() {
        println!("\n{}:", collection.name);
        snapshot.items_in(&collection.id).for_each(line);
    }
}
