//! keen - CLI tool for inspecting and flushing the local event queue
//!
//! This tool provides commands for:
//! - Checking client configuration and queue status
//! - Queueing a single event from the command line
//! - Listing pending events per collection
//! - Manually flushing pending events
//!
//! Uses XDG Base Directory specification for file locations:
//! - Config: $XDG_CONFIG_HOME/keen/config.toml (~/.config/keen/config.toml)
//! - Queue: $XDG_CACHE_HOME/keen/ (~/.cache/keen/)
//! - Logs: $XDG_STATE_HOME/keen/keen.log (~/.local/state/keen/keen.log)

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use keen_core::config::{ClientConfig, StoreKind};
use keen_core::event::prepare_event;
use keen_core::store::{AnyStore, AttemptLedger, EventStore, StoreHandle};
use keen_core::{Config, SyncKeenClient};

#[derive(Parser, Debug)]
#[command(name = "keen")]
#[command(about = "Inspect and flush the offline analytics event queue")]
#[command(version)]
struct Args {
    /// Write logs to the state directory
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
enum Command {
    /// Show client configuration and pending counts
    Status,

    /// Validate and queue one event
    Queue {
        /// Collection to add the event to
        collection: String,

        /// Event properties as a JSON object
        event: String,
    },

    /// List pending events per collection
    Pending {
        /// Print each event body
        #[arg(short, long)]
        bodies: bool,
    },

    /// Send all pending events once
    Flush,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let config = Config::load().context("failed to load configuration")?;

    let _log_guard = if args.verbose {
        Some(keen_core::logging::init(&config.logging).context("failed to initialize logging")?)
    } else {
        None
    };

    match args.command {
        Command::Status => cmd_status(&config.client),
        Command::Queue { collection, event } => cmd_queue(&config.client, &collection, &event),
        Command::Pending { bodies } => cmd_pending(&config.client, bodies),
        Command::Flush => cmd_flush(&config.client),
    }
}

fn open_store(config: &ClientConfig) -> Result<AnyStore> {
    if config.store == StoreKind::Ram {
        println!("Note: store = \"ram\" does not persist between runs; reading the file queue.");
    }
    AnyStore::file(
        &config.cache_root(),
        config.max_events_per_collection,
        config.forget_count,
    )
    .context("failed to open event store")
}

/// Queue-facing commands always use the file store: a RAM queue is gone
/// once this process exits.
fn file_backed(config: &ClientConfig) -> ClientConfig {
    ClientConfig {
        store: StoreKind::File,
        ..config.clone()
    }
}

fn cmd_status(config: &ClientConfig) -> Result<()> {
    println!("Keen Client Configuration");
    println!("=========================");
    println!();

    println!(
        "Project ID:      {}",
        config.project_id.as_deref().unwrap_or("<not set>")
    );
    println!(
        "Write Key:       {}",
        if config.write_key.is_some() {
            "<set>"
        } else {
            "<not set>"
        }
    );
    println!("Base URL:        {}", config.base_url);
    println!("API Version:     {}", config.api_version);
    println!("Timeout:         {}s", config.timeout_secs);
    println!("Max Attempts:    {}", config.max_attempts);
    println!("Max Per Coll.:   {}", config.max_events_per_collection);
    println!("Forget Count:    {}", config.forget_count);
    println!("Store:           {:?}", config.store);
    println!("Cache Dir:       {}", config.cache_root().join("keen").display());

    println!();
    if config.is_ready() {
        println!("Status: Ready to publish");
    } else {
        println!("Status: Not ready (project_id and write_key are required)");
        println!();
        println!("Add them to {}:", Config::config_path().display());
        println!();
        println!("  [client]");
        println!("  project_id = \"your-project-id\"");
        println!("  write_key = \"your-write-key\"");
    }

    let store = open_store(config)?;
    let pending = store.get_pending_handles()?;
    println!();
    println!(
        "Pending Events:  {}",
        pending.values().map(Vec::len).sum::<usize>()
    );

    Ok(())
}

fn cmd_queue(config: &ClientConfig, collection: &str, event: &str) -> Result<()> {
    let event: serde_json::Value =
        serde_json::from_str(event).context("event must be valid JSON")?;
    let serde_json::Value::Object(event) = event else {
        bail!("event must be a JSON object");
    };

    // Queueing needs no credentials, only a place to put the event
    let store = open_store(config)?;
    let body = prepare_event(&config.global_properties, collection, event, None)
        .with_context(|| format!("invalid event for {:?}", collection))?;
    let handle = match &config.project_id {
        Some(project_id) => {
            AttemptLedger::new(project_id.clone(), config.max_attempts)
                .enqueue(&store, collection, &body)
        }
        // Budgets are namespaced by project; the first flush starts a full one
        None => store.store(collection, &body),
    }
    .with_context(|| format!("failed to queue event in {:?}", collection))?;

    tracing::info!(collection, handle = %handle.key(), "Queued event from command line");

    let pending = store.get_pending_handles()?;
    println!(
        "Queued 1 event in {:?} ({} pending)",
        collection,
        pending.get(collection).map_or(0, Vec::len)
    );
    Ok(())
}

fn cmd_pending(config: &ClientConfig, show_bodies: bool) -> Result<()> {
    let store = open_store(config)?;
    let pending = store.get_pending_handles()?;

    if pending.is_empty() {
        println!("No pending events.");
        return Ok(());
    }

    println!("{:<40} {:>10}", "Collection", "Pending");
    println!("{:-<51}", "");
    for (collection, handles) in &pending {
        println!("{:<40} {:>10}", collection, handles.len());
        if show_bodies {
            for handle in handles {
                match store.get(handle) {
                    Ok(body) => println!("    {}", body),
                    Err(e) => println!("    <unreadable: {}>", e),
                }
            }
        }
    }

    Ok(())
}

fn cmd_flush(config: &ClientConfig) -> Result<()> {
    if !config.is_ready() {
        tracing::warn!("Flush requested without project_id and write_key");
        println!("Client is not configured. Run 'status' for details.");
        return Ok(());
    }

    let client = SyncKeenClient::from_config(&file_backed(config))
        .context("failed to create client")?;

    let pending = client.pending_count()?;
    if pending == 0 {
        println!("No pending events to flush.");
        return Ok(());
    }

    println!("Flushing {} pending event(s)...", pending);
    tracing::info!(pending, "Manual flush requested");

    let report = client.send_queued_events().context("flush failed")?;

    println!();
    println!("Stats:");
    println!("  Sent:       {}", report.sent);
    println!("  Delivered:  {}", report.delivered);
    println!("  Rejected:   {}", report.rejected);
    println!("  Exhausted:  {}", report.exhausted);
    println!("  Retained:   {}", report.retained);

    Ok(())
}
