// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! tidyup: watch folders and sort incoming files by extension

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use tidyup::config::AppConfig;
use tidyup::db::{LogQuery, LogStore, MoveStatus};
use tidyup::organizer::Organizer;
use tidyup::rules::{Classifier, Tagger};
use tidyup::service::{WatchHandle, WatchService};
use tidyup::watcher::FileWatcher;
use tidyup::web::{self, AppState};
use tidyup::{Result, TidyError};

/// tidyup CLI - automatic file organizer
#[derive(Parser, Debug)]
#[command(name = "tidyup")]
#[command(author = "Jonathan D. A. Jewell <hyperpolymath>")]
#[command(version)]
#[command(about = "Watch folders and sort new files into category folders", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file (JSON format)
    #[arg(short, long, default_value = "config.json", global = true)]
    config: PathBuf,

    /// Enable verbose logging (debug level)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Enable trace logging (most verbose)
    #[arg(long, global = true)]
    trace: bool,

    /// Suppress non-essential output (quiet mode)
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Watch folders and serve the dashboard
    Serve {
        /// Address to bind (overrides config)
        #[arg(long)]
        host: Option<String>,

        /// Port to bind (overrides config)
        #[arg(short, long)]
        port: Option<u16>,

        /// Serve the dashboard without watching folders
        #[arg(long)]
        no_watch: bool,
    },

    /// Watch folders without the dashboard
    Watch,

    /// Organize files already in the watched folders, then exit
    Organize {
        /// Only this folder (must be a watched folder or inside one)
        #[arg(short, long)]
        folder: Option<PathBuf>,
    },

    /// Show the category and tags a file name would get
    Classify {
        /// File names to classify
        #[arg(required = true)]
        names: Vec<String>,
    },

    /// Move log operations
    Db {
        #[command(subcommand)]
        action: DbCommands,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigCommands,
    },

    /// Create a config file and folders in a directory
    Init {
        /// Directory to initialize (default: current)
        #[arg(short, long)]
        dir: Option<PathBuf>,

        /// Force overwrite existing configuration
        #[arg(long)]
        force: bool,
    },
}

#[derive(Subcommand, Debug)]
enum DbCommands {
    /// Show move log statistics
    Stats,

    /// List recent organize attempts
    Logs {
        /// Maximum number to show
        #[arg(short, long, default_value = "20")]
        limit: usize,

        /// Only this category
        #[arg(long)]
        category: Option<String>,

        /// Only this status (success, failed, skipped)
        #[arg(long)]
        status: Option<MoveStatus>,

        /// Only records carrying this tag
        #[arg(long)]
        tag: Option<String>,
    },

    /// Export the move log to JSON
    Export {
        /// Output file
        output: PathBuf,
    },

    /// Vacuum database (reclaim space)
    Vacuum,
}

#[derive(Subcommand, Debug)]
enum ConfigCommands {
    /// Show current configuration
    Show,

    /// Generate default configuration file
    Generate {
        /// Output file path
        #[arg(short, long, default_value = "config.json")]
        output: PathBuf,
    },

    /// Validate configuration file
    Validate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = AppConfig::load(&cli.config);
    let web_debug = matches!(&config, Ok(c) if c.web.debug);

    // Initialize tracing
    let filter = if cli.trace {
        "trace"
    } else if cli.verbose || web_debug {
        "debug"
    } else if cli.quiet {
        "warn"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let config = match config {
        Ok(c) => c,
        Err(e) => {
            error!("{}", e);
            return Err(e);
        }
    };

    if !cli.quiet {
        info!("tidyup v{}", env!("CARGO_PKG_VERSION"));
    }

    match cli.command {
        Some(Commands::Serve { host, port, no_watch }) => run_serve(config, host, port, no_watch).await,
        Some(Commands::Watch) => run_watch(config).await,
        Some(Commands::Organize { folder }) => run_organize(config, folder).await,
        Some(Commands::Classify { names }) => run_classify(&config, &names),
        Some(Commands::Db { action }) => run_db_command(config, action).await,
        Some(Commands::Config { action }) => run_config_command(config, action, &cli.config),
        Some(Commands::Init { dir, force }) => run_init(dir, force),
        None => run_serve(config, None, None, false).await,
    }
}

/// Flip the returned channel to true on Ctrl+C or SIGTERM
fn shutdown_signal() -> (Arc<watch::Sender<bool>>, watch::Receiver<bool>) {
    let (tx, rx) = watch::channel(false);
    let tx = Arc::new(tx);
    let signal_tx = Arc::clone(&tx);

    tokio::spawn(async move {
        let ctrl_c = async {
            if let Err(e) = signal::ctrl_c().await {
                error!("Failed to listen for Ctrl+C: {}", e);
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    sigterm.recv().await;
                }
                Err(e) => {
                    error!("Failed to install SIGTERM handler: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
            _ = terminate => info!("Received SIGTERM, shutting down..."),
        }

        let _ = signal_tx.send(true);
    });

    (tx, rx)
}

/// Open the move log and build the organizer shared by every run mode
fn open_organizer(config: &AppConfig) -> Result<(LogStore, Arc<Organizer>)> {
    let store = LogStore::open(&config.database.path)?;
    info!("Move log: {}", config.database.path);
    let organizer = Organizer::new(config, Some(store.clone()))?;
    info!("Organized folder: {:?}", organizer.organized_root());
    Ok((store, Arc::new(organizer)))
}

/// Start watching every configured folder; the watcher creates missing ones
fn start_watching(
    config: &AppConfig,
    shutdown: watch::Receiver<bool>,
) -> Result<(Arc<Organizer>, LogStore, WatchHandle, JoinHandle<()>)> {
    let poll_interval = Duration::from_secs(config.watcher.poll_interval_secs.max(1));
    let mut watcher = FileWatcher::new(config.watcher.backend, poll_interval)?;
    for path in config.watched_paths() {
        watcher.watch(&path)?;
    }

    let (store, organizer) = open_organizer(config)?;
    let service = WatchService::new(Arc::clone(&organizer), config.settle_delay());
    let handle = service.handle();
    let task = tokio::spawn(service.run(watcher, shutdown));
    Ok((organizer, store, handle, task))
}

/// Run the watch loop and the dashboard together
async fn run_serve(mut config: AppConfig, host: Option<String>, port: Option<u16>, no_watch: bool) -> Result<()> {
    if let Some(host) = host {
        config.web.host = host;
    }
    if let Some(port) = port {
        config.web.port = port;
    }

    let (shutdown_tx, shutdown_rx) = shutdown_signal();

    let (organizer, store, handle, watch_task) = if no_watch {
        warn!("Folder watching disabled; use the dashboard or `tidyup organize` to sort files");
        let (store, organizer) = open_organizer(&config)?;
        (organizer, store, WatchHandle::default(), None)
    } else {
        let (organizer, store, handle, task) = start_watching(&config, shutdown_rx.clone())?;
        (organizer, store, handle, Some(task))
    };

    let bind = format!("{}:{}", config.web.host, config.web.port);
    let addr = tokio::net::lookup_host(bind.as_str())
        .await?
        .next()
        .ok_or_else(|| TidyError::Config(format!("cannot resolve {}", bind)))?;

    let state = Arc::new(AppState::new(store, config, organizer, handle)?);
    let served = web::start_server(state, addr, shutdown_rx).await;

    // Bring the watch loop down too if the server stopped on its own
    let _ = shutdown_tx.send(true);
    if let Some(task) = watch_task {
        if let Err(e) = task.await {
            error!("Watch loop ended abnormally: {}", e);
        }
    }

    info!("tidyup stopped.");
    served
}

/// Run the watch loop only
async fn run_watch(config: AppConfig) -> Result<()> {
    let (_shutdown_tx, shutdown_rx) = shutdown_signal();
    let (_organizer, _store, _handle, task) = start_watching(&config, shutdown_rx)?;

    info!("Organizer active. Press Ctrl+C to stop.");
    task.await
        .map_err(|e| TidyError::Server(format!("watch loop ended abnormally: {}", e)))?;

    info!("tidyup stopped.");
    Ok(())
}

/// One-shot pass over existing files
async fn run_organize(config: AppConfig, folder: Option<PathBuf>) -> Result<()> {
    let (_store, organizer) = open_organizer(&config)?;

    let summary = tokio::task::spawn_blocking(move || organizer.organize_existing(folder.as_deref()))
        .await
        .map_err(|e| TidyError::Server(format!("organize pass failed: {}", e)))??;

    println!("Organize pass complete:");
    println!("  Scanned: {}", summary.scanned);
    println!("  Moved:   {}", summary.moved);
    println!("  Failed:  {}", summary.failed);
    println!("  Skipped: {}", summary.skipped);
    Ok(())
}

fn run_classify(config: &AppConfig, names: &[String]) -> Result<()> {
    let classifier = Classifier::new(&config.categories);
    let tagger = Tagger::new(&config.tag_rules);

    for name in names {
        let tags = tagger.tags_for(name);
        if tags.is_empty() {
            println!("{} -> {}", name, classifier.classify(name));
        } else {
            println!("{} -> {} [{}]", name, classifier.classify(name), tags.join(", "));
        }
    }
    Ok(())
}

/// Run move log commands
async fn run_db_command(config: AppConfig, action: DbCommands) -> Result<()> {
    let store = LogStore::open(&config.database.path)?;

    match action {
        DbCommands::Stats => {
            let stats = store.stats()?;
            println!("Move Log Statistics:");
            println!("  Records: {}", stats.total_records);
            println!("  Moves: {}", stats.total_moves);
            println!("  Bytes moved: {}", stats.total_bytes);
            println!("  Duplicate files: {}", stats.duplicate_files);
            for (status, count) in &stats.by_status {
                println!("  {}: {}", status, count);
            }
            if !stats.by_category.is_empty() {
                println!("\nBy category:");
                for row in &stats.by_category {
                    println!("  {} - {} files ({} bytes)", row.category, row.count, row.bytes);
                }
            }
            if !stats.popular_tags.is_empty() {
                println!("\nPopular tags:");
                for tag in &stats.popular_tags {
                    println!("  {} ({})", tag.tag, tag.count);
                }
            }
        }
        DbCommands::Logs { limit, category, status, tag } => {
            let query = LogQuery {
                category,
                status,
                tag,
                limit: Some(limit),
                ..LogQuery::default()
            };
            let records = store.query(&query)?;
            println!("Recent activity ({} entries):", records.len());
            for record in records {
                println!(
                    "  {} [{}] {} -> {}",
                    record.timestamp.format("%Y-%m-%d %H:%M"),
                    record.status,
                    record.source_path,
                    record
                        .destination_path
                        .as_deref()
                        .or(record.message.as_deref())
                        .unwrap_or("-"),
                );
            }
        }
        DbCommands::Export { output } => {
            let records = store.query(&LogQuery::default())?;
            let json = serde_json::to_string_pretty(&records)?;
            std::fs::write(&output, json)?;
            println!("Exported {} records to {:?}", records.len(), output);
        }
        DbCommands::Vacuum => {
            store.vacuum()?;
            println!("Database vacuumed successfully");
        }
    }

    Ok(())
}

/// Run config commands
fn run_config_command(config: AppConfig, action: ConfigCommands, config_path: &Path) -> Result<()> {
    match action {
        ConfigCommands::Show => {
            let json = serde_json::to_string_pretty(&config)?;
            println!("{}", json);
        }
        ConfigCommands::Generate { output } => {
            AppConfig::default().save(&output)?;
            println!("Generated config at {:?}", output);
        }
        ConfigCommands::Validate => {
            config.validate()?;
            println!("Configuration at {:?} is valid", config_path);
            println!("  Watched folders: {:?}", config.watched_folders);
            println!("  Organized folder: {}", config.organized_folder);
            println!("  Categories: {}", config.categories.len());
            println!("  Database: {}", config.database.path);
        }
    }

    Ok(())
}

/// Initialize a new tidyup directory
fn run_init(dir: Option<PathBuf>, force: bool) -> Result<()> {
    let target = dir.unwrap_or_else(|| PathBuf::from("."));
    let config_path = target.join("config.json");

    if config_path.exists() && !force {
        return Err(TidyError::Config(
            "config.json already exists. Use --force to overwrite".to_string(),
        ));
    }

    let watch_dir = target.join("watch");
    let organized_dir = target.join("Organized_Files");
    std::fs::create_dir_all(&watch_dir)?;
    std::fs::create_dir_all(&organized_dir)?;

    let config = AppConfig {
        watched_folders: vec![watch_dir.to_string_lossy().to_string()],
        organized_folder: organized_dir.to_string_lossy().to_string(),
        ..AppConfig::default()
    };
    config.save(&config_path)?;

    println!("tidyup initialized in {:?}", target);
    println!("\nCreated:");
    println!("  - config.json");
    println!("  - watch/");
    println!("  - Organized_Files/");
    println!("\nNext steps:");
    println!("  1. Start organizer: tidyup serve");
    println!("  2. Drop files into watch/ and open http://127.0.0.1:5000");

    Ok(())
}
