//! shellcache - headless host for the offline cache worker.
//!
//! Starts the origin server, waits until it answers, installs and activates
//! the worker against it, then feeds it host events read from stdin.

mod driver;
mod server;
mod surfaces;

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::BufReader;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use shellcache_core::utils::format_age;
use shellcache_core::{
    Collaborators, HostEvent, HttpFetcher, LoggingConsumer, VersionedStore, Worker, WorkerConfig,
};

use driver::Driver;
use server::{wait_ready, OriginServer};
use surfaces::{LoggingNotifier, SurfaceRegistry};

// ============================================================================
// Constants
// ============================================================================

/// Default time the origin server gets to start answering
const DEFAULT_READY_TIMEOUT_SECS: u64 = 30;

/// Prefix of the rolling log file
const LOG_FILE_PREFIX: &str = "shellcache.log";

#[derive(Parser, Debug)]
#[command(name = "shellcache")]
#[command(about = "Offline cache and request-interception host")]
#[command(version)]
struct Cli {
    /// Path to config file (default: ~/.config/shellcache/config.json)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Origin URL, overriding config and SHELLCACHE_ORIGIN
    #[arg(long, global = true)]
    origin: Option<String>,

    /// Log at info level unless RUST_LOG says otherwise
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Also write daily rolling logs to this directory
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the origin server and serve host events from stdin
    Run {
        /// Seconds to wait for the origin to answer
        #[arg(long, default_value_t = DEFAULT_READY_TIMEOUT_SECS)]
        ready_timeout: u64,

        /// Keep the store in memory instead of the cache directory
        #[arg(long)]
        memory: bool,

        /// Origin server command, e.g. `-- python app.py`
        #[arg(last = true)]
        server_cmd: Vec<String>,
    },
    /// List persisted cache generations
    Status,
    /// Delete every persisted cache generation
    Purge,
    /// Write the effective configuration to the config file
    Init,
}

/// Initialize the tracing subscriber for logging.
///
/// Logs go to stderr so stdout stays free for result lines. The returned
/// guard must be held for the file writer to flush.
fn init_tracing(verbose: bool, log_dir: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let default_level = if verbose { "info" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create log directory {}", dir.display()))?;
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_ansi(false).with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();

    Ok(guard)
}

fn load_config(cli: &Cli) -> Result<WorkerConfig> {
    let config = match &cli.config {
        Some(path) if path.exists() => WorkerConfig::load_from(path)?,
        Some(_) => WorkerConfig::default(),
        None => WorkerConfig::load()?,
    };
    let mut config = config.apply_env()?;
    if let Some(origin) = &cli.origin {
        config.origin = origin.clone();
        config.origin_url()?;
    }
    Ok(config)
}

fn open_store(config: &WorkerConfig) -> Result<VersionedStore> {
    let dir = config.cache_dir()?;
    VersionedStore::open_dir(&dir)
        .with_context(|| format!("Failed to open cache directory {}", dir.display()))
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let _guard = init_tracing(cli.verbose, cli.log_dir.as_deref())?;
    let config = load_config(&cli)?;

    match cli.command {
        Command::Run {
            ready_timeout,
            memory,
            server_cmd,
        } => run(config, Duration::from_secs(ready_timeout), memory, &server_cmd).await,
        Command::Status => status(&config),
        Command::Purge => purge(&config),
        Command::Init => init(&config, cli.config.as_deref()),
    }
}

async fn run(
    config: WorkerConfig,
    ready_timeout: Duration,
    memory: bool,
    server_cmd: &[String],
) -> Result<()> {
    info!(origin = %config.origin, generation = %config.cache_name(), "shellcache starting");

    let mut server = if server_cmd.is_empty() {
        None
    } else {
        Some(OriginServer::spawn(server_cmd)?)
    };
    let origin = config.origin_url()?;
    wait_ready(&origin, ready_timeout, server.as_mut()).await?;

    let store = if memory {
        VersionedStore::in_memory()
    } else {
        open_store(&config)?
    };
    let fetcher = HttpFetcher::from_config(&config).context("Failed to build HTTP client")?;
    let scope = config.scope_url()?;

    // The shell's own window is the first client surface
    let surfaces = Arc::new(SurfaceRegistry::new());
    surfaces.attach(scope.as_str());

    let worker = Worker::new(
        config,
        store,
        Collaborators {
            fetcher: Arc::new(fetcher),
            notifier: Arc::new(LoggingNotifier),
            surfaces: surfaces.clone(),
            consumer: Arc::new(LoggingConsumer),
        },
    )?;

    let stored = worker
        .handle(HostEvent::Install)
        .wait()
        .await
        .context("Install failed")?;
    info!(?stored, "Worker installed");
    if worker.should_activate() {
        worker
            .handle(HostEvent::Activate)
            .wait()
            .await
            .context("Activation failed")?;
    } else {
        info!("Waiting for a force-activate message before activating");
    }

    let driver = Driver::new(worker.clone(), surfaces);
    let input = BufReader::new(tokio::io::stdin());
    let output = tokio::io::stdout();

    tokio::select! {
        result = driver.run(input, output) => {
            let handled = result?;
            info!(handled, "Input closed");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted");
        }
    }

    if let Err(e) = worker.teardown() {
        warn!(error = %e, "Failed to flush store during teardown");
    }
    if let Some(server) = server {
        server.shutdown().await?;
    }
    Ok(())
}

fn status(config: &WorkerConfig) -> Result<()> {
    let store = open_store(config)?;
    let current = config.cache_name();
    let names = store.generation_names();

    if names.is_empty() {
        println!("No cached generations for {}", config.origin);
        return Ok(());
    }

    for name in names {
        let Some(generation) = store.generation(&name) else {
            continue;
        };
        let age = generation
            .last_stored_at()
            .map(|at| format_age((chrono::Utc::now() - at).num_minutes()))
            .unwrap_or_else(|| "empty".to_string());
        let marker = if name == current { "*" } else { " " };
        println!("{} {:<32} {:>5} entries  {}", marker, name, generation.len(), age);
    }
    Ok(())
}

fn purge(config: &WorkerConfig) -> Result<()> {
    let store = open_store(config)?;
    let purged = store.purge_all().context("Failed to purge cache")?;
    println!("Purged {} generation(s)", purged);
    Ok(())
}

fn init(config: &WorkerConfig, path: Option<&Path>) -> Result<()> {
    let path = match path {
        Some(path) => {
            config.save_to(path)?;
            path.to_path_buf()
        }
        None => config.save()?,
    };
    println!("Wrote {}", path.display());
    Ok(())
}
