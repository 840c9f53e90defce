//! Ophanim - directory change watcher.
//!
//! This binary watches a directory and reports every change on stdout, or runs
//! an external action for each change whose name matches an optional pattern.
//!
//! # Usage
//!
//! ```text
//! ophanim <directory> [deep] [action] [regex]
//! ```
//!
//! # Environment Variables
//!
//! See the [`config`] module for available configuration options.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use ophanim::config::{Config, WatchConfig};
use ophanim::session::WatchSession;

/// Ophanim - directory change watcher.
///
/// Reports file and directory changes, or runs an action for each one.
#[derive(Parser, Debug)]
#[command(name = "ophanim")]
#[command(author, version, about, long_about = None)]
#[command(after_help = "\
ACTION CONTRACT:
    The action is run through the platform shell with two arguments: the
    decimal change code (1 added, 2 removed, 3 modified, 4 renamed from,
    5 renamed to) and the quoted name relative to the watched directory.
    Its standard output is forwarded to ours.

ENVIRONMENT VARIABLES:
    OPHANIM_BUFFER_SIZE        Change buffer size in bytes (default: 2048)
    OPHANIM_REPORT_FORMAT      Console report format: text or json (default: text)
    OPHANIM_STRICT_DECODE      Stop on a malformed change buffer (default: false)
    RUST_LOG                   Log filter for stderr diagnostics (default: info)

EXAMPLES:
    # Report every change in the current directory
    ophanim .

    # Watch a tree and run a script for each text file change
    ophanim /srv/data true ./on-change.sh '\\.txt$'")]
struct Cli {
    /// Directory to watch
    directory: Option<PathBuf>,

    /// Pass `true` to watch sub-directories as well
    deep: Option<String>,

    /// Command to run for each change instead of reporting it
    action: Option<String>,

    /// Only handle changes whose name matches this regular expression
    regex: Option<String>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let Some(directory) = cli.directory else {
        Cli::command()
            .print_help()
            .context("Failed to print usage")?;
        println!();
        return Ok(());
    };

    init_logging();

    let settings = Config::from_env().context("Failed to load configuration")?;
    let watch = WatchConfig::from_args(directory, cli.deep.as_deref(), cli.action, cli.regex);

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to create tokio runtime")?;

    runtime.block_on(run_watch(watch, settings))
}

/// Runs the watch loop until a fatal error or a shutdown signal.
async fn run_watch(watch: WatchConfig, settings: Config) -> Result<()> {
    info!(
        root = %watch.root.display(),
        mode = if watch.recursive { "deep" } else { "shallow" },
        pattern = watch.name_pattern.as_deref().unwrap_or("<none>"),
        action = watch.action.as_ref().map_or("<report>", |a| a.as_str()),
        "Watching for file changes"
    );

    let mut session = WatchSession::open(&watch, &settings).with_context(|| {
        format!("Failed to start watching {}", watch.root.display())
    })?;

    let stopped = tokio::select! {
        err = session.run() => Some(err),
        _ = wait_for_shutdown() => None,
    };

    match stopped {
        Some(err) => {
            error!(error = %err, "Watch stopped");
            Err(err).with_context(|| format!("Stopped watching {}", watch.root.display()))
        }
        None => {
            info!("Shutdown signal received");
            session.close();
            Ok(())
        }
    }
}

/// Initializes the tracing subscriber, writing to stderr.
fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_level(true)
        .init();
}

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn wait_for_shutdown() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            error!(error = %err, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                error!(error = %err, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
