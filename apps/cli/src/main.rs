//! mountlink CLI - runs the device link daemon and its maintenance commands.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use clap::{Parser, Subcommand};
use mountlink_core::config::CONFIG_ENV;
use mountlink_core::{Config, DeviceManager, daemon, logging};
use tracing::{error, info};

/// Links phone storage mounted through GVfs into a local directory.
#[derive(Parser)]
#[command(name = "mountlink")]
#[command(about = "Keeps symlinks and bookmarks for a mounted phone", long_about = None)]
struct Cli {
    /// Configuration file (defaults to ~/.config/mountlink/config.toml).
    #[arg(long, global = true, env = CONFIG_ENV)]
    config: Option<PathBuf>,

    /// Log filter overriding the configured level, e.g. `debug`.
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Log to the log file only.
    #[arg(long, global = true)]
    no_console: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Watch for device mounts until interrupted (default).
    Run,
    /// Remove the links and bookmarks of every device ever managed.
    ///
    /// Intended for uninstalling. Fails while the daemon is running.
    Cleanup,
    /// Print the persisted state as JSON.
    Status,
    /// Print the default configuration as TOML.
    DefaultConfig,
}

fn main() {
    let cli = Cli::parse();

    if let Err(message) = dispatch(cli) {
        eprintln!("mountlink: {message}");
        std::process::exit(1);
    }
}

fn dispatch(cli: Cli) -> Result<(), String> {
    let command = cli.command.unwrap_or(Commands::Run);

    if let Commands::DefaultConfig = command {
        print!("{}", Config::default_toml());
        return Ok(());
    }

    let mut config = Config::load(cli.config.as_deref()).map_err(|e| e.to_string())?;
    if let Some(level) = cli.log_level {
        config.log.level = level;
    }

    match command {
        Commands::Run => run(config, !cli.no_console),
        Commands::Cleanup => cleanup(config, !cli.no_console),
        Commands::Status => status(config),
        Commands::DefaultConfig => Ok(()),
    }
}

fn run(config: Config, console: bool) -> Result<(), String> {
    let _guard = logging::init(&config.log, console).map_err(|e| e.to_string())?;

    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&shutdown);
    ctrlc::set_handler(move || {
        flag.store(true, Ordering::SeqCst);
    })
    .map_err(|e| format!("failed to install signal handler: {e}"))?;

    daemon::run(config, &shutdown).map_err(|e| {
        error!(error = %e, "daemon stopped");
        e.to_string()
    })
}

fn cleanup(config: Config, console: bool) -> Result<(), String> {
    let _guard = logging::init(&config.log, console).map_err(|e| e.to_string())?;

    let count = daemon::cleanup(config).map_err(|e| e.to_string())?;
    info!(devices = count, "cleanup finished");
    println!("Cleaned up {count} device(s)");
    Ok(())
}

fn status(config: Config) -> Result<(), String> {
    let state = DeviceManager::new(config)
        .status()
        .map_err(|e| e.to_string())?;
    let json = serde_json::to_string_pretty(&state).map_err(|e| e.to_string())?;
    println!("{json}");
    Ok(())
}
