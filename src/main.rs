use std::path::{Path, PathBuf};

use clap::Parser;
use logwarden::{
    config::{DEFAULT_CONFIG_FILE, DaemonConfig, LoadedConfig},
    observability::{TracingError, TracingGuard, init_tracing},
    retention::{RetentionCycle, start_retention_worker},
};
use tokio_util::sync::CancellationToken;

/// CLI arguments for logwarden
#[derive(Parser, Debug)]
#[command(version, about = "Log retention daemon", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to config file (TOML, or JSON by extension)
    #[arg(short, long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,
}

#[derive(clap::Subcommand, Debug)]
enum Command {
    /// Run retention cycles at startup and on the configured interval (default)
    Run,
    /// Run a single retention cycle and exit
    Once,
    /// Write a default configuration file
    Init {
        /// Path to create the config file (defaults to --config)
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Overwrite existing config file
        #[arg(long)]
        force: bool,
    },
    /// Validate the configuration file strictly and exit
    Check,
    /// Export the JSON schema for the configuration file
    Schema {
        /// Output file (defaults to stdout)
        #[arg(short, long)]
        output: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    match args.command {
        Some(Command::Init { output, force }) => {
            run_init(output.unwrap_or(args.config), force);
        }
        Some(Command::Check) => {
            run_check(&args.config);
        }
        Some(Command::Schema { output }) => {
            #[cfg(feature = "json-schema")]
            run_schema_export(output);
            #[cfg(not(feature = "json-schema"))]
            {
                let _ = output;
                eprintln!("Error: JSON schema export requires the 'json-schema' feature");
                std::process::exit(1);
            }
        }
        Some(Command::Once) => {
            run_once(&args.config).await;
        }
        Some(Command::Run) | None => {
            run_daemon(&args.config).await;
        }
    }
}

/// Load configuration and bring up logging. Problems with either are
/// logged and worked around; neither stops the daemon.
fn start(config_path: &Path) -> (DaemonConfig, TracingGuard) {
    let LoadedConfig {
        mut config,
        warnings,
    } = DaemonConfig::load(config_path);

    let guard = match init_tracing(&config.observability) {
        Ok(guard) => guard,
        Err(e @ TracingError::FileSink { .. }) => {
            eprintln!("{e}; logging to stderr only");
            config.observability.logging.file = None;
            init_tracing(&config.observability).unwrap_or_else(|e| {
                eprintln!("{e}");
                TracingGuard::disabled()
            })
        }
        Err(e) => {
            eprintln!("{e}");
            TracingGuard::disabled()
        }
    };

    for warning in &warnings {
        tracing::warn!(
            config = %config_path.display(),
            error = %warning,
            "Configuration problem, using defaults"
        );
    }
    for note in config.retention.advisories() {
        tracing::warn!("{note}");
    }

    (config, guard)
}

async fn run_daemon(config_path: &Path) {
    let (config, _guard) = start(config_path);

    let shutdown = CancellationToken::new();
    tokio::spawn(shutdown_signal(shutdown.clone()));

    let stats = start_retention_worker(config.retention, shutdown).await;
    tracing::info!(
        cycles_started = stats.cycles_started,
        triggers_skipped = stats.triggers_skipped,
        "logwarden stopped"
    );
}

async fn run_once(config_path: &Path) {
    let (config, _guard) = start(config_path);
    let cycle = RetentionCycle::new(&config.retention);

    let report = match tokio::task::spawn_blocking(move || cycle.run()).await {
        Ok(report) => report,
        Err(e) => {
            tracing::error!(error = %e, "Retention cycle task failed");
            std::process::exit(1);
        }
    };

    println!(
        "Archived {} file(s) into {} archive(s), pruned {} archive(s), {} error(s)",
        report.files_archived.len(),
        report.archives_written.len(),
        report.archives_pruned.len(),
        report.errors.len()
    );
    if report.has_errors() {
        std::process::exit(1);
    }
}

/// Initialize a new configuration file
fn run_init(output_path: PathBuf, force: bool) {
    if output_path.exists() && !force {
        eprintln!(
            "Config file already exists: {}\nUse --force to overwrite.",
            output_path.display()
        );
        std::process::exit(1);
    }

    if let Some(parent) = output_path.parent()
        && !parent.as_os_str().is_empty()
        && let Err(e) = std::fs::create_dir_all(parent)
    {
        eprintln!("Failed to create directory {}: {}", parent.display(), e);
        std::process::exit(1);
    }

    if let Err(e) = std::fs::write(&output_path, DaemonConfig::default_document()) {
        eprintln!("Failed to write config file: {}", e);
        std::process::exit(1);
    }

    println!("Created config file: {}", output_path.display());
    println!();
    println!("Edit source_directory, then start the daemon with:");
    println!("  logwarden --config {}", output_path.display());
}

/// Strictly validate the config file.
fn run_check(config_path: &Path) {
    let config = match DaemonConfig::from_file(config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };

    println!("Configuration OK: {}", config_path.display());
    for note in config.retention.advisories() {
        println!("  warning: {}", note);
    }
    if !config.retention.source_directory.is_dir() {
        println!(
            "  warning: source_directory {} is not an existing directory",
            config.retention.source_directory.display()
        );
    }
}

/// Export the config JSON schema to file or stdout
#[cfg(feature = "json-schema")]
fn run_schema_export(output: Option<String>) {
    let content = match serde_json::to_string_pretty(&DaemonConfig::json_schema()) {
        Ok(content) => content,
        Err(e) => {
            eprintln!("Failed to serialize config schema: {}", e);
            std::process::exit(1);
        }
    };

    match output {
        Some(path) => {
            if let Err(e) = std::fs::write(&path, &content) {
                eprintln!("Failed to write to {}: {}", path, e);
                std::process::exit(1);
            }
            eprintln!("Config JSON schema written to {}", path);
        }
        None => {
            println!("{}", content);
        }
    }
}

async fn shutdown_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
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

    tracing::info!("Shutdown signal received, waiting for the current retention cycle to finish...");
    shutdown.cancel();
}
