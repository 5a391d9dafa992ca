use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use tierback::backup::BackupManager;
use tierback::cli::{handle_check, handle_list, handle_run};
use tierback::config::{BackupPaths, Settings};

#[derive(Parser)]
#[command(
    name = "tierback",
    author = "Kaylee Beyene",
    version,
    about = "Tiered backups for the Art Institut container stack",
    long_about = "tierback captures database dumps, volume snapshots, encryption keys \
                  and the deployment configuration into one compressed archive per run, \
                  thins old archives with a tiered retention policy, and verifies \
                  archives against their manifest."
)]
struct Cli {
    /// Settings file (defaults to config.json in the tierback home)
    #[arg(long, global = true, env = "TIERBACK_CONFIG")]
    config: Option<PathBuf>,

    /// Archive store directory (overrides the settings file)
    #[arg(long, global = true, env = "TIERBACK_STORE_DIR")]
    store: Option<PathBuf>,

    /// Log progress to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Capture a new archive, then prune old ones
    Run,

    /// Show store usage and stored archives
    #[command(alias = "ls")]
    List,

    /// Verify an archive (defaults to the newest)
    Check {
        /// Archive path, filename in the store, or 'latest'
        file: Option<String>,
    },
}

fn init_tracing(verbose: bool) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let default_level = if verbose { "info" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let paths = BackupPaths::new()?;
    let settings_file = cli.config.unwrap_or_else(|| paths.settings_file());
    let settings = Settings::load_or_default(&settings_file)
        .with_context(|| format!("failed to load settings from {}", settings_file.display()))?;

    let store_dir = cli.store.unwrap_or_else(|| settings.store_dir(&paths));
    let manager = BackupManager::from_settings(store_dir, &settings)?;

    match cli.command {
        Commands::Run => {
            tierback::interrupt::install();
            handle_run(&manager)?;
        }
        Commands::List => {
            handle_list(&manager)?;
        }
        Commands::Check { file } => {
            handle_check(&manager, file.as_deref())?;
        }
    }

    Ok(())
}
