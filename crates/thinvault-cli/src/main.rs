//! # thinvault CLI
//!
//! Command-line interface for moving files between a primary volume and the
//! archive volume.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

mod clean_dirs;

use thinvault_cas::{ArchiveStore, Evictor, Removable, Restorer, RetryPolicy};
use thinvault_config::logging::{init_logging, LogLevel};
use thinvault_config::{log_cli_debug, log_cli_info, log_cli_warn, Config};

/// thinvault - evict files to an archive volume and bring them back
#[derive(Parser)]
#[command(name = "thinvault")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Archive root directory (overrides config and THINVAULT_ARCHIVE_ROOT)
    #[arg(long = "archive-root", global = true)]
    archive_root: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Move a file into the archive, leaving a `.seagate` stub in its place
    Evict {
        /// File to evict
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },

    /// Restore a file from its `.seagate` stub
    Download {
        /// Original path of the evicted file (without `.seagate`)
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },

    /// Move a flat `<digest>/<file>` archive into the sharded layout
    CleanDirs(clean_dirs::CleanDirsArgs),

    /// Display archive statistics
    Status,

    /// Inspect configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Print the effective configuration as TOML
    Show,
    /// Print the configuration file locations
    Path,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(LogLevel::from_verbosity(cli.verbose));

    let mut config = Config::load().context("Failed to load configuration")?;
    if let Some(root) = cli.archive_root {
        config.storage.archive_root = thinvault_config::expand_home(&root);
    }

    match cli.command {
        Commands::Evict { file } => cmd_evict(&open_store(&config)?, &file),
        Commands::Download { file } => cmd_download(&open_store(&config)?, &config, &file),
        Commands::CleanDirs(args) => clean_dirs::run(&config, args),
        Commands::Status => cmd_status(&open_store(&config)?),
        Commands::Config { command } => cmd_config(&config, command),
    }
}

fn open_store(config: &Config) -> Result<ArchiveStore> {
    config.validate()?;
    let store = ArchiveStore::new(&config.storage.archive_root)
        .with_context(|| {
            format!(
                "Failed to open archive at {}",
                config.storage.archive_root.display()
            )
        })?
        .with_legacy_roots(config.storage.legacy_roots.clone())
        .with_retry_policy(RetryPolicy {
            attempts: config.restore.rename_attempts,
            delay: config.restore.rename_delay(),
        });
    Ok(store)
}

fn cmd_evict(store: &ArchiveStore, file: &Path) -> Result<()> {
    let report = Evictor::new(store)
        .evict(file)
        .with_context(|| format!("Failed to evict {}", file.display()))?;

    log_cli_info!(
        "Evicted",
        digest = report.digest.to_hex().as_str(),
        reused = report.reused,
    );
    if report.reused {
        println!(
            "Identical content already archived at {}.",
            report.location.display()
        );
    }
    println!("{} evicted to archive.", file.display());
    Ok(())
}

fn cmd_download(store: &ArchiveStore, config: &Config, file: &Path) -> Result<()> {
    let report = Restorer::new(store)
        .mark_removable(config.restore.mark_removable)
        .download(file)
        .with_context(|| format!("Failed to restore {}", file.display()))?;

    match &report.removable {
        Removable::Marked(path) => {
            log_cli_debug!(
                "Archive copy marked removable",
                path = path.display().to_string().as_str()
            );
        }
        Removable::Disabled => {}
        Removable::Failed(e) => {
            log_cli_warn!(
                "Could not mark archive copy removable",
                error = e.to_string().as_str()
            );
            eprintln!(
                "Warning: could not mark {} as removable: {}",
                report.location.display(),
                e
            );
        }
    }
    println!("{} restored from archive.", file.display());
    Ok(())
}

fn cmd_status(store: &ArchiveStore) -> Result<()> {
    let stats = store.stats().context("Failed to scan archive")?;
    println!("Archive: {}", store.root().display());
    println!("  Entries:   {}", stats.entry_count);
    println!("  Removable: {}", stats.removable_count);
    println!("  Size:      {} bytes", stats.total_bytes);
    Ok(())
}

fn cmd_config(config: &Config, command: ConfigCommands) -> Result<()> {
    match command {
        ConfigCommands::Show => {
            print!("{}", config.to_toml()?);
        }
        ConfigCommands::Path => {
            match Config::global_config_path() {
                Some(path) => println!("Global:  {}", path.display()),
                None => println!("Global:  (no home directory)"),
            }
            println!("Project: {}", Config::project_config_path().display());
        }
    }
    Ok(())
}
