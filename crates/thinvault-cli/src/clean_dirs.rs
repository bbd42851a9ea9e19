//! # Archive layout cleanup
//!
//! Moves entries from the flat `<digest>/<file>` layout into the sharded one.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Args;
use thinvault_cas::{migrate, MigrationReport};
use thinvault_config::Config;

#[derive(Args, Debug)]
pub struct CleanDirsArgs {
    /// Archive directory to clean (defaults to the configured archive root)
    #[arg(value_name = "DIR")]
    directory: Option<PathBuf>,
}

pub fn run(config: &Config, args: CleanDirsArgs) -> Result<()> {
    let directory = args
        .directory
        .unwrap_or_else(|| config.storage.archive_root.clone());

    println!("Starting to clean directory: {}", directory.display());
    let report = migrate(&directory)
        .with_context(|| format!("Failed to clean {}", directory.display()))?;

    for line in summary(&report) {
        println!("{line}");
    }

    if report.conflicts > 0 {
        bail!(
            "{} flat entries conflict with different content already in the sharded layout; both copies were left in place",
            report.conflicts
        );
    }
    Ok(())
}

fn summary(report: &MigrationReport) -> Vec<String> {
    if report.is_noop() && report.conflicts == 0 {
        return vec!["Nothing to do: archive is already sharded.".to_string()];
    }

    let mut lines = vec![format!("  Moved:              {}", report.moved)];
    if report.deduplicated > 0 {
        lines.push(format!("  Already sharded:    {}", report.deduplicated));
    }
    if report.conflicts > 0 {
        lines.push(format!("  Conflicts:          {}", report.conflicts));
    }
    if report.hidden_skipped > 0 {
        lines.push(format!("  Hidden files kept:  {}", report.hidden_skipped));
    }
    if report.foreign_skipped > 0 {
        lines.push(format!("  Not digest-named:   {}", report.foreign_skipped));
    }
    lines.push(format!("  Directories removed: {}", report.removed_dirs));
    lines
}
