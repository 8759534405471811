//! # tiersnap CLI - Tiered snapshot backups
//!
//! Command-line front end for the tiersnap library, meant to be invoked
//! hourly by cron, a systemd timer or Task Scheduler.
//!
//! ## Usage
//! ```bash
//! # Write a configuration file
//! tiersnap init --source /data --target /mnt/backup
//!
//! # Take whatever snapshots are due now (hourly, plus daily/weekly at the end of the day/week)
//! tiersnap run
//!
//! # Force a daily snapshot
//! tiersnap run --tier daily
//!
//! # Show snapshots and disk usage
//! tiersnap list --tier hourly
//! tiersnap status
//! ```

use anyhow::{bail, Context};
use chrono::Local;
use clap::{Parser, Subcommand, ValueEnum};
use colored::*;
use humantime::format_duration;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tiersnap::config::DEFAULT_CONFIG_PATH;
use tiersnap::{
    BackupConfig, BackupEngine, DueTiers, FingerprintCalculator, RunReport, SnapError, Snapshot,
    Tier,
};
use tracing_subscriber::EnvFilter;
use walkdir::WalkDir;

/// tiersnap CLI - hourly, daily and weekly snapshots with retention
#[derive(Parser)]
#[command(name = "tiersnap")]
#[command(version)]
#[command(about = "Tiered snapshot backups with deduplication, retention and space reclamation")]
#[command(long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(short, long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a configuration file
    Init {
        /// Directory to back up
        #[arg(long)]
        source: PathBuf,

        /// Directory receiving the tier directories
        #[arg(long)]
        target: PathBuf,

        /// Store full copies as zip archives
        #[arg(long)]
        compress: bool,

        /// Overwrite an existing configuration file
        #[arg(long)]
        force: bool,
    },

    /// Take the snapshots that are due
    Run {
        /// Take exactly these tiers instead of consulting the schedule
        #[arg(short, long, value_enum)]
        tier: Vec<TierArg>,

        /// Show a spinner while running
        #[arg(long)]
        progress: bool,
    },

    /// List snapshots
    #[command(alias = "ls")]
    List {
        /// Only this tier
        #[arg(short, long, value_enum)]
        tier: Option<TierArg>,

        /// Show locations and fingerprints
        #[arg(short, long)]
        detailed: bool,
    },

    /// Enforce per-tier retention limits
    Prune,

    /// Delete oldest snapshots while disk usage is above a limit
    Reclaim {
        /// Usage percentage to enforce (defaults to the configured maximum)
        #[arg(long)]
        max_usage: Option<f64>,
    },

    /// Print the fingerprint of a directory
    #[command(alias = "fp")]
    Fingerprint {
        /// Directory (defaults to the configured source)
        path: Option<PathBuf>,
    },

    /// Show disk usage and snapshot counts
    Status,
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum)]
enum TierArg {
    Hourly,
    Daily,
    Weekly,
}

impl From<TierArg> for Tier {
    fn from(arg: TierArg) -> Self {
        match arg {
            TierArg::Hourly => Tier::Hourly,
            TierArg::Daily => Tier::Daily,
            TierArg::Weekly => Tier::Weekly,
        }
    }
}

fn main() {
    let cli = Cli::parse();

    // Set up logging
    let default_level = if cli.verbose { "tiersnap=debug" } else { "tiersnap=info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    // Disable colors if needed
    if std::env::var("NO_COLOR").is_ok() {
        colored::control::set_override(false);
    }

    if let Err(e) = run(cli) {
        let message = match e.downcast_ref::<SnapError>() {
            Some(snap) => snap.user_message(),
            None => format!("{:#}", e),
        };
        eprintln!("{}: {}", "Error".red().bold(), message);
        std::process::exit(1);
    }
}

/// Main command runner
fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Init {
            source,
            target,
            compress,
            force,
        } => cmd_init(&cli.config, source, target, compress, force),
        Commands::Run { tier, progress } => cmd_run(&cli.config, tier, progress),
        Commands::List { tier, detailed } => cmd_list(&cli.config, tier, detailed),
        Commands::Prune => cmd_prune(&cli.config),
        Commands::Reclaim { max_usage } => cmd_reclaim(&cli.config, max_usage),
        Commands::Fingerprint { path } => cmd_fingerprint(&cli.config, path),
        Commands::Status => cmd_status(&cli.config),
    }
}

/// Write a configuration file with default settings
fn cmd_init(
    config_path: &Path,
    source: PathBuf,
    target: PathBuf,
    compress: bool,
    force: bool,
) -> anyhow::Result<()> {
    if config_path.exists() && !force {
        bail!(
            "{} already exists. Use --force to overwrite.",
            config_path.display()
        );
    }

    let mut config = BackupConfig::new(source, target);
    config.compress_backup = compress;
    config.validate()?;
    config.save(config_path)?;

    println!("{} Wrote {}", "✓".green().bold(), config_path.display().to_string().cyan());
    println!("  Source: {}", config.source_directory.display().to_string().cyan());
    println!("  Target: {}", config.target_directory.display().to_string().cyan());
    println!("\nNext steps:");
    println!("  - Take a first snapshot: {}", "tiersnap run --tier hourly".yellow());
    println!("  - Schedule {} to run every hour", "tiersnap run".yellow());
    Ok(())
}

/// Take the due (or forced) snapshots
///
/// Exits with an error when any tier failed, so schedulers can alert on it.
fn cmd_run(config_path: &Path, tiers: Vec<TierArg>, show_progress: bool) -> anyhow::Result<()> {
    let engine = open_engine(config_path)?;
    let now = Local::now();
    let due = if tiers.is_empty() {
        engine.schedule().due_at(&now)
    } else {
        DueTiers::from_tiers(&tiers.into_iter().map(Tier::from).collect::<Vec<_>>())
    };

    let names: Vec<&str> = due.tiers().iter().map(|t| t.as_str()).collect();
    println!("{} {}", "Running backup:".blue().bold(), names.join(", ").cyan());

    let progress = if show_progress {
        let pb = ProgressBar::new_spinner();
        pb.set_style(ProgressStyle::default_spinner().template("{spinner:.green} {msg}")?);
        pb.set_message("Materializing snapshots...");
        pb.enable_steady_tick(Duration::from_millis(100));
        Some(pb)
    } else {
        None
    };

    let report = engine.run(due, now)?;

    if let Some(pb) = progress {
        pb.finish_and_clear();
    }

    print_report(&report);

    if !report.failures.is_empty() {
        bail!("{} tier(s) failed", report.failures.len());
    }
    Ok(())
}

fn print_report(report: &RunReport) {
    for snapshot in &report.created {
        let kind = if snapshot.is_reference() {
            "reference".yellow()
        } else {
            "full copy".green()
        };
        println!(
            "{} {}/{} ({}, {} files)",
            "✓".green().bold(),
            snapshot.tier,
            snapshot.id.yellow().bold(),
            kind,
            snapshot.file_count
        );
    }
    for failure in &report.failures {
        println!("{} {}: {}", "✗".red().bold(), failure.tier, failure.error.red());
    }

    if !report.purged.is_empty() {
        println!("  Removed partial entries: {}", report.purged.join(", ").yellow());
    }
    let pruned: usize = report.retention.iter().map(|s| s.deleted.len()).sum();
    if pruned > 0 {
        println!("  Pruned: {} snapshots", pruned.to_string().yellow());
    }
    if let Some(reclaim) = report.reclaim.as_ref().filter(|r| r.was_triggered()) {
        println!(
            "  Reclaimed: {} snapshots, disk {:.1}% -> {:.1}%",
            reclaim.deleted.len().to_string().yellow(),
            reclaim.initial_usage,
            reclaim.final_usage
        );
    }
    println!(
        "  Time: {}",
        format_duration(Duration::from_millis(report.duration_ms)).to_string().cyan()
    );
}

/// List snapshots of one or all tiers
fn cmd_list(config_path: &Path, tier: Option<TierArg>, detailed: bool) -> anyhow::Result<()> {
    let engine = open_engine(config_path)?;
    let tiers: Vec<Tier> = match tier {
        Some(tier) => vec![tier.into()],
        None => Tier::ALL.to_vec(),
    };

    for tier in tiers {
        let snapshots = engine.store().list_snapshots(tier)?;
        println!(
            "{} {}",
            format!("{}:", tier).blue().bold(),
            format!("{} of {}", snapshots.len(), tier.retention_limit()).dimmed()
        );
        if snapshots.is_empty() {
            println!("  {}", "No snapshots".yellow());
        }
        for snapshot in &snapshots {
            print_snapshot(snapshot, detailed);
        }
        println!();
    }
    Ok(())
}

fn print_snapshot(snapshot: &Snapshot, detailed: bool) {
    let kind = if snapshot.is_orphan() {
        "orphan".red()
    } else if snapshot.is_reference() {
        "ref".yellow()
    } else {
        "full".green()
    };
    println!(
        "  {} {} {} {}",
        snapshot.id.yellow().bold(),
        kind,
        snapshot
            .created_at
            .with_timezone(&Local)
            .format("%Y-%m-%d %H:%M:%S")
            .to_string()
            .dimmed(),
        format!("{} files", snapshot.file_count).dimmed()
    );
    if detailed {
        println!("    Location: {}", snapshot.location.display());
        if let Some(target) = &snapshot.link_target {
            println!("    Target: {}", target.display());
        }
        if let Some(fp) = &snapshot.source_fingerprint {
            println!("    Fingerprint: {}", fp.dimmed());
        }
    }
}

/// Enforce retention on every tier
fn cmd_prune(config_path: &Path) -> anyhow::Result<()> {
    let engine = open_engine(config_path)?;
    for stats in engine.prune()? {
        let tier = stats.tier.map(|t| t.to_string()).unwrap_or_default();
        if stats.deleted.is_empty() {
            println!("{} {}: nothing to prune ({} kept)", "✓".green().bold(), tier, stats.kept);
        } else {
            println!(
                "{} {}: deleted {} ({} kept)",
                "✓".green().bold(),
                tier,
                stats.deleted.join(", ").yellow(),
                stats.kept
            );
        }
        for id in &stats.failed {
            println!("  {} could not delete {}", "✗".red().bold(), id);
        }
    }
    Ok(())
}

/// Run one reclamation pass
fn cmd_reclaim(config_path: &Path, max_usage: Option<f64>) -> anyhow::Result<()> {
    let engine = open_engine(config_path)?;
    let max = max_usage.unwrap_or(engine.config().max_disk_usage_percent);
    if !(max > 0.0 && max <= 100.0) {
        bail!("--max-usage must be in (0, 100], got {}", max);
    }

    let stats = engine.reclaim(max)?;
    if !stats.was_triggered() {
        println!(
            "{} Disk usage {:.1}% is within {:.1}%",
            "✓".green().bold(),
            stats.initial_usage,
            max
        );
        return Ok(());
    }

    println!(
        "{} Deleted {} snapshots, disk {:.1}% -> {:.1}%",
        if stats.target_reached() { "✓".green().bold() } else { "!".yellow().bold() },
        stats.deleted.len(),
        stats.initial_usage,
        stats.final_usage
    );
    for name in &stats.purged {
        println!("  - {} {}", name.dimmed(), "(partial)".dimmed());
    }
    for name in &stats.deleted {
        println!("  - {}", name.dimmed());
    }
    Ok(())
}

/// Print the fingerprint of a directory
fn cmd_fingerprint(config_path: &Path, path: Option<PathBuf>) -> anyhow::Result<()> {
    let start = Instant::now();
    let fp = match path {
        Some(path) => FingerprintCalculator::default().try_fingerprint(&path)?,
        None => {
            let config = BackupConfig::load(config_path)?;
            FingerprintCalculator::new(config.max_hash_files)
                .try_fingerprint(&config.source_directory)?
        }
    };

    let digest = fp.digest.unwrap_or_default();
    println!("{}", digest.yellow().bold());
    println!(
        "  Files: {}{}",
        fp.file_count.to_string().cyan(),
        if fp.truncated { " (capped)".dimmed() } else { "".normal() }
    );
    println!("  Time: {}", format_duration(start.elapsed()).to_string().cyan());
    Ok(())
}

/// Show disk usage and per-tier statistics
fn cmd_status(config_path: &Path) -> anyhow::Result<()> {
    let engine = open_engine(config_path)?;
    let config = engine.config();

    println!("{}", "tiersnap status:".blue().bold());
    println!();
    println!("  Source: {}", config.source_directory.display());
    println!("  Target: {}", config.target_directory.display());
    println!(
        "  Mode: {}{}",
        if config.compress_backup { "zip archive" } else { "directory" },
        if config.enable_symlink { ", dedup on" } else { ", dedup off" }
    );

    match engine.disk_usage() {
        Ok(usage) => {
            let percent = format!("{:.1}%", usage.percent());
            let percent = if usage.percent() > config.max_disk_usage_percent {
                percent.red().bold()
            } else {
                percent.green()
            };
            println!("\n{}", "Disk:".bold());
            println!(
                "  Used: {} of {} ({}, limit {:.0}%)",
                format_bytes(usage.used),
                format_bytes(usage.total),
                percent,
                config.max_disk_usage_percent
            );
            println!("  Available: {}", format_bytes(usage.free));
        }
        Err(e) => println!("\n{} {}", "Disk:".bold(), e.to_string().yellow()),
    }

    println!("\n{}", "Tiers:".bold());
    for tier in Tier::ALL {
        let snapshots = engine.store().list_snapshots(tier)?;
        let references = snapshots.iter().filter(|s| s.is_reference()).count();
        let size = tier_size(&engine.store().tier_dir(tier));
        let latest = snapshots
            .iter()
            .max_by_key(|s| s.created_at)
            .map(|s| s.id.clone())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "  {:<7} {:>3}/{:<3} {} refs, {}, latest {}",
            tier.as_str(),
            snapshots.len(),
            tier.retention_limit(),
            references,
            format_bytes(size),
            latest.yellow()
        );
    }
    Ok(())
}

/// Load the configuration and build an engine
fn open_engine(config_path: &Path) -> anyhow::Result<BackupEngine> {
    let config = BackupConfig::load(config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;
    Ok(BackupEngine::from_config(config)?)
}

/// Bytes stored under a tier directory, links not followed
fn tier_size(dir: &Path) -> u64 {
    WalkDir::new(dir)
        .follow_links(false)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| e.metadata().ok())
        .map(|m| m.len())
        .sum()
}

fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_idx = 0;

    while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
        size /= 1024.0;
        unit_idx += 1;
    }

    if unit_idx == 0 {
        format!("{} {}", size as u64, UNITS[unit_idx])
    } else {
        format!("{:.2} {}", size, UNITS[unit_idx])
    }
}
