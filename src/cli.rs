//! Command-line interface definitions.
//!
//! The CLI is a thin front-end over the engine: every switch maps onto one
//! [`ScanConfig`] field or one hook slot. Defaults mirror the tool's
//! long-standing cron use: sweep `~/.Trash`, top level only, entries older
//! than seven days get removed.
//!
//! ```bash
//! # Default trash sweep (7 days, top level)
//! dirsweep
//!
//! # Age downloads by mtime and archive them after 3 days
//! dirsweep -w 3 -p -m -F 'mv %s /volumes/archive' ~/downloads
//!
//! # Integrity verification: re-hash everything every 14 days
//! dirsweep -w -1 --checksum-always --check-window 14 -u /tank/media
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use regex::Regex;

use crate::actions::hook::{safe_remove, safe_trash, Action, Hooks};
use crate::config::{ScanConfig, SizeLimit};

/// Stateful directory sweeper: tracks a subtree across runs and enforces
/// age and size retention policies.
#[derive(Debug, Parser)]
#[command(name = "dirsweep", version, about, max_term_width = 100)]
pub struct Cli {
    /// Directory to operate on
    #[arg(value_name = "DIRECTORY")]
    pub directory: Option<PathBuf>,

    /// Store state in FILE (a bare name lands inside the directory)
    #[arg(short = 'b', long, value_name = "FILE")]
    pub database: Option<PathBuf>,

    /// Act on entries older than this many days (fractional ok, negative
    /// disables the age policy)
    #[arg(short = 'w', long, value_name = "DAYS", default_value_t = 7.0, allow_negative_numbers = true)]
    pub days: f64,

    /// Keep the tracked total below this many bytes, or "N%" of the volume
    #[arg(short = 'M', long = "max-size", value_name = "BYTES|N%")]
    pub max_size: Option<String>,

    /// Scan this many levels deep; 0 = top level only, negative = no limit
    #[arg(short = 'D', long, value_name = "LEVELS", default_value_t = 0, allow_negative_numbers = true)]
    pub depth: i64,

    /// Age entries by their last modification time
    #[arg(short = 'm', long)]
    pub mtime: bool,

    /// Age entries by their last access time
    #[arg(short = 'a', long)]
    pub atime: bool,

    /// Confirm mtime changes with a SHA-1 of the contents
    #[arg(long)]
    pub checksum: bool,

    /// Re-hash contents periodically even when mtime is unchanged
    #[arg(long = "checksum-always")]
    pub checksum_always: bool,

    /// Days between forced re-hashes under --checksum-always
    #[arg(long = "check-window", value_name = "DAYS")]
    pub check_window: Option<i64>,

    /// Retain stat results across reads within one scan
    #[arg(short = 'C', long = "cache-attrs")]
    pub cache_attrs: bool,

    /// Skip traversal when the directory is unmodified since the last save
    #[arg(short = 'z', long = "minimal-scan")]
    pub minimal_scan: bool,

    /// Prune directories that empty out during the sweep
    #[arg(short = 'p', long = "prune-dirs")]
    pub prune_dirs: bool,

    /// Retry failed removals and commands under sudo
    #[arg(short = 's', long)]
    pub sudo: bool,

    /// Securely wipe files instead of deleting them
    #[arg(short = 'S', long)]
    pub secure: bool,

    /// Move expired entries to the trash instead of deleting them
    #[arg(short = 't', long)]
    pub trash: bool,

    /// Show what would happen without touching the directory or its state
    #[arg(short = 'n', long)]
    pub dryrun: bool,

    /// Display the ages of all entries; delete nothing
    #[arg(short = 'A', long)]
    pub ages: bool,

    /// Additional file-name pattern to ignore (repeatable, regex)
    #[arg(long, value_name = "REGEX")]
    pub ignore: Vec<String>,

    /// Write checkpoint temp files here (same filesystem as the database)
    #[arg(long = "temp-dir", value_name = "DIR")]
    pub temp_dir: Option<PathBuf>,

    /// Execute CMD when an entry first appears (%s = quoted path)
    #[arg(long = "onadded", value_name = "CMD")]
    pub on_added: Option<String>,

    /// Execute CMD when an entry changes
    #[arg(long = "onchanged", value_name = "CMD")]
    pub on_changed: Option<String>,

    /// Execute CMD after an entry disappears
    #[arg(long = "onremoved", value_name = "CMD")]
    pub on_removed: Option<String>,

    /// Execute CMD when an entry passes the age or size limit
    #[arg(short = 'F', long = "onpastlimit", value_name = "CMD")]
    pub on_past_limit: Option<String>,

    /// Concise event stream on stdout (A/M/T/R/O lines)
    #[arg(short = 'u', long)]
    pub status: bool,

    /// Show what is being done (-vv for trace)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Errors only
    #[arg(short = 'q', long)]
    pub quiet: bool,
}

/// Expand a leading `~` to the user's home directory.
#[must_use]
pub fn expand_tilde(path: &Path) -> PathBuf {
    let Some(rest) = path.to_str().and_then(|s| s.strip_prefix('~')) else {
        return path.to_path_buf();
    };
    let Some(base) = directories::BaseDirs::new() else {
        return path.to_path_buf();
    };
    let home = base.home_dir();
    match rest.strip_prefix('/') {
        Some(tail) => home.join(tail),
        None if rest.is_empty() => home.to_path_buf(),
        // ~otheruser is left alone; the shell handles that form.
        None => path.to_path_buf(),
    }
}

/// Translate parsed arguments into an engine configuration.
///
/// # Errors
///
/// Fails on an unparsable size limit or ignore pattern.
pub fn build_config(cli: &Cli) -> Result<ScanConfig> {
    let directory = cli
        .directory
        .clone()
        .unwrap_or_else(|| PathBuf::from("~/.Trash"));
    let mut config = ScanConfig::new(expand_tilde(&directory))
        .with_depth(if cli.depth < 0 {
            None
        } else {
            Some(cli.depth as usize)
        })
        .with_ages(cli.ages)
        .with_atime(cli.atime)
        .with_mtime(cli.mtime)
        .with_checksum(cli.checksum)
        .with_checksum_always(cli.checksum_always)
        .with_cache_attrs(cli.cache_attrs)
        .with_minimal_scan(cli.minimal_scan)
        .with_prune_dirs(cli.prune_dirs)
        .with_secure(cli.secure)
        .with_sudo(cli.sudo)
        .with_dryrun(cli.dryrun)
        .with_temp_directory(cli.temp_dir.as_deref().map(|p| expand_tilde(p)));

    if cli.days >= 0.0 {
        config = config.with_days(cli.days);
    }
    if let Some(database) = &cli.database {
        config = config.with_database(expand_tilde(database));
    }
    if let Some(limit) = &cli.max_size {
        let limit: SizeLimit = limit
            .parse()
            .with_context(|| format!("bad --max-size '{limit}'"))?;
        config = config.with_max_size(limit);
    }
    if let Some(window) = cli.check_window {
        config = config.with_check_window(window);
    }
    for pattern in &cli.ignore {
        let regex =
            Regex::new(pattern).with_context(|| format!("bad --ignore pattern '{pattern}'"))?;
        config = config.add_ignore(regex);
    }
    Ok(config)
}

/// Wire the hook slots from command templates and flags. The past-limit
/// slot falls back to the stock remover (or the trash relocator under
/// `--trash`) so the default invocation actually sweeps.
#[must_use]
pub fn build_hooks(cli: &Cli) -> Hooks {
    let on_past_limit = match (&cli.on_past_limit, cli.trash) {
        (Some(cmd), _) => Some(Action::command(cmd.clone())),
        (None, true) => Some(Action::callable(safe_trash)),
        (None, false) => Some(Action::callable(safe_remove)),
    };
    Hooks {
        on_added: cli.on_added.clone().map(Action::command),
        on_changed: cli.on_changed.clone().map(Action::command),
        on_removed: cli.on_removed.clone().map(Action::command),
        on_past_limit,
    }
}
