//! Retention policies.
//!
//! Both policies run strictly after reconciliation, age first. The age
//! policy fires the past-limit hook for every entry older than the
//! threshold; the size policy fires it for the largest entries until the
//! tracked total fits the limit. Neither removes anything itself — whether
//! an entry actually leaves disk is the hook's call, and the scanner's
//! removal sweep notices afterwards.

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use humansize::{format_size, DECIMAL};

use crate::actions::hook::{HookContext, Hooks};
use crate::config::ScanConfig;
use crate::state::entry::Entry;

/// What the age policy saw and did.
#[derive(Debug, Default)]
pub(crate) struct AgeOutcome {
    /// Past-limit dispatches.
    pub fired: usize,
    /// Oldest age observed, in fractional days.
    pub oldest_days: f64,
}

/// Apply the age policy to every tracked entry.
///
/// In ages mode the policy only reports: one `age path` line per entry,
/// no dispatch. State updates still happen so later runs stay accurate.
pub(crate) fn apply_age_policy(
    entries: &mut BTreeMap<PathBuf, Entry>,
    hooks: &Hooks,
    config: &ScanConfig,
    now: DateTime<Utc>,
) -> AgeOutcome {
    let mut outcome = AgeOutcome::default();
    let Some(days) = config.days else {
        return outcome;
    };

    for (path, entry) in entries.iter_mut() {
        let age = entry.age_days(config, now);
        if age > outcome.oldest_days {
            outcome.oldest_days = age;
        }

        if config.ages {
            println!("{age:8.1} {}", path.display());
            continue;
        }

        if age >= days {
            log::info!("O {} ({:.1} days old)", path.display(), age);
            if let Some(hook) = &hooks.on_past_limit {
                let ctx = HookContext {
                    config,
                    now,
                    age_days: Some(age),
                };
                hook.dispatch(entry, &ctx);
            }
            outcome.fired += 1;
        }
    }

    if !config.ages && outcome.fired == 0 {
        log::info!(
            "No entries were beyond the age limit (oldest {:.1}d < {:.1}d)",
            outcome.oldest_days,
            days
        );
    }
    outcome
}

/// What the size policy saw and did.
#[derive(Debug, Default)]
pub(crate) struct SizeOutcome {
    /// Past-limit dispatches.
    pub fired: usize,
    /// Total tracked size from the initial sizing pass.
    pub total_size: u64,
}

/// Apply the aggregate size policy.
///
/// One initial sizing pass fixes every entry's cost; victims are taken in
/// descending size order (ties broken by path, for determinism) and their
/// initial-pass sizes deducted until the running total fits the limit.
pub(crate) fn apply_size_policy(
    entries: &mut BTreeMap<PathBuf, Entry>,
    hooks: &Hooks,
    config: &ScanConfig,
    now: DateTime<Utc>,
) -> SizeOutcome {
    let mut outcome = SizeOutcome::default();
    let Some(max_size) = &config.max_size else {
        return outcome;
    };
    let Some(limit) = max_size.resolve(&config.directory) else {
        log::error!(
            "Could not resolve size limit for '{}'; skipping size policy",
            config.directory.display()
        );
        return outcome;
    };

    let mut sized: Vec<(PathBuf, u64)> = entries
        .iter_mut()
        .map(|(path, entry)| (path.clone(), entry.size(config)))
        .collect();
    let mut total: u64 = sized.iter().map(|(_, size)| size).sum();
    outcome.total_size = total;

    if total <= limit {
        log::info!(
            "Directory is within size limits ({} <= {})",
            format_size(total, DECIMAL),
            format_size(limit, DECIMAL)
        );
        return outcome;
    }
    log::info!(
        "Directory exceeds the maximum size ({} > {})",
        format_size(total, DECIMAL),
        format_size(limit, DECIMAL)
    );

    // Largest first; the path tie-break keeps victim order stable between
    // runs over identical trees.
    sized.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

    for (path, size) in sized {
        if total < limit {
            break;
        }
        log::info!(
            "Purging entry {} to reduce size (saves {})",
            path.display(),
            format_size(size, DECIMAL)
        );
        if let Some(entry) = entries.get_mut(&path) {
            if let Some(hook) = &hooks.on_past_limit {
                let age = entry.age_days(config, now);
                let ctx = HookContext {
                    config,
                    now,
                    age_days: Some(age),
                };
                hook.dispatch(entry, &ctx);
            }
            outcome.fired += 1;
        }
        total = total.saturating_sub(size);
    }

    if total <= limit {
        log::info!(
            "Directory is now within size limits ({} <= {})",
            format_size(total, DECIMAL),
            format_size(limit, DECIMAL)
        );
    }
    outcome
}

/// Remove tracked directories that have emptied out, deepest first so a
/// whole emptied branch collapses in one run. Returns how many were
/// removed from disk.
pub(crate) fn prune_empty_dirs(
    entries: &mut BTreeMap<PathBuf, Entry>,
    config: &ScanConfig,
) -> usize {
    if !config.prune_dirs {
        return 0;
    }

    let mut dirs: Vec<PathBuf> = entries
        .keys()
        .filter(|path| {
            fs::symlink_metadata(path)
                .map(|m| m.file_type().is_dir())
                .unwrap_or(false)
        })
        .cloned()
        .collect();
    dirs.sort_by_key(|path| std::cmp::Reverse(path.components().count()));

    let mut pruned = 0;
    for path in dirs {
        let empty = fs::read_dir(&path)
            .map(|mut iter| iter.next().is_none())
            .unwrap_or(false);
        if !empty {
            continue;
        }
        log::info!("Pruning directory '{}'", path.display());
        if let Some(entry) = entries.get_mut(&path) {
            if entry.remove(config) {
                pruned += 1;
            }
        }
    }
    pruned
}
