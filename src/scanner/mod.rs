//! Scan orchestration.
//!
//! One scan runs the full state machine: lock → load state → walk →
//! reconcile against the shadow set → age and size policies → removal
//! sweep → save. Reconciliation classifies every on-disk path as added,
//! changed, unchanged or removed and dispatches the matching hook; a hook's
//! boolean decides whether the state update commits. The scan as a whole is
//! best-effort — only state-file I/O and lock failures abort it.
//!
//! Submodules:
//!
//! * [`walker`]: deterministic depth-bounded traversal.
//! * [`policy`]: age and size enforcement plus directory pruning.
//! * [`checkpoint`]: the hashed-byte flush trigger for long scans.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::PathBuf;
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use humansize::{format_size, DECIMAL};
use thiserror::Error;

pub mod checkpoint;
pub mod policy;
pub mod walker;

pub use checkpoint::Checkpointer;
pub use walker::{Visit, Walker};

use crate::actions::hook::{Action, HookContext, Hooks};
use crate::config::{ConfigError, ScanConfig};
use crate::state::entry::{Change, Entry, StatSnapshot};
use crate::state::store::{StateStore, StoreError};

/// Fatal scan failures. Per-entry trouble never lands here.
#[derive(Debug, Error)]
pub enum ScanError {
    /// The configuration is unusable.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The state database could not be read, parsed, locked or written.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Builds entries for newly discovered paths. Lets callers substitute an
/// enriched record (say, one whose checksum is seeded from an xattr)
/// without the engine knowing.
pub type EntryFactory = Box<dyn Fn(PathBuf, Option<&StatSnapshot>, DateTime<Utc>) -> Entry>;

/// What one scan observed and did.
#[derive(Debug, Clone, Default)]
pub struct ScanReport {
    /// Paths seen for the first time.
    pub added: usize,
    /// Tracked paths whose contents or timestamp changed.
    pub changed: usize,
    /// Tracked paths with nothing new.
    pub unchanged: usize,
    /// Tracked paths gone from disk.
    pub removed: usize,
    /// Past-limit dispatches from the age and size policies.
    pub past_limit: usize,
    /// Emptied directories pruned.
    pub pruned_dirs: usize,
    /// Bytes hashed while deciding change questions.
    pub bytes_hashed: u64,
    /// Total tracked size from the size policy's initial pass.
    pub total_size: Option<u64>,
    /// Oldest entry age observed, in fractional days.
    pub oldest_days: f64,
    /// Entries tracked when the scan concluded.
    pub tracked: usize,
}

impl ScanReport {
    /// One-line human summary.
    #[must_use]
    pub fn summary(&self) -> String {
        let mut s = format!(
            "{} tracked: {} added, {} changed, {} unchanged, {} removed, {} past limit",
            self.tracked, self.added, self.changed, self.unchanged, self.removed, self.past_limit
        );
        if self.bytes_hashed > 0 {
            s.push_str(&format!(
                ", {} hashed",
                format_size(self.bytes_hashed, DECIMAL)
            ));
        }
        s
    }
}

/// The scanning engine: owns the configuration, the hook set and the
/// in-memory entry index between scans.
pub struct Scanner {
    config: ScanConfig,
    hooks: Hooks,
    entry_factory: Option<EntryFactory>,
    store: StateStore,
    entries: BTreeMap<PathBuf, Entry>,
    db_mtime: Option<SystemTime>,
    dirty: bool,
    loaded: bool,
}

impl Scanner {
    /// Create a scanner over a validated configuration.
    ///
    /// # Errors
    ///
    /// Fails when the configuration does not validate.
    pub fn new(config: ScanConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let store = StateStore::new(config.database.clone());
        Ok(Self {
            config,
            hooks: Hooks::default(),
            entry_factory: None,
            store,
            entries: BTreeMap::new(),
            db_mtime: None,
            dirty: false,
            loaded: false,
        })
    }

    /// Replace the hook set.
    #[must_use]
    pub fn with_hooks(mut self, hooks: Hooks) -> Self {
        self.hooks = hooks;
        self
    }

    /// Install a factory for newly discovered entries.
    #[must_use]
    pub fn with_entry_factory<F>(mut self, factory: F) -> Self
    where
        F: Fn(PathBuf, Option<&StatSnapshot>, DateTime<Utc>) -> Entry + 'static,
    {
        self.entry_factory = Some(Box::new(factory));
        self
    }

    /// The active configuration.
    #[must_use]
    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    /// The tracked entries (empty until the first scan loads state).
    #[must_use]
    pub fn entries(&self) -> &BTreeMap<PathBuf, Entry> {
        &self.entries
    }

    /// Run one full scan. State is loaded on the first call and kept in
    /// memory across subsequent ones.
    ///
    /// # Errors
    ///
    /// Only state-store and lock failures abort; everything else is logged
    /// and the scan continues.
    pub fn scan(&mut self) -> Result<ScanReport, ScanError> {
        let now = Utc::now();
        if !self.loaded {
            self.load_state()?;
        }

        let mut entries = std::mem::take(&mut self.entries);
        let mut dirty = self.dirty;
        let result = self.scan_inner(&mut entries, &mut dirty, now);
        self.entries = entries;
        self.dirty = dirty;
        result
    }

    fn load_state(&mut self) -> Result<(), ScanError> {
        let loaded = self.store.load()?;
        self.entries = loaded.entries;
        self.db_mtime = loaded.mtime;
        // A legacy database gets rewritten in the current layout on the
        // next save.
        self.dirty = loaded.upgraded;
        self.loaded = true;
        Ok(())
    }

    fn scan_inner(
        &mut self,
        entries: &mut BTreeMap<PathBuf, Entry>,
        dirty: &mut bool,
        now: DateTime<Utc>,
    ) -> Result<ScanReport, ScanError> {
        let mut report = ScanReport::default();

        self.purge_ignored(entries, dirty);

        let traverse = self.should_traverse();
        let (visits, skipped) = if traverse {
            (Walker::new(&self.config).walk(), Vec::new())
        } else {
            walker::revisit_index(entries.keys())
        };

        let mut shadow: BTreeSet<PathBuf> = entries.keys().cloned().collect();
        for path in &skipped {
            // Stat trouble short of absence: leave the entry alone rather
            // than misreporting a removal.
            shadow.remove(path);
        }

        let mut checkpointer = Checkpointer::new(self.config.checkpoint_bytes);
        for visit in visits {
            self.reconcile_visit(
                entries,
                &mut shadow,
                visit,
                dirty,
                &mut report,
                &mut checkpointer,
                now,
            )?;
        }

        // Whatever is left in the shadow set has no on-disk counterpart.
        for path in std::mem::take(&mut shadow) {
            self.dispatch_removed(entries, &path, dirty, &mut report, now);
        }

        // Policies, strictly after reconciliation: age first, then size,
        // then pruning; a removal sweep after each commits what the hooks
        // took off disk.
        let age = policy::apply_age_policy(entries, &self.hooks, &self.config, now);
        report.past_limit += age.fired;
        report.oldest_days = age.oldest_days;
        if age.fired > 0 {
            self.sweep_missing(entries, dirty, &mut report, now);
        }

        let size = policy::apply_size_policy(entries, &self.hooks, &self.config, now);
        report.past_limit += size.fired;
        if self.config.max_size.is_some() {
            report.total_size = Some(size.total_size);
        }
        if size.fired > 0 {
            self.sweep_missing(entries, dirty, &mut report, now);
        }

        report.pruned_dirs = policy::prune_empty_dirs(entries, &self.config);
        if report.pruned_dirs > 0 {
            self.sweep_missing(entries, dirty, &mut report, now);
        }

        if entries.values().any(Entry::is_dirty) {
            *dirty = true;
        }
        report.tracked = entries.len();

        self.save_state(entries, dirty)?;
        Ok(report)
    }

    /// Forget entries whose names have become ignored, including whole
    /// subtrees under an ignored directory. No hooks fire for these.
    fn purge_ignored(&self, entries: &mut BTreeMap<PathBuf, Entry>, dirty: &mut bool) {
        let before = entries.len();
        entries.retain(|path, _| {
            if walker::is_ignored_path(&self.config.directory, path, &self.config.ignore) {
                log::debug!("Entry '{}' removed due to being ignored", path.display());
                false
            } else {
                true
            }
        });
        if entries.len() != before {
            *dirty = true;
        }
    }

    /// The minimal-scan gate: traversal is skipped when the database was
    /// saved at or after the root directory's last modification.
    fn should_traverse(&self) -> bool {
        if !self.config.minimal_scan {
            return true;
        }
        let dir_mtime = fs::metadata(&self.config.directory)
            .ok()
            .and_then(|m| m.modified().ok());
        match (self.db_mtime, dir_mtime) {
            (Some(db), Some(dir)) => {
                let traverse = db < dir;
                log::info!(
                    "Database mtime {} directory mtime, {} scan",
                    if traverse { "<" } else { ">=" },
                    if traverse { "will" } else { "will not" }
                );
                traverse
            }
            _ => true,
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn reconcile_visit(
        &mut self,
        entries: &mut BTreeMap<PathBuf, Entry>,
        shadow: &mut BTreeSet<PathBuf>,
        visit: Visit,
        dirty: &mut bool,
        report: &mut ScanReport,
        checkpointer: &mut Checkpointer,
        now: DateTime<Utc>,
    ) -> Result<(), ScanError> {
        let Visit { path, snapshot } = visit;
        let mut hashed = 0u64;

        if let Some(entry) = entries.get_mut(&path) {
            shadow.remove(&path);
            entry.set_info(snapshot);

            let (change, bytes) = entry.detect_change(&self.config, now);
            hashed = bytes;
            report.bytes_hashed += bytes;
            if entry.is_dirty() {
                *dirty = true;
            }

            match change {
                Change::Contents | Change::Timestamp => {
                    let letter = if change == Change::Contents { "M" } else { "T" };
                    log::info!("{letter} {}", path.display());
                    report.changed += 1;
                    let ctx = HookContext {
                        config: &self.config,
                        now,
                        age_days: None,
                    };
                    if dispatch_opt(&self.hooks.on_changed, entry, &ctx) {
                        entry.set_timestamp(now);
                        entry.commit_snapshot(&self.config, now);
                        *dirty = true;
                    }
                    // On false the previous snapshot stays put, so the
                    // change fires again next run.
                }
                Change::None => {
                    report.unchanged += 1;
                    if entry.commit_snapshot(&self.config, now) {
                        *dirty = true;
                    }
                }
            }
        } else {
            log::debug!("Entry '{}' is being seen for the first time", path.display());
            let mut entry = match &self.entry_factory {
                Some(factory) => factory(path.clone(), Some(&snapshot), now),
                None => Entry::from_snapshot(path.clone(), snapshot.clone(), now),
            };
            entry.set_info(snapshot);

            log::info!("A {}", path.display());
            report.added += 1;
            let ctx = HookContext {
                config: &self.config,
                now,
                age_days: None,
            };
            if dispatch_opt(&self.hooks.on_added, &mut entry, &ctx) {
                if self.config.use_checksum {
                    // Establish the content baseline right away so the
                    // first change has something to compare against.
                    let (_, bytes) = entry.ensure_checksum(&self.config, now);
                    hashed += bytes;
                    report.bytes_hashed += bytes;
                }
                entry.commit_snapshot(&self.config, now);
                entries.insert(path, entry);
                *dirty = true;
            }
            // On false the entry is discarded; the addition fires again
            // next run.
        }

        if checkpointer.record(hashed) && *dirty && !self.config.dryrun {
            log::info!(
                "Checkpointing state after {} of hashed data",
                format_size(checkpointer.accumulated(), DECIMAL)
            );
            let mtime = self
                .store
                .save(entries, self.config.temp_directory.as_deref())?;
            self.db_mtime = Some(mtime);
            checkpointer.reset();
        }
        Ok(())
    }

    /// Commit a removal: fire the hook for a path that is genuinely gone
    /// and, on a true return, drop it from the index.
    fn dispatch_removed(
        &self,
        entries: &mut BTreeMap<PathBuf, Entry>,
        path: &PathBuf,
        dirty: &mut bool,
        report: &mut ScanReport,
        now: DateTime<Utc>,
    ) {
        if fs::symlink_metadata(path).is_ok() {
            log::warn!(
                "'{}' is still present on disk; not treating as removed",
                path.display()
            );
            return;
        }
        let Some(mut entry) = entries.remove(path) else {
            log::warn!("Missing entry '{}' not in entries list", path.display());
            return;
        };

        log::info!("R {}", path.display());
        report.removed += 1;
        let ctx = HookContext {
            config: &self.config,
            now,
            age_days: None,
        };
        if dispatch_opt(&self.hooks.on_removed, &mut entry, &ctx) {
            log::debug!("Removing missing entry at '{}'", path.display());
            *dirty = true;
        } else {
            // Retained: the removal fires again next run.
            entries.insert(path.clone(), entry);
        }
    }

    /// Re-classify tracked paths that a policy hook took off disk.
    fn sweep_missing(
        &self,
        entries: &mut BTreeMap<PathBuf, Entry>,
        dirty: &mut bool,
        report: &mut ScanReport,
        now: DateTime<Utc>,
    ) {
        let missing: Vec<PathBuf> = entries
            .keys()
            .filter(|path| fs::symlink_metadata(path).is_err())
            .cloned()
            .collect();
        for path in missing {
            self.dispatch_removed(entries, &path, dirty, report, now);
        }
    }

    fn save_state(
        &mut self,
        entries: &mut BTreeMap<PathBuf, Entry>,
        dirty: &mut bool,
    ) -> Result<(), ScanError> {
        if !*dirty {
            log::debug!("State is unchanged; not saving");
            return Ok(());
        }
        if self.config.dryrun {
            log::debug!("dryrun: not saving state");
            return Ok(());
        }
        let mtime = self.store.save(entries, None)?;
        self.db_mtime = Some(mtime);
        for entry in entries.values_mut() {
            entry.clear_dirty();
        }
        *dirty = false;
        Ok(())
    }
}

fn dispatch_opt(action: &Option<Action>, entry: &mut Entry, ctx: &HookContext<'_>) -> bool {
    match action {
        Some(action) => action.dispatch(entry, ctx),
        None => true,
    }
}
