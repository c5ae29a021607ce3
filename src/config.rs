//! Engine configuration.
//!
//! [`ScanConfig`] carries every knob the scanner understands. Options follow
//! the builder idiom: construct with [`ScanConfig::new`] and layer `with_*`
//! calls on top.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use regex::Regex;
use thiserror::Error;

/// Default state-database file name, kept inside the scanned directory.
pub const DEFAULT_DATABASE: &str = ".files.dat";

/// File names that are never tracked. The state database itself must be on
/// this list, or the scanner would try to manage its own index.
pub const DEFAULT_IGNORE_PATTERNS: &[&str] =
    &[r"^\.files\.dat$", r"^\.DS_Store$", r"^\.localized$"];

/// Bytes of freshly hashed data between state checkpoints.
pub const DEFAULT_CHECKPOINT_BYTES: u64 = 10 * 1024 * 1024 * 1024;

/// Errors produced while building or validating a configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The scan root does not exist or is not a directory.
    #[error("'{0}' is not a valid directory")]
    NotADirectory(PathBuf),

    /// A size limit string was neither a byte count nor a percentage.
    #[error("invalid size limit '{0}': expected a byte count or \"N%\"")]
    InvalidSizeLimit(String),

    /// An ignore pattern failed to compile.
    #[error("invalid ignore pattern '{pattern}': {source}")]
    InvalidIgnorePattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

/// An aggregate size limit: absolute bytes, or a percentage of the capacity
/// of the volume hosting the scan root.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SizeLimit {
    /// Absolute limit in bytes.
    Bytes(u64),
    /// Percentage of the root volume's total capacity.
    Percent(f64),
}

impl FromStr for SizeLimit {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Some(pct) = s.strip_suffix('%') {
            let pct: f64 = pct
                .parse()
                .map_err(|_| ConfigError::InvalidSizeLimit(s.to_string()))?;
            if !(0.0..=100.0).contains(&pct) {
                return Err(ConfigError::InvalidSizeLimit(s.to_string()));
            }
            return Ok(SizeLimit::Percent(pct));
        }
        s.parse()
            .map(SizeLimit::Bytes)
            .map_err(|_| ConfigError::InvalidSizeLimit(s.to_string()))
    }
}

impl SizeLimit {
    /// Resolve the limit to a concrete byte count.
    ///
    /// Percentage limits query the capacity of the filesystem hosting
    /// `root`; `None` is returned when no hosting volume can be identified.
    #[must_use]
    pub fn resolve(&self, root: &Path) -> Option<u64> {
        match self {
            SizeLimit::Bytes(n) => Some(*n),
            SizeLimit::Percent(pct) => {
                volume_capacity(root).map(|cap| (cap as f64 * pct / 100.0) as u64)
            }
        }
    }
}

/// Total capacity in bytes of the volume hosting `root`, found by the
/// longest mount-point prefix match.
fn volume_capacity(root: &Path) -> Option<u64> {
    let root = root.canonicalize().unwrap_or_else(|_| root.to_path_buf());
    let disks = sysinfo::Disks::new_with_refreshed_list();
    disks
        .iter()
        .filter(|d| root.starts_with(d.mount_point()))
        .max_by_key(|d| d.mount_point().as_os_str().len())
        .map(|d| d.total_space())
}

/// Configuration for one scanner instance.
#[derive(Debug, Clone)]
pub struct ScanConfig {
    /// Root of the scanned subtree.
    pub directory: PathBuf,
    /// State database path. Bare file names resolve inside `directory`.
    pub database: PathBuf,
    /// Age threshold in (possibly fractional) days. `None` disables the
    /// age policy.
    pub days: Option<f64>,
    /// Aggregate size limit for the tracked set.
    pub max_size: Option<SizeLimit>,
    /// Descent depth: `Some(0)` enumerates only the root's children,
    /// `Some(n)` descends `n` levels, `None` is unbounded.
    pub depth: Option<usize>,
    /// Report entry ages instead of dispatching the age policy.
    pub ages: bool,
    /// Age entries by their last access time.
    pub atime: bool,
    /// Age entries by their last modification time.
    pub mtime: bool,
    /// Confirm mtime changes by re-hashing contents.
    pub use_checksum: bool,
    /// Periodically re-hash contents even when mtime is unchanged.
    pub use_checksum_always: bool,
    /// Minimum days between forced re-hashes under `use_checksum_always`.
    pub check_window: Option<i64>,
    /// Retain stat results across property reads within one scan.
    pub cache_attrs: bool,
    /// Skip traversal when the root's mtime predates the last save.
    pub minimal_scan: bool,
    /// Remove directories that have emptied out.
    pub prune_dirs: bool,
    /// Securely wipe file contents instead of unlinking.
    pub secure: bool,
    /// Retry failed removals and commands under sudo.
    pub sudo: bool,
    /// Dispatch hooks but never mutate the disk or the state database.
    pub dryrun: bool,
    /// File names matching any of these patterns are never tracked.
    pub ignore: Vec<Regex>,
    /// Directory for checkpoint temp files; defaults to the database's own
    /// directory. Must live on the database's filesystem for the rename to
    /// be atomic.
    pub temp_directory: Option<PathBuf>,
    /// Hashed bytes between mid-scan state checkpoints. Zero disables
    /// checkpointing.
    pub checkpoint_bytes: u64,
}

impl ScanConfig {
    /// Create a configuration for scanning `directory` with defaults: no
    /// policies armed, depth unbounded, state kept in `.files.dat` inside
    /// the directory.
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        let directory = directory.into();
        let database = directory.join(DEFAULT_DATABASE);
        Self {
            directory,
            database,
            days: None,
            max_size: None,
            depth: None,
            ages: false,
            atime: false,
            mtime: false,
            use_checksum: false,
            use_checksum_always: false,
            check_window: None,
            cache_attrs: false,
            minimal_scan: false,
            prune_dirs: false,
            secure: false,
            sudo: false,
            dryrun: false,
            ignore: default_ignores(),
            temp_directory: None,
            checkpoint_bytes: DEFAULT_CHECKPOINT_BYTES,
        }
    }

    /// Set the state database location. A bare file name (no path
    /// separator) is resolved inside the scanned directory, which keeps
    /// read-only volumes scannable by pointing the database elsewhere.
    #[must_use]
    pub fn with_database(mut self, database: impl Into<PathBuf>) -> Self {
        let database = database.into();
        self.database = if database.components().count() == 1 {
            self.directory.join(database)
        } else {
            database
        };
        self
    }

    /// Arm the age policy at `days` (fractional values allowed).
    #[must_use]
    pub fn with_days(mut self, days: f64) -> Self {
        self.days = Some(days);
        self
    }

    /// Arm the aggregate size policy.
    #[must_use]
    pub fn with_max_size(mut self, limit: SizeLimit) -> Self {
        self.max_size = Some(limit);
        self
    }

    /// Bound the walk depth. `None` means unbounded.
    #[must_use]
    pub fn with_depth(mut self, depth: Option<usize>) -> Self {
        self.depth = depth;
        self
    }

    /// Report ages only; the age policy dispatches no hooks.
    #[must_use]
    pub fn with_ages(mut self, ages: bool) -> Self {
        self.ages = ages;
        self
    }

    /// Age entries by last access time.
    #[must_use]
    pub fn with_atime(mut self, atime: bool) -> Self {
        self.atime = atime;
        self
    }

    /// Age entries by last modification time.
    #[must_use]
    pub fn with_mtime(mut self, mtime: bool) -> Self {
        self.mtime = mtime;
        self
    }

    /// Confirm mtime changes with a content hash.
    #[must_use]
    pub fn with_checksum(mut self, on: bool) -> Self {
        self.use_checksum = on;
        self
    }

    /// Re-hash contents periodically regardless of mtime. Implies
    /// [`with_checksum`](Self::with_checksum).
    #[must_use]
    pub fn with_checksum_always(mut self, on: bool) -> Self {
        self.use_checksum_always = on;
        if on {
            self.use_checksum = true;
        }
        self
    }

    /// Days between forced re-hashes under `use_checksum_always`.
    #[must_use]
    pub fn with_check_window(mut self, days: i64) -> Self {
        self.check_window = Some(days);
        self
    }

    /// Retain stat results across reads within a scan.
    #[must_use]
    pub fn with_cache_attrs(mut self, on: bool) -> Self {
        self.cache_attrs = on;
        self
    }

    /// Skip traversal when the root directory is unmodified since the last
    /// successful save.
    #[must_use]
    pub fn with_minimal_scan(mut self, on: bool) -> Self {
        self.minimal_scan = on;
        self
    }

    /// Remove directories that have emptied out during the scan.
    #[must_use]
    pub fn with_prune_dirs(mut self, on: bool) -> Self {
        self.prune_dirs = on;
        self
    }

    /// Securely wipe files instead of unlinking them.
    #[must_use]
    pub fn with_secure(mut self, on: bool) -> Self {
        self.secure = on;
        self
    }

    /// Retry failed removals under sudo.
    #[must_use]
    pub fn with_sudo(mut self, on: bool) -> Self {
        self.sudo = on;
        self
    }

    /// Dispatch hooks but never touch the disk or the database.
    #[must_use]
    pub fn with_dryrun(mut self, on: bool) -> Self {
        self.dryrun = on;
        self
    }

    /// Replace the ignore pattern list.
    #[must_use]
    pub fn with_ignore(mut self, patterns: Vec<Regex>) -> Self {
        self.ignore = patterns;
        self
    }

    /// Add one ignore pattern to the list.
    #[must_use]
    pub fn add_ignore(mut self, pattern: Regex) -> Self {
        self.ignore.push(pattern);
        self
    }

    /// Directory for checkpoint temp files.
    #[must_use]
    pub fn with_temp_directory(mut self, dir: Option<PathBuf>) -> Self {
        self.temp_directory = dir;
        self
    }

    /// Hashed-byte threshold between checkpoints (0 disables).
    #[must_use]
    pub fn with_checkpoint_bytes(mut self, bytes: u64) -> Self {
        self.checkpoint_bytes = bytes;
        self
    }

    /// Check that the configuration is usable.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::NotADirectory`] when the scan root is missing
    /// or not a directory.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.directory.is_dir() {
            return Err(ConfigError::NotADirectory(self.directory.clone()));
        }
        if self.minimal_scan && self.depth != Some(0) {
            // Subdirectory changes do not touch the root's mtime, so a
            // minimal scan below depth 0 goes blind to them.
            log::warn!("minimal scan with depth != 0 will miss subdirectory changes");
        }
        Ok(())
    }
}

/// Compile the default ignore patterns.
#[must_use]
pub fn default_ignores() -> Vec<Regex> {
    DEFAULT_IGNORE_PATTERNS
        .iter()
        .filter_map(|p| Regex::new(p).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_size_limit_parse_bytes() {
        assert_eq!("1024".parse::<SizeLimit>().unwrap(), SizeLimit::Bytes(1024));
        assert_eq!("0".parse::<SizeLimit>().unwrap(), SizeLimit::Bytes(0));
    }

    #[test]
    fn test_size_limit_parse_percent() {
        assert_eq!("15%".parse::<SizeLimit>().unwrap(), SizeLimit::Percent(15.0));
        assert_eq!("2.5%".parse::<SizeLimit>().unwrap(), SizeLimit::Percent(2.5));
    }

    #[test]
    fn test_size_limit_parse_invalid() {
        assert!("abc".parse::<SizeLimit>().is_err());
        assert!("-1".parse::<SizeLimit>().is_err());
        assert!("150%".parse::<SizeLimit>().is_err());
        assert!("%".parse::<SizeLimit>().is_err());
    }

    #[test]
    fn test_size_limit_resolve_bytes() {
        assert_eq!(SizeLimit::Bytes(42).resolve(Path::new("/")), Some(42));
    }

    #[test]
    fn test_database_defaults_into_directory() {
        let config = ScanConfig::new("/some/dir");
        assert_eq!(config.database, PathBuf::from("/some/dir/.files.dat"));
    }

    #[test]
    fn test_database_bare_name_resolves_into_directory() {
        let config = ScanConfig::new("/some/dir").with_database("state.dat");
        assert_eq!(config.database, PathBuf::from("/some/dir/state.dat"));
    }

    #[test]
    fn test_database_path_kept_verbatim() {
        let config = ScanConfig::new("/some/dir").with_database("/var/lib/state.dat");
        assert_eq!(config.database, PathBuf::from("/var/lib/state.dat"));
    }

    #[test]
    fn test_checksum_always_implies_checksum() {
        let config = ScanConfig::new("/tmp").with_checksum_always(true);
        assert!(config.use_checksum);
        assert!(config.use_checksum_always);
    }

    #[test]
    fn test_default_ignores_compile() {
        let patterns = default_ignores();
        assert_eq!(patterns.len(), DEFAULT_IGNORE_PATTERNS.len());
        assert!(patterns[0].is_match(".files.dat"));
        assert!(!patterns[0].is_match("files.dat"));
    }

    #[test]
    fn test_validate_rejects_missing_directory() {
        let config = ScanConfig::new("/definitely/not/a/real/dir/zzz");
        assert!(matches!(
            config.validate(),
            Err(ConfigError::NotADirectory(_))
        ));
    }
}
