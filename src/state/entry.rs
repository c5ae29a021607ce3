//! Tracked-object records.
//!
//! An [`Entry`] is the durable model of one filesystem path: when it was
//! first seen, what its metadata looked like, and (optionally) a content
//! checksum. The snapshot taken at the end of the previous reconciliation
//! (`prev_stamp` / `prev_info`) is what change detection compares against
//! on the next run.

use std::collections::hash_map::DefaultHasher;
use std::fs;
use std::hash::{Hash, Hasher};
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};

use crate::actions::remove::{self, RemoveOptions};
use crate::config::ScanConfig;

/// Read granularity for streaming checksum computation.
const HASH_BUF_SIZE: usize = 8192;

/// A cached lstat image. Symlinks are described by their own metadata,
/// never their target's.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatSnapshot {
    /// Size in bytes.
    pub size: u64,
    /// Last modification time.
    pub mtime: DateTime<Utc>,
    /// Last access time.
    pub atime: DateTime<Utc>,
    /// Inode number (0 where unavailable).
    pub inode: u64,
    /// Raw mode bits (0 where unavailable).
    pub mode: u32,
    /// Regular file?
    pub is_file: bool,
    /// Directory?
    pub is_dir: bool,
    /// Symbolic link?
    pub is_symlink: bool,
}

impl StatSnapshot {
    /// Capture the current lstat image of `path`.
    ///
    /// # Errors
    ///
    /// Propagates the underlying I/O error (typically `NotFound`).
    pub fn capture(path: &Path) -> io::Result<Self> {
        Ok(Self::from_metadata(&fs::symlink_metadata(path)?))
    }

    /// Build a snapshot from metadata already in hand.
    #[must_use]
    pub fn from_metadata(meta: &fs::Metadata) -> Self {
        let file_type = meta.file_type();
        Self {
            size: meta.len(),
            mtime: meta
                .modified()
                .map(DateTime::<Utc>::from)
                .unwrap_or(DateTime::<Utc>::UNIX_EPOCH),
            atime: meta
                .accessed()
                .map(DateTime::<Utc>::from)
                .unwrap_or(DateTime::<Utc>::UNIX_EPOCH),
            inode: inode_of(meta),
            mode: mode_of(meta),
            is_file: file_type.is_file(),
            is_dir: file_type.is_dir(),
            is_symlink: file_type.is_symlink(),
        }
    }
}

#[cfg(unix)]
fn inode_of(meta: &fs::Metadata) -> u64 {
    use std::os::unix::fs::MetadataExt;
    meta.ino()
}

#[cfg(not(unix))]
fn inode_of(_meta: &fs::Metadata) -> u64 {
    0
}

#[cfg(unix)]
fn mode_of(meta: &fs::Metadata) -> u32 {
    use std::os::unix::fs::MetadataExt;
    meta.mode()
}

#[cfg(not(unix))]
fn mode_of(_meta: &fs::Metadata) -> u32 {
    0
}

/// What the change predicate concluded about an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Change {
    /// Nothing observable changed.
    None,
    /// File contents (or mtime, when no checksum confirms it) changed.
    Contents,
    /// Only the canonical timestamp moved.
    Timestamp,
}

/// One tracked filesystem path and everything remembered about it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    path: PathBuf,
    /// Instant the path was first observed (or last re-stamped by an
    /// added/changed event).
    first_seen: DateTime<Utc>,
    info: Option<StatSnapshot>,
    checksum: Option<String>,
    last_check: Option<DateTime<Utc>>,
    prev_stamp: Option<DateTime<Utc>>,
    prev_info: Option<StatSnapshot>,
    #[serde(skip)]
    dirty: bool,
    #[serde(skip)]
    dir_size: Option<u64>,
}

impl Entry {
    /// Create a bare entry first seen at `first_seen`.
    #[must_use]
    pub fn new(path: PathBuf, first_seen: DateTime<Utc>) -> Self {
        Self {
            path,
            first_seen,
            info: None,
            checksum: None,
            last_check: None,
            prev_stamp: None,
            prev_info: None,
            dirty: false,
            dir_size: None,
        }
    }

    /// Create an entry from a walker visitation.
    #[must_use]
    pub fn from_snapshot(path: PathBuf, snapshot: StatSnapshot, first_seen: DateTime<Utc>) -> Self {
        let mut entry = Self::new(path, first_seen);
        entry.info = Some(snapshot);
        entry
    }

    /// The path this entry tracks.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// First-seen stamp (the fallback timestamp source).
    #[must_use]
    pub fn first_seen(&self) -> DateTime<Utc> {
        self.first_seen
    }

    /// Stored content checksum, if one has been computed.
    #[must_use]
    pub fn checksum_hex(&self) -> Option<&str> {
        self.checksum.as_deref()
    }

    /// Instant of the last checksum verification.
    #[must_use]
    pub fn last_check(&self) -> Option<DateTime<Utc>> {
        self.last_check
    }

    /// Whether this entry has unsaved mutations.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub(crate) fn clear_dirty(&mut self) {
        self.dirty = false;
    }

    /// Whether the path is still present (symlinks count even when
    /// dangling).
    #[must_use]
    pub fn exists(&self) -> bool {
        fs::symlink_metadata(&self.path).is_ok()
    }

    /// Install a fresh stat snapshot (the walker hands these out).
    pub fn set_info(&mut self, snapshot: StatSnapshot) {
        self.info = Some(snapshot);
        self.dir_size = None;
    }

    /// The current stat snapshot, re-captured unless attribute caching is
    /// enabled and a snapshot is already in hand. Returns `None` when the
    /// path cannot be stat'ed (the parent may already be gone).
    pub fn stat(&mut self, cache_attrs: bool) -> Option<&StatSnapshot> {
        if !cache_attrs {
            self.info = None;
        }
        if self.info.is_none() {
            match StatSnapshot::capture(&self.path) {
                Ok(snap) => self.info = Some(snap),
                Err(e) => {
                    log::debug!("Could not stat '{}': {}", self.path.display(), e);
                }
            }
        }
        self.info.as_ref()
    }

    /// Size in bytes: a regular file's length, a directory's recursive
    /// content total, and 0 for anything else.
    pub fn size(&mut self, config: &ScanConfig) -> u64 {
        if !config.cache_attrs {
            self.dir_size = None;
        }
        let Some(info) = self.stat(config.cache_attrs).cloned() else {
            return 0;
        };
        if info.is_file || info.is_symlink {
            info.size
        } else if info.is_dir {
            if self.dir_size.is_none() {
                self.dir_size = Some(directory_size(&self.path));
            }
            self.dir_size.unwrap_or(0)
        } else {
            0
        }
    }

    /// The canonical timestamp used for age calculations: access time if
    /// configured, else modification time if configured, else the
    /// first-seen stamp.
    pub fn timestamp(&mut self, config: &ScanConfig, _now: DateTime<Utc>) -> DateTime<Utc> {
        if config.atime {
            if let Some(info) = self.stat(config.cache_attrs) {
                return info.atime;
            }
        } else if config.mtime {
            if let Some(info) = self.stat(config.cache_attrs) {
                return info.mtime;
            }
        }
        self.first_seen
    }

    /// Override the first-seen stamp. Hook authors use this to backdate or
    /// reset an entry's age.
    pub fn set_timestamp(&mut self, stamp: DateTime<Utc>) {
        self.first_seen = stamp;
        self.dirty = true;
    }

    /// Age of the entry in fractional days relative to `now`.
    pub fn age_days(&mut self, config: &ScanConfig, now: DateTime<Utc>) -> f64 {
        let ts = self.timestamp(config, now);
        (now - ts).num_seconds() as f64 / 86_400.0
    }

    /// Whether the canonical timestamp differs from the one recorded at the
    /// end of the previous reconciliation.
    pub fn timestamp_has_changed(&mut self, config: &ScanConfig, now: DateTime<Utc>) -> bool {
        match self.prev_stamp {
            None => false,
            Some(prev) => self.timestamp(config, now) != prev,
        }
    }

    /// The change predicate. Returns what changed plus the number of bytes
    /// hashed while deciding (feeds the checkpoint accumulator).
    ///
    /// An entry with no previous snapshot cannot have "changed"; it is
    /// either brand new (handled as an addition) or freshly upgraded from
    /// the legacy format.
    pub fn detect_change(&mut self, config: &ScanConfig, now: DateTime<Utc>) -> (Change, u64) {
        let Some(prev) = self.prev_info.clone() else {
            return (Change::None, 0);
        };
        // The cached image may predate this scan; always re-stat here.
        let Some(current) = self.stat(false).cloned() else {
            return (Change::None, 0);
        };

        let mut hashed = 0u64;
        let contents_changed = if current.mtime != prev.mtime {
            if config.use_checksum && current.is_file {
                let old = self.checksum.take();
                let fresh = self.compute_checksum(config, now);
                if let Some((_, bytes)) = &fresh {
                    hashed += bytes;
                }
                match (old, fresh) {
                    (Some(old), Some((new, _))) => new != old,
                    // No baseline to compare against, or the hash failed:
                    // the mtime movement is authoritative.
                    _ => true,
                }
            } else {
                true
            }
        } else if config.use_checksum_always && current.is_file {
            let due = match (config.check_window, self.last_check) {
                (Some(window), Some(last)) => (now - last).num_days() >= window,
                _ => true,
            };
            if due {
                let old = self.checksum.take();
                let fresh = self.compute_checksum(config, now);
                if let Some((_, bytes)) = &fresh {
                    hashed += bytes;
                }
                match (old, fresh) {
                    (Some(old), Some((new, _))) => new != old,
                    // First verification just establishes the baseline.
                    _ => false,
                }
            } else {
                false
            }
        } else {
            false
        };

        if contents_changed {
            return (Change::Contents, hashed);
        }
        if self.timestamp_has_changed(config, now) {
            return (Change::Timestamp, hashed);
        }
        (Change::None, hashed)
    }

    /// Compute and store the SHA-1 of the file contents, returning the hex
    /// digest and the byte count consumed. Non-regular files yield `None`,
    /// as do read failures (logged, not fatal).
    ///
    /// When a check window is configured, `last_check` lands at
    /// `now - jitter(path)` rather than `now`, so a fleet of entries first
    /// hashed together drifts apart instead of all coming due at once.
    pub fn compute_checksum(
        &mut self,
        config: &ScanConfig,
        now: DateTime<Utc>,
    ) -> Option<(String, u64)> {
        let is_file = self.stat(config.cache_attrs).map_or(false, |i| i.is_file);
        if !is_file {
            return None;
        }
        log::debug!("Computing SHA1 for: {}", self.path.display());
        match sha1_file(&self.path) {
            Ok((hex, bytes)) => {
                self.checksum = Some(hex.clone());
                self.last_check = Some(match config.check_window {
                    Some(window) if window > 0 => {
                        now - Duration::days(stable_jitter(&self.path, window))
                    }
                    _ => now,
                });
                self.dirty = true;
                Some((hex, bytes))
            }
            Err(e) => {
                log::warn!("Could not hash '{}': {}", self.path.display(), e);
                None
            }
        }
    }

    /// Return the stored checksum, computing it first if absent. The second
    /// tuple field is the number of bytes hashed (0 on a cache hit).
    pub fn ensure_checksum(
        &mut self,
        config: &ScanConfig,
        now: DateTime<Utc>,
    ) -> (Option<String>, u64) {
        if let Some(sum) = self.checksum.clone() {
            return (Some(sum), 0);
        }
        match self.compute_checksum(config, now) {
            Some((hex, bytes)) => (Some(hex), bytes),
            None => (None, 0),
        }
    }

    /// Record the state observed at the conclusion of this reconciliation;
    /// the next run's change detection compares against it. Returns whether
    /// anything actually moved (unchanged entries stay clean so a no-op
    /// scan rewrites nothing).
    pub fn commit_snapshot(&mut self, config: &ScanConfig, now: DateTime<Utc>) -> bool {
        let stamp = self.timestamp(config, now);
        if self.info.is_none() {
            self.stat(true);
        }
        let info = self.info.clone();
        let moved = self.prev_stamp != Some(stamp) || self.prev_info != info;
        if moved {
            self.prev_stamp = Some(stamp);
            self.prev_info = info;
            self.dirty = true;
        }
        moved
    }

    /// Remove this entry's path from disk per the removal protocol
    /// (dryrun, secure wipe, subprocess tree delete, sudo retry, absence
    /// verification). Returns whether the path is gone.
    pub fn remove(&mut self, config: &ScanConfig) -> bool {
        let removed = remove::remove_path(&self.path, &RemoveOptions::from_config(config));
        if removed {
            self.info = None;
            self.dir_size = None;
        }
        removed
    }

    /// Move this entry's path to the system trash (symlinks are removed
    /// outright; the trash would not preserve them meaningfully).
    pub fn trash(&mut self, config: &ScanConfig) -> bool {
        let trashed = remove::trash_path(&self.path, &RemoveOptions::from_config(config));
        if trashed {
            self.info = None;
            self.dir_size = None;
        }
        trashed
    }
}

/// Recursive content total of a directory tree: the lstat sizes of every
/// non-directory beneath it. Unreadable corners are skipped.
fn directory_size(path: &Path) -> u64 {
    let mut total = 0u64;
    for entry in walkdir::WalkDir::new(path)
        .follow_links(false)
        .into_iter()
        .filter_map(Result::ok)
    {
        if entry.file_type().is_dir() {
            continue;
        }
        if let Ok(meta) = entry.metadata() {
            total += meta.len();
        }
    }
    total
}

/// Streaming SHA-1 of a file, returning the hex digest and byte count.
fn sha1_file(path: &Path) -> io::Result<(String, u64)> {
    let file = fs::File::open(path)?;
    let mut reader = BufReader::new(file);
    let mut hasher = Sha1::new();
    let mut buf = [0u8; HASH_BUF_SIZE];
    let mut total = 0u64;
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        total += n as u64;
    }
    Ok((hex::encode(hasher.finalize()), total))
}

/// Per-entry jitter in `[0, window)` days, stable across runs: a hash of
/// the path, not a roll of the dice.
fn stable_jitter(path: &Path, window: i64) -> i64 {
    let mut hasher = DefaultHasher::new();
    path.hash(&mut hasher);
    (hasher.finish() % window.max(1) as u64) as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_file(dir: &TempDir, name: &str, contents: &[u8]) -> PathBuf {
        let path = dir.path().join(name);
        let mut f = File::create(&path).unwrap();
        f.write_all(contents).unwrap();
        path
    }

    fn plain_config(dir: &TempDir) -> ScanConfig {
        ScanConfig::new(dir.path())
    }

    #[test]
    fn test_snapshot_capture_regular_file() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "a.txt", b"hello");

        let snap = StatSnapshot::capture(&path).unwrap();
        assert_eq!(snap.size, 5);
        assert!(snap.is_file);
        assert!(!snap.is_dir);
        assert!(!snap.is_symlink);
        #[cfg(unix)]
        assert_ne!(snap.inode, 0);
    }

    #[test]
    fn test_snapshot_capture_missing_path() {
        assert!(StatSnapshot::capture(Path::new("/no/such/path/zzz")).is_err());
    }

    #[test]
    fn test_size_of_file_and_directory() {
        let dir = TempDir::new().unwrap();
        write_file(&dir, "a.txt", b"12345");
        let sub = dir.path().join("sub");
        fs::create_dir(&sub).unwrap();
        let mut f = File::create(sub.join("b.txt")).unwrap();
        f.write_all(b"1234567890").unwrap();

        let config = plain_config(&dir);
        let mut file_entry = Entry::new(dir.path().join("a.txt"), Utc::now());
        assert_eq!(file_entry.size(&config), 5);

        let mut dir_entry = Entry::new(dir.path().to_path_buf(), Utc::now());
        assert_eq!(dir_entry.size(&config), 15);
    }

    #[test]
    fn test_checksum_computed_and_cached() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "a.txt", b"hello world");
        let config = plain_config(&dir).with_cache_attrs(true);
        let now = Utc::now();

        let mut entry = Entry::new(path, now);
        let (sum, bytes) = entry.ensure_checksum(&config, now);
        // Well-known SHA-1 of "hello world".
        assert_eq!(
            sum.as_deref(),
            Some("2aae6c35c94fcfb415dbe95f408b9ce91ee846ed")
        );
        assert_eq!(bytes, 11);
        assert!(entry.is_dirty());

        let (again, bytes) = entry.ensure_checksum(&config, now);
        assert_eq!(again, sum);
        assert_eq!(bytes, 0);
    }

    #[test]
    fn test_checksum_none_for_directory() {
        let dir = TempDir::new().unwrap();
        let config = plain_config(&dir);
        let now = Utc::now();

        let mut entry = Entry::new(dir.path().to_path_buf(), now);
        assert!(entry.compute_checksum(&config, now).is_none());
    }

    #[test]
    fn test_detect_change_without_previous_snapshot() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "a.txt", b"data");
        let config = plain_config(&dir);
        let now = Utc::now();

        let mut entry = Entry::new(path, now);
        assert_eq!(entry.detect_change(&config, now).0, Change::None);
    }

    #[test]
    fn test_detect_change_on_mtime_move() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "a.txt", b"data");
        let config = plain_config(&dir);
        let now = Utc::now();

        let mut entry = Entry::new(path.clone(), now);
        entry.commit_snapshot(&config, now);
        assert_eq!(entry.detect_change(&config, now).0, Change::None);

        let later = filetime::FileTime::from_unix_time(now.timestamp() + 3600, 0);
        filetime::set_file_mtime(&path, later).unwrap();
        assert_eq!(entry.detect_change(&config, now).0, Change::Contents);
    }

    #[test]
    fn test_checksum_suppresses_touch_without_content_change() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "a.txt", b"same contents");
        let config = plain_config(&dir).with_checksum(true);
        let now = Utc::now();

        let mut entry = Entry::new(path.clone(), now);
        entry.ensure_checksum(&config, now);
        entry.commit_snapshot(&config, now);

        // Touch mtime only; the hash confirms nothing really changed.
        let later = filetime::FileTime::from_unix_time(now.timestamp() + 3600, 0);
        filetime::set_file_mtime(&path, later).unwrap();
        assert_eq!(entry.detect_change(&config, now).0, Change::None);
    }

    #[test]
    fn test_checksum_confirms_real_content_change() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "a.txt", b"before");
        let config = plain_config(&dir).with_checksum(true);
        let now = Utc::now();

        let mut entry = Entry::new(path.clone(), now);
        entry.ensure_checksum(&config, now);
        entry.commit_snapshot(&config, now);

        std::thread::sleep(std::time::Duration::from_millis(20));
        fs::write(&path, b"after!").unwrap();
        assert_eq!(entry.detect_change(&config, now).0, Change::Contents);
    }

    #[test]
    fn test_checksum_always_respects_window() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "a.txt", b"steady");
        let config = plain_config(&dir)
            .with_checksum_always(true)
            .with_check_window(1_000_000);
        let now = Utc::now();

        let mut entry = Entry::new(path, now);
        entry.ensure_checksum(&config, now);
        entry.commit_snapshot(&config, now);

        // last_check is within the (enormous) window, so no re-hash and no
        // change is reported.
        let (change, hashed) = entry.detect_change(&config, now);
        assert_eq!(change, Change::None);
        assert_eq!(hashed, 0);
    }

    #[test]
    fn test_checksum_always_rehash_detects_silent_corruption() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "a.txt", b"original");
        let config = plain_config(&dir).with_checksum_always(true);
        let now = Utc::now();

        let mut entry = Entry::new(path.clone(), now);
        entry.ensure_checksum(&config, now);
        entry.commit_snapshot(&config, now);

        // Rewrite the contents but restore the old mtime, simulating
        // bit-rot that stat cannot see.
        let old_mtime = fs::symlink_metadata(&path).unwrap().modified().unwrap();
        fs::write(&path, b"corrupt!").unwrap();
        filetime::set_file_mtime(&path, filetime::FileTime::from_system_time(old_mtime)).unwrap();
        entry.set_info(StatSnapshot::capture(&path).unwrap());

        // No window configured: every scan re-verifies.
        let (change, hashed) = entry.detect_change(&config, now);
        assert_eq!(change, Change::Contents);
        assert_eq!(hashed, 8);
    }

    #[test]
    fn test_timestamp_precedence() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "a.txt", b"x");
        let now = Utc::now();
        let mut entry = Entry::new(path, now - Duration::days(10));

        let stamp_cfg = plain_config(&dir);
        assert_eq!(
            entry.timestamp(&stamp_cfg, now),
            now - Duration::days(10)
        );

        let mtime_cfg = plain_config(&dir).with_mtime(true);
        let snap = StatSnapshot::capture(entry.path()).unwrap();
        assert_eq!(entry.timestamp(&mtime_cfg, now), snap.mtime);

        // atime wins over mtime when both are configured.
        let both_cfg = plain_config(&dir).with_mtime(true).with_atime(true);
        assert_eq!(entry.timestamp(&both_cfg, now), snap.atime);
    }

    #[test]
    fn test_age_days_fractional() {
        let dir = TempDir::new().unwrap();
        let config = plain_config(&dir);
        let now = Utc::now();
        let mut entry = Entry::new(dir.path().join("ghost"), now - Duration::hours(36));
        let age = entry.age_days(&config, now);
        assert!((age - 1.5).abs() < 0.01, "age was {age}");
    }

    #[test]
    fn test_set_timestamp_marks_dirty() {
        let now = Utc::now();
        let mut entry = Entry::new(PathBuf::from("/x"), now);
        assert!(!entry.is_dirty());
        entry.set_timestamp(now - Duration::days(30));
        assert!(entry.is_dirty());
        assert_eq!(entry.first_seen(), now - Duration::days(30));
    }

    #[test]
    fn test_commit_snapshot_idempotent() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "a.txt", b"x");
        let config = plain_config(&dir);
        let now = Utc::now();

        let mut entry = Entry::new(path, now);
        assert!(entry.commit_snapshot(&config, now));
        entry.clear_dirty();
        assert!(!entry.commit_snapshot(&config, now));
        assert!(!entry.is_dirty());
    }

    #[test]
    fn test_stable_jitter_is_deterministic_and_bounded() {
        let a = stable_jitter(Path::new("/some/file"), 14);
        let b = stable_jitter(Path::new("/some/file"), 14);
        assert_eq!(a, b);
        assert!((0..14).contains(&a));
    }

    #[test]
    fn test_remove_regular_file() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "doomed.txt", b"bye");
        let config = plain_config(&dir);

        let mut entry = Entry::new(path.clone(), Utc::now());
        assert!(entry.remove(&config));
        assert!(!path.exists());
    }

    #[test]
    fn test_remove_honors_dryrun() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "kept.txt", b"still here");
        let config = plain_config(&dir).with_dryrun(true);

        let mut entry = Entry::new(path.clone(), Utc::now());
        assert!(entry.remove(&config));
        assert!(path.exists());
    }
}
