//! Durable state storage.
//!
//! The store is a single opaque blob mapping paths to [`Entry`] records:
//! a magic header, a format version and a `BTreeMap` (ordered, so repeated
//! saves of identical state are byte-identical). Two on-disk layouts load:
//! the current one, and the legacy bare-timestamp map produced by the old
//! cleanup tool, which is upgraded in memory and rewritten in the current
//! layout on the next save. Saves go through a temp file, fsync and rename
//! so a crash never leaves a torn database behind.

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use thiserror::Error;

use super::entry::Entry;
use super::lock::{FileLock, LockError};

/// Identifies the current serialization layout.
const STATE_MAGIC: [u8; 4] = *b"DSDB";
/// Current layout version.
const STATE_VERSION: u32 = 2;

/// Errors from loading or saving the state database. All of these abort
/// the scan; per-entry problems never surface here.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The database exists but cannot be parsed in any known layout.
    /// Operator intervention required.
    #[error("state file '{path}' is corrupt: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    /// The database was written by a newer layout than this build knows.
    #[error("state file '{path}' has unsupported format version {found} (expected {expected})")]
    UnsupportedVersion {
        path: PathBuf,
        found: u32,
        expected: u32,
    },

    /// The database could not be read.
    #[error("could not read state file '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The database could not be written.
    #[error("could not write state file '{path}': {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Lock acquisition failed.
    #[error(transparent)]
    Lock(#[from] LockError),
}

#[derive(Serialize)]
struct StateFileRef<'a> {
    magic: [u8; 4],
    version: u32,
    entries: &'a BTreeMap<PathBuf, Entry>,
}

#[derive(Deserialize)]
struct StateFile {
    magic: [u8; 4],
    version: u32,
    entries: BTreeMap<PathBuf, Entry>,
}

/// The legacy layout: bare first-seen stamps keyed by path.
type LegacyState = BTreeMap<PathBuf, DateTime<Utc>>;

/// Result of loading the database.
#[derive(Debug, Default)]
pub struct LoadedState {
    /// The tracked entries, keyed by path.
    pub entries: BTreeMap<PathBuf, Entry>,
    /// Whether the data arrived in the legacy layout and needs rewriting.
    pub upgraded: bool,
    /// Modification time of the database file, if it existed.
    pub mtime: Option<SystemTime>,
}

/// Handle on a state-database file.
#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    /// A store backed by `path`. Nothing is touched until load or save.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The database file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the database under a shared lock. A missing file yields an
    /// empty map; anything unparsable is fatal.
    ///
    /// # Errors
    ///
    /// [`StoreError::Corrupt`] / [`StoreError::UnsupportedVersion`] for bad
    /// data, [`StoreError::Read`] / [`StoreError::Lock`] for I/O trouble.
    pub fn load(&self) -> Result<LoadedState, StoreError> {
        if !self.path.is_file() {
            log::debug!("State database '{}' does not exist yet", self.path.display());
            return Ok(LoadedState::default());
        }

        let mut buf = Vec::new();
        {
            let mut lock = FileLock::shared(&self.path)?;
            lock.file_mut()
                .read_to_end(&mut buf)
                .map_err(|source| StoreError::Read {
                    path: self.path.clone(),
                    source,
                })?;
        }

        let mtime = fs::metadata(&self.path)
            .ok()
            .and_then(|m| m.modified().ok());
        if buf.is_empty() {
            // An interrupted first save can leave a zero-byte file behind.
            log::warn!("State database '{}' is empty", self.path.display());
            return Ok(LoadedState {
                entries: BTreeMap::new(),
                upgraded: false,
                mtime,
            });
        }

        let (entries, upgraded) = self.decode(&buf)?;

        log::info!(
            "Loaded state data from '{}' ({} entries)",
            self.path.display(),
            entries.len()
        );
        Ok(LoadedState {
            entries,
            upgraded,
            mtime,
        })
    }

    fn decode(&self, buf: &[u8]) -> Result<(BTreeMap<PathBuf, Entry>, bool), StoreError> {
        match bincode::deserialize::<StateFile>(buf) {
            Ok(state) if state.magic == STATE_MAGIC => {
                if state.version != STATE_VERSION {
                    return Err(StoreError::UnsupportedVersion {
                        path: self.path.clone(),
                        found: state.version,
                        expected: STATE_VERSION,
                    });
                }
                Ok((state.entries, false))
            }
            _ => match bincode::deserialize::<LegacyState>(buf) {
                Ok(legacy) => {
                    log::info!(
                        "Upgrading legacy state data in '{}' ({} stamps)",
                        self.path.display(),
                        legacy.len()
                    );
                    let entries = legacy
                        .into_iter()
                        .map(|(path, stamp)| (path.clone(), Entry::new(path, stamp)))
                        .collect();
                    Ok((entries, true))
                }
                Err(e) => Err(StoreError::Corrupt {
                    path: self.path.clone(),
                    reason: e.to_string(),
                }),
            },
        }
    }

    /// Write the database atomically under an exclusive lock: serialize to
    /// a fresh temp file (in `temp_dir`, or next to the database), fsync,
    /// rename over the real path. A failed write leaves no partial file.
    /// Returns the new database mtime.
    ///
    /// # Errors
    ///
    /// [`StoreError::Write`] for serialization or I/O failures,
    /// [`StoreError::Lock`] when the exclusive lock cannot be taken.
    pub fn save(
        &self,
        entries: &BTreeMap<PathBuf, Entry>,
        temp_dir: Option<&Path>,
    ) -> Result<SystemTime, StoreError> {
        let parent = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        if !parent.exists() {
            log::info!("Creating state database directory '{}'", parent.display());
            fs::create_dir_all(parent).map_err(|source| StoreError::Write {
                path: self.path.clone(),
                source,
            })?;
        }

        let _lock = FileLock::exclusive(&self.path)?;

        let scratch_dir = temp_dir.unwrap_or(parent);
        log::debug!(
            "Writing updated state data to '{}' (via '{}')",
            self.path.display(),
            scratch_dir.display()
        );

        // NamedTempFile unlinks itself when dropped on any error path below.
        let tmp = NamedTempFile::new_in(scratch_dir).map_err(|source| StoreError::Write {
            path: self.path.clone(),
            source,
        })?;

        let state = StateFileRef {
            magic: STATE_MAGIC,
            version: STATE_VERSION,
            entries,
        };
        let mut writer = BufWriter::new(tmp.as_file());
        bincode::serialize_into(&mut writer, &state).map_err(|e| StoreError::Write {
            path: self.path.clone(),
            source: io::Error::other(e),
        })?;
        writer.flush().map_err(|source| StoreError::Write {
            path: self.path.clone(),
            source,
        })?;
        drop(writer);

        tmp.as_file()
            .sync_all()
            .map_err(|source| StoreError::Write {
                path: self.path.clone(),
                source,
            })?;
        tmp.persist(&self.path).map_err(|e| StoreError::Write {
            path: self.path.clone(),
            source: e.error,
        })?;

        // The rename carried the temp file's write time along, which
        // predates the directory-mtime bump the rename itself caused.
        // Stamp the database with the completion instant so the
        // minimal-scan gate sees the save as the latest event.
        let now = SystemTime::now();
        let mtime = fs::File::options()
            .write(true)
            .open(&self.path)
            .and_then(|f| f.set_modified(now).map(|()| now))
            .or_else(|_| fs::metadata(&self.path).and_then(|m| m.modified()))
            .unwrap_or(now);
        log::debug!(
            "Wrote state data to '{}' ({} entries)",
            self.path.display(),
            entries.len()
        );
        Ok(mtime)
    }
}
