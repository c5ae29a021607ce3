//! The removal protocol.
//!
//! Removal is best-effort and never raises: every failure is logged and
//! reported through the returned bool so a policy hook can decide whether
//! to commit the state update. The protocol distinguishes regular files,
//! symlinks and directories, supports secure wiping and sudo retries, and
//! always verifies the path is actually gone before claiming success.

use std::fs;
use std::path::Path;

use crate::actions::hook::run_shell;
use crate::config::ScanConfig;

/// The shred-like tool used for secure file wiping.
const SECURE_WIPE_CMD: &str = "shred -fu";

/// The dedicated tree-removal tool, used when present (faster than
/// recursing from here, and it keeps going past permission potholes).
const RM_TREE_BIN: &str = "/bin/rm";

/// Disk-mutation switches, extracted from the scan configuration so the
/// protocol functions do not need the whole thing.
#[derive(Debug, Clone, Copy, Default)]
pub struct RemoveOptions {
    /// Log what would happen, touch nothing.
    pub dryrun: bool,
    /// Retry failed operations under sudo.
    pub sudo: bool,
    /// Wipe file contents instead of unlinking.
    pub secure: bool,
}

impl RemoveOptions {
    /// Extract the removal-relevant switches from a scan configuration.
    #[must_use]
    pub fn from_config(config: &ScanConfig) -> Self {
        Self {
            dryrun: config.dryrun,
            sudo: config.sudo,
            secure: config.secure,
        }
    }
}

/// Whether the path is present, without following symlinks.
#[must_use]
pub fn path_exists(path: &Path) -> bool {
    fs::symlink_metadata(path).is_ok()
}

/// Unlink a single file or symlink if it exists.
///
/// # Errors
///
/// Propagates the unlink failure.
pub fn delete_file(path: &Path) -> std::io::Result<()> {
    if path_exists(path) {
        fs::remove_file(path)?;
    }
    Ok(())
}

/// Recursively delete a directory tree, delegating to the dedicated `rm`
/// binary when available.
fn delete_tree(path: &Path, dryrun: bool) -> bool {
    if Path::new(RM_TREE_BIN).exists() {
        run_shell(&format!("{RM_TREE_BIN} -fr"), path, dryrun)
    } else {
        match fs::remove_dir_all(path) {
            Ok(()) => true,
            Err(e) => {
                log::debug!("remove_dir_all('{}') failed: {}", path.display(), e);
                false
            }
        }
    }
}

/// Remove `path` from disk per the removal protocol. Returns whether the
/// path is absent afterwards (dryrun always claims success).
#[must_use]
pub fn remove_path(path: &Path, opts: &RemoveOptions) -> bool {
    if opts.dryrun {
        log::info!("dryrun: not removing '{}'", path.display());
        return true;
    }

    let Ok(meta) = fs::symlink_metadata(path) else {
        log::debug!("'{}' is already absent", path.display());
        return true;
    };

    let file_type = meta.file_type();
    if file_type.is_file() || file_type.is_symlink() {
        if opts.secure && file_type.is_file() {
            if !run_shell(SECURE_WIPE_CMD, path, false) {
                log::warn!("Could not securely remove '{}'", path.display());
                if opts.sudo {
                    run_shell(&format!("sudo {SECURE_WIPE_CMD}"), path, false);
                }
            }
        } else {
            log::debug!("Unlinking '{}'", path.display());
            if let Err(e) = delete_file(path) {
                log::debug!("Unlink of '{}' failed: {}", path.display(), e);
                if opts.sudo {
                    run_shell("sudo /bin/rm -f", path, false);
                }
            }
        }
    } else if file_type.is_dir() {
        log::debug!("Deleting tree '{}'", path.display());
        if !delete_tree(path, false) && opts.sudo {
            run_shell("sudo /bin/rm -fr", path, false);
        }
    }

    if path_exists(path) {
        log::error!("Could not remove: {}", path.display());
        false
    } else {
        true
    }
}

/// Move `path` to the system trash. Symlinks are removed outright, since a
/// trashed symlink preserves nothing useful. Returns whether the path is
/// absent afterwards (dryrun always claims success).
#[must_use]
pub fn trash_path(path: &Path, opts: &RemoveOptions) -> bool {
    let Ok(meta) = fs::symlink_metadata(path) else {
        log::debug!("'{}' is already absent", path.display());
        return true;
    };
    if meta.file_type().is_symlink() {
        return remove_path(path, opts);
    }
    if opts.dryrun {
        log::info!("dryrun: not trashing '{}'", path.display());
        return true;
    }

    if let Err(e) = trash::delete(path) {
        log::error!("Trash operation failed for '{}': {}", path.display(), e);
    }

    if path_exists(path) {
        log::error!("Could not trash: {}", path.display());
        false
    } else {
        true
    }
}
