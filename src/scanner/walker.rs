//! Directory traversal.
//!
//! The walker produces the set of paths currently on disk, each with an
//! lstat snapshot. Traversal is depth-first with sorted children (so two
//! runs over the same tree emit identically), never follows symlinks, and
//! prunes whole subtrees whose names match an ignore pattern. Unreadable
//! corners log a warning and the walk continues.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use regex::Regex;
use walkdir::WalkDir;

use crate::config::ScanConfig;
use crate::state::entry::StatSnapshot;

/// One visited path with its metadata at visitation time.
#[derive(Debug, Clone)]
pub struct Visit {
    /// Absolute path of the visited object.
    pub path: PathBuf,
    /// Its lstat image.
    pub snapshot: StatSnapshot,
}

/// Whether a file name matches any ignore pattern.
#[must_use]
pub fn is_ignored_name(name: &OsStr, patterns: &[Regex]) -> bool {
    let name = name.to_string_lossy();
    patterns.iter().any(|p| p.is_match(&name))
}

/// Whether any component of `path` below `root` matches an ignore pattern.
/// Used to purge stored entries that have become ignored, including
/// everything beneath an ignored directory.
#[must_use]
pub fn is_ignored_path(root: &Path, path: &Path, patterns: &[Regex]) -> bool {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative
        .components()
        .any(|c| is_ignored_name(c.as_os_str(), patterns))
}

/// Depth-first walker over the scan root.
#[derive(Debug)]
pub struct Walker<'a> {
    root: &'a Path,
    depth: Option<usize>,
    ignore: &'a [Regex],
}

impl<'a> Walker<'a> {
    /// A walker configured from the scan options.
    #[must_use]
    pub fn new(config: &'a ScanConfig) -> Self {
        Self {
            root: &config.directory,
            depth: config.depth,
            ignore: &config.ignore,
        }
    }

    /// Traverse the tree and collect visitation records.
    ///
    /// Depth 0 enumerates only the root's children (subdirectories appear
    /// as entries but are not entered); depth N descends N levels; `None`
    /// is unbounded. The root itself is never an entry.
    #[must_use]
    pub fn walk(&self) -> Vec<Visit> {
        let mut walk = WalkDir::new(self.root)
            .min_depth(1)
            .follow_links(false)
            .sort_by_file_name();
        if let Some(depth) = self.depth {
            walk = walk.max_depth(depth.saturating_add(1));
        }

        let ignore = self.ignore;
        let mut visits = Vec::new();
        for result in walk
            .into_iter()
            .filter_entry(|e| !is_ignored_name(e.file_name(), ignore))
        {
            let entry = match result {
                Ok(entry) => entry,
                Err(e) => {
                    log::warn!("Could not read directory entry: {e}");
                    continue;
                }
            };
            // follow_links is off, so this is the lstat image; a symlink
            // is described by itself, not its target.
            match entry.metadata() {
                Ok(meta) => visits.push(Visit {
                    path: entry.into_path(),
                    snapshot: StatSnapshot::from_metadata(&meta),
                }),
                Err(e) => {
                    log::warn!("Could not stat '{}': {}", entry.path().display(), e);
                }
            }
        }
        visits
    }
}

/// Synthesize visits for a minimal scan by lstat-ing every stored path
/// instead of traversing. Returns the visits plus the paths whose stat
/// failed for a reason other than absence — those must not be classified
/// as removed.
pub fn revisit_index<'a>(
    paths: impl IntoIterator<Item = &'a PathBuf>,
) -> (Vec<Visit>, Vec<PathBuf>) {
    let mut visits = Vec::new();
    let mut skipped = Vec::new();
    for path in paths {
        match StatSnapshot::capture(path) {
            Ok(snapshot) => visits.push(Visit {
                path: path.clone(),
                snapshot,
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // Absent: leave it unvisited so it classifies as removed.
            }
            Err(e) => {
                log::warn!("Could not stat '{}': {}; skipping", path.display(), e);
                skipped.push(path.clone());
            }
        }
    }
    (visits, skipped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::default_ignores;
    use std::fs::{self, File};
    use std::io::Write;
    use tempfile::TempDir;

    fn build_tree(dir: &TempDir) {
        // root/
        //   a.txt
        //   sub/
        //     b.txt
        //     deep/
        //       c.txt
        let mut f = File::create(dir.path().join("a.txt")).unwrap();
        writeln!(f, "a").unwrap();
        fs::create_dir_all(dir.path().join("sub/deep")).unwrap();
        let mut f = File::create(dir.path().join("sub/b.txt")).unwrap();
        writeln!(f, "b").unwrap();
        let mut f = File::create(dir.path().join("sub/deep/c.txt")).unwrap();
        writeln!(f, "c").unwrap();
    }

    fn names(visits: &[Visit], root: &Path) -> Vec<String> {
        visits
            .iter()
            .map(|v| {
                v.path
                    .strip_prefix(root)
                    .unwrap()
                    .to_string_lossy()
                    .into_owned()
            })
            .collect()
    }

    #[test]
    fn test_unbounded_walk_visits_everything() {
        let dir = TempDir::new().unwrap();
        build_tree(&dir);
        let config = ScanConfig::new(dir.path());

        let visits = Walker::new(&config).walk();
        assert_eq!(
            names(&visits, dir.path()),
            vec!["a.txt", "sub", "sub/b.txt", "sub/deep", "sub/deep/c.txt"]
        );
    }

    #[test]
    fn test_depth_zero_enumerates_root_children_only() {
        let dir = TempDir::new().unwrap();
        build_tree(&dir);
        let config = ScanConfig::new(dir.path()).with_depth(Some(0));

        let visits = Walker::new(&config).walk();
        assert_eq!(names(&visits, dir.path()), vec!["a.txt", "sub"]);
    }

    #[test]
    fn test_depth_one_descends_one_level() {
        let dir = TempDir::new().unwrap();
        build_tree(&dir);
        let config = ScanConfig::new(dir.path()).with_depth(Some(1));

        let visits = Walker::new(&config).walk();
        assert_eq!(
            names(&visits, dir.path()),
            vec!["a.txt", "sub", "sub/b.txt", "sub/deep"]
        );
    }

    #[test]
    fn test_ignored_names_prune_subtrees() {
        let dir = TempDir::new().unwrap();
        build_tree(&dir);
        File::create(dir.path().join(".DS_Store")).unwrap();
        File::create(dir.path().join(".files.dat")).unwrap();

        let config = ScanConfig::new(dir.path())
            .with_ignore(default_ignores())
            .add_ignore(Regex::new("^sub$").unwrap());
        let visits = Walker::new(&config).walk();
        assert_eq!(names(&visits, dir.path()), vec!["a.txt"]);
    }

    #[test]
    fn test_snapshots_carry_file_types() {
        let dir = TempDir::new().unwrap();
        build_tree(&dir);
        let config = ScanConfig::new(dir.path());

        let visits = Walker::new(&config).walk();
        let by_name: std::collections::HashMap<_, _> = visits
            .iter()
            .map(|v| (v.path.file_name().unwrap().to_string_lossy(), &v.snapshot))
            .collect();
        assert!(by_name["a.txt"].is_file);
        assert!(by_name["sub"].is_dir);
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinks_reported_not_followed() {
        let dir = TempDir::new().unwrap();
        build_tree(&dir);
        std::os::unix::fs::symlink(dir.path().join("sub"), dir.path().join("link")).unwrap();

        let config = ScanConfig::new(dir.path()).with_depth(Some(0));
        let visits = Walker::new(&config).walk();
        let link = visits
            .iter()
            .find(|v| v.path.file_name().unwrap() == "link")
            .expect("symlink should be visited");
        assert!(link.snapshot.is_symlink);
        assert!(!link.snapshot.is_dir);
        // The target's contents never show up through the link.
        assert!(!visits.iter().any(|v| v.path.ends_with("link/b.txt")));
    }

    #[test]
    fn test_walk_of_missing_root_is_empty() {
        let config = ScanConfig::new("/no/such/root/anywhere");
        let visits = Walker::new(&config).walk();
        assert!(visits.is_empty());
    }

    #[test]
    fn test_is_ignored_path_covers_descendants() {
        let patterns = vec![Regex::new("^cache$").unwrap()];
        let root = Path::new("/r");
        assert!(is_ignored_path(root, Path::new("/r/cache"), &patterns));
        assert!(is_ignored_path(root, Path::new("/r/cache/x/y"), &patterns));
        assert!(!is_ignored_path(root, Path::new("/r/src/cache.rs"), &patterns));
    }

    #[test]
    fn test_revisit_index_separates_missing_from_present() {
        let dir = TempDir::new().unwrap();
        build_tree(&dir);
        let present = dir.path().join("a.txt");
        let missing = dir.path().join("gone.txt");

        let paths = vec![present.clone(), missing];
        let (visits, skipped) = revisit_index(paths.iter());
        assert_eq!(visits.len(), 1);
        assert_eq!(visits[0].path, present);
        assert!(skipped.is_empty());
    }
}
