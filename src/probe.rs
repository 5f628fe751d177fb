//! Recursive filesystem size probing
//!
//! Sums logical file sizes plus each directory entry's own reported size,
//! mirroring the convention that directory metadata overhead counts once
//! per node in the tree. I/O problems never fail a probe; they degrade to
//! partial counts with warnings for the caller to log.

use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

/// Result of sizing one subtree.
#[derive(Debug, Clone, Default)]
pub struct ProbeOutcome {
    /// Logical bytes found under the root, including the root entry itself.
    pub size: u64,
    /// Entries that could not be read and contributed zero bytes.
    pub warnings: Vec<ProbeWarning>,
}

/// A path that could not be sized during a probe.
#[derive(Debug, Clone)]
pub struct ProbeWarning {
    pub path: PathBuf,
    pub reason: String,
}

/// Size the subtree rooted at `root`.
///
/// A missing root yields size 0 with one warning. Permission-denied
/// entries contribute 0 and traversal continues. Symbolic links are not
/// followed, so every filesystem object is visited at most once.
pub fn probe(root: &Path) -> ProbeOutcome {
    probe_excluding(root, &[])
}

/// Size the subtree rooted at `root`, skipping any subtree rooted at one
/// of `excluded`. Used to keep a composite project's workspace total from
/// double counting sub-project workspaces that are sized on the children.
pub fn probe_excluding(root: &Path, excluded: &[PathBuf]) -> ProbeOutcome {
    let mut outcome = ProbeOutcome::default();

    let walker = WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|entry| !excluded.iter().any(|ex| entry.path() == ex.as_path()));

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                let path = err
                    .path()
                    .map(Path::to_path_buf)
                    .unwrap_or_else(|| root.to_path_buf());
                outcome.warnings.push(ProbeWarning {
                    path,
                    reason: err.to_string(),
                });
                continue;
            }
        };

        // With follow_links disabled this is the entry's own metadata, so
        // a symlink contributes its link size rather than its target's.
        match entry.metadata() {
            Ok(metadata) => outcome.size += metadata.len(),
            Err(err) => outcome.warnings.push(ProbeWarning {
                path: entry.path().to_path_buf(),
                reason: err.to_string(),
            }),
        }
    }

    debug!(
        root = %root.display(),
        size = outcome.size,
        warnings = outcome.warnings.len(),
        "probed directory tree"
    );
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn dir_overhead(path: &Path) -> u64 {
        fs::metadata(path).map(|m| m.len()).unwrap_or(0)
    }

    #[test]
    fn sums_files_plus_directory_overhead() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("artifacts");
        fs::create_dir(&root).unwrap();
        fs::write(root.join("log.txt"), vec![0u8; 300]).unwrap();
        fs::write(root.join("archive.bin"), vec![0u8; 700]).unwrap();

        let outcome = probe(&root);
        assert_eq!(outcome.size, 1000 + dir_overhead(&root));
        assert!(outcome.warnings.is_empty());
    }

    #[test]
    fn empty_directory_returns_only_its_own_entry_size() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("empty");
        fs::create_dir(&root).unwrap();

        let outcome = probe(&root);
        assert_eq!(outcome.size, dir_overhead(&root));
    }

    #[test]
    fn nested_directories_count_once_per_node() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("root");
        let sub = root.join("sub");
        fs::create_dir_all(&sub).unwrap();
        fs::write(sub.join("data"), vec![0u8; 128]).unwrap();

        let outcome = probe(&root);
        assert_eq!(outcome.size, 128 + dir_overhead(&root) + dir_overhead(&sub));
    }

    #[test]
    fn missing_root_degrades_to_zero_with_warning() {
        let tmp = TempDir::new().unwrap();
        let outcome = probe(&tmp.path().join("does-not-exist"));
        assert_eq!(outcome.size, 0);
        assert_eq!(outcome.warnings.len(), 1);
    }

    #[test]
    fn excluded_subtrees_are_skipped() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("ws");
        let keep = root.join("keep");
        let skip = root.join("skip");
        fs::create_dir_all(&keep).unwrap();
        fs::create_dir_all(&skip).unwrap();
        fs::write(keep.join("a"), vec![0u8; 50]).unwrap();
        fs::write(skip.join("b"), vec![0u8; 5000]).unwrap();

        let outcome = probe_excluding(&root, &[skip.clone()]);
        assert_eq!(
            outcome.size,
            50 + dir_overhead(&root) + dir_overhead(&keep)
        );
    }

    #[cfg(unix)]
    #[test]
    fn symlinks_are_not_followed() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("root");
        let target = tmp.path().join("target");
        fs::create_dir_all(&root).unwrap();
        fs::create_dir_all(&target).unwrap();
        fs::write(target.join("big"), vec![0u8; 10_000]).unwrap();
        std::os::unix::fs::symlink(&target, root.join("link")).unwrap();

        let outcome = probe(&root);
        // target's 10k bytes must not leak into the root total
        assert!(outcome.size < 10_000);
    }
}
