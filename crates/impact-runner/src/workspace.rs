//! Run directories.
//!
//! | Variant | Created by | Released by |
//! |---------|-----------|-------------|
//! | [`Owned`](Workspace::Owned) | [`acquire`] | [`release`] or drop, unless [`persist`](Workspace::persist)ed |
//! | [`Borrowed`](Workspace::Borrowed) | caller | only [`release`] with `force` |

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::error::RunError;
use impact_core::digest::sha256_file;

const WORKSPACE_PREFIX: &str = "temp_impactT_";

#[derive(Debug)]
pub enum Workspace {
    /// Randomly named directory removed on release or drop.
    Owned(TempDir),
    Borrowed(PathBuf),
}

impl Workspace {
    /// Wraps a caller-supplied directory, creating it if missing.
    pub fn borrowed(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        fs::create_dir_all(&path)?;
        Ok(Self::Borrowed(path))
    }

    pub fn path(&self) -> &Path {
        match self {
            Self::Owned(td) => td.path(),
            Self::Borrowed(p) => p,
        }
    }

    pub fn is_owned(&self) -> bool {
        matches!(self, Self::Owned(_))
    }

    /// Gives up ownership so the directory outlives this value.
    pub fn persist(self) -> PathBuf {
        match self {
            Self::Owned(td) => {
                let path = td.keep();
                info!(path = %path.display(), "keeping workspace");
                path
            }
            Self::Borrowed(p) => p,
        }
    }
}

/// Creates a fresh randomly named directory under `parent`, or the system
/// temp dir when `parent` is `None`.
pub fn acquire(parent: Option<&Path>) -> io::Result<Workspace> {
    let parent = parent
        .map(Path::to_path_buf)
        .unwrap_or_else(std::env::temp_dir);
    fs::create_dir_all(&parent)?;
    let td = tempfile::Builder::new()
        .prefix(WORKSPACE_PREFIX)
        .tempdir_in(&parent)?;
    debug!(path = %td.path().display(), "acquired workspace");
    Ok(Workspace::Owned(td))
}

/// Deletes the workspace tree if it is owned or `force` is set. A borrowed
/// workspace released without `force` is left on disk.
///
/// Returns whether anything was deleted. A missing directory is not an
/// error.
pub fn release(workspace: Workspace, force: bool) -> io::Result<bool> {
    let path = workspace.path().to_path_buf();
    let result = match workspace {
        Workspace::Owned(td) => td.close(),
        Workspace::Borrowed(p) if force => fs::remove_dir_all(p),
        Workspace::Borrowed(_) => return Ok(false),
    };
    match result {
        Ok(()) => {
            info!(path = %path.display(), "removed workspace");
            Ok(true)
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

/// Relative path to SHA-256 digest for every regular file in the workspace.
pub fn inventory(workspace: &Workspace) -> Result<BTreeMap<String, String>, RunError> {
    let root = workspace.path();
    let mut files = BTreeMap::new();
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(root).to_path_buf();
            RunError::workspace(path, io::Error::other(e.to_string()))
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(root)
            .unwrap_or(entry.path())
            .to_string_lossy()
            .replace('\\', "/");
        files.insert(rel, sha256_file(entry.path())?);
    }
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn scratch(tag: &str) -> PathBuf {
        std::env::temp_dir().join(format!(
            "impact_ws_{}_{}_{}",
            tag,
            std::process::id(),
            Utc::now().timestamp_micros()
        ))
    }

    #[test]
    fn acquire_gives_distinct_owned_dirs() {
        let parent = scratch("acquire");
        let a = acquire(Some(&parent)).expect("a");
        let b = acquire(Some(&parent)).expect("b");
        assert_ne!(a.path(), b.path());
        assert!(a.is_owned());
        assert!(a.path().is_dir());
        assert_eq!(a.path().parent(), Some(parent.as_path()));
        let name = a.path().file_name().and_then(|s| s.to_str()).unwrap_or("");
        assert!(name.starts_with("temp_impactT_"), "{}", name);
        drop(a);
        drop(b);
        let _ = fs::remove_dir_all(parent);
    }

    #[test]
    fn owned_dir_is_removed_on_release_and_on_drop() {
        let parent = scratch("release");
        let ws = acquire(Some(&parent)).expect("ws");
        let path = ws.path().to_path_buf();
        fs::write(path.join("ImpactT.in"), "x").expect("write");
        assert!(release(ws, false).expect("release"));
        assert!(!path.exists());

        let dropped = acquire(Some(&parent)).expect("ws");
        let path = dropped.path().to_path_buf();
        drop(dropped);
        assert!(!path.exists());
        let _ = fs::remove_dir_all(parent);
    }

    #[test]
    fn release_of_vanished_owned_dir_reports_nothing_removed() {
        let parent = scratch("vanished");
        let ws = acquire(Some(&parent)).expect("ws");
        fs::remove_dir_all(ws.path()).expect("remove");
        assert!(!release(ws, false).expect("release"));
        let _ = fs::remove_dir_all(parent);
    }

    #[test]
    fn persisted_owned_dir_outlives_the_workspace() {
        let parent = scratch("persist");
        let ws = acquire(Some(&parent)).expect("ws");
        let path = ws.persist();
        assert!(path.is_dir());
        let _ = fs::remove_dir_all(parent);
    }

    #[test]
    fn borrowed_is_kept_unless_forced() {
        let dir = scratch("borrowed");
        let ws = Workspace::borrowed(&dir).expect("borrowed");
        assert!(!ws.is_owned());
        assert!(!release(ws, false).expect("release"));
        assert!(dir.is_dir());
        let ws = Workspace::borrowed(&dir).expect("borrowed");
        assert!(release(ws, true).expect("forced"));
        assert!(!dir.exists());
    }

    #[test]
    fn inventory_lists_nested_files_with_digests() {
        let dir = scratch("inventory");
        let ws = Workspace::borrowed(&dir).expect("borrowed");
        fs::create_dir_all(dir.join("sub")).expect("sub");
        fs::write(dir.join("fort.18"), "abc").expect("fort");
        fs::write(dir.join("sub").join("x"), "abc").expect("x");
        let inv = inventory(&ws).expect("inventory");
        assert_eq!(inv.len(), 2);
        assert_eq!(
            inv["fort.18"],
            "sha256:ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(inv["sub/x"], inv["fort.18"]);
        let _ = fs::remove_dir_all(dir);
    }
}
