//! Filesystem utilities for provisioning
//!
//! Bounded breadth-first file search and wholesale directory replacement.

use crate::core::error::{InstallError, Result};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Bounds for [`find_file_by_name`].
#[derive(Debug, Clone, Copy)]
pub struct SearchLimits {
    /// Deepest directory level visited; the root is depth 0.
    pub max_depth: usize,
    /// Maximum number of directories read before giving up.
    pub max_dirs: usize,
}

impl Default for SearchLimits {
    fn default() -> Self {
        Self {
            max_depth: 8,
            max_dirs: 4096,
        }
    }
}

/// Breadth-first search under `root` for a regular file named `name`.
///
/// Symlinks are never followed, so link cycles cannot trap the search, and
/// the depth and directory caps bound the work on pathological trees.
/// Entries within a directory are visited in name order.
pub fn find_file_by_name(root: &Path, name: &str, limits: SearchLimits) -> Option<PathBuf> {
    let mut queue: VecDeque<(PathBuf, usize)> = VecDeque::from([(root.to_path_buf(), 0)]);
    let mut dirs_read = 0usize;

    while let Some((dir, depth)) = queue.pop_front() {
        if dirs_read >= limits.max_dirs {
            tracing::warn!(root = %root.display(), name, "file search hit directory cap");
            return None;
        }
        dirs_read += 1;

        let Ok(read) = std::fs::read_dir(&dir) else {
            continue;
        };
        let mut entries: Vec<_> = read.filter_map(|e| e.ok()).collect();
        entries.sort_by_key(|e| e.file_name());

        for entry in entries {
            let Ok(file_type) = entry.file_type() else {
                continue;
            };
            if file_type.is_file() && entry.file_name() == name {
                return Some(entry.path());
            }
            if file_type.is_dir() && depth < limits.max_depth {
                queue.push_back((entry.path(), depth + 1));
            }
        }
    }

    None
}

/// Remove a directory tree if it exists.
pub fn remove_dir_if_exists(path: &Path) -> Result<()> {
    match std::fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(InstallError::io(
            format!("cannot remove {}", path.display()),
            e,
        )),
    }
}

/// Recursively copy `src` into `dest`, creating `dest`.
pub fn copy_dir_all(src: &Path, dest: &Path) -> Result<()> {
    for entry in WalkDir::new(src).follow_links(false) {
        let entry = entry.map_err(|e| {
            let context = format!("cannot walk {}", src.display());
            match e.into_io_error() {
                Some(io) => InstallError::io(context, io),
                None => InstallError::io(context, std::io::Error::other("filesystem loop")),
            }
        })?;
        let rel = entry.path().strip_prefix(src).unwrap_or(entry.path());
        let target = dest.join(rel);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            std::fs::create_dir_all(&target).map_err(|e| {
                InstallError::io(format!("cannot create {}", target.display()), e)
            })?;
        } else if file_type.is_symlink() {
            copy_symlink(entry.path(), &target)?;
        } else {
            std::fs::copy(entry.path(), &target).map_err(|e| {
                InstallError::io(
                    format!(
                        "copy failed: {} -> {}",
                        entry.path().display(),
                        target.display()
                    ),
                    e,
                )
            })?;
        }
    }
    Ok(())
}

#[cfg(unix)]
fn copy_symlink(src: &Path, dest: &Path) -> Result<()> {
    let target = std::fs::read_link(src)
        .map_err(|e| InstallError::io(format!("cannot read link {}", src.display()), e))?;
    std::os::unix::fs::symlink(&target, dest)
        .map_err(|e| InstallError::io(format!("cannot create link {}", dest.display()), e))
}

#[cfg(not(unix))]
fn copy_symlink(src: &Path, dest: &Path) -> Result<()> {
    std::fs::copy(src, dest)
        .map(|_| ())
        .map_err(|e| InstallError::io(format!("cannot copy {}", src.display()), e))
}

/// Replace `dest` wholesale with a copy of `src`.
///
/// The copy is staged next to `dest` first, so a failed copy leaves the
/// previous `dest` untouched; only then is the old tree removed and the
/// staged one renamed into place.
pub fn replace_dir(src: &Path, dest: &Path) -> Result<()> {
    let parent = dest.parent().unwrap_or(Path::new("."));
    std::fs::create_dir_all(parent)
        .map_err(|e| InstallError::io(format!("cannot create {}", parent.display()), e))?;

    let staging = tempfile::Builder::new()
        .prefix(".staging-")
        .tempdir_in(parent)
        .map_err(|e| InstallError::io("cannot create staging directory", e))?;
    let staged = staging.path().join("tree");
    copy_dir_all(src, &staged)?;

    remove_dir_if_exists(dest)?;
    std::fs::rename(&staged, dest).map_err(|e| {
        InstallError::io(format!("cannot move tree into {}", dest.display()), e)
    })?;
    Ok(())
}
