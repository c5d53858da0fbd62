//! Native gzip tarball extraction (no external tools needed)
//!
//! Entries that would land outside the destination, through `..`, absolute
//! paths, symlinked parents or escaping link targets, are rejected as a
//! corrupt archive.

use crate::core::error::{InstallError, Result};
use crate::core::output;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Component, Path, PathBuf};

fn corrupt(archive: &Path, reason: impl Into<String>) -> InstallError {
    InstallError::ArchiveCorrupt {
        path: archive.to_path_buf(),
        reason: reason.into(),
    }
}

fn normalize_lexical(path: &Path) -> PathBuf {
    // Lexically normalize a path (no filesystem access). This is used to
    // validate link targets without following symlinks.
    let mut out = PathBuf::new();
    let mut has_root = false;

    for c in path.components() {
        match c {
            Component::Prefix(p) => {
                out.clear();
                out.push(p.as_os_str());
                has_root = true;
            }
            Component::RootDir => {
                out.push(Component::RootDir.as_os_str());
                has_root = true;
            }
            Component::CurDir => {}
            Component::ParentDir => {
                let popped = out
                    .components()
                    .next_back()
                    .is_some_and(|last| matches!(last, Component::Normal(_)));
                if popped {
                    out.pop();
                } else if !has_root {
                    out.push("..");
                }
            }
            Component::Normal(seg) => out.push(seg),
        }
    }

    out
}

fn ensure_no_symlink_components(archive: &Path, dest: &Path, full_path: &Path) -> Result<()> {
    let rel = full_path.strip_prefix(dest).map_err(|_| {
        corrupt(
            archive,
            format!("path outside destination: {}", full_path.display()),
        )
    })?;

    let mut cur = dest.to_path_buf();
    for comp in rel.components() {
        cur.push(comp);
        if let Ok(md) = std::fs::symlink_metadata(&cur)
            && md.file_type().is_symlink()
        {
            return Err(corrupt(
                archive,
                format!("symlink in path component: {}", cur.display()),
            ));
        }
    }

    Ok(())
}

fn ensure_link_target_within_dest(
    archive: &Path,
    dest: &Path,
    link_parent: &Path,
    link_name: &Path,
) -> Result<()> {
    if link_name.is_absolute()
        || link_name
            .components()
            .any(|c| matches!(c, Component::Prefix(_) | Component::RootDir))
    {
        return Err(corrupt(
            archive,
            format!("absolute link target: {}", link_name.display()),
        ));
    }

    let candidate = normalize_lexical(&link_parent.join(link_name));
    if candidate.strip_prefix(normalize_lexical(dest)).is_err() {
        return Err(corrupt(
            archive,
            format!(
                "link escapes destination: {} -> {}",
                link_parent.display(),
                link_name.display()
            ),
        ));
    }

    Ok(())
}

fn extract_tar<R: Read>(archive_path: &Path, reader: R, dest: &Path) -> Result<()> {
    let mut archive = tar::Archive::new(reader);

    let entries = archive
        .entries()
        .map_err(|e| corrupt(archive_path, format!("tar read error: {e}")))?;
    for entry in entries {
        let mut entry = entry.map_err(|e| corrupt(archive_path, format!("tar entry error: {e}")))?;

        let path = entry
            .path()
            .map_err(|e| corrupt(archive_path, format!("tar path error: {e}")))?
            .into_owned();

        if path.is_absolute() || path.components().any(|c| c == Component::ParentDir) {
            return Err(corrupt(archive_path, format!("unsafe path: {}", path.display())));
        }

        // Some archives contain a "." entry; treat it as a no-op.
        if path.as_os_str().is_empty() || path == Path::new(".") {
            continue;
        }

        // GitHub tarballs carry a global pax header with the commit id.
        let entry_type = entry.header().entry_type();
        if matches!(
            entry_type,
            tar::EntryType::XGlobalHeader | tar::EntryType::XHeader
        ) {
            continue;
        }

        let full_path = dest.join(&path);
        ensure_no_symlink_components(archive_path, dest, &full_path)?;

        if entry_type == tar::EntryType::Symlink || entry_type == tar::EntryType::Link {
            let link_name = entry
                .link_name()
                .map_err(|e| corrupt(archive_path, format!("tar link error: {e}")))?
                .ok_or_else(|| {
                    corrupt(archive_path, format!("link without target: {}", path.display()))
                })?;
            let link_parent = full_path.parent().unwrap_or(dest);
            ensure_link_target_within_dest(archive_path, dest, link_parent, &link_name)?;
        }

        if let Some(parent) = full_path.parent() {
            if parent.starts_with(dest) {
                ensure_no_symlink_components(archive_path, dest, parent)?;
            }
            std::fs::create_dir_all(parent).map_err(|e| {
                InstallError::io(format!("cannot create directory {}", parent.display()), e)
            })?;
        }

        entry
            .unpack(&full_path)
            .map_err(|e| corrupt(archive_path, format!("unpack error for {}: {e}", path.display())))?;
    }

    Ok(())
}

fn extract_tar_gz_blocking(archive: &Path, dest: &Path) -> Result<()> {
    std::fs::create_dir_all(dest)
        .map_err(|e| InstallError::io(format!("cannot create {}", dest.display()), e))?;
    let file = File::open(archive)
        .map_err(|e| InstallError::io(format!("cannot open {}", archive.display()), e))?;
    let decoder = flate2::read::GzDecoder::new(BufReader::new(file));
    extract_tar(archive, decoder, dest)
}

/// Extract a `.tar.gz` archive into `dest` and return `dest`.
///
/// Runs on the blocking pool; the caller suspends until extraction finishes.
pub async fn extract_tar_gz(archive: &Path, dest: &Path) -> Result<PathBuf> {
    let filename = archive
        .file_name()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "archive".to_string());
    let pb = output::spinner(&format!("extracting {}", filename));

    let archive_owned = archive.to_path_buf();
    let dest_owned = dest.to_path_buf();
    let result = tokio::task::spawn_blocking(move || {
        extract_tar_gz_blocking(&archive_owned, &dest_owned)
    })
    .await
    .map_err(|e| corrupt(archive, format!("extraction task failed: {e}")));

    pb.finish_and_clear();
    result??;
    output::detail(&format!("extracted {} to {}", filename, dest.display()));
    Ok(dest.to_path_buf())
}
