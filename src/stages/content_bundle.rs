//! Project examples bundle
//!
//! The bundle is a tarball with a single top-level directory whose contents
//! become `<base>/project-examples`. Presence of that directory is all
//! `check` verifies.

use crate::core::context::InstallContext;
use crate::core::error::{InstallError, Result};
use crate::core::output;
use crate::helpers::extract::extract_tar_gz;
use crate::helpers::fs_utils::replace_dir;
use crate::stages::{Stage, StageKind, StageState, StageStatus};
use async_trait::async_trait;
use std::path::Path;

const BUNDLE_ARCHIVE: &str = "examples.tar.gz";

/// Extract `archive` and replace `dest` with its single top-level directory.
///
/// Any other archive shape is [`InstallError::ArchiveCorrupt`] and leaves
/// `dest` as it was.
pub async fn unpack_bundle(archive: &Path, dest: &Path) -> Result<()> {
    let scratch = tempfile::tempdir()
        .map_err(|e| InstallError::io("cannot create temporary directory", e))?;
    let root = extract_tar_gz(archive, scratch.path()).await?;

    let entries: Vec<_> = std::fs::read_dir(&root)
        .map_err(|e| InstallError::io(format!("cannot read {}", root.display()), e))?
        .filter_map(|e| e.ok())
        .collect();
    let single = match entries.as_slice() {
        [only] if only.path().is_dir() => only.path(),
        [only] => {
            return Err(InstallError::ArchiveCorrupt {
                path: archive.to_path_buf(),
                reason: format!(
                    "top-level entry {} is not a directory",
                    only.file_name().to_string_lossy()
                ),
            });
        }
        _ => {
            return Err(InstallError::ArchiveCorrupt {
                path: archive.to_path_buf(),
                reason: format!(
                    "expected a single top-level directory, found {} entries",
                    entries.len()
                ),
            });
        }
    };

    let dest_owned = dest.to_path_buf();
    tokio::task::spawn_blocking(move || replace_dir(&single, &dest_owned))
        .await
        .map_err(|e| InstallError::io("copy task failed", std::io::Error::other(e)))??;
    Ok(())
}

pub struct ContentBundleStage {
    state: StageState,
}

impl ContentBundleStage {
    pub fn new() -> Self {
        Self {
            state: StageState::default(),
        }
    }

    async fn fetch_and_unpack(ctx: &InstallContext) -> Result<()> {
        let content = &ctx.settings.content;
        let archive = ctx
            .downloader
            .download(
                &content.url,
                &ctx.layout.cache_dir.join(BUNDLE_ARCHIVE),
                content.sha256.as_deref(),
            )
            .await?;
        output::sub_action("unpacking project examples");
        unpack_bundle(&archive, &ctx.layout.examples_dir).await
    }
}

impl Default for ContentBundleStage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Stage for ContentBundleStage {
    fn kind(&self) -> StageKind {
        StageKind::ContentBundle
    }

    fn name(&self) -> &str {
        "Project examples"
    }

    fn status(&self) -> StageStatus {
        self.state.status()
    }

    async fn check(&mut self, ctx: &InstallContext) -> Result<()> {
        if ctx.layout.examples_dir.is_dir() {
            self.state.mark_succeeded();
            Ok(())
        } else {
            self.state.mark_pending();
            Err(InstallError::NotReady("project examples are not installed".into()))
        }
    }

    async fn install(&mut self, ctx: &InstallContext) -> Result<()> {
        if self.state.is_succeeded() {
            return Ok(());
        }
        self.state.mark_installing();
        match Self::fetch_and_unpack(ctx).await {
            Ok(()) => {
                self.state.mark_succeeded();
                Ok(())
            }
            Err(e) => {
                self.state.mark_failed();
                Err(e)
            }
        }
    }
}
