//! Host companion packages
//!
//! [`HostPackages`] is the read side of the host application's package
//! registry (what is installed, at which version, and whether it is enabled).
//! Installing and uninstalling go through the host's package-manager command
//! via the process runner; see `stages::dependencies`.

use crate::core::error::{InstallError, Result};
use serde::Deserialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Name and version of one installed package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageManifest {
    pub name: String,
    pub version: String,
}

/// Read access to the host's installed packages plus activation.
pub trait HostPackages: Send + Sync {
    /// Manifests of every available package.
    fn manifests(&self) -> Result<Vec<PackageManifest>>;

    /// Whether the named package is enabled. Names compare case-insensitively.
    fn is_active(&self, name: &str) -> bool;

    /// Enable a disabled package.
    fn enable(&self, name: &str) -> Result<()>;
}

#[derive(Debug, Deserialize)]
struct ManifestJson {
    name: String,
    #[serde(default)]
    version: String,
}

/// Packages stored as `<root>/<dir>/package.json`.
///
/// Disabled packages are listed by name in `<root>/.disabled.json`.
#[derive(Debug)]
pub struct DirectoryPackages {
    root: PathBuf,
    lock: Mutex<()>,
}

impl DirectoryPackages {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn disabled_path(&self) -> PathBuf {
        self.root.join(".disabled.json")
    }

    fn read_disabled(&self) -> BTreeSet<String> {
        std::fs::read_to_string(self.disabled_path())
            .ok()
            .and_then(|text| serde_json::from_str::<Vec<String>>(&text).ok())
            .map(|names| names.into_iter().map(|n| n.to_lowercase()).collect())
            .unwrap_or_default()
    }
}

impl HostPackages for DirectoryPackages {
    fn manifests(&self) -> Result<Vec<PackageManifest>> {
        let read = match std::fs::read_dir(&self.root) {
            Ok(read) => read,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(InstallError::io(
                    format!("cannot read packages in {}", self.root.display()),
                    e,
                ));
            }
        };

        let mut manifests = Vec::new();
        for entry in read.filter_map(|e| e.ok()) {
            let manifest_path = entry.path().join("package.json");
            let Ok(text) = std::fs::read_to_string(&manifest_path) else {
                continue;
            };
            match serde_json::from_str::<ManifestJson>(&text) {
                Ok(m) => manifests.push(PackageManifest {
                    name: m.name,
                    version: m.version,
                }),
                Err(e) => {
                    tracing::warn!(path = %manifest_path.display(), error = %e, "skipping unreadable manifest");
                }
            }
        }
        manifests.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(manifests)
    }

    fn is_active(&self, name: &str) -> bool {
        !self.read_disabled().contains(&name.to_lowercase())
    }

    fn enable(&self, name: &str) -> Result<()> {
        let _guard = self.lock.lock().unwrap_or_else(|p| p.into_inner());
        let mut disabled = self.read_disabled();
        if !disabled.remove(&name.to_lowercase()) {
            return Ok(());
        }
        let names: Vec<&String> = disabled.iter().collect();
        let body = serde_json::to_string_pretty(&names)
            .map_err(|e| InstallError::Config(format!("cannot encode disabled list: {e}")))?;
        std::fs::write(self.disabled_path(), body).map_err(|e| {
            InstallError::io(format!("cannot write {}", self.disabled_path().display()), e)
        })
    }
}
