//! Install context
//!
//! One [`InstallContext`] is built per run and handed to every stage by
//! reference. It owns the resolved settings, the on-disk layout and the
//! collaborators stages use to touch the outside world.

use crate::core::config::Settings;
use crate::core::state::StateStore;
use crate::helpers::download::Downloader;
use crate::helpers::packages::HostPackages;
use crate::helpers::process::ProcessRunner;
use crate::helpers::prompt::Prompter;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Stable paths under the base directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    pub base_dir: PathBuf,
    /// Virtual environment root.
    pub env_dir: PathBuf,
    /// Executables inside the virtual environment.
    pub env_bin_dir: PathBuf,
    /// Downloaded archives.
    pub cache_dir: PathBuf,
    /// Installed content bundle.
    pub examples_dir: PathBuf,
    pub lock_path: PathBuf,
    pub state_path: PathBuf,
}

impl Layout {
    pub fn new(base_dir: &Path) -> Self {
        let env_dir = base_dir.join("penv");
        let env_bin_dir = env_dir.join(if cfg!(windows) { "Scripts" } else { "bin" });
        Self {
            base_dir: base_dir.to_path_buf(),
            env_bin_dir,
            env_dir,
            cache_dir: base_dir.join(".cache"),
            examples_dir: base_dir.join("project-examples"),
            lock_path: base_dir.join("install.lock"),
            state_path: base_dir.join("state.json"),
        }
    }

    /// Path of an executable inside the environment's binary directory.
    pub fn env_bin_file(&self, name: &str) -> PathBuf {
        if cfg!(windows) {
            self.env_bin_dir.join(format!("{name}.exe"))
        } else {
            self.env_bin_dir.join(name)
        }
    }
}

/// Everything a stage needs for one run.
pub struct InstallContext {
    pub settings: Settings,
    pub layout: Layout,
    pub runner: Arc<dyn ProcessRunner>,
    pub downloader: Arc<dyn Downloader>,
    pub prompter: Arc<dyn Prompter>,
    pub packages: Arc<dyn HostPackages>,
    pub state: Arc<dyn StateStore>,
    interpreter: Mutex<Option<PathBuf>>,
}

impl InstallContext {
    pub fn new(
        settings: Settings,
        runner: Arc<dyn ProcessRunner>,
        downloader: Arc<dyn Downloader>,
        prompter: Arc<dyn Prompter>,
        packages: Arc<dyn HostPackages>,
        state: Arc<dyn StateStore>,
    ) -> Self {
        let layout = Layout::new(&settings.base_dir);
        Self {
            settings,
            layout,
            runner,
            downloader,
            prompter,
            packages,
            state,
            interpreter: Mutex::new(None),
        }
    }

    /// Interpreter found earlier in this run, if any.
    pub fn cached_interpreter(&self) -> Option<PathBuf> {
        self.interpreter
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    pub fn cache_interpreter(&self, path: PathBuf) {
        *self.interpreter.lock().unwrap_or_else(|p| p.into_inner()) = Some(path);
    }

    pub fn clear_interpreter_cache(&self) {
        *self.interpreter.lock().unwrap_or_else(|p| p.into_inner()) = None;
    }
}

impl std::fmt::Debug for InstallContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstallContext")
            .field("layout", &self.layout)
            .field("interpreter", &self.cached_interpreter())
            .finish_non_exhaustive()
    }
}
