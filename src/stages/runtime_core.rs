//! Runtime core: isolated environment plus the build-automation core
//!
//! With `use_bundled_runtime_core` set, the stage owns `<base>/penv`. Every
//! install replaces that directory wholesale, trying provisioning strategies
//! in order:
//!
//! 1. a conda-like package manager, if `conda --version` works
//! 2. a user-installed `virtualenv`, with a discovered interpreter
//! 3. a downloaded virtualenv release, run with a discovered interpreter
//!
//! The core is then installed with the environment's own `pip`. With the flag
//! unset the operator manages the core themselves and the stage does nothing.

use crate::core::context::InstallContext;
use crate::core::error::{InstallError, Result};
use crate::core::output;
use crate::helpers::extract::extract_tar_gz;
use crate::helpers::fs_utils::{SearchLimits, find_file_by_name, remove_dir_if_exists};
use crate::stages::interpreter::locate_interpreter;
use crate::stages::{Stage, StageKind, StageState, StageStatus};
use async_trait::async_trait;
use std::fmt;
use std::path::{Path, PathBuf};

const BOOTSTRAP_SCRIPT: &str = "virtualenv.py";
const VIRTUALENV_ARCHIVE: &str = "virtualenv.tar.gz";

/// How an environment was created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisionStrategy {
    PackageManager,
    UserTool,
    BundledDownload,
}

impl fmt::Display for ProvisionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ProvisionStrategy::PackageManager => "conda",
            ProvisionStrategy::UserTool => "virtualenv",
            ProvisionStrategy::BundledDownload => "downloaded virtualenv",
        })
    }
}

/// The isolated runtime directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirtualEnvironment {
    pub root: PathBuf,
    pub bin_dir: PathBuf,
    pub strategy: ProvisionStrategy,
}

fn args(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

async fn tool_available(ctx: &InstallContext, tool: &str) -> bool {
    match ctx.runner.run(tool, &args(&["--version"])).await {
        Ok(out) => out.success(),
        Err(e) => {
            tracing::debug!(tool, error = %e, "tool not available");
            false
        }
    }
}

/// Pick the first available strategy. Probes run in priority order.
pub async fn detect_strategy(ctx: &InstallContext) -> ProvisionStrategy {
    if tool_available(ctx, "conda").await {
        ProvisionStrategy::PackageManager
    } else if tool_available(ctx, "virtualenv").await {
        ProvisionStrategy::UserTool
    } else {
        ProvisionStrategy::BundledDownload
    }
}

async fn run_checked(ctx: &InstallContext, program: &str, argv: Vec<String>, label: &str) -> Result<()> {
    let out = ctx.runner.run(program, &argv).await?;
    out.into_result(label)?;
    Ok(())
}

async fn create_with_bundled_download(ctx: &InstallContext, interpreter: &Path) -> Result<()> {
    let runtime = &ctx.settings.runtime;
    let archive = ctx
        .downloader
        .download(
            &runtime.virtualenv_url,
            &ctx.layout.cache_dir.join(VIRTUALENV_ARCHIVE),
            runtime.virtualenv_sha256.as_deref(),
        )
        .await?;

    let scratch = tempfile::tempdir()
        .map_err(|e| InstallError::io("cannot create temporary directory", e))?;
    let root = extract_tar_gz(&archive, scratch.path()).await?;
    let script = find_file_by_name(&root, BOOTSTRAP_SCRIPT, SearchLimits::default()).ok_or_else(
        || InstallError::ArchiveCorrupt {
            path: archive.clone(),
            reason: format!("no {BOOTSTRAP_SCRIPT} inside"),
        },
    )?;

    run_checked(
        ctx,
        &interpreter.to_string_lossy(),
        vec![path_arg(&script), path_arg(&ctx.layout.env_dir)],
        "virtualenv bootstrap",
    )
    .await
}

/// Replace the environment directory with a freshly provisioned one.
pub async fn create_environment(ctx: &InstallContext) -> Result<VirtualEnvironment> {
    let layout = &ctx.layout;
    if layout.env_dir.exists() {
        output::sub_action("removing previous environment");
        remove_dir_if_exists(&layout.env_dir)?;
    }

    let strategy = detect_strategy(ctx).await;
    output::sub_action(&format!("creating environment with {strategy}"));
    match strategy {
        ProvisionStrategy::PackageManager => {
            let python = format!("python={}", ctx.settings.runtime.interpreter_version);
            let mut argv = args(&["create", "--yes", "--quiet", &python, "--prefix"]);
            argv.push(path_arg(&layout.env_dir));
            run_checked(ctx, "conda", argv, "conda create").await?;
        }
        ProvisionStrategy::UserTool => {
            let interpreter = locate_interpreter(ctx).await?;
            let argv = vec![
                "-p".to_string(),
                path_arg(&interpreter),
                path_arg(&layout.env_dir),
            ];
            run_checked(ctx, "virtualenv", argv, "virtualenv").await?;
        }
        ProvisionStrategy::BundledDownload => {
            let interpreter = locate_interpreter(ctx).await?;
            create_with_bundled_download(ctx, &interpreter).await?;
        }
    }

    Ok(VirtualEnvironment {
        root: layout.env_dir.clone(),
        bin_dir: layout.env_bin_dir.clone(),
        strategy,
    })
}

/// Install or upgrade the core with the environment's own `pip`.
pub async fn install_core(ctx: &InstallContext) -> Result<()> {
    let runtime = &ctx.settings.runtime;
    let source = if ctx.settings.wants_development_core() {
        runtime.development_source.as_str()
    } else {
        runtime.core_package.as_str()
    };
    output::sub_action(&format!("installing {source}"));
    let pip = ctx.layout.env_bin_file("pip");
    run_checked(
        ctx,
        &pip.to_string_lossy(),
        args(&["install", "--no-cache-dir", "-U", source]),
        "pip install",
    )
    .await
}

/// Version reported by `<core> --version`, e.g. `PlatformIO, version 3.6.0`.
fn parse_core_version(stdout: &str) -> Option<String> {
    let line = stdout.lines().map(str::trim).find(|l| !l.is_empty())?;
    let version = match line.rfind("version") {
        Some(idx) => line[idx + "version".len()..].trim(),
        None => line.rsplit(' ').next().unwrap_or(line).trim(),
    };
    (!version.is_empty()).then(|| version.to_string())
}

pub struct RuntimeCoreStage {
    state: StageState,
    core_version: Option<String>,
    environment: Option<VirtualEnvironment>,
}

impl RuntimeCoreStage {
    pub fn new() -> Self {
        Self {
            state: StageState::default(),
            core_version: None,
            environment: None,
        }
    }

    /// Core version recorded by the last successful probe.
    pub fn core_version(&self) -> Option<&str> {
        self.core_version.as_deref()
    }

    /// Environment created by this run's install, if any.
    pub fn environment(&self) -> Option<&VirtualEnvironment> {
        self.environment.as_ref()
    }

    async fn read_core_version(ctx: &InstallContext) -> Result<String> {
        let core = ctx.layout.env_bin_file(&ctx.settings.runtime.core_command);
        let out = ctx
            .runner
            .run(&core.to_string_lossy(), &args(&["--version"]))
            .await?
            .into_result(&format!("{} --version", ctx.settings.runtime.core_command))?;
        Ok(parse_core_version(&out.stdout).unwrap_or_else(|| "unknown".to_string()))
    }

    async fn provision(&mut self, ctx: &InstallContext) -> Result<()> {
        let env = create_environment(ctx).await?;
        install_core(ctx).await?;
        self.environment = Some(env);
        match Self::read_core_version(ctx).await {
            Ok(version) => self.core_version = Some(version),
            Err(e) => tracing::debug!(error = %e, "core version unavailable after install"),
        }
        Ok(())
    }
}

impl Default for RuntimeCoreStage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Stage for RuntimeCoreStage {
    fn kind(&self) -> StageKind {
        StageKind::RuntimeCore
    }

    fn name(&self) -> &str {
        "Runtime core"
    }

    fn status(&self) -> StageStatus {
        self.state.status()
    }

    fn detail(&self) -> Option<String> {
        self.core_version.as_ref().map(|v| format!("version {v}"))
    }

    async fn check(&mut self, ctx: &InstallContext) -> Result<()> {
        if !ctx.settings.use_bundled_runtime_core {
            self.state.mark_succeeded();
            return Ok(());
        }
        if !ctx.layout.env_bin_dir.is_dir() {
            self.state.mark_pending();
            return Err(InstallError::NotReady(
                "virtual environment is not created".into(),
            ));
        }
        match Self::read_core_version(ctx).await {
            Ok(version) => {
                tracing::debug!(version = %version, "found runtime core");
                self.core_version = Some(version);
                self.state.mark_succeeded();
                Ok(())
            }
            Err(e) => {
                self.state.mark_pending();
                Err(InstallError::NotReady(format!(
                    "runtime core is not installed: {e}"
                )))
            }
        }
    }

    async fn install(&mut self, ctx: &InstallContext) -> Result<()> {
        if self.state.is_succeeded() {
            return Ok(());
        }
        if !ctx.settings.use_bundled_runtime_core {
            self.state.mark_succeeded();
            return Ok(());
        }
        self.state.mark_installing();
        match self.provision(ctx).await {
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
