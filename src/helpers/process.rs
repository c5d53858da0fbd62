//! External process execution
//!
//! Every stage talks to the outside world through [`ProcessRunner`] so tests
//! can script exit codes and output. [`SystemRunner`] spawns real processes
//! with tokio, captures stdout and stderr separately, and applies the
//! installer's composed search path.

use crate::core::error::{InstallError, Result};
use async_trait::async_trait;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

/// Captured result of a finished process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Turn a non-zero exit into [`InstallError::ProcessFailed`] carrying stderr.
    pub fn into_result(self, command: &str) -> Result<ProcessOutput> {
        if self.success() {
            Ok(self)
        } else {
            Err(InstallError::ProcessFailed {
                command: command.to_string(),
                code: self.exit_code,
                stderr: self.stderr.trim().to_string(),
            })
        }
    }
}

/// Runs external commands.
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    /// Run `program` with `args` to completion.
    ///
    /// A program that cannot be spawned because it does not exist is
    /// [`InstallError::ToolNotFound`]; a non-zero exit is reported in the
    /// returned output, not as an error.
    async fn run(&self, program: &str, args: &[String]) -> Result<ProcessOutput>;
}

/// Spawns real processes.
#[derive(Debug, Clone)]
pub struct SystemRunner {
    search_path: Option<OsString>,
    timeout: Duration,
}

impl SystemRunner {
    pub fn new(timeout: Duration) -> Self {
        Self {
            search_path: None,
            timeout,
        }
    }

    /// Use `path` as `PATH` for every spawned process.
    pub fn with_search_path(mut self, path: OsString) -> Self {
        self.search_path = Some(path);
        self
    }
}

#[async_trait]
impl ProcessRunner for SystemRunner {
    async fn run(&self, program: &str, args: &[String]) -> Result<ProcessOutput> {
        let resolved = resolve_program(program, self.search_path.as_deref());
        let mut cmd = tokio::process::Command::new(&resolved);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(path) = &self.search_path {
            cmd.env("PATH", path);
        }

        tracing::debug!(program, ?args, "spawning");
        let child = cmd.spawn().map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => InstallError::ToolNotFound {
                tool: program.to_string(),
            },
            _ => InstallError::io(format!("failed to execute {program}"), e),
        })?;

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| InstallError::ProcessFailed {
                command: program.to_string(),
                code: -1,
                stderr: format!("timed out after {}s", self.timeout.as_secs()),
            })?
            .map_err(|e| InstallError::io(format!("failed waiting for {program}"), e))?;

        let result = ProcessOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };
        tracing::debug!(program, exit_code = result.exit_code, "finished");
        Ok(result)
    }
}

/// Resolve a bare program name against `search_path`.
///
/// The child's `PATH` only affects its own lookups, so the program itself is
/// resolved here. Names with a directory component are returned unchanged.
fn resolve_program(program: &str, search_path: Option<&std::ffi::OsStr>) -> PathBuf {
    let as_path = Path::new(program);
    if as_path.components().count() > 1 {
        return as_path.to_path_buf();
    }
    let Some(search_path) = search_path else {
        return as_path.to_path_buf();
    };
    for dir in std::env::split_paths(search_path) {
        let candidate = dir.join(program);
        if candidate.is_file() {
            return candidate;
        }
        if cfg!(windows) {
            let exe = dir.join(format!("{program}.exe"));
            if exe.is_file() {
                return exe;
            }
        }
    }
    as_path.to_path_buf()
}

/// Compose the search path spawned processes see.
///
/// Order: the bundled environment's binary directory (when the bundled core
/// is used), then `custom_path` entries, then the inherited path. Duplicates
/// keep their first position.
pub fn compose_search_path(
    env_bin_dir: Option<&Path>,
    custom_path: Option<&str>,
    inherited: Option<&std::ffi::OsStr>,
) -> OsString {
    let mut entries: Vec<PathBuf> = Vec::new();
    let mut push = |p: PathBuf| {
        if !p.as_os_str().is_empty() && !entries.contains(&p) {
            entries.push(p);
        }
    };

    if let Some(bin) = env_bin_dir {
        push(bin.to_path_buf());
    }
    if let Some(custom) = custom_path {
        std::env::split_paths(custom).for_each(&mut push);
    }
    if let Some(inherited) = inherited {
        std::env::split_paths(inherited).for_each(&mut push);
    }

    std::env::join_paths(&entries).unwrap_or_else(|_| {
        // An entry contained the separator; fall back to what we inherited.
        inherited.map(OsString::from).unwrap_or_default()
    })
}
