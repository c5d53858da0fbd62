//! Installer error types.

use std::path::PathBuf;
use thiserror::Error;

/// Result alias used across the installer.
pub type Result<T, E = InstallError> = std::result::Result<T, E>;

/// Errors that can occur while checking or installing prerequisites.
#[derive(Error, Debug)]
pub enum InstallError {
    #[error("{tool} not found")]
    ToolNotFound { tool: String },

    #[error("{name} {found} does not satisfy {required}")]
    VersionIncompatible {
        name: String,
        required: String,
        found: String,
    },

    #[error("{command} failed (exit code: {code})\nstderr: {stderr}")]
    ProcessFailed {
        command: String,
        code: i32,
        stderr: String,
    },

    #[error("corrupt archive {}: {reason}", path.display())]
    ArchiveCorrupt { path: PathBuf, reason: String },

    #[error("another instance is installing (lock: {}{})", path.display(), holder_suffix(*holder))]
    LockUnavailable { path: PathBuf, holder: Option<u32> },

    #[error("aborted: {0}")]
    UserAborted(String),

    #[error("{0}")]
    NotReady(String),

    #[error("download failed for {url}: {reason}")]
    Download { url: String, reason: String },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{stage} stage failed")]
    Stage {
        stage: String,
        #[source]
        source: Box<InstallError>,
    },
}

fn holder_suffix(holder: Option<u32>) -> String {
    holder.map(|pid| format!(", held by pid {pid}")).unwrap_or_default()
}

impl InstallError {
    /// Build an `Io` error with a short description of what was attempted.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Wrap an error with the name of the stage that produced it.
    pub fn in_stage(stage: impl Into<String>, source: InstallError) -> Self {
        Self::Stage {
            stage: stage.into(),
            source: Box::new(source),
        }
    }

    /// True when another process holds the install lock.
    ///
    /// Callers treat this as an informational notice, not a failure.
    pub fn is_lock_unavailable(&self) -> bool {
        matches!(self.root_cause(), Self::LockUnavailable { .. })
    }

    /// Name of the stage this error was raised in, if it was wrapped.
    pub fn stage_name(&self) -> Option<&str> {
        match self {
            Self::Stage { stage, .. } => Some(stage),
            _ => None,
        }
    }

    /// The innermost error, skipping stage wrappers.
    pub fn root_cause(&self) -> &InstallError {
        let mut current = self;
        while let Self::Stage { source, .. } = current {
            current = source;
        }
        current
    }
}
