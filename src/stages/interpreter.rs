//! Interpreter discovery
//!
//! Locating a compatible interpreter is a small retry protocol: probe the
//! candidates, and when none fits ask the operator what to do. The decision
//! logic lives in [`DiscoveryProtocol`] and knows nothing about prompts or
//! processes; [`locate_interpreter`] drives it with the context's
//! collaborators.

use crate::core::context::InstallContext;
use crate::core::error::{InstallError, Result};
use crate::helpers::prompt::Prompt;
use std::path::{Path, PathBuf};

/// Page offered when no interpreter is found.
pub const INTERPRETER_DOWNLOAD_URL: &str =
    "http://docs.platformio.org/page/ide/atom.html#installation";

const VERSION_SCRIPT: &str = "import sys; print('.'.join(str(v) for v in sys.version_info[:2]))";

/// Operator answers, in button order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryChoice {
    OpenDownloadPage,
    CustomLocation,
    Retry,
    Abort,
}

impl DiscoveryChoice {
    pub fn from_index(index: usize) -> Option<Self> {
        match index {
            0 => Some(Self::OpenDownloadPage),
            1 => Some(Self::CustomLocation),
            2 => Some(Self::Retry),
            3 => Some(Self::Abort),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryState {
    NeedsProbe,
    NeedsChoice,
    NeedsDownloadPage,
    NeedsCustom,
    Found(PathBuf),
    Aborted,
}

/// Retry protocol with terminal states `Found` and `Aborted`.
#[derive(Debug, Clone)]
pub struct DiscoveryProtocol {
    state: DiscoveryState,
    probe_rounds: usize,
}

impl DiscoveryProtocol {
    pub fn new() -> Self {
        Self {
            state: DiscoveryState::NeedsProbe,
            probe_rounds: 0,
        }
    }

    pub fn state(&self) -> &DiscoveryState {
        &self.state
    }

    /// Automatic probe rounds run so far.
    pub fn probe_rounds(&self) -> usize {
        self.probe_rounds
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.state, DiscoveryState::Found(_) | DiscoveryState::Aborted)
    }

    pub fn on_probe(&mut self, found: Option<PathBuf>) {
        if self.state != DiscoveryState::NeedsProbe {
            return;
        }
        self.probe_rounds += 1;
        self.state = match found {
            Some(path) => DiscoveryState::Found(path),
            None => DiscoveryState::NeedsChoice,
        };
    }

    pub fn on_choice(&mut self, choice: DiscoveryChoice) {
        if self.state != DiscoveryState::NeedsChoice {
            return;
        }
        self.state = match choice {
            DiscoveryChoice::OpenDownloadPage => DiscoveryState::NeedsDownloadPage,
            DiscoveryChoice::CustomLocation => DiscoveryState::NeedsCustom,
            DiscoveryChoice::Retry => DiscoveryState::NeedsProbe,
            DiscoveryChoice::Abort => DiscoveryState::Aborted,
        };
    }

    /// The download page was shown; probe again in case it got installed.
    pub fn on_download_page_shown(&mut self) {
        if self.state == DiscoveryState::NeedsDownloadPage {
            self.state = DiscoveryState::NeedsProbe;
        }
    }

    pub fn on_custom(&mut self, found: Option<PathBuf>) {
        if self.state != DiscoveryState::NeedsCustom {
            return;
        }
        self.state = match found {
            Some(path) => DiscoveryState::Found(path),
            None => DiscoveryState::NeedsProbe,
        };
    }
}

impl Default for DiscoveryProtocol {
    fn default() -> Self {
        Self::new()
    }
}

fn missing_interpreter_prompt(version: &str) -> Prompt {
    Prompt::new(
        format!("Cannot find a Python {version} interpreter"),
        format!(
            "The runtime core depends on Python {version}. Install it, or if you \
             already have it, choose the directory containing the interpreter."
        ),
        &[
            &format!("Install Python {version}"),
            &format!("I have Python {version}"),
            "Try again",
            "Abort installation",
        ],
    )
}

/// Run one candidate and compare its `major.minor` with `required`.
async fn probe_candidate(ctx: &InstallContext, candidate: &Path, required: &str) -> bool {
    let program = candidate.to_string_lossy();
    let args = ["-c".to_string(), VERSION_SCRIPT.to_string()];
    match ctx.runner.run(&program, &args).await {
        Ok(out) if out.success() => {
            let reported = out.stdout.trim();
            tracing::debug!(candidate = %program, reported, "interpreter probed");
            reported == required
        }
        Ok(out) => {
            tracing::debug!(candidate = %program, exit_code = out.exit_code, "interpreter probe failed");
            false
        }
        Err(e) => {
            tracing::debug!(candidate = %program, error = %e, "interpreter probe failed");
            false
        }
    }
}

async fn probe_all(ctx: &InstallContext, candidates: &[PathBuf], required: &str) -> Option<PathBuf> {
    for candidate in candidates {
        if probe_candidate(ctx, candidate, required).await {
            return Some(candidate.clone());
        }
    }
    None
}

/// Candidate paths inside operator-chosen directories.
fn candidates_in(dirs: &[PathBuf], names: &[String]) -> Vec<PathBuf> {
    let mut out = Vec::new();
    for dir in dirs {
        for name in names {
            let Some(file) = Path::new(name).file_name() else {
                continue;
            };
            let path = dir.join(file);
            if !out.contains(&path) {
                out.push(path);
            }
        }
    }
    out
}

/// Find a compatible interpreter, asking the operator when probing fails.
///
/// A hit is cached in the context for the rest of the run. Choosing abort
/// fails with [`InstallError::ToolNotFound`].
pub async fn locate_interpreter(ctx: &InstallContext) -> Result<PathBuf> {
    if let Some(cached) = ctx.cached_interpreter() {
        return Ok(cached);
    }

    let runtime = &ctx.settings.runtime;
    let required = runtime.interpreter_version.as_str();
    let candidates: Vec<PathBuf> = runtime
        .interpreter_candidates
        .iter()
        .map(PathBuf::from)
        .collect();
    let prompt = missing_interpreter_prompt(required);

    let mut protocol = DiscoveryProtocol::new();
    loop {
        match protocol.state().clone() {
            DiscoveryState::NeedsProbe => {
                let found = probe_all(ctx, &candidates, required).await;
                protocol.on_probe(found);
            }
            DiscoveryState::NeedsChoice => {
                let index = ctx.prompter.choose(&prompt).await?;
                let choice = DiscoveryChoice::from_index(index).unwrap_or(DiscoveryChoice::Abort);
                protocol.on_choice(choice);
            }
            DiscoveryState::NeedsDownloadPage => {
                ctx.prompter.open_url(INTERPRETER_DOWNLOAD_URL);
                protocol.on_download_page_shown();
            }
            DiscoveryState::NeedsCustom => {
                let dirs = ctx
                    .prompter
                    .pick_folders(&format!("Directory containing Python {required}"))
                    .await?;
                let custom = candidates_in(&dirs, &runtime.interpreter_candidates);
                let found = probe_all(ctx, &custom, required).await;
                protocol.on_custom(found);
            }
            DiscoveryState::Found(path) => {
                tracing::debug!(path = %path.display(), rounds = protocol.probe_rounds(), "interpreter found");
                ctx.cache_interpreter(path.clone());
                return Ok(path);
            }
            DiscoveryState::Aborted => {
                return Err(InstallError::ToolNotFound {
                    tool: format!("Python {required} interpreter"),
                });
            }
        }
    }
}
