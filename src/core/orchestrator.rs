//! Readiness orchestrator
//!
//! Runs the stage table in order under the install lock. Each stage is
//! probed with `check`; a failed probe triggers `install`. The first required
//! stage whose install fails aborts the run, and the error names the stage.

use crate::core::context::InstallContext;
use crate::core::error::{InstallError, Result};
use crate::core::lock::InstallLock;
use crate::core::output;
use crate::stages::{Stage, StageKind, StageStatus, default_stages};

/// Outcome of one stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageReport {
    pub kind: StageKind,
    pub name: String,
    pub status: StageStatus,
    pub optional: bool,
    pub detail: Option<String>,
}

impl StageReport {
    fn from_stage(stage: &dyn Stage, problem: Option<String>) -> Self {
        Self {
            kind: stage.kind(),
            name: stage.name().to_string(),
            status: stage.status(),
            optional: stage.is_optional(),
            detail: problem.or_else(|| stage.detail()),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.status == StageStatus::Succeeded
    }
}

/// Per-stage outcome of a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadinessReport {
    pub stages: Vec<StageReport>,
}

impl ReadinessReport {
    /// Every required stage succeeded.
    pub fn is_ready(&self) -> bool {
        self.stages.iter().all(|s| s.optional || s.is_ready())
    }

    pub fn stage(&self, kind: StageKind) -> Option<&StageReport> {
        self.stages.iter().find(|s| s.kind == kind)
    }

    /// Print the readiness table.
    pub fn print(&self) {
        for stage in &self.stages {
            let status = match &stage.detail {
                Some(detail) => format!("{} ({detail})", stage.status),
                None => stage.status.to_string(),
            };
            output::status_item(&stage.name, &status, stage.is_ready());
        }
    }
}

pub struct Orchestrator {
    stages: Vec<Box<dyn Stage>>,
}

impl Orchestrator {
    pub fn new(stages: Vec<Box<dyn Stage>>) -> Self {
        Self { stages }
    }

    /// Orchestrator over the enabled stages of the default table.
    pub fn for_context(ctx: &InstallContext) -> Self {
        Self::new(default_stages(ctx))
    }

    pub fn stages(&self) -> &[Box<dyn Stage>] {
        &self.stages
    }

    fn report(&self) -> ReadinessReport {
        ReadinessReport {
            stages: self
                .stages
                .iter()
                .map(|s| StageReport::from_stage(&**s, None))
                .collect(),
        }
    }

    /// Bring every stage to readiness.
    ///
    /// Fails with [`InstallError::LockUnavailable`] before touching any stage
    /// when another run holds the lock. The lock is released on every exit.
    pub async fn run(&mut self, ctx: &InstallContext) -> Result<ReadinessReport> {
        let _lock = InstallLock::acquire(&ctx.layout.lock_path)?;

        let total = self.stages.len();
        for (i, stage) in self.stages.iter_mut().enumerate() {
            output::action_numbered(i + 1, total, stage.name());

            match stage.check(ctx).await {
                Ok(()) => {
                    output::skip(&format!("{} already satisfied", stage.name()));
                    continue;
                }
                Err(e) => {
                    tracing::debug!(stage = stage.name(), error = %e, "check failed, installing");
                    output::detail(&e.to_string());
                }
            }

            if let Err(e) = stage.install(ctx).await {
                if stage.is_optional() {
                    output::warning(&format!("{}: {e}", stage.name()));
                    continue;
                }
                return Err(InstallError::in_stage(stage.name(), e));
            }
            if stage.status() == StageStatus::Succeeded {
                output::success(&format!("{} ready", stage.name()));
            } else {
                output::detail(&format!("{} left unresolved until the next run", stage.name()));
            }
        }

        Ok(self.report())
    }

    /// Probe every stage without installing anything.
    ///
    /// Probes do not mutate installed state, so the lock is not taken.
    pub async fn check_only(&mut self, ctx: &InstallContext) -> ReadinessReport {
        let mut stages = Vec::with_capacity(self.stages.len());
        for stage in self.stages.iter_mut() {
            let problem = stage.check(ctx).await.err().map(|e| e.to_string());
            stages.push(StageReport::from_stage(&**stage, problem));
        }
        ReadinessReport { stages }
    }

    /// Force one stage to provision again, skipping its probe.
    pub async fn reinstall(ctx: &InstallContext, kind: StageKind) -> Result<StageReport> {
        let _lock = InstallLock::acquire(&ctx.layout.lock_path)?;
        let mut stage = kind.build();
        output::action(&format!("Reinstalling {}", stage.name()));
        if kind == StageKind::RuntimeCore {
            ctx.clear_interpreter_cache();
        }
        stage
            .install(ctx)
            .await
            .map_err(|e| InstallError::in_stage(stage.name(), e))?;
        output::success(&format!("{} ready", stage.name()));
        Ok(StageReport::from_stage(&*stage, None))
    }
}
