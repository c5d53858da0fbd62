//! Readiness stages
//!
//! A stage is one prerequisite with an idempotent `check` probe and an
//! `install` mutator. The orchestrator calls `check` first and only falls
//! back to `install` when the probe fails.
//!
//! Status moves forward only:
//!
//! ```text
//! NotInstalled -> Pending -> Installing -> Succeeded
//!                                 \-> Failed -> Installing (retry)
//! ```
//!
//! `Succeeded` is sticky; `install` on a succeeded stage returns at once.

pub mod content_bundle;
pub mod dependencies;
pub mod interpreter;
pub mod optional_feature;
pub mod runtime_core;

use crate::core::context::InstallContext;
use crate::core::error::Result;
use async_trait::async_trait;
use std::fmt;

pub use content_bundle::ContentBundleStage;
pub use dependencies::DependencyStage;
pub use optional_feature::{FeatureSpec, FeatureState, OptionalFeatureStage};
pub use runtime_core::{ProvisionStrategy, RuntimeCoreStage, VirtualEnvironment};

/// Lifecycle status of a stage within one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StageStatus {
    #[default]
    NotInstalled,
    Pending,
    Installing,
    Succeeded,
    Failed,
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StageStatus::NotInstalled => "not installed",
            StageStatus::Pending => "pending",
            StageStatus::Installing => "installing",
            StageStatus::Succeeded => "ready",
            StageStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Status holder enforcing the allowed transitions.
#[derive(Debug, Clone, Copy, Default)]
pub struct StageState {
    status: StageStatus,
}

impl StageState {
    pub fn status(&self) -> StageStatus {
        self.status
    }

    pub fn is_succeeded(&self) -> bool {
        self.status == StageStatus::Succeeded
    }

    /// A probe found work to do.
    pub fn mark_pending(&mut self) {
        if self.status == StageStatus::NotInstalled {
            self.status = StageStatus::Pending;
        }
    }

    pub fn mark_installing(&mut self) {
        if self.status != StageStatus::Succeeded {
            self.status = StageStatus::Installing;
        }
    }

    pub fn mark_succeeded(&mut self) {
        self.status = StageStatus::Succeeded;
    }

    pub fn mark_failed(&mut self) {
        if self.status != StageStatus::Succeeded {
            self.status = StageStatus::Failed;
        }
    }
}

/// One unit of idempotent readiness work.
#[async_trait]
pub trait Stage: Send + Sync {
    /// Which entry of the stage table this is.
    fn kind(&self) -> StageKind;

    /// Human-readable label.
    fn name(&self) -> &str;

    fn status(&self) -> StageStatus;

    /// Optional stages never abort the run.
    fn is_optional(&self) -> bool {
        false
    }

    /// Extra information for the readiness report.
    fn detail(&self) -> Option<String> {
        None
    }

    /// Probe whether the prerequisite is satisfied. Only the stage's own
    /// status and persisted state may change.
    async fn check(&mut self, ctx: &InstallContext) -> Result<()>;

    /// Provision the prerequisite. A no-op once the stage has succeeded.
    async fn install(&mut self, ctx: &InstallContext) -> Result<()>;
}

/// The fixed, ordered table of stages.
///
/// Ordered by increasing likelihood of needing the operator, so fast checks
/// run first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageKind {
    Dependencies,
    RuntimeCore,
    ContentBundle,
    CodeCompletion,
}

impl StageKind {
    pub const ORDERED: [StageKind; 4] = [
        StageKind::Dependencies,
        StageKind::RuntimeCore,
        StageKind::ContentBundle,
        StageKind::CodeCompletion,
    ];

    /// Stable identifier used on the command line.
    pub fn key(self) -> &'static str {
        match self {
            StageKind::Dependencies => "dependencies",
            StageKind::RuntimeCore => "runtime-core",
            StageKind::ContentBundle => "project-examples",
            StageKind::CodeCompletion => "code-completion",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        Self::ORDERED.into_iter().find(|k| k.key() == key)
    }

    /// Whether the configured features include this stage.
    pub fn is_enabled(self, ctx: &InstallContext) -> bool {
        let features = &ctx.settings.features;
        match self {
            StageKind::Dependencies | StageKind::RuntimeCore => true,
            StageKind::ContentBundle => features.project_examples(),
            StageKind::CodeCompletion => features.code_completion(),
        }
    }

    pub fn build(self) -> Box<dyn Stage> {
        match self {
            StageKind::Dependencies => Box::new(DependencyStage::new()),
            StageKind::RuntimeCore => Box::new(RuntimeCoreStage::new()),
            StageKind::ContentBundle => Box::new(ContentBundleStage::new()),
            StageKind::CodeCompletion => {
                Box::new(OptionalFeatureStage::new(FeatureSpec::code_completion()))
            }
        }
    }
}

/// Build the enabled stages in table order.
pub fn default_stages(ctx: &InstallContext) -> Vec<Box<dyn Stage>> {
    StageKind::ORDERED
        .into_iter()
        .filter(|kind| kind.is_enabled(ctx))
        .map(StageKind::build)
        .collect()
}
