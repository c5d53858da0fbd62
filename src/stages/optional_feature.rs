//! Best-effort optional features
//!
//! An optional feature depends on an external tool the installer cannot
//! provide. The operator's answer is remembered in the state store:
//!
//! | value | meaning                 |
//! |-------|-------------------------|
//! | 1     | tool confirmed present  |
//! | -1    | feature declined        |
//! | other | not resolved yet        |
//!
//! The stage never fails the run.

use crate::core::context::InstallContext;
use crate::core::error::{InstallError, Result};
use crate::core::output;
use crate::helpers::prompt::Prompt;
use crate::stages::{Stage, StageKind, StageState, StageStatus};
use async_trait::async_trait;

/// Static description of one optional feature.
#[derive(Debug, Clone)]
pub struct FeatureSpec {
    /// State store key.
    pub key: &'static str,
    pub name: &'static str,
    /// Tool probed with `--version`.
    pub tool: &'static str,
    pub docs_url: &'static str,
    pub prompt_title: &'static str,
    pub prompt_detail: &'static str,
    /// Install tool / remind later / disable feature.
    pub buttons: [&'static str; 3],
}

impl FeatureSpec {
    pub fn code_completion() -> Self {
        Self {
            key: "code-completion",
            name: "Intelligent code completion",
            tool: "clang",
            docs_url: "http://docs.platformio.org/page/ide/atom.html#clang-for-intelligent-code-completion",
            prompt_title: "Clang is not installed in your system",
            prompt_detail: "Intelligent code completion uses Clang.\n\
                            Install it, otherwise this feature will be disabled.",
            buttons: ["Install Clang", "Remind later", "Disable code completion"],
        }
    }
}

/// Persisted decision for a feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeatureState {
    Unknown,
    Present,
    Declined,
}

impl FeatureState {
    pub fn from_stored(value: Option<i64>) -> Self {
        match value {
            Some(1) => FeatureState::Present,
            Some(-1) => FeatureState::Declined,
            _ => FeatureState::Unknown,
        }
    }

    pub fn stored(self) -> i64 {
        match self {
            FeatureState::Present => 1,
            FeatureState::Declined => -1,
            FeatureState::Unknown => 0,
        }
    }
}

pub struct OptionalFeatureStage {
    spec: FeatureSpec,
    state: StageState,
    feature: FeatureState,
}

impl OptionalFeatureStage {
    pub fn new(spec: FeatureSpec) -> Self {
        Self {
            spec,
            state: StageState::default(),
            feature: FeatureState::Unknown,
        }
    }

    pub fn feature_state(&self) -> FeatureState {
        self.feature
    }

    fn remember(&mut self, ctx: &InstallContext, feature: FeatureState) {
        self.feature = feature;
        if let Err(e) = ctx.state.store(self.spec.key, feature.stored()) {
            tracing::warn!(key = self.spec.key, error = %e, "cannot persist feature state");
        }
    }

    async fn tool_present(&self, ctx: &InstallContext) -> bool {
        let args = ["--version".to_string()];
        matches!(ctx.runner.run(self.spec.tool, &args).await, Ok(out) if out.success())
    }
}

#[async_trait]
impl Stage for OptionalFeatureStage {
    fn kind(&self) -> StageKind {
        StageKind::CodeCompletion
    }

    fn name(&self) -> &str {
        self.spec.name
    }

    fn status(&self) -> StageStatus {
        self.state.status()
    }

    fn is_optional(&self) -> bool {
        true
    }

    fn detail(&self) -> Option<String> {
        match self.feature {
            FeatureState::Present => None,
            FeatureState::Declined => Some("disabled".into()),
            FeatureState::Unknown => Some(format!("{} not found", self.spec.tool)),
        }
    }

    async fn check(&mut self, ctx: &InstallContext) -> Result<()> {
        self.feature = FeatureState::from_stored(ctx.state.load(self.spec.key));
        if self.feature != FeatureState::Unknown {
            self.state.mark_succeeded();
            return Ok(());
        }
        if self.tool_present(ctx).await {
            self.remember(ctx, FeatureState::Present);
            self.state.mark_succeeded();
            return Ok(());
        }
        self.state.mark_pending();
        Err(InstallError::NotReady(format!(
            "{} is not installed",
            self.spec.tool
        )))
    }

    async fn install(&mut self, ctx: &InstallContext) -> Result<()> {
        if self.state.is_succeeded() || self.feature == FeatureState::Present {
            self.state.mark_succeeded();
            return Ok(());
        }
        // Only a decline resolves the feature; anything else asks again later.
        self.state.mark_pending();

        let prompt = Prompt::new(
            self.spec.prompt_title,
            self.spec.prompt_detail,
            &self.spec.buttons,
        );
        match ctx.prompter.choose(&prompt).await {
            Ok(0) => ctx.prompter.open_url(self.spec.docs_url),
            Ok(2) => {
                self.remember(ctx, FeatureState::Declined);
                self.state.mark_succeeded();
                output::info(&format!("{} disabled", self.spec.name));
            }
            Ok(_) => {}
            Err(e) => {
                output::warning(&format!("{}: {e}; will ask again next time", self.spec.name));
            }
        }
        Ok(())
    }
}
