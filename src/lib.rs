//! Installation and readiness orchestrator for an IDE integration
//!
//! Makes sure the prerequisites of the IDE integration are present,
//! compatible and active before it starts:
//!
//! 1. **Host dependencies**: companion packages at compatible versions, enabled
//! 2. **Runtime core**: an isolated virtual environment with the
//!    build-automation core installed into it
//! 3. **Project examples**: a downloaded example project tree
//! 4. **Code completion**: an optional external tool, best effort
//!
//! Each stage is probed first and installed only when the probe fails. The
//! whole run holds a cross-process lock so concurrent instances never
//! provision at the same time.
//!
//! # Example
//!
//! ```no_run
//! use ide_bootstrap::{InstallContext, Orchestrator, Settings};
//! use ide_bootstrap::helpers::{
//!     download::HttpDownloader, packages::DirectoryPackages, process::SystemRunner,
//!     prompt::TerminalPrompter,
//! };
//! use ide_bootstrap::state::FileStateStore;
//! use std::sync::Arc;
//!
//! # async fn run() -> ide_bootstrap::Result<()> {
//! let settings = Settings::load(None)?;
//! let state = FileStateStore::open(settings.base_dir.join("state.json"));
//! let ctx = InstallContext::new(
//!     settings.clone(),
//!     Arc::new(SystemRunner::new(settings.process_timeout)),
//!     Arc::new(HttpDownloader::default()),
//!     Arc::new(TerminalPrompter::new()),
//!     Arc::new(DirectoryPackages::new(&settings.packages_dir)),
//!     Arc::new(state),
//! );
//! let report = Orchestrator::for_context(&ctx).run(&ctx).await?;
//! assert!(report.is_ready());
//! # Ok(())
//! # }
//! ```

pub mod core;
pub mod helpers;
pub mod stages;

pub use crate::core::config::{self, Settings};
pub use crate::core::context::{InstallContext, Layout};
pub use crate::core::error::{InstallError, Result};
pub use crate::core::orchestrator::{Orchestrator, ReadinessReport, StageReport};
pub use crate::core::{output, state};
pub use crate::stages::{Stage, StageKind, StageStatus};
