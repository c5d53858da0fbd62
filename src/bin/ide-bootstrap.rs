//! ide-bootstrap CLI - prepare the IDE integration's prerequisites
//!
//! Usage:
//!   ide-bootstrap install                    Check and install every stage
//!   ide-bootstrap check                      Show readiness without installing
//!   ide-bootstrap reinstall-core [--development]
//!                                            Rebuild the runtime environment
//!   ide-bootstrap reset-feature <key>        Forget a declined optional feature
//!   ide-bootstrap env                        Print the composed search path

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use ide_bootstrap::helpers::download::HttpDownloader;
use ide_bootstrap::helpers::packages::DirectoryPackages;
use ide_bootstrap::helpers::process::{SystemRunner, compose_search_path};
use ide_bootstrap::helpers::prompt::TerminalPrompter;
use ide_bootstrap::state::{FileStateStore, StateStore};
use ide_bootstrap::{InstallContext, Layout, Orchestrator, Settings, StageKind, output};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

const LOG_ENV: &str = "IDE_BOOTSTRAP_LOG";

#[derive(Parser)]
#[command(name = "ide-bootstrap")]
#[command(about = "Install and verify the IDE integration's prerequisites")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Settings file (replaces XDG discovery)
    #[arg(short, long, global = true, env = "IDE_BOOTSTRAP_CONFIG")]
    config: Option<PathBuf>,

    /// Base directory for the environment, examples and cache
    #[arg(short, long, global = true)]
    base_dir: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Check every stage and install what is missing
    Install,

    /// Show per-stage readiness without installing anything
    Check,

    /// Rebuild the runtime environment and reinstall the core
    ReinstallCore {
        /// Install the core from its development source
        #[arg(long)]
        development: bool,
    },

    /// Forget the stored decision for an optional feature
    ResetFeature {
        /// Feature key, e.g. code-completion
        key: String,
    },

    /// Print the search path spawned tools see
    Env,
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn build_context(settings: Settings) -> InstallContext {
    let layout = Layout::new(&settings.base_dir);
    let env_bin = settings
        .use_bundled_runtime_core
        .then_some(layout.env_bin_dir.as_path());
    let search_path = compose_search_path(
        env_bin,
        settings.custom_path.as_deref(),
        std::env::var_os("PATH").as_deref(),
    );

    let runner = SystemRunner::new(settings.process_timeout).with_search_path(search_path);
    let packages = DirectoryPackages::new(&settings.packages_dir);
    let state = FileStateStore::open(&layout.state_path);

    InstallContext::new(
        settings,
        Arc::new(runner),
        Arc::new(HttpDownloader::default()),
        Arc::new(TerminalPrompter::new()),
        Arc::new(packages),
        Arc::new(state),
    )
}

/// Map a lock held elsewhere to a notice; everything else stays an error.
fn lock_notice<T>(result: ide_bootstrap::Result<T>) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.is_lock_unavailable() => {
            output::info(&format!("{e}; skipping"));
            Ok(None)
        }
        Err(e) => Err(e.into()),
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let mut settings = Settings::load(cli.config.as_deref()).context("Failed to load settings")?;
    if let Some(base_dir) = cli.base_dir {
        settings.base_dir = base_dir;
    }

    match cli.command {
        Commands::Install => {
            let ctx = build_context(settings);
            output::action("Checking prerequisites");
            let mut orchestrator = Orchestrator::for_context(&ctx);
            let Some(report) = lock_notice(orchestrator.run(&ctx).await)? else {
                return Ok(());
            };
            ctx.clear_interpreter_cache();
            report.print();
            if report.is_ready() {
                output::success("All prerequisites are ready");
            } else {
                bail!("prerequisites are not ready");
            }
        }

        Commands::Check => {
            let ctx = build_context(settings);
            output::action("Readiness");
            let report = Orchestrator::for_context(&ctx).check_only(&ctx).await;
            report.print();
            if !report.is_ready() {
                bail!("prerequisites are not ready; run `ide-bootstrap install`");
            }
        }

        Commands::ReinstallCore { development } => {
            if development {
                settings.use_development_runtime_core = true;
            }
            if !settings.use_bundled_runtime_core {
                output::skip("use_bundled_runtime_core is off; nothing to reinstall");
                return Ok(());
            }
            let ctx = build_context(settings);
            if let Some(report) =
                lock_notice(Orchestrator::reinstall(&ctx, StageKind::RuntimeCore).await)?
                && let Some(detail) = report.detail
            {
                output::detail(&detail);
            }
            ctx.clear_interpreter_cache();
        }

        Commands::ResetFeature { key } => {
            if StageKind::from_key(&key) != Some(StageKind::CodeCompletion) {
                bail!("unknown optional feature '{key}' (known: code-completion)");
            }
            let layout = Layout::new(&settings.base_dir);
            let state = FileStateStore::open(&layout.state_path);
            state
                .clear(&key)
                .with_context(|| format!("Failed to reset {key}"))?;
            output::success(&format!("{key} will be asked about again"));
        }

        Commands::Env => {
            let layout = Layout::new(&settings.base_dir);
            let env_bin = settings
                .use_bundled_runtime_core
                .then_some(layout.env_bin_dir.as_path());
            let path = compose_search_path(
                env_bin,
                settings.custom_path.as_deref(),
                std::env::var_os("PATH").as_deref(),
            );
            println!("PATH={}", path.to_string_lossy());
        }
    }

    Ok(())
}
