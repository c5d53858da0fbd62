//! Stage behaviour against scripted collaborators.

mod common;

use common::*;
use ide_bootstrap::config::{DependencySet, DependencySpec};
use ide_bootstrap::stages::content_bundle::unpack_bundle;
use ide_bootstrap::stages::{
    ContentBundleStage, DependencyStage, FeatureSpec, FeatureState, OptionalFeatureStage,
    ProvisionStrategy, RuntimeCoreStage, Stage, StageStatus,
};
use ide_bootstrap::InstallError;
use std::path::PathBuf;
use tempfile::TempDir;

const CORE_VERSION_OUTPUT: &str = "PlatformIO, version 3.6.0\n";

fn deps(entries: &[(&str, &str, bool)]) -> DependencySet {
    entries.iter().fold(DependencySet::new(), |set, (name, req, required)| {
        set.with(name, DependencySpec::new(req, *required).unwrap())
    })
}

// =============================================================================
// Dependencies
// =============================================================================

#[tokio::test]
async fn test_pkga_incompatible_is_replaced() {
    let dir = TempDir::new().unwrap();
    let world = world();
    install_package(&world, "pkgA", "0.9", true);

    let mut settings = test_settings(&dir);
    settings.dependencies = deps(&[("pkgA", ">=1.0 <2.0", true)]);
    let mut fakes = Fakes::new(&world);
    fakes.runner = fakes.runner.package_manager();
    let ctx = context(settings, &world, fakes);

    let mut stage = DependencyStage::new();
    let err = stage.check(&ctx).await.unwrap_err();
    assert!(err.to_string().contains("incompatible packages: pkga"), "{err}");
    assert!(!err.to_string().contains("missing"));

    stage.install(&ctx).await.unwrap();
    assert_eq!(stage.status(), StageStatus::Succeeded);
    assert_eq!(
        calls(&world),
        vec![
            "apm uninstall pkga".to_string(),
            "apm install pkga --production --compatible".to_string(),
        ]
    );

    let mut again = DependencyStage::new();
    again.check(&ctx).await.unwrap();
}

#[tokio::test]
async fn test_uninstall_precedes_install() {
    let dir = TempDir::new().unwrap();
    let world = world();
    install_package(&world, "alpha", "0.5.0", true);

    let mut settings = test_settings(&dir);
    settings.dependencies = DependencySet::new()
        .with("alpha", DependencySpec::new(">=1.0.0", true).unwrap())
        .with(
            "beta",
            DependencySpec::new(">=1.0.0", false)
                .unwrap()
                .with_force_version("1.2.0"),
        );
    let mut fakes = Fakes::new(&world);
    fakes.runner = fakes.runner.package_manager();
    let ctx = context(settings, &world, fakes);

    let mut stage = DependencyStage::new();
    assert!(stage.check(&ctx).await.is_err());
    stage.install(&ctx).await.unwrap();

    let log = calls(&world);
    let uninstall = log.iter().position(|c| c.starts_with("apm uninstall")).unwrap();
    let install = log.iter().position(|c| c.starts_with("apm install")).unwrap();
    assert!(uninstall < install);
    assert_eq!(
        log[install],
        "apm install alpha beta@1.2.0 --production --compatible"
    );
}

#[tokio::test]
async fn test_inactive_required_package_is_enabled() {
    let dir = TempDir::new().unwrap();
    let world = world();
    install_package(&world, "Build", "0.70.0", false);
    install_package(&world, "linter", "2.0.0", false);

    let mut settings = test_settings(&dir);
    settings.dependencies = deps(&[("build", ">=0.65.0", true), ("linter", ">=1.0.0", false)]);
    let ctx = context(settings, &world, Fakes::new(&world));

    let mut stage = DependencyStage::new();
    let err = stage.check(&ctx).await.unwrap_err();
    assert!(err.to_string().contains("inactive packages: build"));

    stage.install(&ctx).await.unwrap();
    assert_eq!(calls(&world), vec!["enable build".to_string()]);
}

#[tokio::test]
async fn test_package_manager_failure_carries_stderr() {
    let dir = TempDir::new().unwrap();
    let world = world();

    let mut settings = test_settings(&dir);
    settings.dependencies = deps(&[("build", ">=0.65.0", true)]);
    let mut fakes = Fakes::new(&world);
    fakes.runner = fakes
        .runner
        .on(|_, program, _| named(program, "apm").then(|| Ok(fail(1, "network unreachable\n"))));
    let ctx = context(settings, &world, fakes);

    let mut stage = DependencyStage::new();
    let err = stage.install(&ctx).await.unwrap_err();
    match err {
        InstallError::ProcessFailed { code, stderr, .. } => {
            assert_eq!(code, 1);
            assert_eq!(stderr, "network unreachable");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(stage.status(), StageStatus::Failed);
}

#[tokio::test]
async fn test_reinstalled_version_still_out_of_range() {
    let dir = TempDir::new().unwrap();
    let world = world();
    install_package(&world, "pkgA", "0.9", true);
    world
        .lock()
        .unwrap()
        .registry
        .insert("pkga".to_string(), "0.9.5".to_string());

    let mut settings = test_settings(&dir);
    settings.dependencies = deps(&[("pkgA", ">=1.0 <2.0", true)]);
    let mut fakes = Fakes::new(&world);
    fakes.runner = fakes.runner.package_manager();
    let ctx = context(settings, &world, fakes);

    let mut stage = DependencyStage::new();
    let err = stage.install(&ctx).await.unwrap_err();
    match err {
        InstallError::VersionIncompatible {
            name,
            required,
            found,
        } => {
            assert_eq!(name, "pkga");
            assert_eq!(required, ">=1.0 <2.0");
            assert_eq!(found, "0.9.5");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(stage.status(), StageStatus::Failed);
}

#[tokio::test]
async fn test_install_twice_has_no_second_side_effects() {
    let dir = TempDir::new().unwrap();
    let world = world();

    let mut settings = test_settings(&dir);
    settings.dependencies = deps(&[("build", ">=0.65.0", true)]);
    let mut fakes = Fakes::new(&world);
    fakes.runner = fakes.runner.package_manager();
    let ctx = context(settings, &world, fakes);

    let mut stage = DependencyStage::new();
    stage.install(&ctx).await.unwrap();
    let after_first = calls(&world).len();
    stage.install(&ctx).await.unwrap();
    assert_eq!(calls(&world).len(), after_first);
    assert_eq!(stage.status(), StageStatus::Succeeded);
}

// =============================================================================
// Runtime core
// =============================================================================

/// Conda whose `create` asserts an empty prefix, then makes `<prefix>/bin`.
fn conda_runner(runner: FakeRunner) -> FakeRunner {
    runner
        .on(|_, program, args| {
            if !named(program, "conda") || args.first().map(String::as_str) != Some("create") {
                return None;
            }
            let prefix = PathBuf::from(args.last().unwrap());
            assert!(!prefix.exists(), "environment must be removed before creation");
            std::fs::create_dir_all(env_bin(&prefix)).unwrap();
            Some(Ok(ok("created")))
        })
        .program("conda", ok("conda 4.3.0"))
        .program("pip", ok("Successfully installed platformio"))
        .program("platformio", ok(CORE_VERSION_OUTPUT))
}

#[tokio::test]
async fn test_environment_is_replaced_wholesale() {
    let dir = TempDir::new().unwrap();
    let world = world();
    let settings = test_settings(&dir);

    let mut fakes = Fakes::new(&world);
    fakes.runner = conda_runner(fakes.runner);
    let ctx = context(settings, &world, fakes);

    let stale = ctx.layout.env_dir.join("lib/old-strategy-artifact");
    std::fs::create_dir_all(stale.parent().unwrap()).unwrap();
    std::fs::write(&stale, "old").unwrap();

    let mut stage = RuntimeCoreStage::new();
    assert!(stage.check(&ctx).await.is_err());
    stage.install(&ctx).await.unwrap();

    assert!(!stale.exists());
    assert!(ctx.layout.env_bin_dir.is_dir());
    assert_eq!(
        stage.environment().map(|e| e.strategy),
        Some(ProvisionStrategy::PackageManager)
    );
    assert_eq!(stage.core_version(), Some("3.6.0"));

    let log = calls(&world);
    let create = log.iter().position(|c| c.starts_with("conda create")).unwrap();
    let pip = log.iter().position(|c| c.starts_with("pip install")).unwrap();
    assert!(create < pip);
    assert!(log[create].contains("--yes --quiet python=2.7 --prefix"));
    assert!(log[pip].ends_with("--no-cache-dir -U platformio"));
}

#[tokio::test]
async fn test_development_core_installs_from_source_archive() {
    let dir = TempDir::new().unwrap();
    let world = world();
    let mut settings = test_settings(&dir);
    settings.host_version = Some("2.0.0-beta.3".into());
    let dev_source = settings.runtime.development_source.clone();

    let mut fakes = Fakes::new(&world);
    fakes.runner = conda_runner(fakes.runner);
    let ctx = context(settings, &world, fakes);

    let mut stage = RuntimeCoreStage::new();
    stage.install(&ctx).await.unwrap();

    let log = calls(&world);
    assert!(log.iter().any(|c| c == &format!("pip install --no-cache-dir -U {dev_source}")));
}

#[tokio::test]
async fn test_user_virtualenv_with_discovered_interpreter() {
    let dir = TempDir::new().unwrap();
    let world = world();
    let settings = test_settings(&dir);

    let mut fakes = Fakes::new(&world);
    fakes.runner = fakes
        .runner
        .interpreters(&["python"], "2.7")
        .interpreters(&["python2.7"], "3.8")
        .on(|_, program, args| {
            if !named(program, "virtualenv") {
                return None;
            }
            if args.first().map(String::as_str) == Some("--version") {
                return Some(Ok(ok("15.1.0")));
            }
            assert_eq!(args[0], "-p");
            assert_eq!(args[1], "python");
            std::fs::create_dir_all(env_bin(&PathBuf::from(&args[2]))).unwrap();
            Some(Ok(ok("created")))
        })
        .program("pip", ok(""))
        .program("platformio", ok(CORE_VERSION_OUTPUT));
    let ctx = context(settings, &world, fakes);

    let mut stage = RuntimeCoreStage::new();
    stage.install(&ctx).await.unwrap();
    assert_eq!(
        stage.environment().map(|e| e.strategy),
        Some(ProvisionStrategy::UserTool)
    );
    assert_eq!(ctx.cached_interpreter(), Some(PathBuf::from("python")));
}

#[tokio::test]
async fn test_bundled_download_runs_bootstrap_script() {
    let dir = TempDir::new().unwrap();
    let world = world();
    let settings = test_settings(&dir);
    let url = settings.runtime.virtualenv_url.clone();

    let archive = tar_gz(&[
        ("virtualenv-14.0.6/README.rst", "readme"),
        ("virtualenv-14.0.6/virtualenv.py", "# bootstrap"),
    ]);
    let mut fakes = Fakes::new(&world);
    fakes.downloader = fakes.downloader.serve(&url, archive);
    fakes.runner = fakes
        .runner
        .interpreters(&["python2.7"], "2.7")
        .on(|_, program, args| {
            let is_bootstrap = args.first().is_some_and(|a| a.ends_with("virtualenv.py"));
            if !named(program, "python2.7") || !is_bootstrap {
                return None;
            }
            std::fs::create_dir_all(env_bin(&PathBuf::from(&args[1]))).unwrap();
            Some(Ok(ok("created")))
        })
        .program("pip", ok(""))
        .program("platformio", ok(CORE_VERSION_OUTPUT));
    let ctx = context(settings, &world, fakes);

    let mut stage = RuntimeCoreStage::new();
    stage.install(&ctx).await.unwrap();
    assert_eq!(
        stage.environment().map(|e| e.strategy),
        Some(ProvisionStrategy::BundledDownload)
    );
    assert!(ctx.layout.env_bin_dir.is_dir());
    assert!(calls(&world).contains(&format!("download {url}")));
}

#[tokio::test]
async fn test_interpreter_retry_then_abort() {
    let dir = TempDir::new().unwrap();
    let world = world();
    let settings = test_settings(&dir);

    let mut fakes = Fakes::new(&world);
    fakes.runner = fakes.runner.interpreters(&["python2.7", "python"], "3.8");
    // Retry, then abort.
    fakes.prompter = ScriptedPrompter::answering(&[2, 3]);
    let prompter = fakes.prompter.clone();
    let ctx = context(settings, &world, fakes);

    let mut stage = RuntimeCoreStage::new();
    let err = stage.install(&ctx).await.unwrap_err();
    assert!(matches!(err, InstallError::ToolNotFound { .. }), "{err}");
    assert_eq!(stage.status(), StageStatus::Failed);

    let probes = calls(&world)
        .iter()
        .filter(|c| c.starts_with("python") && c.contains(" -c "))
        .count();
    // Two candidates per round, two rounds.
    assert_eq!(probes, 4);
    assert_eq!(prompter.asked().len(), 2);
    assert!(!calls(&world).iter().any(|c| c.starts_with("download")));
}

#[tokio::test]
async fn test_interpreter_from_custom_location() {
    let dir = TempDir::new().unwrap();
    let world = world();
    let settings = test_settings(&dir);
    let custom = dir.path().join("opt-python");
    let custom_python = custom.join("python");
    let custom_str = custom_python.to_string_lossy().into_owned();

    let mut fakes = Fakes::new(&world);
    fakes.runner = fakes
        .runner
        .on(move |_, program, _| (program == custom_str).then(|| Ok(ok("2.7\n"))))
        .program("virtualenv", ok("15.1.0"))
        .interpreters(&["python2.7", "python"], "3.8")
        .program("pip", ok(""))
        .program("platformio", ok(CORE_VERSION_OUTPUT));
    // "I have Python": point at the custom directory.
    fakes.prompter = ScriptedPrompter::answering(&[1]).with_folders(vec![custom.clone()]);
    let prompter = fakes.prompter.clone();
    let ctx = context(settings, &world, fakes);

    let mut stage = RuntimeCoreStage::new();
    stage.install(&ctx).await.unwrap();
    assert_eq!(ctx.cached_interpreter(), Some(custom_python.clone()));
    assert_eq!(prompter.asked().len(), 1);
    assert!(
        calls(&world)
            .iter()
            .any(|c| c.starts_with("virtualenv -p") && c.contains(&*custom_python.to_string_lossy()))
    );
}

#[tokio::test]
async fn test_opted_out_core_spawns_nothing() {
    let dir = TempDir::new().unwrap();
    let world = world();
    let mut settings = test_settings(&dir);
    settings.use_bundled_runtime_core = false;
    let ctx = context(settings, &world, Fakes::new(&world));

    let mut stage = RuntimeCoreStage::new();
    stage.check(&ctx).await.unwrap();
    stage.install(&ctx).await.unwrap();
    assert!(calls(&world).is_empty());
    assert!(!ctx.layout.env_dir.exists());
}

#[tokio::test]
async fn test_core_check_reports_failed_version_query() {
    let dir = TempDir::new().unwrap();
    let world = world();
    let settings = test_settings(&dir);

    let mut fakes = Fakes::new(&world);
    fakes.runner = fakes
        .runner
        .program("platformio", fail(1, "ImportError: no module named platformio"));
    let ctx = context(settings, &world, fakes);
    std::fs::create_dir_all(&ctx.layout.env_bin_dir).unwrap();

    let mut stage = RuntimeCoreStage::new();
    let err = stage.check(&ctx).await.unwrap_err();
    assert!(err.to_string().contains("ImportError"), "{err}");
    assert_eq!(stage.status(), StageStatus::Pending);
}

// =============================================================================
// Content bundle
// =============================================================================

#[tokio::test]
async fn test_single_directory_bundle_replaces_destination() {
    let dir = TempDir::new().unwrap();
    let world = world();
    let settings = test_settings(&dir);
    let url = settings.content.url.clone();

    let archive = tar_gz(&[
        ("examples-v3/blink/platformio.ini", "[env:uno]"),
        ("examples-v3/blink/src/main.cpp", "void setup() {}"),
        ("examples-v3/README.md", "examples"),
    ]);
    let mut fakes = Fakes::new(&world);
    fakes.downloader = fakes.downloader.serve(&url, archive);
    let ctx = context(settings, &world, fakes);

    let dest = &ctx.layout.examples_dir;
    std::fs::create_dir_all(dest.join("old-project")).unwrap();
    std::fs::write(dest.join("old-project/stale.txt"), "stale").unwrap();

    let mut stage = ContentBundleStage::new();
    // Presence alone satisfies the probe, so install directly.
    stage.install(&ctx).await.unwrap();

    assert!(!dest.join("old-project").exists());
    assert_eq!(
        std::fs::read_to_string(dest.join("blink/src/main.cpp")).unwrap(),
        "void setup() {}"
    );
    assert_eq!(std::fs::read_to_string(dest.join("README.md")).unwrap(), "examples");
    assert!(!dest.join("examples-v3").exists());

    let mut again = ContentBundleStage::new();
    again.check(&ctx).await.unwrap();
}

#[tokio::test]
async fn test_two_top_level_entries_is_corrupt_and_keeps_destination() {
    let dir = TempDir::new().unwrap();
    let archive = dir.path().join("bundle.tar.gz");
    std::fs::write(&archive, tar_gz(&[("a/one.txt", "1"), ("b/two.txt", "2")])).unwrap();

    let dest = dir.path().join("project-examples");
    std::fs::create_dir_all(&dest).unwrap();
    std::fs::write(dest.join("keep.txt"), "previous").unwrap();

    let err = unpack_bundle(&archive, &dest).await.unwrap_err();
    assert!(matches!(err, InstallError::ArchiveCorrupt { .. }), "{err}");
    assert_eq!(std::fs::read_to_string(dest.join("keep.txt")).unwrap(), "previous");
}

#[tokio::test]
async fn test_empty_archive_is_corrupt() {
    let dir = TempDir::new().unwrap();
    let archive = dir.path().join("empty.tar.gz");
    std::fs::write(&archive, tar_gz(&[])).unwrap();

    let dest = dir.path().join("project-examples");
    let err = unpack_bundle(&archive, &dest).await.unwrap_err();
    assert!(matches!(err, InstallError::ArchiveCorrupt { .. }));
    assert!(!dest.exists());
}

// =============================================================================
// Optional feature
// =============================================================================

#[tokio::test]
async fn test_present_tool_is_remembered() {
    let dir = TempDir::new().unwrap();
    let world = world();
    let mut fakes = Fakes::new(&world);
    fakes.runner = fakes.runner.program("clang", ok("clang version 3.9.0"));
    let ctx = context(test_settings(&dir), &world, fakes);

    let mut stage = OptionalFeatureStage::new(FeatureSpec::code_completion());
    stage.check(&ctx).await.unwrap();
    assert_eq!(stage.feature_state(), FeatureState::Present);
    assert_eq!(ctx.state.load("code-completion"), Some(1));
}

#[tokio::test]
async fn test_declined_feature_skips_tool_check_next_time() {
    let dir = TempDir::new().unwrap();
    let world = world();
    let mut fakes = Fakes::new(&world);
    fakes.prompter = ScriptedPrompter::answering(&[2]);
    let ctx = context(test_settings(&dir), &world, fakes);

    let mut stage = OptionalFeatureStage::new(FeatureSpec::code_completion());
    assert!(stage.check(&ctx).await.is_err());
    stage.install(&ctx).await.unwrap();
    assert_eq!(ctx.state.load("code-completion"), Some(-1));
    assert_eq!(stage.status(), StageStatus::Succeeded);

    let probes_before = calls(&world).len();
    let mut next_run = OptionalFeatureStage::new(FeatureSpec::code_completion());
    next_run.check(&ctx).await.unwrap();
    assert_eq!(next_run.feature_state(), FeatureState::Declined);
    assert_eq!(calls(&world).len(), probes_before);
}

#[tokio::test]
async fn test_install_tool_choice_opens_docs_and_stays_unknown() {
    let dir = TempDir::new().unwrap();
    let world = world();
    let mut fakes = Fakes::new(&world);
    fakes.prompter = ScriptedPrompter::answering(&[0]);
    let prompter = fakes.prompter.clone();
    let ctx = context(test_settings(&dir), &world, fakes);

    let mut stage = OptionalFeatureStage::new(FeatureSpec::code_completion());
    stage.install(&ctx).await.unwrap();
    assert_eq!(prompter.opened().len(), 1);
    assert_eq!(ctx.state.load("code-completion"), None);
    assert_eq!(stage.status(), StageStatus::Pending);
}

#[tokio::test]
async fn test_remind_later_stays_pending_and_asks_again() {
    let dir = TempDir::new().unwrap();
    let world = world();
    let mut fakes = Fakes::new(&world);
    fakes.prompter = ScriptedPrompter::answering(&[1, 1]);
    let prompter = fakes.prompter.clone();
    let ctx = context(test_settings(&dir), &world, fakes);

    let mut stage = OptionalFeatureStage::new(FeatureSpec::code_completion());
    assert!(stage.check(&ctx).await.is_err());
    stage.install(&ctx).await.unwrap();
    assert_eq!(stage.status(), StageStatus::Pending);
    assert_eq!(stage.feature_state(), FeatureState::Unknown);
    assert_eq!(ctx.state.load("code-completion"), None);

    stage.install(&ctx).await.unwrap();
    assert_eq!(prompter.asked().len(), 2);
    assert_eq!(stage.status(), StageStatus::Pending);
}

#[tokio::test]
async fn test_prompt_failure_never_fails_feature() {
    let dir = TempDir::new().unwrap();
    let world = world();
    let ctx = context(test_settings(&dir), &world, Fakes::new(&world));

    let mut stage = OptionalFeatureStage::new(FeatureSpec::code_completion());
    stage.install(&ctx).await.unwrap();
    assert_eq!(stage.feature_state(), FeatureState::Unknown);
    assert_eq!(stage.status(), StageStatus::Pending);
}
