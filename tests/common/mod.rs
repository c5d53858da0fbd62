//! Shared fakes for integration tests.
//!
//! The runner, host packages and downloader share one [`World`] so package
//! manager commands show up in the package inventory, and every call lands
//! in a single ordered log.

#![allow(dead_code)]

use async_trait::async_trait;
use flate2::Compression;
use flate2::write::GzEncoder;
use ide_bootstrap::config::DependencySet;
use ide_bootstrap::helpers::download::Downloader;
use ide_bootstrap::helpers::packages::{HostPackages, PackageManifest};
use ide_bootstrap::helpers::process::{ProcessOutput, ProcessRunner};
use ide_bootstrap::helpers::prompt::{Prompt, Prompter};
use ide_bootstrap::state::MemoryStateStore;
use ide_bootstrap::{InstallContext, InstallError, Result, Settings};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

#[derive(Debug, Clone)]
pub struct FakePackage {
    pub name: String,
    pub version: String,
    pub active: bool,
}

/// State shared by all fakes.
#[derive(Debug, Default)]
pub struct World {
    /// Installed packages keyed by lowercased name.
    pub packages: BTreeMap<String, FakePackage>,
    /// Version the package manager installs when none is pinned.
    pub registry: HashMap<String, String>,
    /// Every external call, in order: `program args...`, `enable name`, `download url`.
    pub calls: Vec<String>,
}

pub type SharedWorld = Arc<Mutex<World>>;

pub fn world() -> SharedWorld {
    Arc::new(Mutex::new(World::default()))
}

pub fn install_package(world: &SharedWorld, name: &str, version: &str, active: bool) {
    world.lock().unwrap().packages.insert(
        name.to_lowercase(),
        FakePackage {
            name: name.to_string(),
            version: version.to_string(),
            active,
        },
    );
}

pub fn calls(world: &SharedWorld) -> Vec<String> {
    world.lock().unwrap().calls.clone()
}

pub fn ok(stdout: &str) -> ProcessOutput {
    ProcessOutput {
        exit_code: 0,
        stdout: stdout.to_string(),
        stderr: String::new(),
    }
}

pub fn fail(code: i32, stderr: &str) -> ProcessOutput {
    ProcessOutput {
        exit_code: code,
        stdout: String::new(),
        stderr: stderr.to_string(),
    }
}

// =============================================================================
// Process runner
// =============================================================================

/// Answers a call, or passes with `None`. Receives the program as spawned.
pub type Handler =
    Box<dyn Fn(&mut World, &str, &[String]) -> Option<Result<ProcessOutput>> + Send + Sync>;

/// Runner that replays handlers; unhandled programs are not found.
pub struct FakeRunner {
    world: SharedWorld,
    handlers: Vec<Handler>,
}

impl FakeRunner {
    pub fn new(world: &SharedWorld) -> Self {
        Self {
            world: world.clone(),
            handlers: Vec::new(),
        }
    }

    pub fn on(
        mut self,
        handler: impl Fn(&mut World, &str, &[String]) -> Option<Result<ProcessOutput>>
        + Send
        + Sync
        + 'static,
    ) -> Self {
        self.handlers.push(Box::new(handler));
        self
    }

    /// `program` answers `output` to any arguments.
    pub fn program(self, program: &'static str, output: ProcessOutput) -> Self {
        self.on(move |_, p, _| named(p, program).then(|| Ok(output.clone())))
    }

    /// The `apm` package manager backed by the world's inventory.
    pub fn package_manager(self) -> Self {
        self.on(|world, program, args| {
            if !named(program, "apm") {
                return None;
            }
            match args.first().map(String::as_str) {
                Some("uninstall") => {
                    for name in &args[1..] {
                        world.packages.remove(&name.to_lowercase());
                    }
                    Some(Ok(ok("uninstalled")))
                }
                Some("install") => {
                    for target in args[1..].iter().filter(|a| !a.starts_with("--")) {
                        let (name, version) = match target.split_once('@') {
                            Some((n, v)) => (n.to_string(), v.to_string()),
                            None => (
                                target.clone(),
                                world
                                    .registry
                                    .get(target)
                                    .cloned()
                                    .unwrap_or_else(|| "1.0.0".to_string()),
                            ),
                        };
                        world.packages.insert(
                            name.to_lowercase(),
                            FakePackage {
                                name,
                                version,
                                active: true,
                            },
                        );
                    }
                    Some(Ok(ok("installed")))
                }
                _ => Some(Ok(fail(1, "unknown apm command"))),
            }
        })
    }

    /// Interpreters that report `version` for the probe script.
    pub fn interpreters(self, names: &'static [&'static str], version: &'static str) -> Self {
        self.on(move |_, program, args| {
            let is_probe = args.first().is_some_and(|a| a == "-c");
            (names.iter().any(|n| named(program, n)) && is_probe).then(|| Ok(ok(&format!("{version}\n"))))
        })
    }
}

fn file_name(program: &str) -> String {
    Path::new(program)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| program.to_string())
}

/// Whether `program` (bare or a path) is the executable `name`.
pub fn named(program: &str, name: &str) -> bool {
    file_name(program) == name
}

#[async_trait]
impl ProcessRunner for FakeRunner {
    async fn run(&self, program: &str, args: &[String]) -> Result<ProcessOutput> {
        let name = file_name(program);
        let mut world = self.world.lock().unwrap();
        world.calls.push(format!("{} {}", name, args.join(" ")).trim().to_string());
        for handler in &self.handlers {
            if let Some(result) = handler(&mut *world, program, args) {
                return result;
            }
        }
        Err(InstallError::ToolNotFound { tool: name })
    }
}

// =============================================================================
// Host packages
// =============================================================================

pub struct FakePackages {
    world: SharedWorld,
}

impl FakePackages {
    pub fn new(world: &SharedWorld) -> Self {
        Self {
            world: world.clone(),
        }
    }
}

impl HostPackages for FakePackages {
    fn manifests(&self) -> Result<Vec<PackageManifest>> {
        Ok(self
            .world
            .lock()
            .unwrap()
            .packages
            .values()
            .map(|p| PackageManifest {
                name: p.name.clone(),
                version: p.version.clone(),
            })
            .collect())
    }

    fn is_active(&self, name: &str) -> bool {
        self.world
            .lock()
            .unwrap()
            .packages
            .get(&name.to_lowercase())
            .is_some_and(|p| p.active)
    }

    fn enable(&self, name: &str) -> Result<()> {
        let mut world = self.world.lock().unwrap();
        world.calls.push(format!("enable {name}"));
        if let Some(p) = world.packages.get_mut(&name.to_lowercase()) {
            p.active = true;
        }
        Ok(())
    }
}

// =============================================================================
// Downloader
// =============================================================================

/// Serves canned archive bytes by URL.
pub struct FakeDownloader {
    world: SharedWorld,
    files: HashMap<String, Vec<u8>>,
}

impl FakeDownloader {
    pub fn new(world: &SharedWorld) -> Self {
        Self {
            world: world.clone(),
            files: HashMap::new(),
        }
    }

    pub fn serve(mut self, url: &str, body: Vec<u8>) -> Self {
        self.files.insert(url.to_string(), body);
        self
    }
}

#[async_trait]
impl Downloader for FakeDownloader {
    async fn download(&self, url: &str, dest: &Path, _sha256: Option<&str>) -> Result<PathBuf> {
        self.world.lock().unwrap().calls.push(format!("download {url}"));
        let body = self.files.get(url).ok_or_else(|| InstallError::Download {
            url: url.to_string(),
            reason: "404".into(),
        })?;
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(dest, body).unwrap();
        Ok(dest.to_path_buf())
    }
}

// =============================================================================
// Prompter
// =============================================================================

/// Replays queued answers; an empty queue aborts like a closed terminal.
#[derive(Default)]
pub struct ScriptedPrompter {
    answers: Mutex<VecDeque<usize>>,
    folders: Mutex<VecDeque<Vec<PathBuf>>>,
    pub asked: Mutex<Vec<String>>,
    pub opened: Mutex<Vec<String>>,
}

impl ScriptedPrompter {
    pub fn answering(answers: &[usize]) -> Arc<Self> {
        Arc::new(Self {
            answers: Mutex::new(answers.iter().copied().collect()),
            ..Self::default()
        })
    }

    pub fn with_folders(self: Arc<Self>, folders: Vec<PathBuf>) -> Arc<Self> {
        self.folders.lock().unwrap().push_back(folders);
        self
    }

    pub fn asked(&self) -> Vec<String> {
        self.asked.lock().unwrap().clone()
    }

    pub fn opened(&self) -> Vec<String> {
        self.opened.lock().unwrap().clone()
    }
}

#[async_trait]
impl Prompter for ScriptedPrompter {
    async fn choose(&self, prompt: &Prompt) -> Result<usize> {
        self.asked.lock().unwrap().push(prompt.title.clone());
        self.answers
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| InstallError::UserAborted("no scripted answer".into()))
    }

    async fn pick_folders(&self, _title: &str) -> Result<Vec<PathBuf>> {
        Ok(self.folders.lock().unwrap().pop_front().unwrap_or_default())
    }

    fn open_url(&self, url: &str) {
        self.opened.lock().unwrap().push(url.to_string());
    }
}

// =============================================================================
// Context
// =============================================================================

/// Settings rooted in a scratch directory with no dependencies configured.
pub fn test_settings(dir: &TempDir) -> Settings {
    let mut settings = Settings::default();
    settings.base_dir = dir.path().join("base");
    settings.packages_dir = dir.path().join("packages");
    settings.dependencies = DependencySet::new();
    settings
}

pub struct Fakes {
    pub runner: FakeRunner,
    pub downloader: FakeDownloader,
    pub prompter: Arc<ScriptedPrompter>,
}

impl Fakes {
    pub fn new(world: &SharedWorld) -> Self {
        Self {
            runner: FakeRunner::new(world),
            downloader: FakeDownloader::new(world),
            prompter: ScriptedPrompter::answering(&[]),
        }
    }
}

pub fn context(settings: Settings, world: &SharedWorld, fakes: Fakes) -> InstallContext {
    InstallContext::new(
        settings,
        Arc::new(fakes.runner),
        Arc::new(fakes.downloader),
        fakes.prompter,
        Arc::new(FakePackages::new(world)),
        Arc::new(MemoryStateStore::new()),
    )
}

/// Build a gzip tarball from `(path, contents)` pairs.
pub fn tar_gz(files: &[(&str, &str)]) -> Vec<u8> {
    let enc = GzEncoder::new(Vec::new(), Compression::default());
    let mut builder = tar::Builder::new(enc);
    for (name, body) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(body.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, name, body.as_bytes())
            .unwrap();
    }
    builder.into_inner().unwrap().finish().unwrap()
}

pub fn env_bin(root: &Path) -> PathBuf {
    root.join(if cfg!(windows) { "Scripts" } else { "bin" })
}
