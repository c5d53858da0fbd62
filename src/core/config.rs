//! Installer settings
//!
//! Settings come from TOML files discovered the XDG way:
//!
//! ```text
//! $XDG_CONFIG_DIRS/ide-bootstrap/config.toml   (each dir, lowest priority first)
//! $XDG_CONFIG_HOME/ide-bootstrap/config.toml
//! ```
//!
//! Later files override earlier ones key by key. An explicit path (from
//! `--config` or `IDE_BOOTSTRAP_CONFIG`) replaces discovery. A missing config
//! is not an error; every key has a default.
//!
//! ```toml
//! use_bundled_runtime_core = true
//! custom_path = "/opt/tools/bin"
//!
//! [features]
//! code_completion = false
//!
//! [dependencies.build]
//! requirements = ">=0.65.0 <1.0.0"
//! required = true
//! ```

use crate::core::error::{InstallError, Result};
use semver::VersionReq;
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_VIRTUALENV_URL: &str =
    "https://pypi.python.org/packages/source/v/virtualenv/virtualenv-14.0.6.tar.gz";
pub const DEFAULT_CORE_DEVELOPMENT_SOURCE: &str =
    "https://github.com/platformio/platformio/archive/develop.zip";
pub const DEFAULT_CONTENT_URL: &str =
    "https://github.com/platformio/platformio-examples/tarball/master";

const DEFAULT_PACKAGE_MANAGER: &str = "apm";
const DEFAULT_CORE_PACKAGE: &str = "platformio";
const DEFAULT_CORE_COMMAND: &str = "platformio";
const DEFAULT_INTERPRETER_VERSION: &str = "2.7";
const DEFAULT_PROCESS_TIMEOUT_SECS: u64 = 900;

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV: &str = "IDE_BOOTSTRAP_CONFIG";

// ============================================================================
// Dependency set
// ============================================================================

/// One companion package the host must have.
#[derive(Debug, Clone)]
pub struct DependencySpec {
    pub requirement: VersionReq,
    /// Requirement as written in the config, for messages.
    pub requirement_str: String,
    pub required: bool,
    /// Install exactly this version (`name@version`) when the package is missing.
    pub force_version: Option<String>,
}

impl DependencySpec {
    pub fn new(requirements: &str, required: bool) -> Result<Self> {
        Ok(Self {
            requirement: parse_requirement(requirements)?,
            requirement_str: requirements.trim().to_string(),
            required,
            force_version: None,
        })
    }

    pub fn with_force_version(mut self, version: impl Into<String>) -> Self {
        self.force_version = Some(version.into());
        self
    }
}

/// Companion packages keyed by lowercased name. Read-only once loaded.
#[derive(Debug, Clone, Default)]
pub struct DependencySet {
    entries: BTreeMap<String, DependencySpec>,
}

impl DependencySet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a dependency; the name is normalised to lowercase.
    pub fn with(mut self, name: &str, spec: DependencySpec) -> Self {
        self.entries.insert(name.to_lowercase(), spec);
        self
    }

    pub fn get(&self, name: &str) -> Option<&DependencySpec> {
        self.entries.get(&name.to_lowercase())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &DependencySpec)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn defaults() -> Self {
        let table: [(&str, &str, bool); 4] = [
            ("build", ">=0.65.0", true),
            ("busy", ">=0.7.0", true),
            ("linter", ">=1.11.0", false),
            ("terminal", ">=2.5.0", false),
        ];
        let mut set = Self::new();
        for (name, req, required) in table {
            set.entries.insert(
                name.to_string(),
                DependencySpec {
                    requirement: VersionReq::parse(req).unwrap_or(VersionReq::STAR),
                    requirement_str: req.to_string(),
                    required,
                    force_version: None,
                },
            );
        }
        set
    }
}

/// Parse a version range, accepting npm-style space-separated comparators.
///
/// `">=1.0 <2.0"` becomes `">=1.0, <2.0"`; a bare version means exactly that
/// version; `""` and `"*"` match anything.
pub fn parse_requirement(raw: &str) -> Result<VersionReq> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed == "*" {
        return Ok(VersionReq::STAR);
    }
    if trimmed.contains("||") {
        return Err(InstallError::Config(format!(
            "alternative ranges ('||') are not supported: {trimmed}"
        )));
    }

    let mut comparators: Vec<String> = Vec::new();
    let mut pending_op: Option<&str> = None;
    for token in trimmed
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter(|t| !t.is_empty())
    {
        if token.chars().all(|c| matches!(c, '<' | '>' | '=' | '~' | '^')) {
            pending_op = Some(token);
            continue;
        }
        let comparator = match pending_op.take() {
            Some(op) => format!("{op}{token}"),
            None if token.starts_with(|c: char| c.is_ascii_digit())
                && !token.contains(['x', 'X', '*']) =>
            {
                format!("={token}")
            }
            None => token.to_string(),
        };
        comparators.push(comparator);
    }
    if let Some(op) = pending_op {
        return Err(InstallError::Config(format!(
            "dangling operator '{op}' in range: {trimmed}"
        )));
    }

    VersionReq::parse(&comparators.join(", "))
        .map_err(|e| InstallError::Config(format!("invalid version range '{trimmed}': {e}")))
}

// ============================================================================
// Features
// ============================================================================

/// Optional capabilities the pipeline can provision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Feature {
    CodeCompletion,
    ProjectExamples,
}

/// Set of enabled features.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Features {
    enabled: BTreeSet<Feature>,
}

impl Features {
    pub fn none() -> Self {
        Self {
            enabled: BTreeSet::new(),
        }
    }

    pub fn all() -> Self {
        Self {
            enabled: [Feature::CodeCompletion, Feature::ProjectExamples]
                .into_iter()
                .collect(),
        }
    }

    pub fn contains(&self, feature: Feature) -> bool {
        self.enabled.contains(&feature)
    }

    pub fn code_completion(&self) -> bool {
        self.contains(Feature::CodeCompletion)
    }

    pub fn project_examples(&self) -> bool {
        self.contains(Feature::ProjectExamples)
    }

    pub fn set(&mut self, feature: Feature, enabled: bool) {
        if enabled {
            self.enabled.insert(feature);
        } else {
            self.enabled.remove(&feature);
        }
    }
}

impl Default for Features {
    fn default() -> Self {
        Self::all()
    }
}

// ============================================================================
// Resolved settings
// ============================================================================

/// Runtime-core provisioning settings.
#[derive(Debug, Clone)]
pub struct RuntimeSettings {
    /// Package installed into the environment by its package installer.
    pub core_package: String,
    /// Executable the core provides; `<command> --version` reports its version.
    pub core_command: String,
    /// Source archive installed instead of `core_package` in development mode.
    pub development_source: String,
    /// Required interpreter `major.minor`.
    pub interpreter_version: String,
    pub interpreter_candidates: Vec<String>,
    pub virtualenv_url: String,
    pub virtualenv_sha256: Option<String>,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            core_package: DEFAULT_CORE_PACKAGE.to_string(),
            core_command: DEFAULT_CORE_COMMAND.to_string(),
            development_source: DEFAULT_CORE_DEVELOPMENT_SOURCE.to_string(),
            interpreter_version: DEFAULT_INTERPRETER_VERSION.to_string(),
            interpreter_candidates: default_interpreter_candidates(),
            virtualenv_url: DEFAULT_VIRTUALENV_URL.to_string(),
            virtualenv_sha256: None,
        }
    }
}

fn default_interpreter_candidates() -> Vec<String> {
    if cfg!(windows) {
        vec!["python.exe".into(), "C:\\Python27\\python.exe".into()]
    } else {
        vec!["python2.7".into(), "python".into()]
    }
}

/// Content bundle source.
#[derive(Debug, Clone)]
pub struct ContentSettings {
    pub url: String,
    pub sha256: Option<String>,
}

impl Default for ContentSettings {
    fn default() -> Self {
        Self {
            url: DEFAULT_CONTENT_URL.to_string(),
            sha256: None,
        }
    }
}

/// Fully resolved installer settings.
#[derive(Debug, Clone)]
pub struct Settings {
    pub base_dir: PathBuf,
    pub use_bundled_runtime_core: bool,
    pub use_development_runtime_core: bool,
    /// Extra search-path entries for spawned processes (OS path-list syntax).
    pub custom_path: Option<String>,
    /// Version of the host package; a pre-release selects the development core.
    pub host_version: Option<String>,
    /// Command used to install and uninstall companion packages.
    pub package_manager: String,
    /// Directory the host keeps its companion packages in.
    pub packages_dir: PathBuf,
    pub process_timeout: Duration,
    pub features: Features,
    pub dependencies: DependencySet,
    pub runtime: RuntimeSettings,
    pub content: ContentSettings,
}

impl Default for Settings {
    fn default() -> Self {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        Self {
            base_dir: home.join(".ide-bootstrap"),
            use_bundled_runtime_core: true,
            use_development_runtime_core: false,
            custom_path: None,
            host_version: None,
            package_manager: DEFAULT_PACKAGE_MANAGER.to_string(),
            packages_dir: home.join(".ide").join("packages"),
            process_timeout: Duration::from_secs(DEFAULT_PROCESS_TIMEOUT_SECS),
            features: Features::default(),
            dependencies: DependencySet::defaults(),
            runtime: RuntimeSettings::default(),
            content: ContentSettings::default(),
        }
    }
}

impl Settings {
    /// Load settings from an explicit file, or by XDG discovery when `None`.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let explicit = explicit
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from));

        let merged = match explicit {
            Some(path) => read_toml(&path)?,
            None => {
                let mut merged = SettingsToml::default();
                for path in find_config_files() {
                    if path.exists() {
                        tracing::debug!(path = %path.display(), "loading settings");
                        merged.merge(read_toml(&path)?);
                    }
                }
                merged
            }
        };

        Self::resolve(merged)
    }

    /// Parse settings from TOML text, applying defaults for absent keys.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let parsed = toml::from_str::<SettingsToml>(text)
            .map_err(|e| InstallError::Config(format!("invalid TOML: {e}")))?;
        Self::resolve(parsed)
    }

    /// Whether the runtime core should come from its development source.
    pub fn wants_development_core(&self) -> bool {
        if self.use_development_runtime_core {
            return true;
        }
        self.host_version
            .as_deref()
            .and_then(|v| semver::Version::parse(v.trim_start_matches('v')).ok())
            .is_some_and(|v| !v.pre.is_empty())
    }

    fn resolve(cfg: SettingsToml) -> Result<Self> {
        let mut settings = Settings::default();

        if let Some(dir) = cfg.base_dir {
            settings.base_dir = expand_home(&dir);
        }
        if let Some(v) = cfg.use_bundled_runtime_core {
            settings.use_bundled_runtime_core = v;
        }
        if let Some(v) = cfg.use_development_runtime_core {
            settings.use_development_runtime_core = v;
        }
        settings.custom_path = cfg.custom_path.filter(|p| !p.trim().is_empty());
        settings.host_version = cfg.host_version;
        if let Some(pm) = cfg.package_manager {
            settings.package_manager = pm;
        }
        if let Some(dir) = cfg.packages_dir {
            settings.packages_dir = expand_home(&dir);
        }
        if let Some(secs) = cfg.process_timeout_secs {
            settings.process_timeout = Duration::from_secs(secs.max(1));
        }

        if let Some(f) = cfg.features {
            if let Some(v) = f.code_completion {
                settings.features.set(Feature::CodeCompletion, v);
            }
            if let Some(v) = f.project_examples {
                settings.features.set(Feature::ProjectExamples, v);
            }
        }

        if let Some(deps) = cfg.dependencies {
            let mut set = DependencySet::new();
            for (name, dep) in deps {
                let req = dep.requirements.as_deref().unwrap_or("*");
                let spec = DependencySpec::new(req, dep.required.unwrap_or(true)).map_err(
                    |e| match e {
                        InstallError::Config(msg) => {
                            InstallError::Config(format!("dependency '{name}': {msg}"))
                        }
                        other => other,
                    },
                )?;
                let spec = match dep.force_version {
                    Some(v) => spec.with_force_version(v),
                    None => spec,
                };
                set = set.with(&name, spec);
            }
            settings.dependencies = set;
        }

        if let Some(rt) = cfg.runtime {
            let r = &mut settings.runtime;
            if let Some(v) = rt.core_package {
                r.core_package = v;
            }
            if let Some(v) = rt.core_command {
                r.core_command = v;
            }
            if let Some(v) = rt.development_source {
                r.development_source = v;
            }
            if let Some(v) = rt.interpreter_version {
                r.interpreter_version = v;
            }
            if let Some(v) = rt.interpreter_candidates.filter(|c| !c.is_empty()) {
                r.interpreter_candidates = v;
            }
            if let Some(v) = rt.virtualenv_url {
                r.virtualenv_url = v;
            }
            r.virtualenv_sha256 = rt.virtualenv_sha256;
        }

        if let Some(content) = cfg.content {
            if let Some(url) = content.url {
                settings.content.url = url;
            }
            settings.content.sha256 = content.sha256;
        }

        Ok(settings)
    }
}

// ============================================================================
// TOML layer
// ============================================================================

#[derive(Debug, Clone, Deserialize, Default)]
struct SettingsToml {
    base_dir: Option<String>,
    use_bundled_runtime_core: Option<bool>,
    use_development_runtime_core: Option<bool>,
    custom_path: Option<String>,
    host_version: Option<String>,
    package_manager: Option<String>,
    packages_dir: Option<String>,
    process_timeout_secs: Option<u64>,
    features: Option<FeaturesToml>,
    dependencies: Option<BTreeMap<String, DependencyToml>>,
    runtime: Option<RuntimeToml>,
    content: Option<ContentToml>,
}

#[derive(Debug, Clone, Deserialize, Default)]
struct FeaturesToml {
    code_completion: Option<bool>,
    project_examples: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
struct DependencyToml {
    requirements: Option<String>,
    required: Option<bool>,
    force_version: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
struct RuntimeToml {
    core_package: Option<String>,
    core_command: Option<String>,
    development_source: Option<String>,
    interpreter_version: Option<String>,
    interpreter_candidates: Option<Vec<String>>,
    virtualenv_url: Option<String>,
    virtualenv_sha256: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
struct ContentToml {
    url: Option<String>,
    sha256: Option<String>,
}

macro_rules! merge_fields {
    ($dst:expr, $src:expr, $($field:ident),+ $(,)?) => {
        {
            $( if $src.$field.is_some() { $dst.$field = $src.$field; } )+
        }
    };
}

impl SettingsToml {
    fn merge(&mut self, other: SettingsToml) {
        merge_fields!(
            self,
            other,
            base_dir,
            use_bundled_runtime_core,
            use_development_runtime_core,
            custom_path,
            host_version,
            package_manager,
            packages_dir,
            process_timeout_secs,
        );
        match (self.features.as_mut(), other.features) {
            (Some(dst), Some(src)) => merge_fields!(dst, src, code_completion, project_examples),
            (None, Some(src)) => self.features = Some(src),
            _ => {}
        }
        // A dependency table replaces the whole set; merging individual
        // entries would make it impossible to drop a default dependency.
        if other.dependencies.is_some() {
            self.dependencies = other.dependencies;
        }
        match (self.runtime.as_mut(), other.runtime) {
            (Some(dst), Some(src)) => merge_fields!(
                dst,
                src,
                core_package,
                core_command,
                development_source,
                interpreter_version,
                interpreter_candidates,
                virtualenv_url,
                virtualenv_sha256,
            ),
            (None, Some(src)) => self.runtime = Some(src),
            _ => {}
        }
        match (self.content.as_mut(), other.content) {
            (Some(dst), Some(src)) => merge_fields!(dst, src, url, sha256),
            (None, Some(src)) => self.content = Some(src),
            _ => {}
        }
    }
}

fn expand_home(raw: &str) -> PathBuf {
    match raw.strip_prefix("~/") {
        Some(rest) => dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(rest),
        None => PathBuf::from(raw),
    }
}

fn split_xdg_config_dirs() -> Vec<PathBuf> {
    let raw = std::env::var("XDG_CONFIG_DIRS").unwrap_or_else(|_| "/etc/xdg".to_owned());
    raw.split(':')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(PathBuf::from)
        .collect()
}

fn xdg_config_home() -> PathBuf {
    if let Ok(raw) = std::env::var("XDG_CONFIG_HOME") {
        let trimmed = raw.trim();
        if !trimmed.is_empty() {
            return PathBuf::from(trimmed);
        }
    }
    dirs::config_dir().unwrap_or_else(|| PathBuf::from(".").join(".config"))
}

fn read_toml(path: &Path) -> Result<SettingsToml> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| InstallError::io(format!("cannot read {}", path.display()), e))?;
    toml::from_str::<SettingsToml>(&text)
        .map_err(|e| InstallError::Config(format!("invalid TOML in {}: {e}", path.display())))
}

fn find_config_files() -> Vec<PathBuf> {
    let mut paths = Vec::new();
    for dir in split_xdg_config_dirs().into_iter().rev() {
        paths.push(dir.join("ide-bootstrap").join("config.toml"));
    }
    paths.push(xdg_config_home().join("ide-bootstrap").join("config.toml"));
    paths
}
