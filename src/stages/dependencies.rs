//! Host companion packages
//!
//! Reconciles the host's installed packages against the configured
//! [`DependencySet`]. Names are compared lowercased.

use crate::core::config::DependencySet;
use crate::core::context::InstallContext;
use crate::core::error::{InstallError, Result};
use crate::core::output;
use crate::helpers::packages::{HostPackages, PackageManifest};
use crate::stages::{Stage, StageKind, StageState, StageStatus};
use async_trait::async_trait;
use semver::Version;
use std::collections::BTreeSet;

/// Lowercased names of every installed package.
pub fn installed(manifests: &[PackageManifest]) -> BTreeSet<String> {
    manifests.iter().map(|m| m.name.to_lowercase()).collect()
}

/// Configured packages that are not installed.
pub fn missing(deps: &DependencySet, manifests: &[PackageManifest]) -> Vec<String> {
    let installed = installed(manifests);
    deps.iter()
        .filter(|(name, _)| !installed.contains(*name))
        .map(|(name, _)| name.to_string())
        .collect()
}

/// Installed configured packages whose version does not satisfy the range.
///
/// A version that cannot be read counts as incompatible.
pub fn incompatible(deps: &DependencySet, manifests: &[PackageManifest]) -> Vec<String> {
    let mut names = BTreeSet::new();
    for manifest in manifests {
        let name = manifest.name.to_lowercase();
        let Some(spec) = deps.get(&name) else {
            continue;
        };
        let satisfied =
            parse_lenient(&manifest.version).is_some_and(|v| spec.requirement.matches(&v));
        if !satisfied {
            names.insert(name);
        }
    }
    names.into_iter().collect()
}

/// Installed required packages that are disabled.
pub fn inactive(
    deps: &DependencySet,
    manifests: &[PackageManifest],
    is_active: impl Fn(&str) -> bool,
) -> Vec<String> {
    let installed = installed(manifests);
    deps.iter()
        .filter(|(name, spec)| spec.required && installed.contains(*name) && !is_active(*name))
        .map(|(name, _)| name.to_string())
        .collect()
}

/// Parse a package version, padding `1` and `1.2` to three components.
fn parse_lenient(raw: &str) -> Option<Version> {
    let raw = raw.trim().trim_start_matches('v');
    let split = raw.find(['-', '+']).unwrap_or(raw.len());
    let (core, suffix) = raw.split_at(split);
    let parts = core.split('.').count();
    let padded = match parts {
        1 => format!("{core}.0.0{suffix}"),
        2 => format!("{core}.0{suffix}"),
        _ => raw.to_string(),
    };
    Version::parse(&padded).ok()
}

/// Offending packages found by one probe.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reconciliation {
    pub missing: Vec<String>,
    pub incompatible: Vec<String>,
    pub inactive: Vec<String>,
}

impl Reconciliation {
    pub fn probe(deps: &DependencySet, packages: &dyn HostPackages) -> Result<Self> {
        let manifests = packages.manifests()?;
        Ok(Self {
            missing: missing(deps, &manifests),
            incompatible: incompatible(deps, &manifests),
            inactive: inactive(deps, &manifests, |name| packages.is_active(name)),
        })
    }

    pub fn is_satisfied(&self) -> bool {
        self.missing.is_empty() && self.incompatible.is_empty() && self.inactive.is_empty()
    }

    fn describe(&self) -> String {
        let mut parts = Vec::new();
        if !self.missing.is_empty() {
            parts.push(format!("missing packages: {}", self.missing.join(", ")));
        }
        if !self.incompatible.is_empty() {
            parts.push(format!(
                "incompatible packages: {}",
                self.incompatible.join(", ")
            ));
        }
        if !self.inactive.is_empty() {
            parts.push(format!("inactive packages: {}", self.inactive.join(", ")));
        }
        parts.join("; ")
    }
}

pub struct DependencyStage {
    state: StageState,
}

impl DependencyStage {
    pub fn new() -> Self {
        Self {
            state: StageState::default(),
        }
    }

    async fn package_manager(&self, ctx: &InstallContext, args: Vec<String>) -> Result<()> {
        let pm = &ctx.settings.package_manager;
        let command = format!("{pm} {}", args.first().map(String::as_str).unwrap_or(""));
        let out = ctx.runner.run(pm, &args).await?;
        let out = out.into_result(&command)?;
        tracing::debug!(command, stdout = %out.stdout.trim(), "package manager finished");
        Ok(())
    }

    async fn remediate(&self, ctx: &InstallContext) -> Result<()> {
        let deps = &ctx.settings.dependencies;

        let to_uninstall = Reconciliation::probe(deps, ctx.packages.as_ref())?.incompatible;
        if !to_uninstall.is_empty() {
            output::sub_action(&format!("uninstalling {}", to_uninstall.join(", ")));
            let mut args = vec!["uninstall".to_string()];
            args.extend(to_uninstall);
            self.package_manager(ctx, args).await?;
        }

        // Uninstalled packages now show up as missing.
        let to_install = Reconciliation::probe(deps, ctx.packages.as_ref())?.missing;
        if !to_install.is_empty() {
            let targets: Vec<String> = to_install
                .iter()
                .map(|name| match deps.get(name).and_then(|s| s.force_version.as_deref()) {
                    Some(version) => format!("{name}@{version}"),
                    None => name.clone(),
                })
                .collect();
            output::sub_action(&format!("installing {}", targets.join(", ")));
            let mut args = vec!["install".to_string()];
            args.extend(targets);
            args.push("--production".into());
            args.push("--compatible".into());
            self.package_manager(ctx, args).await?;
        }

        let to_enable = Reconciliation::probe(deps, ctx.packages.as_ref())?.inactive;
        for name in to_enable {
            output::sub_action(&format!("enabling {name}"));
            ctx.packages.enable(&name)?;
        }

        // The package manager may still resolve a version outside the range.
        let manifests = ctx.packages.manifests()?;
        if let Some(name) = incompatible(deps, &manifests).into_iter().next() {
            let found = manifests
                .iter()
                .find(|m| m.name.to_lowercase() == name)
                .map(|m| m.version.clone())
                .unwrap_or_default();
            let required = deps
                .get(&name)
                .map(|s| s.requirement_str.clone())
                .unwrap_or_default();
            return Err(InstallError::VersionIncompatible {
                name,
                required,
                found,
            });
        }
        Ok(())
    }
}

impl Default for DependencyStage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Stage for DependencyStage {
    fn kind(&self) -> StageKind {
        StageKind::Dependencies
    }

    fn name(&self) -> &str {
        "Host dependencies"
    }

    fn status(&self) -> StageStatus {
        self.state.status()
    }

    async fn check(&mut self, ctx: &InstallContext) -> Result<()> {
        let found = Reconciliation::probe(&ctx.settings.dependencies, ctx.packages.as_ref())?;
        if found.is_satisfied() {
            self.state.mark_succeeded();
            Ok(())
        } else {
            self.state.mark_pending();
            Err(InstallError::NotReady(found.describe()))
        }
    }

    async fn install(&mut self, ctx: &InstallContext) -> Result<()> {
        if self.state.is_succeeded() {
            return Ok(());
        }
        self.state.mark_installing();
        match self.remediate(ctx).await {
            Ok(()) => {
                self.state.mark_succeeded();
                Ok(())
            }
            Err(e) => {
                self.state.mark_failed();
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::DependencySpec;

    fn manifest(name: &str, version: &str) -> PackageManifest {
        PackageManifest {
            name: name.into(),
            version: version.into(),
        }
    }

    fn deps() -> DependencySet {
        DependencySet::new()
            .with("Build", DependencySpec::new(">=0.65.0", true).unwrap())
            .with("linter", DependencySpec::new(">=1.11.0", false).unwrap())
            .with("pkgA", DependencySpec::new(">=1.0 <2.0", true).unwrap())
    }

    #[test]
    fn test_names_compare_case_insensitively() {
        let manifests = [manifest("BUILD", "0.70.0"), manifest("LINTER", "2.0.0")];
        assert_eq!(missing(&deps(), &manifests), vec!["pkga".to_string()]);
    }

    #[test]
    fn test_old_version_is_incompatible() {
        let manifests = [manifest("pkgA", "0.9"), manifest("build", "0.70.0")];
        assert_eq!(incompatible(&deps(), &manifests), vec!["pkga".to_string()]);
        assert!(!missing(&deps(), &manifests).contains(&"pkga".to_string()));
    }

    #[test]
    fn test_unreadable_version_is_incompatible() {
        let manifests = [manifest("pkgA", "banana")];
        assert_eq!(incompatible(&deps(), &manifests), vec!["pkga".to_string()]);
    }

    #[test]
    fn test_unconfigured_packages_are_ignored() {
        let manifests = [manifest("other", "0.0.1")];
        assert!(incompatible(&deps(), &manifests).is_empty());
    }

    #[test]
    fn test_inactive_only_counts_required() {
        let manifests = [
            manifest("build", "0.70.0"),
            manifest("linter", "2.0.0"),
            manifest("pkga", "1.5.0"),
        ];
        let got = inactive(&deps(), &manifests, |_| false);
        assert_eq!(got, vec!["build".to_string(), "pkga".to_string()]);
        assert!(inactive(&deps(), &manifests, |_| true).is_empty());
    }

    #[test]
    fn test_lenient_versions() {
        assert_eq!(parse_lenient("1"), Some(Version::new(1, 0, 0)));
        assert_eq!(parse_lenient("v0.9"), Some(Version::new(0, 9, 0)));
        assert_eq!(
            parse_lenient("1.2-beta.1").map(|v| v.pre.to_string()),
            Some("beta.1".to_string())
        );
        assert_eq!(parse_lenient(""), None);
    }

    #[test]
    fn test_satisfied_when_all_sets_empty() {
        let manifests = [
            manifest("build", "0.70.0"),
            manifest("linter", "2.0.0"),
            manifest("pkga", "1.5.0"),
        ];
        let d = deps();
        assert!(missing(&d, &manifests).is_empty());
        assert!(incompatible(&d, &manifests).is_empty());
        assert!(inactive(&d, &manifests, |_| true).is_empty());
    }
}
