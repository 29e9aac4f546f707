use semver::Version;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use firkin_core::{BuildOptions, FormulaManifest};

use crate::bottle::{fetch_bottle, host_target, pour_bottle, verify_bottle_checksum, FetchStatus};
use crate::keg::{link_keg, Keg};
use crate::layout::CellarLayout;
use crate::tab::{write_tab, Tab};

/// Why an installation did not produce a usable keg.
///
/// `CannotInstall` is a precondition problem: nothing was built and the
/// cellar is as it was. `Build` means the formula itself failed partway,
/// which callers report loudly and count as a failed run. A source that
/// refuses to repeat work in one batch returns `AlreadyAttempted`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallFailure {
    AlreadyAttempted,
    CannotInstall(String),
    Build(BuildFailure),
}

impl fmt::Display for InstallFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstallFailure::AlreadyAttempted => write!(f, "installation already attempted"),
            InstallFailure::CannotInstall(reason) => write!(f, "{reason}"),
            InstallFailure::Build(failure) => write!(
                f,
                "{} {} failed during {}",
                failure.formula, failure.version, failure.stage
            ),
        }
    }
}

impl std::error::Error for InstallFailure {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildFailure {
    pub formula: String,
    pub version: Version,
    pub stage: String,
    pub output: Vec<String>,
}

impl BuildFailure {
    pub fn report_lines(&self) -> Vec<String> {
        let mut lines = vec![format!(
            "{} {} did not install: {} failed",
            self.formula, self.version, self.stage
        )];
        for line in &self.output {
            lines.push(format!("  {line}"));
        }
        lines
    }
}

/// The two-phase install contract: `install` produces the keg, `finish`
/// exposes it. Caveats are available either way so callers can show them
/// even when linking is skipped.
pub trait Install {
    fn install(&mut self) -> Result<Keg, InstallFailure>;
    fn caveats(&self) -> Option<String>;
    fn finish(&mut self) -> Result<(), InstallFailure>;
}

/// Installs a formula by pouring its bottle for the host target.
pub struct BottleInstaller<'a> {
    layout: &'a CellarLayout,
    manifest: FormulaManifest,
    options: BuildOptions,
    show_header: bool,
    force_fetch: bool,
    fetch_status: Option<FetchStatus>,
    poured: Option<Keg>,
}

impl<'a> BottleInstaller<'a> {
    pub fn new(layout: &'a CellarLayout, manifest: FormulaManifest, options: BuildOptions) -> Self {
        Self {
            layout,
            manifest,
            options,
            show_header: true,
            force_fetch: false,
            fetch_status: None,
            poured: None,
        }
    }

    /// Batch flows print their own per-formula header and turn this off.
    pub fn show_header(mut self, show: bool) -> Self {
        self.show_header = show;
        self
    }

    pub fn force_fetch(mut self, force: bool) -> Self {
        self.force_fetch = force;
        self
    }

    pub fn header_line(&self) -> Option<String> {
        if !self.show_header {
            return None;
        }
        Some(format!(
            "Installing {} {}",
            self.manifest.name, self.manifest.version
        ))
    }

    pub fn fetch_status(&self) -> Option<FetchStatus> {
        self.fetch_status
    }

    fn build_failure(&self, stage: &str, err: &anyhow::Error) -> InstallFailure {
        InstallFailure::Build(BuildFailure {
            formula: self.manifest.name.clone(),
            version: self.manifest.version.clone(),
            stage: stage.to_string(),
            output: format!("{err:#}").lines().map(ToOwned::to_owned).collect(),
        })
    }
}

fn cannot_install(err: anyhow::Error) -> InstallFailure {
    InstallFailure::CannotInstall(format!("{err:#}"))
}

impl Install for BottleInstaller<'_> {
    fn install(&mut self) -> Result<Keg, InstallFailure> {
        let target = host_target();
        let Some(bottle) = self.manifest.bottle_for(&target) else {
            return Err(InstallFailure::CannotInstall(format!(
                "{} {} has no bottle for {}",
                self.manifest.name, self.manifest.version, target
            )));
        };

        let (archive, status) = fetch_bottle(
            self.layout,
            &self.manifest.name,
            &self.manifest.version,
            bottle,
            self.force_fetch,
        )
        .map_err(cannot_install)?;
        self.fetch_status = Some(status);

        verify_bottle_checksum(&archive, &bottle.sha256).map_err(cannot_install)?;

        let keg = pour_bottle(
            self.layout,
            &self.manifest.name,
            &self.manifest.version,
            &archive,
        )
        .map_err(|err| self.build_failure("pour", &err))?;

        let tab = Tab {
            used_options: self.options.clone(),
            bottle_url: Some(bottle.url.clone()),
            poured_at_unix: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|elapsed| elapsed.as_secs())
                .unwrap_or(0),
        };
        write_tab(self.layout, &keg, &tab).map_err(cannot_install)?;

        self.poured = Some(keg.clone());
        Ok(keg)
    }

    fn caveats(&self) -> Option<String> {
        self.manifest
            .caveats
            .as_deref()
            .map(str::trim)
            .filter(|text| !text.is_empty())
            .map(ToOwned::to_owned)
    }

    fn finish(&mut self) -> Result<(), InstallFailure> {
        let Some(keg) = self.poured.as_ref() else {
            return Err(InstallFailure::CannotInstall(
                "nothing poured to link".to_string(),
            ));
        };
        link_keg(self.layout, keg).map_err(cannot_install)?;
        Ok(())
    }
}
