use std::collections::BTreeSet;

use firkin_cellar::{
    keg_dir_present, link_keg, linked_keg, pinned_version, remove_pin, tab_for, unlink_keg,
    write_pin, BuildFailure, CellarLayout, Install, InstallFailure, Keg,
};
use firkin_core::{BuildOptions, FormulaManifest};

/// How one formula's upgrade transaction ended.
///
/// `AlreadyAttempted` is silent: the same run already tried this formula
/// and there is nothing new to say. `CannotInstall` is reported but does
/// not fail the batch. `BuildFailed` is reported in full and marks the
/// whole run as failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpgradeOutcome {
    Upgraded { keg: Keg, caveats: Option<String> },
    AlreadyAttempted,
    CannotInstall { reason: String },
    BuildFailed { failure: BuildFailure },
}

/// One batch of upgrades. Owns the attempted set and the accumulated
/// failed flag; formulae are upgraded one at a time, in selection order.
#[derive(Debug, Default)]
pub struct UpgradeRun {
    attempted: BTreeSet<String>,
    failed: bool,
}

impl UpgradeRun {
    pub fn new() -> Self {
        Self::default()
    }

    /// True once any upgrade in this run ended in `BuildFailed`. Drives
    /// the process exit status.
    pub fn failed(&self) -> bool {
        self.failed
    }

    pub fn attempted(&self, name: &str) -> bool {
        self.attempted.contains(name)
    }

    /// Runs one upgrade transaction: merge recorded build options, unlink
    /// the old keg, install and link the new one, and re-pin if a pin was
    /// set.
    ///
    /// The returned strings are restoration warnings. On every exit path,
    /// if an old keg was linked and the new version did not end up
    /// installed, the old keg is re-linked best-effort; a failure during
    /// that restoration is reported here rather than propagated, since
    /// there is no further fallback.
    pub fn upgrade<I, F>(
        &mut self,
        layout: &CellarLayout,
        manifest: &FormulaManifest,
        requested_options: &BuildOptions,
        make_installer: F,
    ) -> (UpgradeOutcome, Vec<String>)
    where
        I: Install,
        F: FnOnce(BuildOptions) -> I,
    {
        if !self.attempted.insert(manifest.name.clone()) {
            return (UpgradeOutcome::AlreadyAttempted, Vec::new());
        }

        let mut old_keg = None;
        let result =
            run_upgrade_steps(layout, manifest, requested_options, make_installer, &mut old_keg);
        let warnings = restore_old_keg_if_needed(layout, manifest, old_keg.as_ref());

        let outcome = match result {
            Ok((keg, caveats)) => UpgradeOutcome::Upgraded { keg, caveats },
            Err(InstallFailure::AlreadyAttempted) => UpgradeOutcome::AlreadyAttempted,
            Err(InstallFailure::CannotInstall(reason)) => UpgradeOutcome::CannotInstall { reason },
            Err(InstallFailure::Build(failure)) => {
                self.failed = true;
                UpgradeOutcome::BuildFailed { failure }
            }
        };
        (outcome, warnings)
    }
}

/// The transaction body. `old_keg` is written as soon as the linked keg
/// is resolved so the caller can restore it no matter where the body
/// stops.
fn run_upgrade_steps<I, F>(
    layout: &CellarLayout,
    manifest: &FormulaManifest,
    requested_options: &BuildOptions,
    make_installer: F,
    old_keg: &mut Option<Keg>,
) -> Result<(Keg, Option<String>), InstallFailure>
where
    I: Install,
    F: FnOnce(BuildOptions) -> I,
{
    // Options recorded at the last install carry over; merging is
    // additive so nothing the caller asked for is dropped.
    let tab = tab_for(layout, &manifest.name).map_err(fold_fault)?;
    let mut options = requested_options.clone();
    options.merge(&tab.used_options);

    // A formula with no linked keg may have been unlinked by hand; that
    // is fine, there is just nothing to put back on failure.
    *old_keg = linked_keg(layout, &manifest.name).map_err(fold_fault)?;

    let mut installer = make_installer(options);

    // Unlink before installing. A stale active version can shadow the
    // new one while it is being put in place.
    if let Some(old) = old_keg.as_ref() {
        unlink_keg(layout, old).map_err(fold_fault)?;
    }

    let new_keg = installer.install()?;
    let caveats = installer.caveats();
    installer.finish()?;

    // Re-pin against the new keg so the pin follows the upgrade.
    if pinned_version(layout, &manifest.name)
        .map_err(fold_fault)?
        .is_some()
    {
        remove_pin(layout, &manifest.name).map_err(fold_fault)?;
        write_pin(layout, &manifest.name, &new_keg.version).map_err(fold_fault)?;
    }

    Ok((new_keg, caveats))
}

fn restore_old_keg_if_needed(
    layout: &CellarLayout,
    manifest: &FormulaManifest,
    old_keg: Option<&Keg>,
) -> Vec<String> {
    let Some(old) = old_keg else {
        return Vec::new();
    };

    let mut warnings = Vec::new();
    let installed = match keg_dir_present(layout, &manifest.name, &manifest.version) {
        Ok(present) => present,
        Err(err) => {
            warnings.push(format!(
                "could not inspect {} {} after the upgrade: {err:#}",
                manifest.name, manifest.version
            ));
            false
        }
    };
    if installed {
        return warnings;
    }

    if let Err(err) = link_keg(layout, old) {
        warnings.push(format!(
            "could not restore {} {}: {err:#}",
            old.name, old.version
        ));
    }
    warnings
}

/// Faults from the cellar are precondition failures as far as the batch
/// is concerned: reported, but they do not fail the run.
fn fold_fault(err: anyhow::Error) -> InstallFailure {
    InstallFailure::CannotInstall(format!("{err:#}"))
}
