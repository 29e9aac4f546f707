use anyhow::{anyhow, Result};
use semver::Version;

use firkin_cellar::{newest_installed_keg, pinned_version, rack_names, CellarLayout};
use firkin_core::FormulaManifest;
use firkin_tap::FormulaIndex;

/// One formula selected for upgrade: the tap manifest to install, what is
/// installed now, and whether a pin is set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutdatedFormula {
    pub manifest: FormulaManifest,
    pub installed_version: Version,
    pub pinned: bool,
}

/// Result of outdated selection. Warnings are non-fatal per-target
/// messages the caller prints; `fatal` means explicit targets were given
/// and none survived, so the run should stop before any transaction.
#[derive(Debug, Default)]
pub struct OutdatedSelection {
    pub formulae: Vec<OutdatedFormula>,
    pub warnings: Vec<String>,
    pub fatal: bool,
}

/// Computes the upgrade set.
///
/// With no targets, every installed formula whose tap version is newer
/// than its newest keg is selected, alphabetically. An empty result is
/// silence, not an error.
///
/// With explicit targets, each is validated in argument order: an unknown
/// formula is a hard error, a formula with no keg or already at the tap
/// version is dropped with a warning, and anything else passes through as
/// an override even when not strictly outdated.
pub fn select_outdated(
    index: &FormulaIndex,
    layout: &CellarLayout,
    targets: &[String],
) -> Result<OutdatedSelection> {
    if targets.is_empty() {
        return scan_installed(index, layout);
    }

    let mut selection = OutdatedSelection::default();
    for name in targets {
        let Some(manifest) = index.formula(name)? else {
            return Err(anyhow!("no available formula '{name}'"));
        };

        let Some(newest) = newest_installed_keg(layout, name)? else {
            selection.warnings.push(format!("{name} not installed"));
            continue;
        };
        if newest.version == manifest.version {
            selection
                .warnings
                .push(format!("{name} {} already installed", manifest.version));
            continue;
        }

        let pinned = pinned_version(layout, name)?.is_some();
        selection.formulae.push(OutdatedFormula {
            manifest,
            installed_version: newest.version,
            pinned,
        });
    }

    selection.fatal = selection.formulae.is_empty();
    Ok(selection)
}

fn scan_installed(index: &FormulaIndex, layout: &CellarLayout) -> Result<OutdatedSelection> {
    let mut selection = OutdatedSelection::default();
    for name in rack_names(layout)? {
        // A rack with no matching tap formula has no upstream to compare
        // against; it cannot be outdated.
        let Some(manifest) = index.formula(&name)? else {
            continue;
        };
        let Some(newest) = newest_installed_keg(layout, &name)? else {
            continue;
        };
        if newest.version >= manifest.version {
            continue;
        }

        let pinned = pinned_version(layout, &name)?.is_some();
        selection.formulae.push(OutdatedFormula {
            manifest,
            installed_version: newest.version,
            pinned,
        });
    }
    Ok(selection)
}
