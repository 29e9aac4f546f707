use anyhow::{anyhow, Context, Result};
use semver::Version;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::CellarLayout;

/// One installed version of a formula: the directory
/// `cellar/<name>/<version>` and everything in it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Keg {
    pub name: String,
    pub version: Version,
    pub path: PathBuf,
}

impl Keg {
    pub fn new(layout: &CellarLayout, name: &str, version: Version) -> Self {
        let path = layout.keg_dir(name, &version.to_string());
        Self {
            name: name.to_string(),
            version,
            path,
        }
    }

    pub fn bin_dir(&self) -> PathBuf {
        self.path.join("bin")
    }
}

/// Formula names with at least one keg directory, alphabetical.
pub fn rack_names(layout: &CellarLayout) -> Result<Vec<String>> {
    let cellar = layout.cellar_dir();
    if !cellar.exists() {
        return Ok(Vec::new());
    }

    let mut names = Vec::new();
    for entry in
        fs::read_dir(&cellar).with_context(|| format!("failed to read {}", cellar.display()))?
    {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let Some(name) = entry.file_name().to_str().map(ToOwned::to_owned) else {
            continue;
        };
        if installed_kegs(layout, &name)?.is_empty() {
            continue;
        }
        names.push(name);
    }

    names.sort();
    Ok(names)
}

/// Kegs present in a formula's rack, sorted oldest version first.
///
/// Directory entries that do not parse as a version are not kegs and are
/// skipped.
pub fn installed_kegs(layout: &CellarLayout, name: &str) -> Result<Vec<Keg>> {
    let rack = layout.rack_dir(name);
    if !rack.exists() {
        return Ok(Vec::new());
    }

    let mut kegs = Vec::new();
    for entry in
        fs::read_dir(&rack).with_context(|| format!("failed to read rack: {}", rack.display()))?
    {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let Some(raw) = entry.file_name().to_str().map(ToOwned::to_owned) else {
            continue;
        };
        let Ok(version) = Version::parse(&raw) else {
            continue;
        };
        kegs.push(Keg {
            name: name.to_string(),
            version,
            path: entry.path(),
        });
    }

    kegs.sort_by(|a, b| a.version.cmp(&b.version));
    Ok(kegs)
}

pub fn newest_installed_keg(layout: &CellarLayout, name: &str) -> Result<Option<Keg>> {
    Ok(installed_kegs(layout, name)?.pop())
}

/// Whether the keg directory for this name and version exists with content.
/// A failed install can leave it missing or empty; both read as not
/// installed.
pub fn keg_dir_present(layout: &CellarLayout, name: &str, version: &Version) -> Result<bool> {
    let keg_dir = layout.keg_dir(name, &version.to_string());
    Ok(!crate::fs_utils::dir_is_missing_or_empty(&keg_dir)?)
}

/// The keg currently exposed in `bin/`, if any.
///
/// A record pointing at a keg directory that no longer exists is stale,
/// not an error; it reads as "nothing linked" and `doctor` reports it.
pub fn linked_keg(layout: &CellarLayout, name: &str) -> Result<Option<Keg>> {
    let Some(path) = read_linked_record(layout, name)? else {
        return Ok(None);
    };

    let raw_version = path
        .file_name()
        .and_then(|value| value.to_str())
        .ok_or_else(|| {
            anyhow!(
                "invalid linked keg record for '{}': {}",
                name,
                path.display()
            )
        })?;
    let version = Version::parse(raw_version).with_context(|| {
        format!(
            "invalid linked keg record for '{}': {}",
            name,
            path.display()
        )
    })?;

    if !path.is_dir() {
        return Ok(None);
    }

    Ok(Some(Keg {
        name: name.to_string(),
        version,
        path,
    }))
}

/// Exposes the keg's `bin/` entries under the prefix `bin/` and records
/// the keg as linked. Existing entries with the same names are replaced.
/// Returns the exposed entry names.
pub fn link_keg(layout: &CellarLayout, keg: &Keg) -> Result<Vec<String>> {
    let mut exposed = Vec::new();
    for binary in keg_binaries(keg)? {
        let source = keg.bin_dir().join(&binary);
        let destination = bin_entry_path(layout, &binary);
        remove_bin_entry_if_present(&destination)?;
        create_binary_entry(&source, &destination)?;
        exposed.push(binary);
    }

    write_linked_record(layout, &keg.name, &keg.path)?;
    Ok(exposed)
}

/// Removes the `bin/` entries this keg owns and clears its linked record.
/// Files the keg does not own are left alone. The keg's own directory is
/// untouched. Returns the removed entry names.
pub fn unlink_keg(layout: &CellarLayout, keg: &Keg) -> Result<Vec<String>> {
    let mut removed = Vec::new();
    for binary in keg_binaries(keg)? {
        let destination = bin_entry_path(layout, &binary);
        if !bin_entry_owned_by_keg(&destination, keg)? {
            continue;
        }
        fs::remove_file(&destination).with_context(|| {
            format!("failed to remove exposed binary: {}", destination.display())
        })?;
        removed.push(binary);
    }

    clear_linked_record_for(layout, keg)?;
    Ok(removed)
}

/// Names under the keg's `bin/` directory, sorted. A keg without `bin/`
/// has nothing to expose, which is fine for library-only formulae.
fn keg_binaries(keg: &Keg) -> Result<Vec<String>> {
    let bin = keg.bin_dir();
    if !bin.exists() {
        return Ok(Vec::new());
    }

    let mut binaries = Vec::new();
    for entry in
        fs::read_dir(&bin).with_context(|| format!("failed to read keg bin: {}", bin.display()))?
    {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            continue;
        }
        let Some(name) = entry.file_name().to_str().map(ToOwned::to_owned) else {
            continue;
        };
        binaries.push(name);
    }

    binaries.sort();
    Ok(binaries)
}

fn bin_entry_path(layout: &CellarLayout, binary_name: &str) -> PathBuf {
    let mut file_name = binary_name.to_string();
    if cfg!(windows) {
        file_name.push_str(".cmd");
    }
    layout.bin_dir().join(file_name)
}

fn remove_bin_entry_if_present(destination: &Path) -> Result<()> {
    match fs::symlink_metadata(destination) {
        Ok(_) => fs::remove_file(destination).with_context(|| {
            format!(
                "failed to replace existing binary entry: {}",
                destination.display()
            )
        }),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err)
            .with_context(|| format!("failed to inspect binary entry: {}", destination.display())),
    }
}

#[cfg(unix)]
fn bin_entry_owned_by_keg(destination: &Path, keg: &Keg) -> Result<bool> {
    let metadata = match fs::symlink_metadata(destination) {
        Ok(metadata) => metadata,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(err) => {
            return Err(err).with_context(|| {
                format!("failed to inspect binary entry: {}", destination.display())
            });
        }
    };
    if !metadata.file_type().is_symlink() {
        return Ok(false);
    }

    let target = fs::read_link(destination)
        .with_context(|| format!("failed to read symlink: {}", destination.display()))?;
    Ok(target.starts_with(&keg.path))
}

#[cfg(windows)]
fn bin_entry_owned_by_keg(destination: &Path, keg: &Keg) -> Result<bool> {
    // Shims carry the source path inline; match it against the keg dir.
    let shim = match fs::read_to_string(destination) {
        Ok(shim) => shim,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(err) => {
            return Err(err)
                .with_context(|| format!("failed to read shim: {}", destination.display()));
        }
    };
    Ok(shim.contains(&keg.path.display().to_string()))
}

fn create_binary_entry(source_path: &Path, destination: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        std::os::unix::fs::symlink(source_path, destination).with_context(|| {
            format!(
                "failed to create symlink {} -> {}",
                destination.display(),
                source_path.display()
            )
        })
    }

    #[cfg(windows)]
    {
        let shim = format!("@echo off\r\n\"{}\" %*\r\n", source_path.display());
        fs::write(destination, shim.as_bytes())
            .with_context(|| format!("failed to write shim: {}", destination.display()))
    }
}

fn write_linked_record(layout: &CellarLayout, name: &str, keg_path: &Path) -> Result<PathBuf> {
    let record_path = layout.linked_record_path(name);
    if let Some(parent) = record_path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create link state dir: {}", parent.display()))?;
    }

    fs::write(&record_path, format!("{}\n", keg_path.display()))
        .with_context(|| format!("failed to write linked record: {}", record_path.display()))?;
    Ok(record_path)
}

pub(crate) fn read_linked_record(layout: &CellarLayout, name: &str) -> Result<Option<PathBuf>> {
    let record_path = layout.linked_record_path(name);
    let raw = match fs::read_to_string(&record_path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => {
            return Err(err).with_context(|| {
                format!("failed to read linked record: {}", record_path.display())
            });
        }
    };

    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    Ok(Some(PathBuf::from(trimmed)))
}

fn clear_linked_record_for(layout: &CellarLayout, keg: &Keg) -> Result<()> {
    let Some(recorded) = read_linked_record(layout, &keg.name)? else {
        return Ok(());
    };
    if recorded != keg.path {
        return Ok(());
    }

    let record_path = layout.linked_record_path(&keg.name);
    fs::remove_file(&record_path)
        .with_context(|| format!("failed to clear linked record: {}", record_path.display()))?;
    Ok(())
}
