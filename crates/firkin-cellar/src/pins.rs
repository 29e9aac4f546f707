use anyhow::{Context, Result};
use semver::Version;
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::PathBuf;

use crate::CellarLayout;

/// Pins a formula at a version. Upgrades skip pinned formulae unless they
/// are named explicitly.
pub fn write_pin(layout: &CellarLayout, name: &str, version: &Version) -> Result<PathBuf> {
    let pin_path = layout.pin_path(name);
    if let Some(parent) = pin_path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create pin dir: {}", parent.display()))?;
    }

    fs::write(&pin_path, format!("{version}\n"))
        .with_context(|| format!("failed to write pin: {}", pin_path.display()))?;
    Ok(pin_path)
}

pub fn pinned_version(layout: &CellarLayout, name: &str) -> Result<Option<Version>> {
    let pin_path = layout.pin_path(name);
    let raw = match fs::read_to_string(&pin_path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => {
            return Err(err).with_context(|| format!("failed to read pin: {}", pin_path.display()));
        }
    };

    let version = Version::parse(raw.trim())
        .with_context(|| format!("invalid pin file: {}", pin_path.display()))?;
    Ok(Some(version))
}

/// Removes the pin if present. Returns whether a pin existed.
pub fn remove_pin(layout: &CellarLayout, name: &str) -> Result<bool> {
    let pin_path = layout.pin_path(name);
    match fs::remove_file(&pin_path) {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(err) => {
            Err(err).with_context(|| format!("failed to remove pin: {}", pin_path.display()))
        }
    }
}

/// All pins, formula name to pinned version.
pub fn read_all_pins(layout: &CellarLayout) -> Result<BTreeMap<String, Version>> {
    let pins_dir = layout.pins_dir();
    if !pins_dir.exists() {
        return Ok(BTreeMap::new());
    }

    let mut pins = BTreeMap::new();
    for entry in fs::read_dir(&pins_dir)
        .with_context(|| format!("failed to read pins dir: {}", pins_dir.display()))?
    {
        let entry = entry?;
        let file_name = entry.file_name();
        let Some(file_name) = file_name.to_str() else {
            continue;
        };
        let Some(name) = file_name.strip_suffix(".pin") else {
            continue;
        };
        if let Some(version) = pinned_version(layout, name)? {
            pins.insert(name.to_string(), version);
        }
    }

    Ok(pins)
}
