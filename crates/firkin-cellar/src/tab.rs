use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::PathBuf;

use firkin_core::BuildOptions;

use crate::keg::{linked_keg, newest_installed_keg, Keg};
use crate::CellarLayout;

/// Install metadata written into each keg as `tab.json`.
///
/// The upgrade flow reads the previous tab so a formula installed
/// `--with-foo` keeps that option on the next version without the user
/// repeating it.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Tab {
    #[serde(default)]
    pub used_options: BuildOptions,
    #[serde(default)]
    pub bottle_url: Option<String>,
    #[serde(default)]
    pub poured_at_unix: u64,
}

pub fn write_tab(layout: &CellarLayout, keg: &Keg, tab: &Tab) -> Result<PathBuf> {
    let tab_path = layout.keg_tab_path(&keg.name, &keg.version.to_string());
    let json = serde_json::to_string_pretty(tab)
        .with_context(|| format!("failed to serialize tab for '{}'", keg.name))?;
    fs::write(&tab_path, json)
        .with_context(|| format!("failed to write tab: {}", tab_path.display()))?;
    Ok(tab_path)
}

/// The tab stored in a keg, or `None` for kegs without one.
pub fn read_keg_tab(layout: &CellarLayout, keg: &Keg) -> Result<Option<Tab>> {
    let tab_path = layout.keg_tab_path(&keg.name, &keg.version.to_string());
    let raw = match fs::read_to_string(&tab_path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => {
            return Err(err).with_context(|| format!("failed to read tab: {}", tab_path.display()));
        }
    };

    let tab = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse tab: {}", tab_path.display()))?;
    Ok(Some(tab))
}

/// The tab that should seed an upgrade of `name`: the linked keg's tab
/// when one is linked, otherwise the newest keg's, otherwise empty.
pub fn tab_for(layout: &CellarLayout, name: &str) -> Result<Tab> {
    if let Some(keg) = linked_keg(layout, name)? {
        if let Some(tab) = read_keg_tab(layout, &keg)? {
            return Ok(tab);
        }
    }

    if let Some(keg) = newest_installed_keg(layout, name)? {
        if let Some(tab) = read_keg_tab(layout, &keg)? {
            return Ok(tab);
        }
    }

    Ok(Tab::default())
}
