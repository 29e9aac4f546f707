use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// Path schema for everything firkin keeps under its prefix.
///
/// Kegs live at `cellar/<name>/<version>`; the directory `cellar/<name>`
/// is the formula's rack. Linked-keg records and pins are plain files
/// under `state/`, bottles are cached under `cache/bottles/`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CellarLayout {
    prefix: PathBuf,
}

impl CellarLayout {
    pub fn new(prefix: impl Into<PathBuf>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &Path {
        &self.prefix
    }

    pub fn cellar_dir(&self) -> PathBuf {
        self.prefix.join("cellar")
    }

    pub fn bin_dir(&self) -> PathBuf {
        self.prefix.join("bin")
    }

    pub fn state_dir(&self) -> PathBuf {
        self.prefix.join("state")
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.prefix.join("cache")
    }

    pub fn taps_dir(&self) -> PathBuf {
        self.prefix.join("taps")
    }

    pub fn bottles_cache_dir(&self) -> PathBuf {
        self.cache_dir().join("bottles")
    }

    pub fn tmp_state_dir(&self) -> PathBuf {
        self.state_dir().join("tmp")
    }

    pub fn linked_state_dir(&self) -> PathBuf {
        self.state_dir().join("linked")
    }

    pub fn pins_dir(&self) -> PathBuf {
        self.state_dir().join("pins")
    }

    pub fn pin_path(&self, name: &str) -> PathBuf {
        self.pins_dir().join(format!("{name}.pin"))
    }

    pub fn linked_record_path(&self, name: &str) -> PathBuf {
        self.linked_state_dir().join(format!("{name}.link"))
    }

    pub fn rack_dir(&self, name: &str) -> PathBuf {
        self.cellar_dir().join(name)
    }

    pub fn keg_dir(&self, name: &str, version: &str) -> PathBuf {
        self.rack_dir(name).join(version)
    }

    pub fn keg_tab_path(&self, name: &str, version: &str) -> PathBuf {
        self.keg_dir(name, version).join("tab.json")
    }

    pub fn bottle_cache_path(&self, name: &str, version: &str, target: &str) -> PathBuf {
        self.bottles_cache_dir()
            .join(name)
            .join(version)
            .join(format!("{target}.tar.gz"))
    }

    pub fn ensure_base_dirs(&self) -> Result<()> {
        for dir in [
            self.cellar_dir(),
            self.bin_dir(),
            self.state_dir(),
            self.cache_dir(),
            self.taps_dir(),
            self.bottles_cache_dir(),
            self.tmp_state_dir(),
            self.linked_state_dir(),
            self.pins_dir(),
        ] {
            fs::create_dir_all(&dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
        }
        Ok(())
    }
}

pub fn default_user_prefix() -> Result<PathBuf> {
    if cfg!(windows) {
        let app_data = std::env::var("LOCALAPPDATA")
            .context("LOCALAPPDATA must be set to locate the default prefix")?;
        return Ok(PathBuf::from(app_data).join("Firkin"));
    }

    let home = std::env::var("HOME").context("HOME must be set to locate the default prefix")?;
    Ok(PathBuf::from(home).join(".firkin"))
}
