use anyhow::{anyhow, Context, Result};
use semver::Version;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use firkin_core::{is_formula_name, FormulaManifest};


/// A tap checked out on disk: a directory with formula manifests under
/// `Formula/<name>.toml`.
#[derive(Debug, Clone)]
pub struct FormulaIndex {
    root: PathBuf,
}

impl FormulaIndex {
    pub fn open(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn formula_path(&self, name: &str) -> PathBuf {
        self.root.join("Formula").join(format!("{name}.toml"))
    }

    /// Loads one formula. `Ok(None)` means the tap has no such formula;
    /// a file that parses to a different name than its stem is an error.
    pub fn formula(&self, name: &str) -> Result<Option<FormulaManifest>> {
        if !is_formula_name(name) {
            return Err(anyhow!("invalid formula name '{name}'"));
        }

        let path = self.formula_path(name);
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("failed to read formula: {}", path.display()));
            }
        };

        let manifest = FormulaManifest::from_toml_str(&raw)
            .with_context(|| format!("failed to parse formula: {}", path.display()))?;
        if manifest.name != name {
            return Err(anyhow!(
                "formula file {} declares name '{}'",
                path.display(),
                manifest.name
            ));
        }
        Ok(Some(manifest))
    }

    pub fn available_version(&self, name: &str) -> Result<Option<Version>> {
        Ok(self.formula(name)?.map(|manifest| manifest.version))
    }

    /// Formula names in the tap, alphabetical.
    pub fn formula_names(&self) -> Result<Vec<String>> {
        let formula_dir = self.root.join("Formula");
        if !formula_dir.exists() {
            return Ok(Vec::new());
        }

        let mut names = Vec::new();
        for entry in fs::read_dir(&formula_dir)
            .with_context(|| format!("failed to read tap: {}", formula_dir.display()))?
        {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let file_name = entry.file_name();
            let Some(file_name) = file_name.to_str() else {
                continue;
            };
            let Some(stem) = file_name.strip_suffix(".toml") else {
                continue;
            };
            if !is_formula_name(stem) {
                continue;
            }
            names.push(stem.to_string());
        }

        names.sort();
        Ok(names)
    }

    /// Every formula in the tap, alphabetical by name.
    pub fn all_formulae(&self) -> Result<Vec<FormulaManifest>> {
        let mut formulae = Vec::new();
        for name in self.formula_names()? {
            if let Some(manifest) = self.formula(&name)? {
                formulae.push(manifest);
            }
        }
        Ok(formulae)
    }
}
