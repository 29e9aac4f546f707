use std::collections::HashSet;

use anyhow::{anyhow, Context};
use semver::Version;
use serde::{Deserialize, Serialize};

/// One formula as published by a tap: the upstream version plus the
/// prebuilt bottles available for it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FormulaManifest {
    pub name: String,
    pub version: Version,
    pub desc: Option<String>,
    pub homepage: Option<String>,
    pub license: Option<String>,
    pub caveats: Option<String>,
    #[serde(default)]
    pub bottles: Vec<BottleSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BottleSpec {
    pub target: String,
    pub url: String,
    pub sha256: String,
}

impl FormulaManifest {
    pub fn from_toml_str(input: &str) -> anyhow::Result<Self> {
        let manifest: Self = toml::from_str(input).context("failed to parse formula manifest")?;
        if !is_formula_name(&manifest.name) {
            return Err(anyhow!(
                "formula name '{}' must use formula-name grammar",
                manifest.name
            ));
        }

        let mut seen_targets = HashSet::new();
        for bottle in &manifest.bottles {
            if bottle.target.trim().is_empty() {
                return Err(anyhow!(
                    "bottle target must not be empty in formula '{}'",
                    manifest.name
                ));
            }
            if !seen_targets.insert(bottle.target.clone()) {
                return Err(anyhow!(
                    "duplicate bottle declaration '{}' in formula '{}'",
                    bottle.target,
                    manifest.name
                ));
            }
            if bottle.url.trim().is_empty() {
                return Err(anyhow!(
                    "bottle url must not be empty for target '{}' in formula '{}'",
                    bottle.target,
                    manifest.name
                ));
            }
            validate_sha256_hex(&bottle.sha256).with_context(|| {
                format!(
                    "invalid bottle sha256 for target '{}' in formula '{}'",
                    bottle.target, manifest.name
                )
            })?;
        }

        Ok(manifest)
    }

    pub fn bottle_for(&self, target: &str) -> Option<&BottleSpec> {
        self.bottles.iter().find(|bottle| bottle.target == target)
    }
}

/// Formula names are lowercase tokens safe to use as directory and state
/// file names: `[a-z0-9][a-z0-9._+-]*`, at most 64 bytes.
pub fn is_formula_name(value: &str) -> bool {
    let bytes = value.as_bytes();
    if bytes.is_empty() || bytes.len() > 64 {
        return false;
    }

    let starts_valid = bytes[0].is_ascii_lowercase() || bytes[0].is_ascii_digit();
    starts_valid
        && bytes[1..]
            .iter()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b"._+-".contains(b))
}

fn validate_sha256_hex(value: &str) -> anyhow::Result<()> {
    if value.len() != 64 {
        return Err(anyhow!(
            "sha256 must be 64 hex characters, got {} characters",
            value.len()
        ));
    }
    if !value
        .bytes()
        .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
    {
        return Err(anyhow!("sha256 must be lowercase hex: {value}"));
    }
    Ok(())
}
