use std::collections::BTreeSet;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

/// Build options recorded for a keg, as `--with-x` / `--without-y` tokens.
///
/// The set is ordered so option lists render and serialize stably. Merging
/// is additive: options already present are never removed.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct BuildOptions {
    tokens: BTreeSet<String>,
}

impl BuildOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_tokens<I, S>(tokens: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut options = Self::new();
        for token in tokens {
            options.insert_token(token.as_ref())?;
        }
        Ok(options)
    }

    /// Builds the token set from `--with <name>` / `--without <name>` flag
    /// values as collected by the CLI.
    pub fn from_flags(with: &[String], without: &[String]) -> Result<Self> {
        let mut options = Self::new();
        for name in with {
            options.insert_token(&format!("--with-{name}"))?;
        }
        for name in without {
            options.insert_token(&format!("--without-{name}"))?;
        }
        Ok(options)
    }

    pub fn insert_token(&mut self, token: &str) -> Result<()> {
        validate_option_token(token)?;
        self.tokens.insert(token.to_string());
        Ok(())
    }

    /// Adds every token from `other` that is not already present.
    pub fn merge(&mut self, other: &BuildOptions) {
        for token in &other.tokens {
            self.tokens.insert(token.clone());
        }
    }

    pub fn contains(&self, token: &str) -> bool {
        self.tokens.contains(token)
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.tokens.iter().map(String::as_str)
    }

    pub fn as_args(&self) -> Vec<String> {
        self.tokens.iter().cloned().collect()
    }
}

fn validate_option_token(token: &str) -> Result<()> {
    let name = token
        .strip_prefix("--with-")
        .or_else(|| token.strip_prefix("--without-"))
        .ok_or_else(|| {
            anyhow!("build option '{token}' must start with '--with-' or '--without-'")
        })?;

    let bytes = name.as_bytes();
    if bytes.is_empty() {
        return Err(anyhow!("build option '{token}' is missing a name"));
    }

    let starts_valid = bytes[0].is_ascii_lowercase() || bytes[0].is_ascii_digit();
    if !starts_valid
        || !bytes[1..]
            .iter()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b"._+-".contains(b))
    {
        return Err(anyhow!(
            "build option name '{name}' must use formula-name grammar"
        ));
    }
    Ok(())
}
