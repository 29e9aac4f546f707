use anyhow::{anyhow, Context, Result};
use semver::Version;
use sha2::{Digest, Sha256};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;

use firkin_core::BottleSpec;

use crate::fs_utils::{make_tmp_dir, move_dir_or_copy, remove_file_if_exists};
use crate::keg::Keg;
use crate::CellarLayout;

/// The bottle target string for this machine, e.g. `x86_64-linux`.
pub fn host_target() -> String {
    format!("{}-{}", std::env::consts::ARCH, std::env::consts::OS)
}

/// How a bottle archive ended up in the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchStatus {
    Cached,
    Copied,
    Downloaded,
}

impl FetchStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            FetchStatus::Cached => "already cached",
            FetchStatus::Copied => "copied from local source",
            FetchStatus::Downloaded => "downloaded",
        }
    }
}

/// Fetches a bottle archive into the cache and returns its path.
///
/// Downloads land in a `.part` file first so an interrupted transfer never
/// leaves a plausible-looking archive at the final path.
pub fn fetch_bottle(
    layout: &CellarLayout,
    name: &str,
    version: &Version,
    bottle: &BottleSpec,
    force: bool,
) -> Result<(PathBuf, FetchStatus)> {
    let cache_path = layout.bottle_cache_path(name, &version.to_string(), &bottle.target);
    if !force && cache_path.is_file() {
        return Ok((cache_path, FetchStatus::Cached));
    }

    if let Some(parent) = cache_path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create bottle cache dir: {}", parent.display()))?;
    }

    let part_path = partial_download_path(&cache_path);
    let status = match local_source_path(&bottle.url) {
        Some(source) => {
            fs::copy(&source, &part_path).with_context(|| {
                format!("failed to copy bottle from local source: {}", source.display())
            })?;
            FetchStatus::Copied
        }
        None => {
            download_to(&bottle.url, &part_path)?;
            FetchStatus::Downloaded
        }
    };

    fs::rename(&part_path, &cache_path)
        .with_context(|| format!("failed to finalize bottle: {}", cache_path.display()))?;
    Ok((cache_path, status))
}

/// Checks a cached archive against the manifest digest. A mismatched
/// archive is removed so the next attempt re-fetches instead of reusing
/// the bad file.
pub fn verify_bottle_checksum(path: &Path, expected_sha256: &str) -> Result<()> {
    let actual = sha256_hex_of_file(path)?;
    if actual != expected_sha256 {
        let _ = remove_file_if_exists(path);
        return Err(anyhow!(
            "checksum mismatch for {}: expected {}, got {}",
            path.display(),
            expected_sha256,
            actual
        ));
    }
    Ok(())
}

pub fn sha256_hex_of_file(path: &Path) -> Result<String> {
    let mut file = fs::File::open(path)
        .with_context(|| format!("failed to open file for hashing: {}", path.display()))?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)
        .with_context(|| format!("failed to hash file: {}", path.display()))?;
    Ok(hex::encode(hasher.finalize()))
}

/// Unpacks a verified archive into the cellar as `cellar/<name>/<version>`.
///
/// Extraction happens in a staging directory and the content moves into
/// place as the last step. A keg directory left behind by a failed move is
/// removed rather than left half-populated.
pub fn pour_bottle(
    layout: &CellarLayout,
    name: &str,
    version: &Version,
    archive: &Path,
) -> Result<Keg> {
    let staging = make_tmp_dir(layout, "pour")?;
    let poured = extract_into_cellar(layout, name, version, archive, &staging);
    let _ = fs::remove_dir_all(&staging);
    poured
}

fn extract_into_cellar(
    layout: &CellarLayout,
    name: &str,
    version: &Version,
    archive: &Path,
    staging: &Path,
) -> Result<Keg> {
    let mut command = Command::new("tar");
    command.arg("-xf").arg(archive).arg("-C").arg(staging);
    run_command(command, &format!("extract bottle {}", archive.display()))?;

    let content_root = bottle_content_root(staging, name, version)?;
    let keg_dir = layout.keg_dir(name, &version.to_string());
    if keg_dir.exists() {
        fs::remove_dir_all(&keg_dir)
            .with_context(|| format!("failed to clear old keg: {}", keg_dir.display()))?;
    }
    if let Some(parent) = keg_dir.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create rack: {}", parent.display()))?;
    }

    if let Err(err) = move_dir_or_copy(&content_root, &keg_dir) {
        let _ = fs::remove_dir_all(&keg_dir);
        return Err(err);
    }

    Ok(Keg {
        name: name.to_string(),
        version: version.clone(),
        path: keg_dir,
    })
}

/// Bottles are laid out as `<name>/<version>/...` inside the archive, but
/// a bare tree or a single top-level directory is accepted too.
fn bottle_content_root(staging: &Path, name: &str, version: &Version) -> Result<PathBuf> {
    let nested = staging.join(name).join(version.to_string());
    if nested.is_dir() {
        return Ok(nested);
    }

    let mut entries = Vec::new();
    for entry in fs::read_dir(staging)
        .with_context(|| format!("failed to read staging dir: {}", staging.display()))?
    {
        entries.push(entry?.path());
    }
    if entries.len() == 1 && entries[0].is_dir() {
        return Ok(entries[0].clone());
    }
    Ok(staging.to_path_buf())
}

fn partial_download_path(cache_path: &Path) -> PathBuf {
    let mut raw = cache_path.as_os_str().to_owned();
    raw.push(".part");
    PathBuf::from(raw)
}

fn local_source_path(url: &str) -> Option<PathBuf> {
    if let Some(stripped) = url.strip_prefix("file://") {
        return Some(PathBuf::from(stripped));
    }
    if !url.contains("://") {
        return Some(PathBuf::from(url));
    }
    None
}

fn download_to(url: &str, destination: &Path) -> Result<()> {
    let mut response = reqwest::blocking::get(url)
        .with_context(|| format!("failed to download bottle: {url}"))?
        .error_for_status()
        .with_context(|| format!("bottle download rejected: {url}"))?;

    let mut file = fs::File::create(destination)
        .with_context(|| format!("failed to create download file: {}", destination.display()))?;
    response
        .copy_to(&mut file)
        .with_context(|| format!("failed to write download: {}", destination.display()))?;
    Ok(())
}

fn run_command(mut command: Command, action: &str) -> Result<()> {
    let output = command
        .output()
        .with_context(|| format!("failed to launch command to {action}"))?;
    if !output.status.success() {
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(anyhow!(
            "failed to {}: exit status {:?}\nstdout: {}\nstderr: {}",
            action,
            output.status.code(),
            stdout.trim(),
            stderr.trim()
        ));
    }
    Ok(())
}
