use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{anyhow, Context, Result};
use clap::CommandFactory;
use clap_complete::Shell;

use firkin_cellar::{
    default_user_prefix, installed_kegs, link_keg, linked_keg, newest_installed_keg, pinned_version,
    rack_names, read_all_pins, remove_pin, unlink_keg, write_pin, BottleInstaller, CellarLayout,
    Install, InstallFailure,
};
use firkin_core::{is_formula_name, BuildOptions, FormulaManifest};
use firkin_tap::FormulaIndex;
use firkin_upgrade::{
    format_upgrade_summary_lines, partition_pinned, select_outdated, OutdatedFormula,
    UpgradeOutcome, UpgradeRun,
};

use crate::render::TerminalRenderer;
use crate::{Cli, Commands};

/// Exit disposition of a command flow. `Failure` is an orderly non-zero
/// exit, distinct from an error bubbling up to `main`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CommandExit {
    Success,
    Failure,
}

impl CommandExit {
    pub(crate) fn code(self) -> ExitCode {
        match self {
            CommandExit::Success => ExitCode::SUCCESS,
            CommandExit::Failure => ExitCode::FAILURE,
        }
    }
}

pub(crate) fn run_cli(cli: Cli) -> Result<CommandExit> {
    let layout = resolve_layout(cli.prefix)?;
    let index = resolve_tap_index(cli.tap_root, &layout);

    match cli.command {
        Commands::Upgrade {
            formulae,
            dry_run,
            with,
            without,
        } => {
            refuse_unowned_root("upgrade")?;
            layout.ensure_base_dirs()?;
            run_upgrade_command(&layout, &index, &formulae, &with, &without, dry_run)
        }
        Commands::Install {
            formula,
            with,
            without,
            force,
        } => {
            refuse_unowned_root("install")?;
            layout.ensure_base_dirs()?;
            run_install_command(&layout, &index, &formula, &with, &without, force)
        }
        Commands::Outdated => run_outdated_command(&layout, &index),
        Commands::List => run_list_command(&layout),
        Commands::Info { formula } => run_info_command(&layout, &index, &formula),
        Commands::Pin { formula } => {
            refuse_unowned_root("pin")?;
            layout.ensure_base_dirs()?;
            run_pin_command(&layout, &formula)
        }
        Commands::Unpin { formula } => {
            refuse_unowned_root("unpin")?;
            run_unpin_command(&layout, &formula)
        }
        Commands::Link { formula } => {
            refuse_unowned_root("link")?;
            layout.ensure_base_dirs()?;
            run_link_command(&layout, &formula)
        }
        Commands::Unlink { formula } => {
            refuse_unowned_root("unlink")?;
            run_unlink_command(&layout, &formula)
        }
        Commands::Doctor => run_doctor_command(&layout, &index),
        Commands::Completions { shell } => {
            run_completions_command(shell);
            Ok(CommandExit::Success)
        }
    }
}

pub(crate) fn resolve_layout(prefix_flag: Option<PathBuf>) -> Result<CellarLayout> {
    let prefix = match prefix_flag {
        Some(prefix) => prefix,
        None => match std::env::var_os("FIRKIN_PREFIX") {
            Some(prefix) => PathBuf::from(prefix),
            None => default_user_prefix()?,
        },
    };
    Ok(CellarLayout::new(prefix))
}

pub(crate) fn resolve_tap_index(tap_flag: Option<PathBuf>, layout: &CellarLayout) -> FormulaIndex {
    let root = match tap_flag {
        Some(root) => root,
        None => match std::env::var_os("FIRKIN_TAP_ROOT") {
            Some(root) => PathBuf::from(root),
            None => layout.taps_dir().join("core"),
        },
    };
    FormulaIndex::open(root)
}

/// Running as root is only allowed when the firkin executable itself is
/// root-owned; a root shell driving a user-owned install would litter it
/// with root-owned files.
#[cfg(unix)]
fn refuse_unowned_root(command: &str) -> Result<()> {
    use std::os::unix::fs::MetadataExt;

    if unsafe { libc::geteuid() } != 0 {
        return Ok(());
    }

    let exe = std::env::current_exe().context("failed to locate the running executable")?;
    let metadata = fs::metadata(&exe)
        .with_context(|| format!("failed to inspect executable: {}", exe.display()))?;
    if metadata.uid() != 0 {
        return Err(anyhow!(
            "cowardly refusing to `firkin {command}` as root: {} is not owned by root",
            exe.display()
        ));
    }
    Ok(())
}

#[cfg(not(unix))]
fn refuse_unowned_root(_command: &str) -> Result<()> {
    Ok(())
}

fn require_formula_name(name: &str) -> Result<()> {
    if !is_formula_name(name) {
        return Err(anyhow!("invalid formula name '{name}'"));
    }
    Ok(())
}

pub(crate) fn run_upgrade_command(
    layout: &CellarLayout,
    index: &FormulaIndex,
    formulae: &[String],
    with: &[String],
    without: &[String],
    dry_run: bool,
) -> Result<CommandExit> {
    let renderer = TerminalRenderer::current();
    let requested = BuildOptions::from_flags(with, without)?;

    let selection = select_outdated(index, layout, formulae)?;
    for warning in &selection.warnings {
        renderer.print_status("warn", warning);
    }
    if selection.fatal {
        return Ok(CommandExit::Failure);
    }
    if selection.formulae.is_empty() {
        // Nothing outdated on a full scan is silence, not an error.
        return Ok(CommandExit::Success);
    }

    let pin_override = !formulae.is_empty();
    let partition = partition_pinned(selection.formulae, pin_override);
    renderer.print_lines(&format_upgrade_summary_lines(&partition));

    if dry_run || partition.to_upgrade.is_empty() {
        return Ok(CommandExit::Success);
    }

    let mut run = UpgradeRun::new();
    let mut progress = renderer.start_progress("upgrade", partition.to_upgrade.len() as u64);
    for (done, formula) in partition.to_upgrade.iter().enumerate() {
        if run.attempted(&formula.manifest.name) {
            progress.set((done + 1) as u64);
            continue;
        }

        renderer.print_section(&format!("Upgrading {}", formula.manifest.name));
        let (outcome, warnings) = run.upgrade(layout, &formula.manifest, &requested, |options| {
            BottleInstaller::new(layout, formula.manifest.clone(), options).show_header(false)
        });
        for warning in &warnings {
            renderer.print_status("warn", warning);
        }

        match outcome {
            UpgradeOutcome::Upgraded { keg, caveats } => {
                renderer.print_status(
                    "ok",
                    &format!(
                        "upgraded {} {} -> {}",
                        keg.name, formula.installed_version, keg.version
                    ),
                );
                if let Some(caveats) = caveats {
                    renderer.print_section("Caveats");
                    println!("{caveats}");
                }
            }
            UpgradeOutcome::AlreadyAttempted => {}
            UpgradeOutcome::CannotInstall { reason } => {
                renderer.print_status("err", &format!("{}: {reason}", formula.manifest.name));
            }
            UpgradeOutcome::BuildFailed { failure } => {
                renderer.print_lines(&failure.report_lines());
            }
        }
        progress.set((done + 1) as u64);
    }
    progress.finish_success();

    if run.failed() {
        Ok(CommandExit::Failure)
    } else {
        Ok(CommandExit::Success)
    }
}

pub(crate) fn run_install_command(
    layout: &CellarLayout,
    index: &FormulaIndex,
    formula: &str,
    with: &[String],
    without: &[String],
    force: bool,
) -> Result<CommandExit> {
    let renderer = TerminalRenderer::current();
    let options = BuildOptions::from_flags(with, without)?;

    let Some(manifest) = index.formula(formula)? else {
        return Err(anyhow!("no available formula '{formula}'"));
    };

    if !force {
        if let Some(existing) = newest_installed_keg(layout, formula)? {
            if existing.version == manifest.version {
                renderer.print_status(
                    "warn",
                    &format!("{formula} {} already installed", existing.version),
                );
                return Ok(CommandExit::Success);
            }
        }
    }

    let mut installer = BottleInstaller::new(layout, manifest, options).force_fetch(force);
    if let Some(header) = installer.header_line() {
        renderer.print_section(&header);
    }

    let keg = match installer.install() {
        Ok(keg) => keg,
        Err(InstallFailure::Build(failure)) => {
            renderer.print_lines(&failure.report_lines());
            return Ok(CommandExit::Failure);
        }
        Err(failure) => return Err(failure.into()),
    };
    if let Some(status) = installer.fetch_status() {
        renderer.print_status("..", &format!("bottle {}", status.as_str()));
    }

    let caveats = installer.caveats();
    match installer.finish() {
        Ok(()) => {}
        Err(InstallFailure::Build(failure)) => {
            renderer.print_lines(&failure.report_lines());
            return Ok(CommandExit::Failure);
        }
        Err(failure) => return Err(failure.into()),
    }

    renderer.print_status("ok", &format!("installed {} {}", keg.name, keg.version));
    if let Some(caveats) = caveats {
        renderer.print_section("Caveats");
        println!("{caveats}");
    }
    Ok(CommandExit::Success)
}

fn run_outdated_command(layout: &CellarLayout, index: &FormulaIndex) -> Result<CommandExit> {
    let selection = select_outdated(index, layout, &[])?;
    TerminalRenderer::current().print_lines(&format_outdated_lines(&selection.formulae));
    Ok(CommandExit::Success)
}

fn run_list_command(layout: &CellarLayout) -> Result<CommandExit> {
    TerminalRenderer::current().print_lines(&format_list_lines(layout)?);
    Ok(CommandExit::Success)
}

fn run_info_command(
    layout: &CellarLayout,
    index: &FormulaIndex,
    formula: &str,
) -> Result<CommandExit> {
    let Some(manifest) = index.formula(formula)? else {
        return Err(anyhow!("no available formula '{formula}'"));
    };
    TerminalRenderer::current().print_lines(&format_info_lines(layout, &manifest)?);
    Ok(CommandExit::Success)
}

pub(crate) fn run_pin_command(layout: &CellarLayout, formula: &str) -> Result<CommandExit> {
    require_formula_name(formula)?;
    let Some(keg) = newest_installed_keg(layout, formula)? else {
        return Err(anyhow!("{formula} not installed"));
    };
    write_pin(layout, formula, &keg.version)?;
    TerminalRenderer::current()
        .print_status("ok", &format!("pinned {formula} at {}", keg.version));
    Ok(CommandExit::Success)
}

pub(crate) fn run_unpin_command(layout: &CellarLayout, formula: &str) -> Result<CommandExit> {
    require_formula_name(formula)?;
    let renderer = TerminalRenderer::current();
    if remove_pin(layout, formula)? {
        renderer.print_status("ok", &format!("unpinned {formula}"));
    } else {
        renderer.print_status("warn", &format!("{formula} is not pinned"));
    }
    Ok(CommandExit::Success)
}

fn run_link_command(layout: &CellarLayout, formula: &str) -> Result<CommandExit> {
    require_formula_name(formula)?;
    let Some(keg) = newest_installed_keg(layout, formula)? else {
        return Err(anyhow!("{formula} not installed"));
    };
    let exposed = link_keg(layout, &keg)?;
    TerminalRenderer::current().print_status(
        "ok",
        &format!(
            "linked {formula} {} ({} file{})",
            keg.version,
            exposed.len(),
            plural(exposed.len())
        ),
    );
    Ok(CommandExit::Success)
}

fn run_unlink_command(layout: &CellarLayout, formula: &str) -> Result<CommandExit> {
    require_formula_name(formula)?;
    let renderer = TerminalRenderer::current();
    match linked_keg(layout, formula)? {
        Some(keg) => {
            let removed = unlink_keg(layout, &keg)?;
            renderer.print_status(
                "ok",
                &format!(
                    "unlinked {formula} {} ({} file{})",
                    keg.version,
                    removed.len(),
                    plural(removed.len())
                ),
            );
        }
        None => renderer.print_status("warn", &format!("{formula} is not linked")),
    }
    Ok(CommandExit::Success)
}

fn run_doctor_command(layout: &CellarLayout, index: &FormulaIndex) -> Result<CommandExit> {
    TerminalRenderer::current().print_lines(&format_doctor_lines(layout, index)?);
    Ok(CommandExit::Success)
}

fn run_completions_command(shell: Shell) {
    let mut command = Cli::command();
    clap_complete::generate(shell, &mut command, "firkin", &mut std::io::stdout());
}

pub(crate) fn format_outdated_lines(formulae: &[OutdatedFormula]) -> Vec<String> {
    formulae
        .iter()
        .map(|formula| {
            let mut line = format!(
                "{} ({}) < {}",
                formula.manifest.name, formula.installed_version, formula.manifest.version
            );
            if formula.pinned {
                line.push_str(" [pinned]");
            }
            line
        })
        .collect()
}

/// One line per installed formula, versions oldest first, the linked keg
/// marked with `*`.
pub(crate) fn format_list_lines(layout: &CellarLayout) -> Result<Vec<String>> {
    let mut lines = Vec::new();
    for name in rack_names(layout)? {
        let kegs = installed_kegs(layout, &name)?;
        let linked = linked_keg(layout, &name)?;
        let versions: Vec<String> = kegs
            .iter()
            .map(|keg| {
                if linked.as_ref() == Some(keg) {
                    format!("{}*", keg.version)
                } else {
                    keg.version.to_string()
                }
            })
            .collect();
        lines.push(format!("{name} {}", versions.join(" ")));
    }
    Ok(lines)
}

pub(crate) fn format_info_lines(
    layout: &CellarLayout,
    manifest: &FormulaManifest,
) -> Result<Vec<String>> {
    let mut lines = vec![format!("{}: {}", manifest.name, manifest.version)];
    if let Some(desc) = &manifest.desc {
        lines.push(desc.clone());
    }
    if let Some(homepage) = &manifest.homepage {
        lines.push(homepage.clone());
    }
    if let Some(license) = &manifest.license {
        lines.push(format!("license: {license}"));
    }
    if !manifest.bottles.is_empty() {
        let targets: Vec<&str> = manifest
            .bottles
            .iter()
            .map(|bottle| bottle.target.as_str())
            .collect();
        lines.push(format!("bottles: {}", targets.join(", ")));
    }

    let kegs = installed_kegs(layout, &manifest.name)?;
    if kegs.is_empty() {
        lines.push("not installed".to_string());
    } else {
        let linked = linked_keg(layout, &manifest.name)?;
        let rendered: Vec<String> = kegs
            .iter()
            .map(|keg| {
                if linked.as_ref() == Some(keg) {
                    format!("{} (linked)", keg.version)
                } else {
                    keg.version.to_string()
                }
            })
            .collect();
        lines.push(format!("installed: {}", rendered.join(", ")));
    }
    if let Some(pinned) = pinned_version(layout, &manifest.name)? {
        lines.push(format!("pinned at {pinned}"));
    }
    Ok(lines)
}

pub(crate) fn format_doctor_lines(
    layout: &CellarLayout,
    index: &FormulaIndex,
) -> Result<Vec<String>> {
    let mut lines = vec![
        format!("prefix: {}", layout.prefix().display()),
        format!("bin: {}", layout.bin_dir().display()),
        format!("cellar: {}", layout.cellar_dir().display()),
        format!("bottle cache: {}", layout.bottles_cache_dir().display()),
    ];
    if index.root().join("Formula").is_dir() {
        lines.push(format!("tap: {}", index.root().display()));
    } else {
        lines.push(format!("tap: {} (missing)", index.root().display()));
    }

    let racks = rack_names(layout)?;
    lines.push(format!("installed formulae: {}", racks.len()));
    let pins = read_all_pins(layout)?;
    if !pins.is_empty() {
        let rendered: Vec<String> = pins
            .iter()
            .map(|(name, version)| format!("{name} {version}"))
            .collect();
        lines.push(format!("pinned: {}", rendered.join(", ")));
    }

    let mut problems = 0_usize;
    let linked_dir = layout.linked_state_dir();
    if linked_dir.exists() {
        for entry in fs::read_dir(&linked_dir)
            .with_context(|| format!("failed to read link state: {}", linked_dir.display()))?
        {
            let entry = entry?;
            let file_name = entry.file_name();
            let Some(file_name) = file_name.to_str() else {
                continue;
            };
            let Some(name) = file_name.strip_suffix(".link") else {
                continue;
            };
            match linked_keg(layout, name) {
                Ok(Some(_)) => {}
                Ok(None) => {
                    lines.push(format!("stale link record: {name}"));
                    problems += 1;
                }
                Err(err) => {
                    lines.push(format!("broken link record for {name}: {err:#}"));
                    problems += 1;
                }
            }
        }
    }

    if problems == 0 {
        lines.push("no problems found".to_string());
    }
    Ok(lines)
}

fn plural(count: usize) -> &'static str {
    if count == 1 {
        ""
    } else {
        "s"
    }
}
