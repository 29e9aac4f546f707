use super::*;

use firkin_cellar::{
    link_keg, linked_keg, pinned_version, write_pin, BuildFailure, CellarLayout, Install,
    InstallFailure, Keg,
};
use firkin_core::{BuildOptions, FormulaManifest};
use firkin_tap::FormulaIndex;
use semver::Version;
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

static TEST_LAYOUT_COUNTER: AtomicU64 = AtomicU64::new(0);

fn build_test_layout_path() -> PathBuf {
    let pid = std::process::id();
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("must read clock")
        .subsec_nanos();
    let count = TEST_LAYOUT_COUNTER.fetch_add(1, Ordering::SeqCst);
    std::env::temp_dir().join(format!("firkin-upgrade-tests-{pid}-{nanos}-{count}"))
}

fn test_layout() -> CellarLayout {
    let layout = CellarLayout::new(build_test_layout_path());
    layout
        .ensure_base_dirs()
        .expect("must create layout base dirs");
    layout
}

fn test_tap(layout: &CellarLayout) -> FormulaIndex {
    let root = layout.prefix().join("tap");
    fs::create_dir_all(root.join("Formula")).expect("must create tap fixture");
    FormulaIndex::open(root)
}

fn write_tap_formula(index: &FormulaIndex, name: &str, version: &str) {
    let body = format!("name = \"{name}\"\nversion = \"{version}\"\n");
    fs::write(index.formula_path(name), body).expect("must write tap formula");
}

fn manifest(name: &str, version: &str) -> FormulaManifest {
    FormulaManifest {
        name: name.to_string(),
        version: Version::parse(version).expect("must parse manifest version"),
        desc: None,
        homepage: None,
        license: None,
        caveats: None,
        bottles: Vec::new(),
    }
}

fn make_keg(layout: &CellarLayout, name: &str, version: &str) -> Keg {
    let keg = Keg::new(
        layout,
        name,
        Version::parse(version).expect("must parse keg version"),
    );
    fs::create_dir_all(keg.bin_dir()).expect("must create keg bin dir");
    fs::write(keg.bin_dir().join(name), format!("fixture {name}")).expect("must write keg binary");
    keg
}

fn install_linked_keg(layout: &CellarLayout, name: &str, version: &str) -> Keg {
    let keg = make_keg(layout, name, version);
    link_keg(layout, &keg).expect("must link fixture keg");
    keg
}

#[derive(Debug, Clone)]
enum InstallPlan {
    Succeed,
    FailInstall(InstallFailure),
    FailFinish(InstallFailure),
}

/// Stand-in installer driven by a plan. Success creates and links a real
/// keg directory so the engine's on-disk checks see what a genuine
/// install would leave behind.
struct ScriptedInstaller {
    layout: CellarLayout,
    manifest: FormulaManifest,
    plan: InstallPlan,
    poured: Option<Keg>,
}

impl ScriptedInstaller {
    fn new(layout: &CellarLayout, manifest: &FormulaManifest, plan: InstallPlan) -> Self {
        Self {
            layout: layout.clone(),
            manifest: manifest.clone(),
            plan,
            poured: None,
        }
    }
}

impl Install for ScriptedInstaller {
    fn install(&mut self) -> Result<Keg, InstallFailure> {
        if let InstallPlan::FailInstall(failure) = &self.plan {
            return Err(failure.clone());
        }
        let keg = Keg::new(
            &self.layout,
            &self.manifest.name,
            self.manifest.version.clone(),
        );
        fs::create_dir_all(keg.bin_dir()).expect("must create scripted keg");
        fs::write(keg.bin_dir().join(&self.manifest.name), "scripted")
            .expect("must write scripted binary");
        self.poured = Some(keg.clone());
        Ok(keg)
    }

    fn caveats(&self) -> Option<String> {
        self.manifest.caveats.clone()
    }

    fn finish(&mut self) -> Result<(), InstallFailure> {
        if let InstallPlan::FailFinish(failure) = &self.plan {
            return Err(failure.clone());
        }
        let keg = self.poured.as_ref().expect("install must run before finish");
        link_keg(&self.layout, keg).expect("must link scripted keg");
        Ok(())
    }
}

fn cannot_install(reason: &str) -> InstallFailure {
    InstallFailure::CannotInstall(reason.to_string())
}

fn build_failure(name: &str, version: &str) -> InstallFailure {
    InstallFailure::Build(BuildFailure {
        formula: name.to_string(),
        version: Version::parse(version).expect("must parse version"),
        stage: "pour".to_string(),
        output: vec!["compile blew up".to_string()],
    })
}

fn selected_names(selection: &OutdatedSelection) -> Vec<String> {
    selection
        .formulae
        .iter()
        .map(|formula| formula.manifest.name.clone())
        .collect()
}

// Outdated selector.

#[test]
fn scan_selects_older_installed_formulae() {
    let layout = test_layout();
    let index = test_tap(&layout);
    write_tap_formula(&index, "foo", "1.1.0");
    write_tap_formula(&index, "bar", "2.1.0");
    write_tap_formula(&index, "baz", "3.1.0");

    install_linked_keg(&layout, "foo", "1.0.0");
    install_linked_keg(&layout, "bar", "2.1.0");
    install_linked_keg(&layout, "baz", "3.0.0");
    write_pin(&layout, "baz", &Version::new(3, 0, 0)).expect("must pin baz");

    let selection = select_outdated(&index, &layout, &[]).expect("scan must succeed");
    assert_eq!(selected_names(&selection), vec!["baz", "foo"]);
    assert!(selection.warnings.is_empty());
    assert!(!selection.fatal);

    let baz = &selection.formulae[0];
    assert_eq!(baz.installed_version, Version::new(3, 0, 0));
    assert!(baz.pinned);
    let foo = &selection.formulae[1];
    assert_eq!(foo.installed_version, Version::new(1, 0, 0));
    assert!(!foo.pinned);

    let _ = fs::remove_dir_all(layout.prefix());
}

#[test]
fn scan_without_outdated_is_silence_not_error() {
    let layout = test_layout();
    let index = test_tap(&layout);
    write_tap_formula(&index, "foo", "1.0.0");
    install_linked_keg(&layout, "foo", "1.0.0");

    let selection = select_outdated(&index, &layout, &[]).expect("scan must succeed");
    assert!(selection.formulae.is_empty());
    assert!(selection.warnings.is_empty());
    assert!(!selection.fatal);

    let _ = fs::remove_dir_all(layout.prefix());
}

#[test]
fn scan_is_idempotent_between_upgrades() {
    let layout = test_layout();
    let index = test_tap(&layout);
    write_tap_formula(&index, "foo", "1.1.0");
    install_linked_keg(&layout, "foo", "1.0.0");

    let first = select_outdated(&index, &layout, &[]).expect("first scan must succeed");
    let second = select_outdated(&index, &layout, &[]).expect("second scan must succeed");
    assert_eq!(first.formulae, second.formulae);

    let _ = fs::remove_dir_all(layout.prefix());
}

#[test]
fn explicit_unknown_formula_is_an_error() {
    let layout = test_layout();
    let index = test_tap(&layout);

    let err = select_outdated(&index, &layout, &["nope".to_string()])
        .expect_err("unknown formula must error");
    assert!(format!("{err:#}").contains("no available formula 'nope'"));

    let _ = fs::remove_dir_all(layout.prefix());
}

#[test]
fn explicit_not_installed_warns_and_drops() {
    let layout = test_layout();
    let index = test_tap(&layout);
    write_tap_formula(&index, "wget", "1.21.0");

    let selection = select_outdated(&index, &layout, &["wget".to_string()])
        .expect("selection must succeed");
    assert!(selection.formulae.is_empty());
    assert_eq!(selection.warnings, vec!["wget not installed"]);
    assert!(selection.fatal, "nothing left of explicit targets is fatal");

    let _ = fs::remove_dir_all(layout.prefix());
}

#[test]
fn explicit_current_warns_and_drops() {
    let layout = test_layout();
    let index = test_tap(&layout);
    write_tap_formula(&index, "wget", "1.21.0");
    install_linked_keg(&layout, "wget", "1.21.0");

    let selection = select_outdated(&index, &layout, &["wget".to_string()])
        .expect("selection must succeed");
    assert!(selection.formulae.is_empty());
    assert_eq!(selection.warnings, vec!["wget 1.21.0 already installed"]);
    assert!(selection.fatal);

    let _ = fs::remove_dir_all(layout.prefix());
}

#[test]
fn explicit_target_overrides_outdated_check() {
    let layout = test_layout();
    let index = test_tap(&layout);
    write_tap_formula(&index, "wget", "1.5.0");
    install_linked_keg(&layout, "wget", "2.0.0");

    // Installed ahead of the tap still passes through when named.
    let selection = select_outdated(&index, &layout, &["wget".to_string()])
        .expect("selection must succeed");
    assert_eq!(selected_names(&selection), vec!["wget"]);
    assert_eq!(selection.formulae[0].installed_version, Version::new(2, 0, 0));
    assert!(selection.warnings.is_empty());
    assert!(!selection.fatal);

    let _ = fs::remove_dir_all(layout.prefix());
}

#[test]
fn explicit_targets_keep_argument_order() {
    let layout = test_layout();
    let index = test_tap(&layout);
    write_tap_formula(&index, "zeta", "1.1.0");
    write_tap_formula(&index, "alpha", "1.1.0");
    install_linked_keg(&layout, "zeta", "1.0.0");
    install_linked_keg(&layout, "alpha", "1.0.0");

    let selection =
        select_outdated(&index, &layout, &["zeta".to_string(), "alpha".to_string()])
            .expect("selection must succeed");
    assert_eq!(selected_names(&selection), vec!["zeta", "alpha"]);

    let _ = fs::remove_dir_all(layout.prefix());
}

// Pin filter.

#[test]
fn partition_moves_pinned_aside() {
    let outdated = vec![
        OutdatedFormula {
            manifest: manifest("foo", "1.1.0"),
            installed_version: Version::new(1, 0, 0),
            pinned: false,
        },
        OutdatedFormula {
            manifest: manifest("baz", "3.1.0"),
            installed_version: Version::new(3, 0, 0),
            pinned: true,
        },
    ];

    let partition = partition_pinned(outdated.clone(), false);
    assert_eq!(partition.to_upgrade.len(), 1);
    assert_eq!(partition.to_upgrade[0].manifest.name, "foo");
    assert_eq!(partition.skipped_pinned.len(), 1);
    assert_eq!(partition.skipped_pinned[0].manifest.name, "baz");
    assert_eq!(
        partition.to_upgrade.len() + partition.skipped_pinned.len(),
        outdated.len()
    );

    let overridden = partition_pinned(outdated, true);
    assert_eq!(overridden.to_upgrade.len(), 2);
    assert!(overridden.skipped_pinned.is_empty());
}

#[test]
fn summary_lines_name_both_sets() {
    let partition = partition_pinned(
        vec![
            OutdatedFormula {
                manifest: manifest("foo", "1.1.0"),
                installed_version: Version::new(1, 0, 0),
                pinned: false,
            },
            OutdatedFormula {
                manifest: manifest("bar", "2.1.0"),
                installed_version: Version::new(2, 0, 0),
                pinned: false,
            },
            OutdatedFormula {
                manifest: manifest("baz", "3.1.0"),
                installed_version: Version::new(3, 0, 0),
                pinned: true,
            },
        ],
        false,
    );

    let lines = format_upgrade_summary_lines(&partition);
    assert_eq!(
        lines,
        vec![
            "Upgrading 2 outdated packages, with result:",
            "foo 1.0.0 -> 1.1.0, bar 2.0.0 -> 2.1.0",
            "Not upgrading 1 pinned package:",
            "baz 3.0.0",
        ]
    );
}

#[test]
fn summary_lines_for_single_upgrade_use_singular() {
    let partition = partition_pinned(
        vec![OutdatedFormula {
            manifest: manifest("foo", "1.1.0"),
            installed_version: Version::new(1, 0, 0),
            pinned: false,
        }],
        false,
    );

    let lines = format_upgrade_summary_lines(&partition);
    assert_eq!(lines[0], "Upgrading 1 outdated package, with result:");
}

#[test]
fn summary_lines_skip_empty_sides() {
    assert!(format_upgrade_summary_lines(&PinPartition::default()).is_empty());

    let only_pinned = partition_pinned(
        vec![OutdatedFormula {
            manifest: manifest("baz", "3.1.0"),
            installed_version: Version::new(3, 0, 0),
            pinned: true,
        }],
        false,
    );
    let lines = format_upgrade_summary_lines(&only_pinned);
    assert_eq!(lines.len(), 2);
    assert!(lines[0].starts_with("Not upgrading 1 pinned package"));
}

// Upgrade transaction engine.

#[test]
fn upgrade_merges_tab_options_and_links_new_keg() {
    let layout = test_layout();
    let old = install_linked_keg(&layout, "foo", "1.0.0");
    let recorded = firkin_cellar::Tab {
        used_options: BuildOptions::from_tokens(["--with-docs"]).expect("must build options"),
        ..firkin_cellar::Tab::default()
    };
    firkin_cellar::write_tab(&layout, &old, &recorded).expect("must write old tab");

    let mut new_manifest = manifest("foo", "1.1.0");
    new_manifest.caveats = Some("foo needs a shell restart".to_string());
    let requested = BuildOptions::from_tokens(["--with-extras"]).expect("must build options");

    let mut run = UpgradeRun::new();
    let mut seen = BuildOptions::new();
    let (outcome, warnings) = run.upgrade(&layout, &new_manifest, &requested, |options| {
        seen = options.clone();
        ScriptedInstaller::new(&layout, &new_manifest, InstallPlan::Succeed)
    });

    match outcome {
        UpgradeOutcome::Upgraded { keg, caveats } => {
            assert_eq!(keg.version, Version::new(1, 1, 0));
            assert_eq!(caveats.as_deref(), Some("foo needs a shell restart"));
        }
        other => panic!("expected Upgraded, got {other:?}"),
    }
    assert!(warnings.is_empty());
    assert!(!run.failed());
    assert!(run.attempted("foo"));

    assert!(seen.contains("--with-extras"), "requested option must survive");
    assert!(seen.contains("--with-docs"), "recorded option must be merged");

    let linked = linked_keg(&layout, "foo")
        .expect("must read linked keg")
        .expect("new keg must be linked");
    assert_eq!(linked.version, Version::new(1, 1, 0));
    assert!(old.path.is_dir(), "old keg files stay on disk");

    let _ = fs::remove_dir_all(layout.prefix());
}

#[test]
fn upgrade_repins_at_new_version() {
    let layout = test_layout();
    install_linked_keg(&layout, "foo", "1.0.0");
    write_pin(&layout, "foo", &Version::new(1, 0, 0)).expect("must pin foo");

    let new_manifest = manifest("foo", "1.1.0");
    let mut run = UpgradeRun::new();
    let (outcome, _) = run.upgrade(&layout, &new_manifest, &BuildOptions::new(), |_| {
        ScriptedInstaller::new(&layout, &new_manifest, InstallPlan::Succeed)
    });

    assert!(matches!(outcome, UpgradeOutcome::Upgraded { .. }));
    let pinned = pinned_version(&layout, "foo")
        .expect("must read pin")
        .expect("foo must still be pinned");
    assert_eq!(pinned, Version::new(1, 1, 0));

    let _ = fs::remove_dir_all(layout.prefix());
}

#[test]
fn cannot_install_relinks_old_keg() {
    let layout = test_layout();
    let old = install_linked_keg(&layout, "foo", "1.0.0");

    let new_manifest = manifest("foo", "1.1.0");
    let mut run = UpgradeRun::new();
    let (outcome, warnings) = run.upgrade(&layout, &new_manifest, &BuildOptions::new(), |_| {
        ScriptedInstaller::new(
            &layout,
            &new_manifest,
            InstallPlan::FailInstall(cannot_install("unsatisfiable requirement")),
        )
    });

    match outcome {
        UpgradeOutcome::CannotInstall { reason } => {
            assert_eq!(reason, "unsatisfiable requirement")
        }
        other => panic!("expected CannotInstall, got {other:?}"),
    }
    assert!(warnings.is_empty());
    assert!(!run.failed(), "precondition failures do not fail the batch");

    let linked = linked_keg(&layout, "foo")
        .expect("must read linked keg")
        .expect("old keg must be restored");
    assert_eq!(linked, old);

    let _ = fs::remove_dir_all(layout.prefix());
}

#[test]
fn build_failure_relinks_old_keg_and_fails_run() {
    let layout = test_layout();
    let old = install_linked_keg(&layout, "foo", "1.0.0");

    let new_manifest = manifest("foo", "1.1.0");
    let mut run = UpgradeRun::new();
    let (outcome, _) = run.upgrade(&layout, &new_manifest, &BuildOptions::new(), |_| {
        ScriptedInstaller::new(
            &layout,
            &new_manifest,
            InstallPlan::FailInstall(build_failure("foo", "1.1.0")),
        )
    });

    match outcome {
        UpgradeOutcome::BuildFailed { failure } => {
            assert_eq!(failure.formula, "foo");
            assert!(!failure.report_lines().is_empty());
        }
        other => panic!("expected BuildFailed, got {other:?}"),
    }
    assert!(run.failed());

    let linked = linked_keg(&layout, "foo")
        .expect("must read linked keg")
        .expect("old keg must be restored");
    assert_eq!(linked, old);

    let _ = fs::remove_dir_all(layout.prefix());
}

#[test]
fn finish_failure_with_poured_keg_skips_restoration() {
    let layout = test_layout();
    let old = install_linked_keg(&layout, "foo", "1.0.0");

    let new_manifest = manifest("foo", "1.1.0");
    let mut run = UpgradeRun::new();
    let (outcome, warnings) = run.upgrade(&layout, &new_manifest, &BuildOptions::new(), |_| {
        ScriptedInstaller::new(
            &layout,
            &new_manifest,
            InstallPlan::FailFinish(cannot_install("postinstall hook refused")),
        )
    });

    assert!(matches!(outcome, UpgradeOutcome::CannotInstall { .. }));
    assert!(warnings.is_empty());

    // The new version is on disk, so the old keg is not put back.
    assert!(layout.keg_dir("foo", "1.1.0").is_dir());
    assert!(old.path.is_dir());
    assert!(linked_keg(&layout, "foo")
        .expect("must read linked keg")
        .is_none());

    let _ = fs::remove_dir_all(layout.prefix());
}

#[test]
fn second_attempt_in_one_run_is_silent() {
    let layout = test_layout();
    install_linked_keg(&layout, "foo", "1.0.0");

    let new_manifest = manifest("foo", "1.1.0");
    let mut run = UpgradeRun::new();
    let (first, _) = run.upgrade(&layout, &new_manifest, &BuildOptions::new(), |_| {
        ScriptedInstaller::new(&layout, &new_manifest, InstallPlan::Succeed)
    });
    assert!(matches!(first, UpgradeOutcome::Upgraded { .. }));

    let (second, warnings) = run.upgrade(&layout, &new_manifest, &BuildOptions::new(), |_| {
        ScriptedInstaller::new(&layout, &new_manifest, InstallPlan::Succeed)
    });
    assert!(matches!(second, UpgradeOutcome::AlreadyAttempted));
    assert!(warnings.is_empty());
    assert!(!run.failed());

    let _ = fs::remove_dir_all(layout.prefix());
}

#[test]
fn upgrade_without_linked_keg_has_nothing_to_restore() {
    let layout = test_layout();
    make_keg(&layout, "foo", "1.0.0");

    let new_manifest = manifest("foo", "1.1.0");
    let mut run = UpgradeRun::new();
    let (outcome, warnings) = run.upgrade(&layout, &new_manifest, &BuildOptions::new(), |_| {
        ScriptedInstaller::new(
            &layout,
            &new_manifest,
            InstallPlan::FailInstall(cannot_install("no bottle for host")),
        )
    });

    assert!(matches!(outcome, UpgradeOutcome::CannotInstall { .. }));
    assert!(warnings.is_empty());
    assert!(linked_keg(&layout, "foo")
        .expect("must read linked keg")
        .is_none());

    let _ = fs::remove_dir_all(layout.prefix());
}

#[cfg(unix)]
#[test]
fn failed_restoration_is_a_warning_not_an_error() {
    let layout = test_layout();
    install_linked_keg(&layout, "foo", "1.0.0");

    // Wreck the bin dir so both unlink and the restoration attempt fail.
    fs::remove_dir_all(layout.bin_dir()).expect("must drop bin dir");
    fs::write(layout.bin_dir(), "not a directory").expect("must shadow bin dir");

    let new_manifest = manifest("foo", "1.1.0");
    let mut run = UpgradeRun::new();
    let (outcome, warnings) = run.upgrade(&layout, &new_manifest, &BuildOptions::new(), |_| {
        ScriptedInstaller::new(&layout, &new_manifest, InstallPlan::Succeed)
    });

    assert!(matches!(outcome, UpgradeOutcome::CannotInstall { .. }));
    assert_eq!(warnings.len(), 1);
    assert!(warnings[0].contains("could not restore foo 1.0.0"));
    assert!(!run.failed());

    let _ = fs::remove_file(layout.bin_dir());
    let _ = fs::remove_dir_all(layout.prefix());
}

// Batch scenarios.

fn drive_batch(
    layout: &CellarLayout,
    to_upgrade: &[OutdatedFormula],
    plan_for: impl Fn(&str) -> InstallPlan,
) -> (UpgradeRun, Vec<UpgradeOutcome>) {
    let mut run = UpgradeRun::new();
    let mut outcomes = Vec::new();
    for formula in to_upgrade {
        if run.attempted(&formula.manifest.name) {
            continue;
        }
        let (outcome, _) = run.upgrade(layout, &formula.manifest, &BuildOptions::new(), |_| {
            ScriptedInstaller::new(layout, &formula.manifest, plan_for(&formula.manifest.name))
        });
        outcomes.push(outcome);
    }
    (run, outcomes)
}

#[test]
fn batch_upgrades_outdated_and_skips_pinned() {
    let layout = test_layout();
    let index = test_tap(&layout);
    write_tap_formula(&index, "foo", "1.1.0");
    write_tap_formula(&index, "bar", "2.1.0");
    write_tap_formula(&index, "baz", "3.1.0");
    install_linked_keg(&layout, "foo", "1.0.0");
    install_linked_keg(&layout, "bar", "2.0.0");
    install_linked_keg(&layout, "baz", "3.0.0");
    write_pin(&layout, "baz", &Version::new(3, 0, 0)).expect("must pin baz");

    let selection = select_outdated(&index, &layout, &[]).expect("scan must succeed");
    let partition = partition_pinned(selection.formulae, false);
    assert_eq!(partition.skipped_pinned.len(), 1);

    let (run, outcomes) = drive_batch(&layout, &partition.to_upgrade, |_| InstallPlan::Succeed);
    assert_eq!(outcomes.len(), 2);
    assert!(!run.failed());

    for (name, version) in [("foo", Version::new(1, 1, 0)), ("bar", Version::new(2, 1, 0))] {
        let linked = linked_keg(&layout, name)
            .expect("must read linked keg")
            .expect("upgrade must have linked");
        assert_eq!(linked.version, version, "{name} must be upgraded");
    }
    let baz = linked_keg(&layout, "baz")
        .expect("must read linked keg")
        .expect("baz must stay linked");
    assert_eq!(baz.version, Version::new(3, 0, 0), "pinned baz must be untouched");

    let _ = fs::remove_dir_all(layout.prefix());
}

#[test]
fn explicit_target_overrides_pin_and_repins() {
    let layout = test_layout();
    let index = test_tap(&layout);
    write_tap_formula(&index, "baz", "3.1.0");
    install_linked_keg(&layout, "baz", "3.0.0");
    write_pin(&layout, "baz", &Version::new(3, 0, 0)).expect("must pin baz");

    let selection = select_outdated(&index, &layout, &["baz".to_string()])
        .expect("selection must succeed");
    assert!(!selection.fatal);
    let partition = partition_pinned(selection.formulae, true);
    assert!(partition.skipped_pinned.is_empty(), "explicit naming overrides the pin");

    let (run, outcomes) = drive_batch(&layout, &partition.to_upgrade, |_| InstallPlan::Succeed);
    assert!(!run.failed());
    assert!(matches!(outcomes[0], UpgradeOutcome::Upgraded { .. }));

    let linked = linked_keg(&layout, "baz")
        .expect("must read linked keg")
        .expect("baz must be linked");
    assert_eq!(linked.version, Version::new(3, 1, 0));
    let pinned = pinned_version(&layout, "baz")
        .expect("must read pin")
        .expect("baz must still be pinned");
    assert_eq!(pinned, Version::new(3, 1, 0));

    let _ = fs::remove_dir_all(layout.prefix());
}

#[test]
fn build_failure_does_not_stop_the_batch() {
    let layout = test_layout();
    let index = test_tap(&layout);
    write_tap_formula(&index, "bar", "2.1.0");
    write_tap_formula(&index, "foo", "1.1.0");
    let old_foo = install_linked_keg(&layout, "foo", "1.0.0");
    install_linked_keg(&layout, "bar", "2.0.0");

    let selection = select_outdated(&index, &layout, &[]).expect("scan must succeed");
    let partition = partition_pinned(selection.formulae, false);

    let (run, outcomes) = drive_batch(&layout, &partition.to_upgrade, |name| {
        if name == "foo" {
            InstallPlan::FailInstall(build_failure("foo", "1.1.0"))
        } else {
            InstallPlan::Succeed
        }
    });

    assert!(run.failed(), "one build failure must fail the whole run");
    assert_eq!(outcomes.len(), 2);
    assert!(outcomes
        .iter()
        .any(|outcome| matches!(outcome, UpgradeOutcome::BuildFailed { .. })));

    let bar = linked_keg(&layout, "bar")
        .expect("must read linked keg")
        .expect("bar must still upgrade");
    assert_eq!(bar.version, Version::new(2, 1, 0));
    let foo = linked_keg(&layout, "foo")
        .expect("must read linked keg")
        .expect("foo's old keg must be restored");
    assert_eq!(foo, old_foo);

    let _ = fs::remove_dir_all(layout.prefix());
}

#[test]
fn explicit_current_target_is_fatal_before_any_transaction() {
    let layout = test_layout();
    let index = test_tap(&layout);
    write_tap_formula(&index, "quux", "1.0.0");
    install_linked_keg(&layout, "quux", "1.0.0");

    let selection = select_outdated(&index, &layout, &["quux".to_string()])
        .expect("selection must succeed");
    assert!(selection.formulae.is_empty());
    assert_eq!(selection.warnings, vec!["quux 1.0.0 already installed"]);
    assert!(selection.fatal, "the caller must stop before upgrading anything");

    let _ = fs::remove_dir_all(layout.prefix());
}
