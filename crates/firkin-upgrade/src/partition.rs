use crate::outdated::OutdatedFormula;

/// The outdated set split by pin state. The two sides are disjoint and
/// together hold every record passed in.
#[derive(Debug, Default)]
pub struct PinPartition {
    pub to_upgrade: Vec<OutdatedFormula>,
    pub skipped_pinned: Vec<OutdatedFormula>,
}

/// Moves pinned records aside unless `pin_override` is set. Explicitly
/// naming a formula on the command line overrides its pin, so callers
/// pass `pin_override = true` exactly when targets were explicit.
pub fn partition_pinned(outdated: Vec<OutdatedFormula>, pin_override: bool) -> PinPartition {
    let mut partition = PinPartition::default();
    for formula in outdated {
        if formula.pinned && !pin_override {
            partition.skipped_pinned.push(formula);
        } else {
            partition.to_upgrade.push(formula);
        }
    }
    partition
}

/// Summary lines announcing the batch, one block per non-empty side.
pub fn format_upgrade_summary_lines(partition: &PinPartition) -> Vec<String> {
    let mut lines = Vec::new();

    if !partition.to_upgrade.is_empty() {
        let count = partition.to_upgrade.len();
        lines.push(format!(
            "Upgrading {count} outdated package{}, with result:",
            plural(count)
        ));
        let entries: Vec<String> = partition.to_upgrade.iter().map(upgrade_entry).collect();
        lines.push(entries.join(", "));
    }

    if !partition.skipped_pinned.is_empty() {
        let count = partition.skipped_pinned.len();
        lines.push(format!(
            "Not upgrading {count} pinned package{}:",
            plural(count)
        ));
        let entries: Vec<String> = partition
            .skipped_pinned
            .iter()
            .map(|formula| {
                format!("{} {}", formula.manifest.name, formula.installed_version)
            })
            .collect();
        lines.push(entries.join(", "));
    }

    lines
}

fn upgrade_entry(formula: &OutdatedFormula) -> String {
    if formula.installed_version == formula.manifest.version {
        format!("{} {}", formula.manifest.name, formula.manifest.version)
    } else {
        format!(
            "{} {} -> {}",
            formula.manifest.name, formula.installed_version, formula.manifest.version
        )
    }
}

fn plural(count: usize) -> &'static str {
    if count == 1 {
        ""
    } else {
        "s"
    }
}
