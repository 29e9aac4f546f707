mod outdated;
mod partition;
mod transaction;

pub use outdated::{select_outdated, OutdatedFormula, OutdatedSelection};
pub use partition::{format_upgrade_summary_lines, partition_pinned, PinPartition};
pub use transaction::{UpgradeOutcome, UpgradeRun};

#[cfg(test)]
mod tests;
