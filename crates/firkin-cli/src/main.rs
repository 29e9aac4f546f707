use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use clap_complete::Shell;

mod flows;
mod render;


#[derive(Parser, Debug)]
#[command(name = "firkin")]
#[command(about = "Bottle-pouring package manager with pinned upgrades", long_about = None)]
struct Cli {
    /// Installation prefix (default: FIRKIN_PREFIX, then the per-user dir)
    #[arg(long)]
    prefix: Option<PathBuf>,
    /// Tap root to read formulae from (default: FIRKIN_TAP_ROOT, then <prefix>/taps/core)
    #[arg(long)]
    tap_root: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Upgrade every outdated formula, or only the named ones
    Upgrade {
        formulae: Vec<String>,
        /// Show what would be upgraded without doing it
        #[arg(long)]
        dry_run: bool,
        /// Add a --with-<name> build option for the new installs
        #[arg(long, value_name = "NAME")]
        with: Vec<String>,
        /// Add a --without-<name> build option for the new installs
        #[arg(long, value_name = "NAME")]
        without: Vec<String>,
    },
    /// Install a formula from the tap
    Install {
        formula: String,
        /// Add a --with-<name> build option
        #[arg(long, value_name = "NAME")]
        with: Vec<String>,
        /// Add a --without-<name> build option
        #[arg(long, value_name = "NAME")]
        without: Vec<String>,
        /// Fetch the bottle again even if it is cached
        #[arg(long)]
        force: bool,
    },
    /// Show installed formulae the tap has newer versions of
    Outdated,
    /// List installed formulae and their versions
    List,
    /// Show a formula's manifest and install state
    Info { formula: String },
    /// Exclude a formula from automatic upgrades
    Pin { formula: String },
    /// Remove a formula's pin
    Unpin { formula: String },
    /// Expose the newest installed keg in bin
    Link { formula: String },
    /// Remove a formula's exposed binaries
    Unlink { formula: String },
    /// Report the prefix layout and any state problems
    Doctor,
    /// Print a completion script for the given shell
    Completions { shell: Shell },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match flows::run_cli(cli) {
        Ok(exit) => exit.code(),
        Err(err) => {
            eprintln!("Error: {err:#}");
            ExitCode::FAILURE
        }
    }
}
