mod bottle;
mod fs_utils;
mod install;
mod keg;
mod layout;
mod pins;
mod tab;

pub use bottle::{
    fetch_bottle, host_target, pour_bottle, sha256_hex_of_file, verify_bottle_checksum,
    FetchStatus,
};
pub use install::{BottleInstaller, BuildFailure, Install, InstallFailure};
pub use keg::{
    installed_kegs, keg_dir_present, link_keg, linked_keg, newest_installed_keg, rack_names,
    unlink_keg, Keg,
};
pub use layout::{default_user_prefix, CellarLayout};
pub use pins::{pinned_version, read_all_pins, remove_pin, write_pin};
pub use tab::{read_keg_tab, tab_for, write_tab, Tab};
