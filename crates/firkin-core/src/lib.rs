mod manifest;
mod options;

pub use manifest::{is_formula_name, BottleSpec, FormulaManifest};
pub use options::BuildOptions;
