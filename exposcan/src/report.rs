use std::fs;
use std::path::{Path, PathBuf};

use crate::classify::Classification;
use crate::utils::path_must_str;

/// Grouped classification results for the whole package set
pub const REPORT_FILE: &str = "accessible_comp.json";

/// Write the combined result artifact into the scan root
///
/// A single file holds both issue kinds, grouped by component type
/// underneath.
pub fn write_report(root: &Path, classification: &Classification) -> crate::Result<PathBuf> {
    let path = root.join(REPORT_FILE);
    let raw = serde_json::to_string(classification)?;
    fs::write(&path, raw)?;
    log::info!("wrote {}", path_must_str(&path));
    Ok(path)
}
