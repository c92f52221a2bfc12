use std::fs;
use std::path::Path;

use tempfile::NamedTempFile;
use walkdir::WalkDir;

use crate::axml::AxmlDecoder;
use crate::extract::{extract, ExtractError, PackageModel};
use crate::manifest::Manifest;
use crate::utils::{path_has_ext, path_must_str, read_file};

/// Cached extraction results, one entry per successfully analyzed APK
pub const CACHE_FILE: &str = "all_comp.json";

/// Resource-overlay artifacts carry this marker; they aren't real apps
const RRO_MARKER: &str = "auto_generated_rro_product";

/// Walks a firmware package dump and extracts a model per APK
pub struct Scanner<'d> {
    decoder: &'d dyn AxmlDecoder,
}

impl<'d> Scanner<'d> {
    pub fn new(decoder: &'d dyn AxmlDecoder) -> Self {
        Self { decoder }
    }

    /// Extract a model from every APK under `root`
    ///
    /// Loose APKs directly under the root are picked up along with APKs one
    /// level down in per-package directories. Per-APK failures are logged
    /// and skipped; the batch always runs to the end.
    pub fn scan(&self, root: &Path) -> crate::Result<Vec<PackageModel>> {
        if !root.is_dir() {
            return Err(crate::Error::MissingFile(path_must_str(root).into()));
        }

        let mut models = Vec::new();

        let walker = WalkDir::new(root)
            .min_depth(1)
            .max_depth(2)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| {
                let name = e.file_name().to_string_lossy();
                if name.contains(RRO_MARKER) {
                    log::info!("skipping resource overlay entry {}", name);
                    return false;
                }
                true
            });

        for entry in walker {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    log::warn!("unreadable entry under {}: {}", path_must_str(root), e);
                    continue;
                }
            };

            let path = entry.path();
            if !entry.file_type().is_file() || !path_has_ext(path, "apk") {
                continue;
            }

            match self.process_apk(path) {
                Ok(model) => models.push(model),
                Err(e) => log::warn!("skipping {}: {}", path_must_str(path), e),
            }
        }

        Ok(models)
    }

    fn process_apk(&self, apk: &Path) -> Result<PackageModel, ExtractError> {
        log::info!("analyzing {}", path_must_str(apk));

        let decoded = NamedTempFile::new()?;
        self.decoder
            .decode(apk, decoded.path())
            .map_err(ExtractError::Decode)?;

        let manifest =
            Manifest::from_file(decoded.path()).map_err(|e| ExtractError::Parse(e.to_string()))?;

        extract(apk, &manifest)
    }
}

/// Load a previous scan's cached extraction results, if there are any
pub fn load_cache(root: &Path) -> crate::Result<Option<Vec<PackageModel>>> {
    let cache = root.join(CACHE_FILE);
    if !cache.exists() {
        return Ok(None);
    }
    log::info!("loading extraction results from {}", path_must_str(&cache));
    let raw = read_file(&cache)?;
    Ok(Some(serde_json::from_str(&raw)?))
}

/// Run a scan, or reuse a previous scan's extraction results
///
/// When `<root>/all_comp.json` is present it is loaded as-is so the slow
/// per-APK decode step only runs once per firmware dump. Delete the file to
/// force a rescan.
pub fn load_or_scan(root: &Path, scanner: &Scanner) -> crate::Result<Vec<PackageModel>> {
    if let Some(models) = load_cache(root)? {
        return Ok(models);
    }

    let models = scanner.scan(root)?;

    let cache = root.join(CACHE_FILE);
    if let Err(e) = fs::write(&cache, serde_json::to_string(&models)?) {
        log::warn!("failed to write {}: {}", path_must_str(&cache), e);
    }

    Ok(models)
}
