//! File manifest extraction.
//!
//! Turns an archive listing into a normalized manifest: paths are
//! lowercased, forward-slashed and made relative to the mod's content
//! root (wrapper folders and a top-level `Data/` are stripped, installer
//! metadata is dropped). Optionally every file is extracted to a scratch
//! directory and hashed.

mod content;

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::archive::{safe_destination, ArchiveAccess, ArchiveEntry};
use crate::error::ExtractError;
use crate::hash::compute_file_hash;
use crate::paths::normalize_archive_path;

pub use content::find_content_root;

/// One file in a mod's manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileEntry {
    /// Normalized, content-root-relative path
    pub path: String,
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
}

/// Files contributed by one mod at a given load order position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModManifest {
    #[serde(rename = "modID")]
    pub mod_id: String,
    pub mod_name: String,
    pub load_order: usize,
    /// `None` when extraction failed
    pub files: Option<Vec<FileEntry>>,
}

impl ModManifest {
    pub fn new(mod_id: impl Into<String>, mod_name: impl Into<String>, load_order: usize) -> Self {
        Self {
            mod_id: mod_id.into(),
            mod_name: mod_name.into(),
            load_order,
            files: None,
        }
    }

    pub fn with_files(mut self, files: Vec<FileEntry>) -> Self {
        self.files = Some(files);
        self
    }

    pub fn file_count(&self) -> usize {
        self.files.as_ref().map(Vec::len).unwrap_or(0)
    }

    pub fn total_size(&self) -> u64 {
        self.files
            .as_ref()
            .map(|f| f.iter().map(|e| e.size).sum())
            .unwrap_or(0)
    }
}

/// A manifest entry together with the raw archive path it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestItem {
    /// Path as stored in the archive
    pub source: String,
    pub entry: FileEntry,
}

/// Normalize an archive listing into manifest items, sorted by path.
///
/// Paths that normalize to the same value keep the first listed entry.
pub fn plan_manifest(entries: &[ArchiveEntry]) -> Vec<ManifestItem> {
    // Entries that cannot be extracted safely are left out of both modes.
    let entries: Vec<&ArchiveEntry> = entries
        .iter()
        .filter(|e| {
            let safe = safe_destination(Path::new(""), &e.path).is_some();
            if !safe {
                warn!("Skipping unsafe archive path: {}", e.path);
            }
            safe
        })
        .collect();
    let normalized: Vec<String> = entries
        .iter()
        .map(|e| normalize_archive_path(&e.path))
        .collect();
    let root = find_content_root(&normalized);
    if !root.is_empty() {
        debug!("Content root: {}", root);
    }

    let mut seen: HashSet<&str> = HashSet::new();
    let mut items: Vec<ManifestItem> = Vec::new();

    for (entry, path) in entries.iter().zip(&normalized) {
        let Some(relative) = content::relative_to_root(path, &root) else {
            continue;
        };
        if !seen.insert(relative) {
            continue;
        }
        items.push(ManifestItem {
            source: entry.path.clone(),
            entry: FileEntry {
                path: relative.to_string(),
                size: entry.size,
                hash: None,
            },
        });
    }

    items.sort_by(|a, b| a.entry.path.cmp(&b.entry.path));
    items
}

/// Normalized manifest of a listing, without hashes.
pub fn build_manifest(entries: &[ArchiveEntry]) -> Vec<FileEntry> {
    plan_manifest(entries).into_iter().map(|i| i.entry).collect()
}

/// Reads archives into manifests.
#[derive(Debug, Clone, Default)]
pub struct ManifestExtractor {
    compute_hashes: bool,
    temp_dir: Option<PathBuf>,
}

impl ManifestExtractor {
    pub fn new(compute_hashes: bool) -> Self {
        Self {
            compute_hashes,
            temp_dir: None,
        }
    }

    /// Base directory for scratch extraction (system temp if unset).
    pub fn temp_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.temp_dir = dir;
        self
    }

    /// List, normalize and optionally hash.
    pub fn extract(&self, archive: &dyn ArchiveAccess) -> Result<Vec<ManifestItem>, ExtractError> {
        let entries = archive.list_files()?;
        let mut items = plan_manifest(&entries);

        if self.compute_hashes && !items.is_empty() {
            self.hash_items(archive, &mut items)?;
        }

        info!(
            "Manifest for {}: {} files{}",
            archive.path().display(),
            items.len(),
            if self.compute_hashes { " (hashed)" } else { "" }
        );
        Ok(items)
    }

    fn hash_items(
        &self,
        archive: &dyn ArchiveAccess,
        items: &mut [ManifestItem],
    ) -> Result<(), ExtractError> {
        // Removed on drop, including every error return below
        let scratch = scratch_dir(self.temp_dir.as_deref())?;

        let sources: Vec<String> = items.iter().map(|i| i.source.clone()).collect();
        archive.extract_paths(&sources, scratch.path())?;

        let archive_path = archive.path();
        items.par_iter_mut().try_for_each(|item| {
            let target = safe_destination(scratch.path(), &item.source).ok_or_else(|| {
                ExtractError::MissingPaths {
                    path: archive_path.to_path_buf(),
                    missing: vec![item.source.clone()],
                }
            })?;
            let hash = compute_file_hash(&target).map_err(|e| ExtractError::Corrupt {
                path: archive_path.to_path_buf(),
                message: format!("{:#}", e),
            })?;
            item.entry.hash = Some(hash);
            Ok(())
        })
    }
}

/// Create a scoped scratch directory.
pub fn scratch_dir(base: Option<&Path>) -> Result<tempfile::TempDir, ExtractError> {
    let mut builder = tempfile::Builder::new();
    builder.prefix("modlens-");
    let dir = match base {
        Some(base) => {
            std::fs::create_dir_all(base)?;
            builder.tempdir_in(base)?
        }
        None => builder.tempdir()?,
    };
    Ok(dir)
}

/// Manifest of one archive.
pub fn extract_manifest(
    archive: &dyn ArchiveAccess,
    compute_hashes: bool,
) -> Result<Vec<FileEntry>, ExtractError> {
    let items = ManifestExtractor::new(compute_hashes).extract(archive)?;
    Ok(items.into_iter().map(|i| i.entry).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::{fixtures::write_zip, open_archive};
    use crate::hash::compute_bytes_hash;
    use anyhow::Result;
    use tempfile::tempdir;

    fn entry(path: &str, size: u64) -> ArchiveEntry {
        ArchiveEntry {
            path: path.to_string(),
            size,
        }
    }

    #[test]
    fn test_build_manifest_normalizes() {
        let files = build_manifest(&[
            entry("Cool Mod\\Data\\Textures\\Armor.DDS", 10),
            entry("Cool Mod/Data/Cool.esp", 5),
            entry("Cool Mod/readme.txt", 1),
        ]);
        let paths: Vec<&str> = files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["cool.esp", "textures/armor.dds"]);
        assert_eq!(files[1].size, 10);
        assert!(files.iter().all(|f| f.hash.is_none()));
    }

    #[test]
    fn test_build_manifest_drops_fomod_and_dedupes() {
        let files = build_manifest(&[
            entry("fomod/ModuleConfig.xml", 1),
            entry("Option A/textures/x.dds", 2),
            entry("Option B/textures/x.dds", 3),
            entry("meshes/a.nif", 4),
            entry("MESHES\\A.NIF", 5),
        ]);
        let paths: Vec<(&str, u64)> = files.iter().map(|f| (f.path.as_str(), f.size)).collect();
        assert_eq!(
            paths,
            vec![
                ("meshes/a.nif", 4),
                ("option a/textures/x.dds", 2),
                ("option b/textures/x.dds", 3),
            ]
        );
    }

    #[test]
    fn test_unsafe_entries_left_out() {
        let files = build_manifest(&[
            entry("../evil.esp", 1),
            entry("Data/../../escape.dll", 2),
            entry("c:/windows/x.dll", 3),
            entry("Data\\Good.esp", 4),
            entry("Data/meshes/a.nif", 5),
        ]);
        let paths: Vec<&str> = files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["good.esp", "meshes/a.nif"]);
    }

    #[test]
    fn test_unsafe_entry_same_in_both_modes() -> Result<()> {
        let dir = tempdir()?;
        let zip_path = dir.path().join("mod.zip");
        write_zip(
            &zip_path,
            &[("../evil.esp", b"evil"), ("textures/a.dds", b"texture")],
        )?;

        let archive = open_archive(&zip_path)?;
        let listed = extract_manifest(archive.as_ref(), false)?;
        let hashed = extract_manifest(archive.as_ref(), true)?;
        let listed_paths: Vec<&str> = listed.iter().map(|f| f.path.as_str()).collect();
        let hashed_paths: Vec<&str> = hashed.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(listed_paths, vec!["textures/a.dds"]);
        assert_eq!(hashed_paths, listed_paths);
        assert!(hashed[0].hash.is_some());
        Ok(())
    }

    #[test]
    fn test_empty_listing() {
        assert!(build_manifest(&[]).is_empty());
    }

    #[test]
    fn test_extract_manifest_with_hashes() -> Result<()> {
        let dir = tempdir()?;
        let zip_path = dir.path().join("mod.zip");
        write_zip(
            &zip_path,
            &[
                ("MyMod v1/Data/Textures/a.dds", b"texture"),
                ("MyMod v1/Data/MyMod.esp", b"plugin"),
            ],
        )?;

        let archive = open_archive(&zip_path)?;
        let files = extract_manifest(archive.as_ref(), true)?;
        assert_eq!(files.len(), 2);
        assert_eq!(files[0].path, "mymod.esp");
        assert_eq!(files[0].hash.as_deref(), Some(compute_bytes_hash(b"plugin").as_str()));
        assert_eq!(files[1].path, "textures/a.dds");
        assert_eq!(files[1].hash.as_deref(), Some(compute_bytes_hash(b"texture").as_str()));
        Ok(())
    }

    #[test]
    fn test_scratch_dir_cleaned_up() -> Result<()> {
        let dir = tempdir()?;
        let zip_path = dir.path().join("mod.zip");
        write_zip(&zip_path, &[("meshes/a.nif", b"nif")])?;

        let scratch_base = dir.path().join("scratch");
        let archive = open_archive(&zip_path)?;
        let items = ManifestExtractor::new(true)
            .temp_dir(Some(scratch_base.clone()))
            .extract(archive.as_ref())?;
        assert_eq!(items[0].source, "meshes/a.nif");
        assert!(items[0].entry.hash.is_some());
        assert_eq!(std::fs::read_dir(&scratch_base)?.count(), 0);
        Ok(())
    }

    #[test]
    fn test_manifest_serializes_mod_id() -> Result<()> {
        let manifest = ModManifest::new("123", "Mod", 0).with_files(vec![FileEntry {
            path: "a.esp".into(),
            size: 1,
            hash: None,
        }]);
        let json = serde_json::to_value(&manifest)?;
        assert_eq!(json["modID"], "123");
        assert_eq!(json["loadOrder"], 0);
        assert!(json["files"][0].get("hash").is_none());
        assert_eq!(manifest.total_size(), 1);
        Ok(())
    }
}
