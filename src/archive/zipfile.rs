//! Native ZIP backend (`zip` crate).

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};

use zip::ZipArchive;

use super::{safe_destination, ArchiveAccess, ArchiveEntry};
use crate::error::ExtractError;

pub struct ZipArchiveFile {
    path: PathBuf,
}

impl ZipArchiveFile {
    /// Open and validate the central directory.
    pub fn open(path: &Path) -> Result<Self, ExtractError> {
        let archive = Self {
            path: path.to_path_buf(),
        };
        archive.reader()?;
        Ok(archive)
    }

    fn reader(&self) -> Result<ZipArchive<BufReader<File>>, ExtractError> {
        let file = File::open(&self.path)?;
        ZipArchive::new(BufReader::new(file)).map_err(|e| self.corrupt(e))
    }

    fn corrupt(&self, err: impl std::fmt::Display) -> ExtractError {
        ExtractError::Corrupt {
            path: self.path.clone(),
            message: err.to_string(),
        }
    }
}

impl ArchiveAccess for ZipArchiveFile {
    fn path(&self) -> &Path {
        &self.path
    }

    fn list_files(&self) -> Result<Vec<ArchiveEntry>, ExtractError> {
        let mut archive = self.reader()?;

        let mut files = Vec::with_capacity(archive.len());
        for i in 0..archive.len() {
            let file = archive.by_index_raw(i).map_err(|e| self.corrupt(e))?;
            if !file.is_dir() {
                files.push(ArchiveEntry {
                    path: file.name().to_string(),
                    size: file.size(),
                });
            }
        }

        Ok(files)
    }

    fn extract_paths(&self, paths: &[String], dest: &Path) -> Result<(), ExtractError> {
        if paths.is_empty() {
            return Ok(());
        }

        let mut archive = self.reader()?;
        let index: HashMap<String, usize> = (0..archive.len())
            .filter_map(|i| {
                archive
                    .by_index_raw(i)
                    .ok()
                    .map(|f| (f.name().to_string(), i))
            })
            .collect();

        let mut missing = Vec::new();
        for wanted in paths {
            let (Some(&i), Some(target)) = (index.get(wanted), safe_destination(dest, wanted))
            else {
                missing.push(wanted.clone());
                continue;
            };

            let mut entry = archive.by_index(i).map_err(|e| self.corrupt(e))?;
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            let mut out = File::create(&target)?;
            io::copy(&mut entry, &mut out).map_err(|e| self.corrupt(e))?;
        }

        if missing.is_empty() {
            Ok(())
        } else {
            Err(ExtractError::MissingPaths {
                path: self.path.clone(),
                missing,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::fixtures::write_zip;
    use anyhow::Result;
    use tempfile::tempdir;

    #[test]
    fn test_list_zip_archive() -> Result<()> {
        let dir = tempdir()?;
        let zip_path = dir.path().join("test.zip");
        write_zip(&zip_path, &[("file1.txt", b"hello"), ("subdir/file2.txt", b"world!!")])?;

        let archive = ZipArchiveFile::open(&zip_path)?;
        let entries = archive.list_files()?;
        assert_eq!(
            entries,
            vec![
                ArchiveEntry { path: "file1.txt".into(), size: 5 },
                ArchiveEntry { path: "subdir/file2.txt".into(), size: 7 },
            ]
        );
        Ok(())
    }

    #[test]
    fn test_extract_selected_paths() -> Result<()> {
        let dir = tempdir()?;
        let zip_path = dir.path().join("test.zip");
        write_zip(&zip_path, &[("Data/test.esp", b"TES4"), ("readme.txt", b"hi")])?;

        let out = dir.path().join("out");
        let archive = ZipArchiveFile::open(&zip_path)?;
        archive.extract_paths(&["Data/test.esp".to_string()], &out)?;

        assert_eq!(fs::read(out.join("Data/test.esp"))?, b"TES4");
        assert!(!out.join("readme.txt").exists());
        Ok(())
    }

    #[test]
    fn test_extract_reports_missing() -> Result<()> {
        let dir = tempdir()?;
        let zip_path = dir.path().join("test.zip");
        write_zip(&zip_path, &[("a.txt", b"a")])?;

        let archive = ZipArchiveFile::open(&zip_path)?;
        let err = archive
            .extract_paths(&["a.txt".to_string(), "b.txt".to_string()], dir.path())
            .unwrap_err();
        match err {
            ExtractError::MissingPaths { missing, .. } => assert_eq!(missing, vec!["b.txt"]),
            other => panic!("expected MissingPaths, got {other:?}"),
        }
        Ok(())
    }

    #[test]
    fn test_corrupt_zip() -> Result<()> {
        let dir = tempdir()?;
        let zip_path = dir.path().join("broken.zip");
        fs::write(&zip_path, b"PK\x03\x04 definitely not a zip")?;
        assert!(matches!(
            ZipArchiveFile::open(&zip_path),
            Err(ExtractError::Corrupt { .. })
        ));
        Ok(())
    }
}
