//! Archive access.
//!
//! Mod archives are read through the [`ArchiveAccess`] trait, which only
//! knows how to list files and extract a chosen set of them. ZIP archives
//! are handled natively with the `zip` crate; 7z and RAR go through the
//! 7z binary.
//!
//! The format is detected from magic bytes rather than the extension,
//! since mislabeled uploads (a RAR named `.zip`) are common.

pub mod sevenzip;
pub mod zipfile;

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::ExtractError;

pub use sevenzip::SevenZipArchive;
pub use zipfile::ZipArchiveFile;

/// Archive type detected by magic bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveType {
    /// PK signature
    Zip,
    /// 7z\xBC\xAF\x27\x1C
    SevenZ,
    /// Rar! (RAR4 and RAR5)
    Rar,
    Unknown,
}

impl ArchiveType {
    pub fn name(&self) -> &'static str {
        match self {
            ArchiveType::Zip => "zip",
            ArchiveType::SevenZ => "7z",
            ArchiveType::Rar => "rar",
            ArchiveType::Unknown => "unknown",
        }
    }
}

/// Detect archive type by reading magic bytes.
pub fn detect_archive_type(path: &Path) -> std::io::Result<ArchiveType> {
    let mut file = File::open(path)?;
    let mut magic = [0u8; 8];
    let mut read = 0;
    while read < magic.len() {
        let n = file.read(&mut magic[read..])?;
        if n == 0 {
            break;
        }
        read += n;
    }
    Ok(detect_from_magic(&magic[..read]))
}

fn detect_from_magic(magic: &[u8]) -> ArchiveType {
    if magic.len() < 4 {
        return ArchiveType::Unknown;
    }

    // ZIP: PK\x03\x04, PK\x05\x06 (empty) or PK\x07\x08 (spanned)
    if magic[0..2] == [0x50, 0x4B] {
        return ArchiveType::Zip;
    }

    if magic[0..4] == *b"Rar!" {
        return ArchiveType::Rar;
    }

    if magic.len() >= 6 && magic[0..6] == [0x37, 0x7A, 0xBC, 0xAF, 0x27, 0x1C] {
        return ArchiveType::SevenZ;
    }

    ArchiveType::Unknown
}

/// A file inside an archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    /// Path as stored in the archive (case-preserved, either separator)
    pub path: String,
    /// Uncompressed size in bytes
    pub size: u64,
}

/// List/extract capability over one archive.
///
/// Implementations must not write outside `dest` and must report every
/// requested path that could not be produced.
pub trait ArchiveAccess: Send {
    /// Archive on disk.
    fn path(&self) -> &Path;

    /// All file entries (directories excluded).
    fn list_files(&self) -> Result<Vec<ArchiveEntry>, ExtractError>;

    /// Extract the given entries (paths exactly as returned by
    /// `list_files`) under `dest`, keeping their relative layout.
    fn extract_paths(&self, paths: &[String], dest: &Path) -> Result<(), ExtractError>;
}

/// Open an archive with the backend matching its magic bytes.
pub fn open_archive(path: &Path) -> Result<Box<dyn ArchiveAccess>, ExtractError> {
    if !path.is_file() {
        return Err(ExtractError::NotFound(path.to_path_buf()));
    }

    let archive_type = detect_archive_type(path)?;
    debug!("Opening {} as {}", path.display(), archive_type.name());

    match archive_type {
        ArchiveType::Zip => Ok(Box::new(ZipArchiveFile::open(path)?)),
        ArchiveType::SevenZ | ArchiveType::Rar => Ok(Box::new(SevenZipArchive::open(path)?)),
        ArchiveType::Unknown => Err(ExtractError::UnsupportedFormat(path.to_path_buf())),
    }
}

/// Where an archive entry lands under `dest`, rejecting absolute paths
/// and `..` components.
pub(crate) fn safe_destination(dest: &Path, entry_path: &str) -> Option<PathBuf> {
    let mut out = dest.to_path_buf();
    let mut pushed = false;
    for part in entry_path.split(['/', '\\']) {
        match part {
            "" | "." => continue,
            ".." => return None,
            p if p.contains(':') => return None,
            p => {
                out.push(p);
                pushed = true;
            }
        }
    }
    pushed.then_some(out)
}

/// Compare requested paths with what actually exists under `dest`.
pub(crate) fn check_extracted(
    archive: &Path,
    paths: &[String],
    dest: &Path,
) -> Result<(), ExtractError> {
    let missing: Vec<String> = paths
        .iter()
        .filter(|p| {
            safe_destination(dest, p)
                .map(|target| !target.is_file())
                .unwrap_or(true)
        })
        .cloned()
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(ExtractError::MissingPaths {
            path: archive.to_path_buf(),
            missing,
        })
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use tempfile::tempdir;

    #[test]
    fn test_detect_from_magic() {
        assert_eq!(detect_from_magic(b"PK\x03\x04rest"), ArchiveType::Zip);
        assert_eq!(detect_from_magic(b"Rar!\x1A\x07\x01\x00"), ArchiveType::Rar);
        assert_eq!(
            detect_from_magic(&[0x37, 0x7A, 0xBC, 0xAF, 0x27, 0x1C, 0, 4]),
            ArchiveType::SevenZ
        );
        assert_eq!(detect_from_magic(b"TES4"), ArchiveType::Unknown);
        assert_eq!(detect_from_magic(b"PK"), ArchiveType::Unknown);
    }

    #[test]
    fn test_mislabeled_zip_detected() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("actually_zip.rar");
        fixtures::write_zip(&path, &[("a.txt", b"a")])?;
        assert_eq!(detect_archive_type(&path)?, ArchiveType::Zip);
        Ok(())
    }

    #[test]
    fn test_open_missing_archive() {
        let err = open_archive(Path::new("/nonexistent/mod.zip")).err().unwrap();
        assert!(matches!(err, ExtractError::NotFound(_)));
    }

    #[test]
    fn test_open_unknown_format() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, "just text")?;
        let err = open_archive(&path).err().unwrap();
        assert!(matches!(err, ExtractError::UnsupportedFormat(_)));
        Ok(())
    }

    #[test]
    fn test_safe_destination() {
        let dest = Path::new("/tmp/out");
        assert_eq!(
            safe_destination(dest, "Data\\Textures/x.dds"),
            Some(PathBuf::from("/tmp/out/Data/Textures/x.dds"))
        );
        assert_eq!(safe_destination(dest, "../escape.txt"), None);
        assert_eq!(safe_destination(dest, "C:/Windows/x.dll"), None);
        assert_eq!(safe_destination(dest, "/abs/file"), Some(PathBuf::from("/tmp/out/abs/file")));
        assert_eq!(safe_destination(dest, "./"), None);
    }
}
