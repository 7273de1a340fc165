//! 7z binary backend for 7z and RAR archives.
//!
//! # 7z Commands Reference
//!
//! - List files: `7zz l -slt -ba archive.7z`
//!   - `-slt`: Technical listing (key=value format)
//!   - `-ba`: Bare output (no headers)
//!
//! - Extract to directory: `7zz x -o/output/dir archive.7z "path/in/archive"`
//!   - `-y`: Yes to all prompts
//!   - `-aoa`: Overwrite all existing files
//!   - `-spd`: Disable wildcard matching
//!
//! The binary is looked up as `bin/7zz` next to the executable, then
//! `7zz` or `7z` on `PATH`.

use std::collections::HashMap;
use std::fs;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::debug;

use super::{check_extracted, ArchiveAccess, ArchiveEntry};
use crate::error::ExtractError;

/// Paths passed per 7z invocation, keeps the command line bounded.
const EXTRACT_BATCH: usize = 256;

/// Get the path to the 7z binary.
pub fn get_7z_path() -> Option<PathBuf> {
    if let Ok(exe_path) = std::env::current_exe() {
        if let Some(exe_dir) = exe_path.parent() {
            for candidate in ["bin/7zz", "bin/7z.exe", "7zz"] {
                let bin_path = exe_dir.join(candidate);
                if bin_path.is_file() {
                    return Some(bin_path);
                }
            }
        }
    }

    which::which("7zz").or_else(|_| which::which("7z")).ok()
}

pub struct SevenZipArchive {
    path: PathBuf,
    binary: PathBuf,
}

impl SevenZipArchive {
    pub fn open(path: &Path) -> Result<Self, ExtractError> {
        let binary = get_7z_path().ok_or(ExtractError::SevenZipMissing)?;
        Ok(Self {
            path: path.to_path_buf(),
            binary,
        })
    }

    fn failed(&self, stderr: &[u8]) -> ExtractError {
        ExtractError::Corrupt {
            path: self.path.clone(),
            message: String::from_utf8_lossy(stderr).trim().to_string(),
        }
    }
}

impl ArchiveAccess for SevenZipArchive {
    fn path(&self) -> &Path {
        &self.path
    }

    fn list_files(&self) -> Result<Vec<ArchiveEntry>, ExtractError> {
        let output = Command::new(&self.binary)
            .arg("l") // List
            .arg("-slt") // Technical listing format (key=value)
            .arg("-ba") // Bare output (no headers)
            .arg("-scsUTF-8") // Force UTF-8 charset for filenames
            .arg(&self.path)
            .output()?;

        if !output.status.success() {
            return Err(self.failed(&output.stderr));
        }

        Ok(parse_7z_list(&output.stdout))
    }

    fn extract_paths(&self, paths: &[String], dest: &Path) -> Result<(), ExtractError> {
        if paths.is_empty() {
            return Ok(());
        }

        fs::create_dir_all(dest)?;

        for batch in paths.chunks(EXTRACT_BATCH) {
            let mut cmd = Command::new(&self.binary);
            cmd.arg("x") // Extract with full paths
                .arg("-y")
                .arg("-aoa")
                .arg("-spd")
                .arg("-scsUTF-8")
                .arg(format!("-o{}", dest.display()))
                .arg(&self.path)
                .arg("--");
            for file in batch {
                cmd.arg(file);
            }

            debug!("7z extracting {} files from {}", batch.len(), self.path.display());
            let output = cmd.output()?;
            if !output.status.success() {
                return Err(self.failed(&output.stderr));
            }
        }

        check_extracted(&self.path, paths, dest)
    }
}

/// Parse 7z technical listing output into entries (directories skipped).
fn parse_7z_list(output: &[u8]) -> Vec<ArchiveEntry> {
    let mut entries = Vec::new();
    let mut current: HashMap<String, String> = HashMap::new();

    let mut flush = |current: &mut HashMap<String, String>| {
        if let Some(path) = current.get("Path") {
            let is_dir = current.get("Folder").map(|v| v == "+").unwrap_or(false)
                || current
                    .get("Attributes")
                    .map(|a| a.starts_with('D'))
                    .unwrap_or(false);
            let size = current
                .get("Size")
                .and_then(|s| s.parse::<u64>().ok())
                .unwrap_or(0);

            if !is_dir && !path.is_empty() {
                entries.push(ArchiveEntry {
                    path: path.clone(),
                    size,
                });
            }
        }
        current.clear();
    };

    for line in BufReader::new(output).lines().map_while(Result::ok) {
        let line = line.trim();

        if line.is_empty() {
            flush(&mut current);
        } else if let Some((key, value)) = line.split_once(" = ") {
            current.insert(key.to_string(), value.to_string());
        }
    }

    // Last entry if no trailing blank line
    flush(&mut current);

    entries
}
