//! Error taxonomy.
//!
//! Decode, extraction and acquisition errors are local to one plugin or one
//! mod and get folded into a degraded result. Validation errors are the only
//! ones that abort a whole analysis run.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Plugin header decoding failure.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("truncated plugin header: needed {needed} bytes at offset {offset}, {available} available")]
    Truncated {
        offset: usize,
        needed: usize,
        available: usize,
    },

    #[error("not a plugin file: unknown record marker {found:?}")]
    UnknownMarker { found: String },

    #[error("subrecord {signature} at offset {offset} claims {size} bytes, only {remaining} left")]
    SubrecordOverflow {
        signature: String,
        offset: usize,
        size: usize,
        remaining: usize,
    },

    #[error("header record of {size} bytes exceeds the {limit} byte limit")]
    RecordTooLarge { size: u64, limit: u64 },

    #[error("failed to read plugin: {0}")]
    Io(#[from] std::io::Error),
}

/// Archive listing/extraction failure for one mod.
#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("archive not found: {0}")]
    NotFound(PathBuf),

    #[error("unsupported archive format: {0}")]
    UnsupportedFormat(PathBuf),

    #[error("7z binary not found; install p7zip or place 7zz in bin/")]
    SevenZipMissing,

    #[error("failed to read archive {path}: {message}")]
    Corrupt { path: PathBuf, message: String },

    #[error("paths missing from archive {path}: {missing:?}")]
    MissingPaths { path: PathBuf, missing: Vec<String> },

    #[error("archive I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Remote fetch / catalog failure for one mod.
#[derive(Debug, thiserror::Error)]
pub enum AcquireError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("access restricted: {0}")]
    AccessRestricted(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("no catalog configured for {0}")]
    CatalogUnavailable(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("download exceeds size limit ({actual} > {limit} bytes)")]
    TooLarge { limit: u64, actual: u64 },

    #[error("checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("cancelled")]
    Cancelled,

    #[error("download I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl AcquireError {
    /// Category surfaced to callers.
    pub fn kind(&self) -> FailureKind {
        match self {
            AcquireError::NotFound(_) => FailureKind::NotFound,
            AcquireError::AccessRestricted(_) => FailureKind::AccessRestricted,
            AcquireError::RateLimited(_) => FailureKind::RateLimited,
            AcquireError::CatalogUnavailable(_) => FailureKind::CatalogUnavailable,
            AcquireError::Network(_) => FailureKind::Network,
            AcquireError::TooLarge { .. } => FailureKind::TooLarge,
            AcquireError::ChecksumMismatch { .. } => FailureKind::ChecksumMismatch,
            AcquireError::Cancelled => FailureKind::Cancelled,
            AcquireError::Io(_) => FailureKind::Io,
        }
    }

    /// Whether retrying the same request can help.
    pub fn is_transient(&self) -> bool {
        matches!(self, AcquireError::Network(_))
    }
}

impl From<reqwest::Error> for AcquireError {
    fn from(e: reqwest::Error) -> Self {
        AcquireError::Network(e.to_string())
    }
}

/// Serializable failure category for a mod that could not be analyzed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    NotFound,
    AccessRestricted,
    RateLimited,
    CatalogUnavailable,
    Network,
    TooLarge,
    ChecksumMismatch,
    Cancelled,
    Io,
    Extraction,
}

/// Request rejected before any work starts.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("request contains no mods")]
    Empty,

    #[error("conflict analysis needs at least {required} mods, got {actual}")]
    TooFewMods { required: usize, actual: usize },

    #[error("duplicate mod id in request: {0}")]
    DuplicateModId(String),

    #[error("mod at position {0} has an empty id")]
    EmptyModId(usize),

    #[error("concurrency must be at least 1")]
    ZeroConcurrency,
}

/// Invalid runtime configuration.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("concurrency must be at least 1")]
    ZeroConcurrency,

    #[error("maximum archive size must be greater than zero")]
    ZeroArchiveLimit,

    #[error("temp directory is not a directory: {0}")]
    TempDirNotDirectory(PathBuf),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_error_kinds() {
        assert_eq!(
            AcquireError::RateLimited("429".into()).kind(),
            FailureKind::RateLimited
        );
        assert_eq!(
            AcquireError::AccessRestricted("403".into()).kind(),
            FailureKind::AccessRestricted
        );
        assert_eq!(AcquireError::Cancelled.kind(), FailureKind::Cancelled);
        assert!(AcquireError::Network("reset".into()).is_transient());
        assert!(!AcquireError::NotFound("gone".into()).is_transient());
    }

    #[test]
    fn test_failure_kind_serializes_snake_case() {
        let json = serde_json::to_string(&FailureKind::AccessRestricted).unwrap();
        assert_eq!(json, "\"access_restricted\"");
    }
}
