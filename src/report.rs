//! Analysis request and report envelopes.
//!
//! These are the JSON shapes exchanged with whatever sits in front of the
//! engine (the CLI, or a request layer that caches results keyed by
//! [`fingerprint`]).

use std::collections::HashSet;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use xxhash_rust::xxh64::Xxh64;

use crate::conflict::ConflictReport;
use crate::error::{FailureKind, ValidationError};
use crate::games::GameType;
use crate::load_order::{LoadOrderReport, PluginFile};
use crate::manifest::FileEntry;
use crate::paths::plugin_key;

/// Minimum mods for a meaningful conflict analysis.
pub const MIN_MODS_FOR_CONFLICTS: usize = 2;

/// Where a mod's archive comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ModSource {
    #[serde(rename_all = "camelCase")]
    Nexus {
        game: GameType,
        mod_id: u64,
        file_id: u64,
    },
    Url { url: String },
    Local { path: PathBuf },
}

impl ModSource {
    /// Stable identity string (part of the request fingerprint).
    pub fn identity(&self) -> String {
        match self {
            ModSource::Nexus {
                game,
                mod_id,
                file_id,
            } => format!("nexus:{}:{}:{}", game.nexus_domain(), mod_id, file_id),
            ModSource::Url { url } => format!("url:{}", url),
            ModSource::Local { path } => format!("local:{}", path.display()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModRequest {
    #[serde(rename = "modID")]
    pub mod_id: String,
    pub mod_name: String,
    pub source: ModSource,
    /// Expected archive MD5 (lowercase hex)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub md5: Option<String>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestOptions {
    /// Hash every file (enables identical-content detection)
    #[serde(default)]
    pub compute_hashes: bool,
    /// Run conflict analysis (needs at least two mods)
    #[serde(default = "default_true")]
    pub conflicts: bool,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            compute_hashes: false,
            conflicts: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisRequest {
    /// Mods in install order; position is the conflict load order
    pub mods: Vec<ModRequest>,
    #[serde(default)]
    pub options: RequestOptions,
    /// Explicit plugin load order; unlisted plugins are appended
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugin_order: Option<Vec<String>>,
}

impl AnalysisRequest {
    pub fn new(mods: Vec<ModRequest>) -> Self {
        Self {
            mods,
            options: RequestOptions::default(),
            plugin_order: None,
        }
    }

    /// Reject malformed requests before any work starts.
    pub fn validate(&self, concurrency: usize) -> Result<(), ValidationError> {
        if self.mods.is_empty() {
            return Err(ValidationError::Empty);
        }

        if concurrency == 0 {
            return Err(ValidationError::ZeroConcurrency);
        }

        let mut seen = HashSet::new();
        for (index, m) in self.mods.iter().enumerate() {
            if m.mod_id.trim().is_empty() {
                return Err(ValidationError::EmptyModId(index));
            }
            if !seen.insert(m.mod_id.as_str()) {
                return Err(ValidationError::DuplicateModId(m.mod_id.clone()));
            }
        }

        if self.options.conflicts && self.mods.len() < MIN_MODS_FOR_CONFLICTS {
            return Err(ValidationError::TooFewMods {
                required: MIN_MODS_FOR_CONFLICTS,
                actual: self.mods.len(),
            });
        }

        Ok(())
    }
}

/// Stable cache key for a request.
///
/// Covers mod identities in request order (order changes load order and
/// therefore results) and every option that changes output.
pub fn fingerprint(request: &AnalysisRequest) -> String {
    let mut hasher = Xxh64::new(0);
    let mut field = |value: &str| {
        hasher.update(value.as_bytes());
        hasher.update(&[0]);
    };

    for m in &request.mods {
        field(&m.mod_id);
        field(&m.source.identity());
        field(m.md5.as_deref().unwrap_or(""));
    }
    field(if request.options.compute_hashes { "hash" } else { "nohash" });
    field(if request.options.conflicts { "conflicts" } else { "noconflicts" });
    match &request.plugin_order {
        Some(order) => {
            for plugin in order {
                field(&plugin_key(plugin));
            }
        }
        None => field("default-order"),
    }

    format!("{:016x}", hasher.digest())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModStatus {
    Ok,
    Failed,
    Cancelled,
}

/// Stage of a unit of work where a mod failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Resolve,
    Download,
    Verify,
    Extract,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModFailure {
    pub stage: Stage,
    pub kind: FailureKind,
    pub message: String,
}

/// Result of one unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModOutcome {
    #[serde(rename = "modID")]
    pub mod_id: String,
    pub mod_name: String,
    pub status: ModStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<ModFailure>,
    /// `None` unless the archive was read
    #[serde(default)]
    pub files: Option<Vec<FileEntry>>,
    #[serde(default)]
    pub plugins: Vec<PluginFile>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl ModOutcome {
    pub fn ok(
        request: &ModRequest,
        files: Vec<FileEntry>,
        plugins: Vec<PluginFile>,
        warnings: Vec<String>,
    ) -> Self {
        Self {
            mod_id: request.mod_id.clone(),
            mod_name: request.mod_name.clone(),
            status: ModStatus::Ok,
            failure: None,
            files: Some(files),
            plugins,
            warnings,
        }
    }

    pub fn failed(request: &ModRequest, failure: ModFailure) -> Self {
        let status = if failure.kind == FailureKind::Cancelled {
            ModStatus::Cancelled
        } else {
            ModStatus::Failed
        };
        Self {
            mod_id: request.mod_id.clone(),
            mod_name: request.mod_name.clone(),
            status,
            failure: Some(failure),
            files: None,
            plugins: Vec::new(),
            warnings: Vec::new(),
        }
    }

    /// Never started because the batch was cancelled.
    pub fn not_started(request: &ModRequest) -> Self {
        Self {
            mod_id: request.mod_id.clone(),
            mod_name: request.mod_name.clone(),
            status: ModStatus::Cancelled,
            failure: None,
            files: None,
            plugins: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == ModStatus::Ok
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisReport {
    pub fingerprint: String,
    /// One outcome per requested mod, in request order
    pub mods: Vec<ModOutcome>,
    pub load_order: LoadOrderReport,
    /// Absent when conflict analysis was not requested
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conflicts: Option<ConflictReport>,
    pub cancelled: bool,
}

impl AnalysisReport {
    pub fn failed_mods(&self) -> impl Iterator<Item = &ModOutcome> {
        self.mods.iter().filter(|m| m.status == ModStatus::Failed)
    }

    pub fn count(&self, status: ModStatus) -> usize {
        self.mods.iter().filter(|m| m.status == status).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local(id: &str) -> ModRequest {
        ModRequest {
            mod_id: id.to_string(),
            mod_name: format!("Mod {id}"),
            source: ModSource::Local {
                path: PathBuf::from(format!("/mods/{id}.zip")),
            },
            md5: None,
        }
    }

    #[test]
    fn test_validate() {
        assert_eq!(AnalysisRequest::new(vec![]).validate(4), Err(ValidationError::Empty));
        assert_eq!(
            AnalysisRequest::new(vec![local("a")]).validate(4),
            Err(ValidationError::TooFewMods { required: 2, actual: 1 })
        );
        assert_eq!(
            AnalysisRequest::new(vec![local("a"), local("a")]).validate(4),
            Err(ValidationError::DuplicateModId("a".into()))
        );
        assert_eq!(
            AnalysisRequest::new(vec![local("a"), local(" ")]).validate(4),
            Err(ValidationError::EmptyModId(1))
        );
        assert_eq!(
            AnalysisRequest::new(vec![local("a"), local("b")]).validate(0),
            Err(ValidationError::ZeroConcurrency)
        );
        assert!(AnalysisRequest::new(vec![local("a"), local("b")]).validate(1).is_ok());

        let mut single = AnalysisRequest::new(vec![local("a")]);
        single.options.conflicts = false;
        assert!(single.validate(1).is_ok());
    }

    #[test]
    fn test_fingerprint_stable_and_sensitive() {
        let request = AnalysisRequest::new(vec![local("a"), local("b")]);
        assert_eq!(fingerprint(&request), fingerprint(&request.clone()));
        assert_eq!(fingerprint(&request).len(), 16);

        let mut hashed = request.clone();
        hashed.options.compute_hashes = true;
        assert_ne!(fingerprint(&request), fingerprint(&hashed));

        let reordered = AnalysisRequest::new(vec![local("b"), local("a")]);
        assert_ne!(fingerprint(&request), fingerprint(&reordered));

        let mut ordered = request.clone();
        ordered.plugin_order = Some(vec!["A.esp".into()]);
        let mut ordered_case = request.clone();
        ordered_case.plugin_order = Some(vec!["a.ESP".into()]);
        assert_ne!(fingerprint(&request), fingerprint(&ordered));
        assert_eq!(fingerprint(&ordered), fingerprint(&ordered_case));
    }

    #[test]
    fn test_request_from_json() {
        let json = r#"{
            "mods": [
                {"modID": "1", "modName": "SkyUI", "source": {"type": "nexus", "game": "skyrimse", "modId": 12604, "fileId": 35407}},
                {"modID": "2", "modName": "Local", "source": {"type": "local", "path": "/tmp/x.7z"}, "md5": "abc"},
                {"modID": "3", "modName": "Web", "source": {"type": "url", "url": "https://example.com/m.zip"}}
            ],
            "pluginOrder": ["SkyUI_SE.esp"]
        }"#;
        let request: AnalysisRequest = serde_json::from_str(json).unwrap();
        assert_eq!(request.mods.len(), 3);
        assert_eq!(
            request.mods[0].source,
            ModSource::Nexus {
                game: GameType::SkyrimSE,
                mod_id: 12604,
                file_id: 35407
            }
        );
        assert_eq!(request.mods[1].md5.as_deref(), Some("abc"));
        assert!(request.options.conflicts);
        assert!(!request.options.compute_hashes);
        assert_eq!(request.plugin_order.as_ref().map(Vec::len), Some(1));
    }

    #[test]
    fn test_outcome_status_from_failure() {
        let failure = ModFailure {
            stage: Stage::Download,
            kind: FailureKind::Cancelled,
            message: "cancelled".into(),
        };
        assert_eq!(ModOutcome::failed(&local("a"), failure).status, ModStatus::Cancelled);

        let failure = ModFailure {
            stage: Stage::Resolve,
            kind: FailureKind::NotFound,
            message: "gone".into(),
        };
        let outcome = ModOutcome::failed(&local("a"), failure);
        assert_eq!(outcome.status, ModStatus::Failed);
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["status"], "failed");
        assert_eq!(json["failure"]["kind"], "not_found");
        assert_eq!(json["failure"]["stage"], "resolve");
        assert!(json["files"].is_null());
    }
}
