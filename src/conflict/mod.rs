//! File conflict analysis across mod manifests.
//!
//! A conflict is a normalized path shipped by two or more mods. The mod
//! with the highest load order wins (it is installed last); on equal load
//! order the mod later in the input wins. Conflicts whose sources all
//! carry the same content hash are reported as `info`, since nothing
//! actually changes whichever mod wins.

mod file_types;

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::manifest::{FileEntry, ModManifest};

pub use file_types::{classify, FileType, Severity};

/// Extra score per source beyond the second.
const SCORE_PER_EXTRA_SOURCE: u32 = 5;
const MAX_SOURCE_BONUS: u32 = 20;
const MAX_SCORE: u32 = 100;

/// One mod's copy of a conflicting path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictSource {
    #[serde(rename = "modID")]
    pub mod_id: String,
    pub mod_name: String,
    pub load_order: usize,
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conflict {
    pub path: String,
    pub file_type: FileType,
    pub severity: Severity,
    /// Ascending load order; the last entry is the winner
    pub sources: Vec<ConflictSource>,
    pub winner: ConflictSource,
    pub losers: Vec<ConflictSource>,
    pub is_identical: bool,
    pub score: u32,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModConflictSummary {
    #[serde(rename = "modID")]
    pub mod_id: String,
    pub mod_name: String,
    pub total_conflicts: usize,
    pub win_count: usize,
    pub lose_count: usize,
    pub critical_count: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeverityCounts {
    pub critical: usize,
    pub high: usize,
    pub medium: usize,
    pub low: usize,
    pub info: usize,
}

impl SeverityCounts {
    fn add(&mut self, severity: Severity) {
        match severity {
            Severity::Critical => self.critical += 1,
            Severity::High => self.high += 1,
            Severity::Medium => self.medium += 1,
            Severity::Low => self.low += 1,
            Severity::Info => self.info += 1,
        }
    }

    pub fn get(&self, severity: Severity) -> usize {
        match severity {
            Severity::Critical => self.critical,
            Severity::High => self.high,
            Severity::Medium => self.medium,
            Severity::Low => self.low,
            Severity::Info => self.info,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictStats {
    /// Unique paths across all manifests
    pub total_files: usize,
    pub total_conflicts: usize,
    pub identical_conflicts: usize,
    pub by_severity: SeverityCounts,
    pub mods_analyzed: usize,
    pub mods_without_manifest: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictReport {
    /// Severity (highest first), then path
    pub conflicts: Vec<Conflict>,
    /// Input order, only mods involved in a conflict
    pub mod_summaries: Vec<ModConflictSummary>,
    /// Every path to the mods providing it, in load order
    pub file_to_mods: BTreeMap<String, Vec<String>>,
    pub stats: ConflictStats,
}

impl ConflictReport {
    pub fn conflict(&self, path: &str) -> Option<&Conflict> {
        self.conflicts.iter().find(|c| c.path == path)
    }

    /// Conflicts at or above a severity.
    pub fn at_least(&self, severity: Severity) -> impl Iterator<Item = &Conflict> {
        self.conflicts.iter().filter(move |c| c.severity >= severity)
    }
}

/// Score for a conflict: severity floor plus a bonus for crowded paths.
pub fn conflict_score(severity: Severity, source_count: usize) -> u32 {
    let extra = source_count.saturating_sub(2) as u32;
    let bonus = (SCORE_PER_EXTRA_SOURCE * extra).min(MAX_SOURCE_BONUS);
    (severity.base_score() + bonus).min(MAX_SCORE)
}

fn source(manifest: &ModManifest, entry: &FileEntry) -> ConflictSource {
    ConflictSource {
        mod_id: manifest.mod_id.clone(),
        mod_name: manifest.mod_name.clone(),
        load_order: manifest.load_order,
        size: entry.size,
        hash: entry.hash.clone(),
    }
}

fn all_identical(sources: &[ConflictSource]) -> bool {
    let mut hashes = sources.iter().map(|s| s.hash.as_deref());
    match hashes.next() {
        Some(Some(first)) => hashes.all(|h| h == Some(first)),
        _ => false,
    }
}

fn describe(path: &str, sources: &[ConflictSource], winner: &ConflictSource, identical: bool) -> String {
    if identical {
        format!(
            "{} is identical in {} mods; {} is installed",
            path,
            sources.len(),
            winner.mod_name
        )
    } else {
        let losers: Vec<&str> = sources[..sources.len() - 1]
            .iter()
            .map(|s| s.mod_name.as_str())
            .collect();
        format!(
            "{} from {} overwrites {}",
            path,
            winner.mod_name,
            losers.join(", ")
        )
    }
}

/// Compute conflicts, winners and per-mod summaries.
///
/// Fewer than two manifests is not an error; the report is just empty of
/// conflicts.
pub fn analyze_conflicts(manifests: &[ModManifest]) -> ConflictReport {
    // Load order ascending, input position breaks ties
    let mut order: Vec<usize> = (0..manifests.len()).collect();
    order.sort_by_key(|&i| (manifests[i].load_order, i));

    let mut by_path: BTreeMap<&str, Vec<(usize, &FileEntry)>> = BTreeMap::new();
    for &index in &order {
        let Some(files) = &manifests[index].files else {
            continue;
        };
        let mut own: HashSet<&str> = HashSet::new();
        for entry in files {
            if own.insert(entry.path.as_str()) {
                by_path.entry(entry.path.as_str()).or_default().push((index, entry));
            }
        }
    }

    let mut conflicts = Vec::new();
    let mut file_to_mods = BTreeMap::new();
    // manifest index -> counts; ids are filled in afterwards
    let mut tallies: HashMap<usize, ModConflictSummary> = HashMap::new();
    let mut by_severity = SeverityCounts::default();
    let mut identical_conflicts = 0;

    for (path, providers) in &by_path {
        file_to_mods.insert(
            path.to_string(),
            providers
                .iter()
                .map(|(i, _)| manifests[*i].mod_id.clone())
                .collect(),
        );

        if providers.len() < 2 {
            continue;
        }

        let sources: Vec<ConflictSource> = providers
            .iter()
            .map(|(i, entry)| source(&manifests[*i], entry))
            .collect();
        let winner = sources[sources.len() - 1].clone();
        let losers = sources[..sources.len() - 1].to_vec();

        let (file_type, type_severity) = classify(path);
        let is_identical = all_identical(&sources);
        let severity = if is_identical {
            Severity::Info
        } else {
            type_severity
        };

        let winner_index = providers[providers.len() - 1].0;
        for (i, _) in providers {
            let tally = tallies.entry(*i).or_default();
            tally.total_conflicts += 1;
            if *i == winner_index {
                tally.win_count += 1;
            } else {
                tally.lose_count += 1;
            }
            if severity == Severity::Critical {
                tally.critical_count += 1;
            }
        }

        by_severity.add(severity);
        if is_identical {
            identical_conflicts += 1;
        }

        conflicts.push(Conflict {
            path: path.to_string(),
            file_type,
            severity,
            score: conflict_score(severity, sources.len()),
            message: describe(path, &sources, &winner, is_identical),
            sources,
            winner,
            losers,
            is_identical,
        });
    }

    conflicts.sort_by(|a, b| b.severity.cmp(&a.severity).then_with(|| a.path.cmp(&b.path)));

    let mod_summaries: Vec<ModConflictSummary> = (0..manifests.len())
        .filter_map(|i| {
            tallies.remove(&i).map(|tally| ModConflictSummary {
                mod_id: manifests[i].mod_id.clone(),
                mod_name: manifests[i].mod_name.clone(),
                ..tally
            })
        })
        .collect();

    let stats = ConflictStats {
        total_files: by_path.len(),
        total_conflicts: conflicts.len(),
        identical_conflicts,
        by_severity,
        mods_analyzed: manifests.len(),
        mods_without_manifest: manifests.iter().filter(|m| m.files.is_none()).count(),
    };

    debug!(
        "Conflicts: {} paths, {} conflicts ({} identical) across {} mods",
        stats.total_files, stats.total_conflicts, stats.identical_conflicts, stats.mods_analyzed
    );

    ConflictReport {
        conflicts,
        mod_summaries,
        file_to_mods,
        stats,
    }
}
