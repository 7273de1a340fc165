//! Load order validation.
//!
//! Takes plugins in their intended load order and reports:
//! - masters that are not present at all (`missing_master`, error)
//! - masters that load after the plugin that needs them (`wrong_order`, error)
//! - the same plugin listed more than once (`duplicate_plugin`, warning)
//!
//! Plugins whose header could not be decoded are still checked for
//! duplicates but contribute no dependency edges.
//!
//! # Example
//!
//! ```ignore
//! use modlens::load_order::{analyze_load_order, PluginFile};
//!
//! let report = analyze_load_order(&plugins);
//! println!("{} errors", report.stats.error_count);
//! ```

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::debug;
use walkdir::WalkDir;

use crate::paths::{self, plugin_key};
use crate::plugin::PluginHeader;

/// One entry in a load-order analysis request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginFile {
    pub filename: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub header: Option<PluginHeader>,
}

impl PluginFile {
    pub fn new(filename: impl Into<String>, header: Option<PluginHeader>) -> Self {
        Self {
            filename: filename.into(),
            header,
        }
    }

    fn masters(&self) -> &[String] {
        self.header.as_ref().map(|h| h.masters.as_slice()).unwrap_or(&[])
    }

    /// Light if flagged or named .esl
    pub fn is_light(&self) -> bool {
        self.header.as_ref().map(|h| h.flags.is_light).unwrap_or(false)
            || paths::extension(&self.filename).as_deref() == Some("esl")
    }

    /// Master if flagged or named .esm
    pub fn is_master(&self) -> bool {
        self.header.as_ref().map(|h| h.flags.is_master).unwrap_or(false)
            || paths::extension(&self.filename).as_deref() == Some("esm")
    }
}

/// Kind of load-order defect. Declaration order is the tie-break order
/// for issues on the same plugin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueType {
    MissingMaster,
    WrongOrder,
    DuplicatePlugin,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueSeverity {
    Error,
    Warning,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadOrderIssue {
    #[serde(rename = "type")]
    pub issue_type: IssueType,
    pub severity: IssueSeverity,
    pub plugin: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub related_plugin: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadOrderStats {
    pub total_plugins: usize,
    pub esm_count: usize,
    pub esp_count: usize,
    pub esl_count: usize,
    pub error_count: usize,
    pub warning_count: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadOrderReport {
    pub issues: Vec<LoadOrderIssue>,
    pub stats: LoadOrderStats,
    /// plugin key -> masters as declared
    pub dependency_graph: BTreeMap<String, Vec<String>>,
}

impl LoadOrderReport {
    pub fn has_errors(&self) -> bool {
        self.stats.error_count > 0
    }

    /// Issues attached to one plugin (case-insensitive).
    pub fn issues_for<'a>(&'a self, plugin: &'a str) -> impl Iterator<Item = &'a LoadOrderIssue> {
        let key = plugin_key(plugin);
        self.issues.iter().filter(move |i| plugin_key(&i.plugin) == key)
    }
}

/// Analyze plugins in load order (index = load position).
pub fn analyze_load_order(plugins: &[PluginFile]) -> LoadOrderReport {
    // First occurrence of each key defines position and edges
    let mut first_index: HashMap<String, usize> = HashMap::new();
    for (index, plugin) in plugins.iter().enumerate() {
        first_index.entry(plugin_key(&plugin.filename)).or_insert(index);
    }

    let mut dependency_graph = BTreeMap::new();
    for (index, plugin) in plugins.iter().enumerate() {
        let key = plugin_key(&plugin.filename);
        if first_index.get(&key) == Some(&index) {
            dependency_graph.insert(key, plugin.masters().to_vec());
        }
    }

    let mut issues: Vec<(usize, LoadOrderIssue)> = Vec::new();

    for (index, plugin) in plugins.iter().enumerate() {
        let first = first_index[&plugin_key(&plugin.filename)];

        if first != index {
            let original = &plugins[first].filename;
            issues.push((
                index,
                LoadOrderIssue {
                    issue_type: IssueType::DuplicatePlugin,
                    severity: IssueSeverity::Warning,
                    plugin: plugin.filename.clone(),
                    related_plugin: Some(original.clone()),
                    message: format!(
                        "{} is listed more than once (first at position {}, again at {})",
                        plugin.filename, first, index
                    ),
                },
            ));
        }

        // Every declared master of every entry, duplicates included. A
        // master's position is that of its first occurrence.
        for master in plugin.masters() {
            match first_index.get(&plugin_key(master)) {
                None => issues.push((
                    index,
                    LoadOrderIssue {
                        issue_type: IssueType::MissingMaster,
                        severity: IssueSeverity::Error,
                        plugin: plugin.filename.clone(),
                        related_plugin: Some(master.clone()),
                        message: format!(
                            "{} requires {}, which is not in the load order",
                            plugin.filename, master
                        ),
                    },
                )),
                Some(&master_index) if master_index > index => issues.push((
                    index,
                    LoadOrderIssue {
                        issue_type: IssueType::WrongOrder,
                        severity: IssueSeverity::Error,
                        plugin: plugin.filename.clone(),
                        related_plugin: Some(master.clone()),
                        message: format!(
                            "{} (position {}) loads before its master {} (position {})",
                            plugin.filename, index, master, master_index
                        ),
                    },
                )),
                Some(_) => {}
            }
        }
    }

    // Stable: keeps master declaration order within (position, type)
    issues.sort_by_key(|(index, issue)| (*index, issue.issue_type));
    let issues: Vec<LoadOrderIssue> = issues.into_iter().map(|(_, issue)| issue).collect();

    let mut stats = LoadOrderStats {
        total_plugins: plugins.len(),
        ..LoadOrderStats::default()
    };
    for plugin in plugins {
        if plugin.is_light() {
            stats.esl_count += 1;
        } else if plugin.is_master() {
            stats.esm_count += 1;
        } else {
            stats.esp_count += 1;
        }
    }
    for issue in &issues {
        match issue.severity {
            IssueSeverity::Error => stats.error_count += 1,
            IssueSeverity::Warning => stats.warning_count += 1,
        }
    }

    debug!(
        "Load order: {} plugins, {} errors, {} warnings",
        stats.total_plugins, stats.error_count, stats.warning_count
    );

    LoadOrderReport {
        issues,
        stats,
        dependency_graph,
    }
}

/// Discover all plugins in a directory.
///
/// Looks at the directory itself and one level of mod folders below it.
/// Returns unique plugin filenames (case-insensitive), sorted by name.
pub fn discover_plugins(dir: &Path) -> Result<Vec<std::path::PathBuf>> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut plugins = Vec::new();

    for entry in WalkDir::new(dir)
        .min_depth(1)
        .max_depth(2)
        .into_iter()
        .filter_map(|e| e.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }

        let name = entry.file_name().to_string_lossy().to_string();
        if paths::is_plugin_file(&name) && seen.insert(plugin_key(&name)) {
            plugins.push(entry.path().to_path_buf());
        }
    }

    plugins.sort_by_key(|p| {
        p.file_name()
            .map(|n| plugin_key(&n.to_string_lossy()))
            .unwrap_or_default()
    });
    Ok(plugins)
}

/// Order plugin names the way the game does for unmanaged plugins:
/// `.esm` files first, then everything else, each group by name.
pub fn sort_masters_first(names: &mut [String]) {
    names.sort_by_key(|name| {
        let is_esm = paths::extension(name).as_deref() == Some("esm");
        (!is_esm, plugin_key(name))
    });
}

/// Parse a `plugins.txt` / `loadorder.txt` style list.
///
/// Blank lines and `#` comments are skipped. A leading `*` (enabled
/// marker) is stripped; with `enabled_only`, unmarked lines are skipped
/// too.
pub fn parse_plugin_list(content: &str, enabled_only: bool) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| match line.strip_prefix('*') {
            Some(name) => Some(name.trim().to_string()),
            None if enabled_only => None,
            None => Some(line.to_string()),
        })
        .filter(|name| !name.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::{PluginFlags, PluginHeader};

    fn header(filename: &str, masters: &[&str], is_master: bool) -> PluginHeader {
        PluginHeader {
            filename: filename.to_string(),
            flags: PluginFlags {
                is_master,
                ..PluginFlags::default()
            },
            masters: masters.iter().map(|m| m.to_string()).collect(),
            author: None,
            description: None,
            version: None,
            record_count: None,
        }
    }

    fn plugin(filename: &str, masters: &[&str]) -> PluginFile {
        let is_master = filename.to_lowercase().ends_with(".esm");
        PluginFile::new(filename, Some(header(filename, masters, is_master)))
    }

    #[test]
    fn test_missing_master_scenario() {
        let plugins = vec![
            plugin("Base.esm", &[]),
            plugin("Addon.esp", &["Base.esm"]),
            plugin("Patch.esp", &["Addon.esp", "Missing.esm"]),
        ];

        let report = analyze_load_order(&plugins);
        assert_eq!(report.issues.len(), 1);
        let issue = &report.issues[0];
        assert_eq!(issue.issue_type, IssueType::MissingMaster);
        assert_eq!(issue.severity, IssueSeverity::Error);
        assert_eq!(issue.plugin, "Patch.esp");
        assert_eq!(issue.related_plugin.as_deref(), Some("Missing.esm"));
        assert_eq!(report.stats.error_count, 1);
        assert_eq!(report.stats.warning_count, 0);
        assert!(report.issues.iter().all(|i| i.issue_type != IssueType::WrongOrder));
    }

    #[test]
    fn test_wrong_order_scenario() {
        let plugins = vec![plugin("Patch.esp", &["Base.esm"]), plugin("Base.esm", &[])];

        let report = analyze_load_order(&plugins);
        assert_eq!(report.issues.len(), 1);
        let issue = &report.issues[0];
        assert_eq!(issue.issue_type, IssueType::WrongOrder);
        assert_eq!(issue.plugin, "Patch.esp");
        assert_eq!(issue.related_plugin.as_deref(), Some("Base.esm"));
    }

    #[test]
    fn test_clean_load_order_has_no_issues() {
        let plugins = vec![
            plugin("Skyrim.esm", &[]),
            plugin("Update.esm", &["Skyrim.esm"]),
            plugin("Mod.esp", &["Skyrim.esm", "Update.esm"]),
            plugin("Patch.esp", &["Mod.esp"]),
        ];

        let report = analyze_load_order(&plugins);
        assert!(report.issues.is_empty());
        assert!(!report.has_errors());
        assert_eq!(report.stats.total_plugins, 4);
        assert_eq!(report.stats.esm_count, 2);
        assert_eq!(report.stats.esp_count, 2);
    }

    #[test]
    fn test_master_matching_is_case_insensitive() {
        let plugins = vec![plugin("SKYRIM.ESM", &[]), plugin("Mod.esp", &["skyrim.esm"])];
        let report = analyze_load_order(&plugins);
        assert!(report.issues.is_empty());
        assert_eq!(report.dependency_graph["mod.esp"], vec!["skyrim.esm"]);
    }

    #[test]
    fn test_duplicates_warn_per_extra_occurrence() {
        let plugins = vec![
            plugin("Mod.esp", &[]),
            plugin("mod.ESP", &[]),
            plugin("Other.esp", &[]),
            plugin("MOD.esp", &[]),
        ];

        let report = analyze_load_order(&plugins);
        let dups: Vec<_> = report
            .issues
            .iter()
            .filter(|i| i.issue_type == IssueType::DuplicatePlugin)
            .collect();
        assert_eq!(dups.len(), 2);
        assert_eq!(dups[0].plugin, "mod.ESP");
        assert_eq!(dups[1].plugin, "MOD.esp");
        assert!(dups.iter().all(|i| i.severity == IssueSeverity::Warning));
        assert!(dups.iter().all(|i| i.related_plugin.as_deref() == Some("Mod.esp")));
        assert_eq!(report.stats.warning_count, 2);
    }

    #[test]
    fn test_headerless_entries_only_checked_for_duplicates() {
        let plugins = vec![
            PluginFile::new("Broken.esp", None),
            PluginFile::new("broken.esp", None),
            plugin("Mod.esp", &["Broken.esp"]),
        ];

        let report = analyze_load_order(&plugins);
        assert_eq!(report.issues.len(), 1);
        assert_eq!(report.issues[0].issue_type, IssueType::DuplicatePlugin);
        assert_eq!(report.dependency_graph["broken.esp"], Vec::<String>::new());
    }

    #[test]
    fn test_issue_order_is_position_then_type() {
        let plugins = vec![
            plugin("A.esp", &["Later.esm", "Gone.esm", "Also Gone.esm"]),
            plugin("Later.esm", &[]),
            plugin("a.esp", &[]),
        ];

        let report = analyze_load_order(&plugins);
        let kinds: Vec<_> = report
            .issues
            .iter()
            .map(|i| (i.plugin.as_str(), i.issue_type, i.related_plugin.clone()))
            .collect();
        assert_eq!(
            kinds,
            vec![
                ("A.esp", IssueType::MissingMaster, Some("Gone.esm".to_string())),
                ("A.esp", IssueType::MissingMaster, Some("Also Gone.esm".to_string())),
                ("A.esp", IssueType::WrongOrder, Some("Later.esm".to_string())),
                ("a.esp", IssueType::DuplicatePlugin, Some("A.esp".to_string())),
            ]
        );
    }

    #[test]
    fn test_issue_plugins_refer_to_inputs() {
        let plugins = vec![
            plugin("X.esp", &["Y.esm", "Nope.esm"]),
            plugin("Y.esm", &[]),
            plugin("x.esp", &[]),
        ];
        let report = analyze_load_order(&plugins);
        for issue in &report.issues {
            assert!(plugins.iter().any(|p| p.filename == issue.plugin));
            if let Some(related) = &issue.related_plugin {
                let in_input = plugins.iter().any(|p| &p.filename == related);
                assert!(in_input || issue.issue_type == IssueType::MissingMaster);
            }
        }
    }

    #[test]
    fn test_repeated_and_self_masters() {
        let plugins = vec![plugin("Self.esp", &["Self.esp", "Gone.esm", "gone.esm"])];
        let report = analyze_load_order(&plugins);
        let related: Vec<_> = report
            .issues
            .iter()
            .map(|i| (i.issue_type, i.related_plugin.as_deref()))
            .collect();
        assert_eq!(
            related,
            vec![
                (IssueType::MissingMaster, Some("Gone.esm")),
                (IssueType::MissingMaster, Some("gone.esm")),
            ]
        );
        assert_eq!(report.stats.error_count, 2);
    }

    #[test]
    fn test_duplicate_entries_still_checked_for_masters() {
        let plugins = vec![
            plugin("Base.esm", &[]),
            plugin("Mod.esp", &[]),
            plugin("mod.esp", &["Missing.esm", "Late.esm"]),
            plugin("Late.esm", &[]),
        ];

        let report = analyze_load_order(&plugins);
        let issues: Vec<_> = report
            .issues_for("MOD.ESP")
            .map(|i| (i.plugin.as_str(), i.issue_type, i.related_plugin.as_deref()))
            .collect();
        assert_eq!(
            issues,
            vec![
                ("mod.esp", IssueType::MissingMaster, Some("Missing.esm")),
                ("mod.esp", IssueType::WrongOrder, Some("Late.esm")),
                ("mod.esp", IssueType::DuplicatePlugin, Some("Mod.esp")),
            ]
        );
        // Graph edges come from the first occurrence
        assert_eq!(report.dependency_graph["mod.esp"], Vec::<String>::new());
        assert_eq!(report.issues_for("Base.esm").count(), 0);
    }

    #[test]
    fn test_stats_classification() {
        let mut light = header("Flagged.esp", &[], false);
        light.flags.is_light = true;
        let plugins = vec![
            PluginFile::new("Skyrim.esm", None),
            PluginFile::new("Tiny.esl", None),
            PluginFile::new("Flagged.esp", Some(light)),
            PluginFile::new("Flagged Master.esp", Some(header("Flagged Master.esp", &[], true))),
            PluginFile::new("Plain.esp", None),
        ];
        let stats = analyze_load_order(&plugins).stats;
        assert_eq!(stats.total_plugins, 5);
        assert_eq!(stats.esm_count, 2);
        assert_eq!(stats.esl_count, 2);
        assert_eq!(stats.esp_count, 1);
    }

    #[test]
    fn test_issue_serializes_type_field() {
        let plugins = vec![plugin("Patch.esp", &["Gone.esm"])];
        let report = analyze_load_order(&plugins);
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["issues"][0]["type"], "missing_master");
        assert_eq!(json["issues"][0]["relatedPlugin"], "Gone.esm");
        assert_eq!(json["stats"]["errorCount"], 1);
        assert_eq!(json["dependencyGraph"]["patch.esp"][0], "Gone.esm");
    }

    #[test]
    fn test_empty_input() {
        let report = analyze_load_order(&[]);
        assert!(report.issues.is_empty());
        assert_eq!(report.stats, LoadOrderStats::default());
    }

    #[test]
    fn test_discover_plugins_empty() {
        let temp = tempfile::tempdir().unwrap();
        let result = discover_plugins(temp.path()).unwrap();
        assert!(result.is_empty());
    }

    #[test]
    fn test_discover_plugins() {
        let temp = tempfile::tempdir().unwrap();

        std::fs::write(temp.path().join("Root.esm"), "").unwrap();

        let mod1 = temp.path().join("Mod1");
        std::fs::create_dir_all(&mod1).unwrap();
        std::fs::write(mod1.join("test1.esp"), "").unwrap();
        std::fs::write(mod1.join("test2.esm"), "").unwrap();

        let mod2 = temp.path().join("Mod2");
        std::fs::create_dir_all(&mod2).unwrap();
        std::fs::write(mod2.join("test3.esl"), "").unwrap();
        std::fs::write(mod2.join("TEST1.ESP"), "").unwrap(); // Same plugin, different case
        std::fs::write(mod2.join("readme.txt"), "").unwrap(); // Should be ignored

        let result = discover_plugins(temp.path()).unwrap();
        let names: Vec<String> = result
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_lowercase())
            .collect();
        assert_eq!(names, vec!["root.esm", "test1.esp", "test2.esm", "test3.esl"]);
    }

    #[test]
    fn test_sort_masters_first() {
        let mut names = vec![
            "b.esp".to_string(),
            "Z.esm".to_string(),
            "a.esl".to_string(),
            "A.esm".to_string(),
        ];
        sort_masters_first(&mut names);
        assert_eq!(names, vec!["A.esm", "Z.esm", "a.esl", "b.esp"]);
    }

    #[test]
    fn test_parse_plugin_list() {
        let content = "# generated\n*Base.esm\n\nDisabled.esp\n *Patch.esp \n*\n";
        assert_eq!(
            parse_plugin_list(content, true),
            vec!["Base.esm", "Patch.esp"]
        );
        assert_eq!(
            parse_plugin_list(content, false),
            vec!["Base.esm", "Disabled.esp", "Patch.esp"]
        );
    }
}
