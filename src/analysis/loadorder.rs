//! Load-order validation over a collection's plugins.
//!
//! Filename comparisons are case-insensitive throughout; `SKYRIM.ESM`
//! matches `Skyrim.esm`.

use super::IssueSeverity;
use crate::plugins::{PluginHeader, PluginKind};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};

/// One plugin at its position in the load order. A missing header means
/// the plugin could not be parsed and degrades to a filename-only entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginEntry {
    pub filename: String,
    pub header: Option<PluginHeader>,
}

impl PluginEntry {
    pub fn named(filename: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            header: None,
        }
    }

    pub fn parsed(header: PluginHeader) -> Self {
        Self {
            filename: header.filename.clone(),
            header: Some(header),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LoadOrderIssueType {
    MissingMaster,
    WrongOrder,
    DuplicatePlugin,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadOrderIssue {
    pub issue_type: LoadOrderIssueType,
    pub severity: IssueSeverity,
    pub plugin: String,
    pub related_plugin: Option<String>,
    /// Position of `plugin` in the load order.
    pub index: usize,
    pub message: String,
}

/// Per-plugin view in the report.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginSummary {
    pub filename: String,
    pub kind: PluginKind,
    pub index: usize,
    pub masters: Vec<String>,
    pub issue_count: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadOrderStats {
    pub total_plugins: usize,
    pub esm_count: usize,
    pub esp_count: usize,
    pub esl_count: usize,
    pub missing_masters: usize,
    pub wrong_order: usize,
    pub duplicates: usize,
    pub plugins_with_issues: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadOrderReport {
    pub plugins: Vec<PluginSummary>,
    pub issues: Vec<LoadOrderIssue>,
    /// Dependency graph: plugin -> its declared masters.
    pub graph: BTreeMap<String, Vec<String>>,
    pub stats: LoadOrderStats,
}

/// Validate an ordered plugin list against its declared masters.
pub fn analyze_load_order(entries: &[PluginEntry]) -> LoadOrderReport {
    // First occurrence of each filename, case-insensitively.
    let mut index_map: HashMap<String, usize> = HashMap::new();
    for (i, entry) in entries.iter().enumerate() {
        index_map.entry(entry.filename.to_lowercase()).or_insert(i);
    }

    let mut issues = Vec::new();
    let mut graph = BTreeMap::new();
    let mut seen: HashSet<String> = HashSet::new();

    for (i, entry) in entries.iter().enumerate() {
        let lower = entry.filename.to_lowercase();

        if !seen.insert(lower.clone()) {
            issues.push(LoadOrderIssue {
                issue_type: LoadOrderIssueType::DuplicatePlugin,
                severity: IssueSeverity::Error,
                plugin: entry.filename.clone(),
                related_plugin: Some(entries[index_map[&lower]].filename.clone()),
                index: i,
                message: format!("{} appears more than once in the load order", entry.filename),
            });
            // Master checks for the first occurrence already cover this file.
            continue;
        }

        let masters: Vec<String> = entry
            .header
            .as_ref()
            .map(|h| h.master_filenames().map(|m| m.to_string()).collect())
            .unwrap_or_default();

        for master in &masters {
            match index_map.get(&master.to_lowercase()) {
                None => issues.push(LoadOrderIssue {
                    issue_type: LoadOrderIssueType::MissingMaster,
                    severity: IssueSeverity::Error,
                    plugin: entry.filename.clone(),
                    related_plugin: Some(master.clone()),
                    index: i,
                    message: format!("{} requires {} which is not present", entry.filename, master),
                }),
                Some(&master_index) if master_index > i => issues.push(LoadOrderIssue {
                    issue_type: LoadOrderIssueType::WrongOrder,
                    severity: IssueSeverity::Error,
                    plugin: entry.filename.clone(),
                    related_plugin: Some(master.clone()),
                    index: i,
                    message: format!("{} loads before its master {}", entry.filename, master),
                }),
                Some(_) => {}
            }
        }

        graph.insert(entry.filename.clone(), masters);
    }

    let mut issue_counts: HashMap<&str, usize> = HashMap::new();
    for issue in &issues {
        *issue_counts.entry(issue.plugin.as_str()).or_default() += 1;
    }

    let plugins: Vec<PluginSummary> = entries
        .iter()
        .enumerate()
        .map(|(i, entry)| PluginSummary {
            kind: entry
                .header
                .as_ref()
                .map(|h| h.kind)
                .unwrap_or_else(|| PluginKind::from_filename(&entry.filename)),
            filename: entry.filename.clone(),
            index: i,
            masters: entry
                .header
                .as_ref()
                .map(|h| h.master_filenames().map(|m| m.to_string()).collect())
                .unwrap_or_default(),
            issue_count: issue_counts.get(entry.filename.as_str()).copied().unwrap_or(0),
        })
        .collect();

    let mut stats = LoadOrderStats {
        total_plugins: entries.len(),
        plugins_with_issues: issue_counts.len(),
        ..LoadOrderStats::default()
    };
    for plugin in &plugins {
        match plugin.kind {
            PluginKind::Esm => stats.esm_count += 1,
            PluginKind::Esp => stats.esp_count += 1,
            PluginKind::Esl => stats.esl_count += 1,
        }
    }
    for issue in &issues {
        match issue.issue_type {
            LoadOrderIssueType::MissingMaster => stats.missing_masters += 1,
            LoadOrderIssueType::WrongOrder => stats.wrong_order += 1,
            LoadOrderIssueType::DuplicatePlugin => stats.duplicates += 1,
        }
    }

    LoadOrderReport {
        plugins,
        issues,
        graph,
        stats,
    }
}
