//! File conflict detection across a collection's mods.
//!
//! The load order is the resolution policy: the last mod to install a path
//! wins. Conflicts are classified by file type, scored, and sorted so the
//! most actionable rows come first.

use super::rules::builtin_rules;
use super::Severity;
use crate::manifest::{FileEntry, FileType, ModManifest};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictType {
    Overwrite,
    Duplicate,
}

/// One mod's contribution to a conflicting path.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictSource {
    pub mod_id: String,
    pub mod_name: String,
    pub load_order: i32,
    pub size: u64,
    pub content_hash: Option<String>,
}

/// A path more than one mod would install.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conflict {
    pub path: String,
    pub conflict_type: ConflictType,
    pub severity: Severity,
    pub score: u8,
    pub file_type: FileType,
    /// Contributors sorted by load order ascending.
    pub sources: Vec<ConflictSource>,
    pub winner: ConflictSource,
    pub losers: Vec<ConflictSource>,
    pub is_identical: bool,
    pub matched_rules: Vec<String>,
    pub message: String,
}

/// Per-mod rollup of conflict involvement.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModConflictSummary {
    pub mod_id: String,
    pub mod_name: String,
    pub win_count: usize,
    pub lose_count: usize,
    pub critical_count: usize,
    pub high_count: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictStats {
    pub total_conflicts: usize,
    pub identical_conflicts: usize,
    pub critical_count: usize,
    pub high_count: usize,
    pub medium_count: usize,
    pub low_count: usize,
    pub info_count: usize,
    pub affected_mods: usize,
    pub total_files: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictReport {
    pub conflicts: Vec<Conflict>,
    pub mod_summaries: Vec<ModConflictSummary>,
    pub stats: ConflictStats,
    /// Conflicting path -> ids of the mods contributing to it.
    pub path_to_mods: BTreeMap<String, Vec<String>>,
}

fn severity_for(file_type: FileType, is_identical: bool) -> Severity {
    if is_identical {
        return Severity::Info;
    }
    match file_type {
        FileType::Plugin => Severity::Critical,
        FileType::Bsa | FileType::Script => Severity::High,
        FileType::Mesh | FileType::Texture | FileType::Interface => Severity::Medium,
        FileType::Sound | FileType::Seq | FileType::Other => Severity::Low,
    }
}

fn base_score(file_type: FileType) -> i32 {
    match file_type {
        FileType::Plugin => 90,
        FileType::Bsa => 75,
        FileType::Script => 70,
        FileType::Interface => 55,
        FileType::Mesh => 50,
        FileType::Texture => 45,
        FileType::Seq => 30,
        FileType::Sound => 25,
        FileType::Other => 20,
    }
}

fn score_conflict(
    path: &str,
    file_type: FileType,
    is_identical: bool,
    contributor_count: usize,
    mods: &[&str],
) -> (u8, Vec<String>) {
    let mut score = base_score(file_type);

    if is_identical {
        score = (score - 80).max(0);
    }

    if contributor_count > 2 {
        score += 5 * (contributor_count as i32 - 2);
    }

    let mut matched = Vec::new();
    for rule in builtin_rules() {
        if rule.matches(path, file_type, mods) {
            score += rule.bonus;
            matched.push(rule.id.to_string());
        }
    }

    (score.clamp(0, 100) as u8, matched)
}

fn conflict_message(path: &str, winner: &ConflictSource, losers: &[ConflictSource], is_identical: bool) -> String {
    if is_identical {
        format!(
            "{} mods install identical copies of {}",
            losers.len() + 1,
            path
        )
    } else if losers.len() == 1 {
        format!(
            "{} overwrites {} from {}",
            winner.mod_name, path, losers[0].mod_name
        )
    } else {
        format!(
            "{} overwrites {} from {} other mods",
            winner.mod_name,
            path,
            losers.len()
        )
    }
}

/// Detect and classify every path more than one manifest contributes.
pub fn analyze_conflicts(manifests: &[ModManifest]) -> ConflictReport {
    // Normalized path -> contributing (manifest, entry) pairs.
    let mut file_map: BTreeMap<&str, Vec<(&ModManifest, &FileEntry)>> = BTreeMap::new();
    let mut total_files = 0usize;

    for manifest in manifests {
        total_files += manifest.files.len();
        for entry in &manifest.files {
            file_map.entry(entry.path.as_str()).or_default().push((manifest, entry));
        }
    }

    let mut conflicts = Vec::new();
    let mut path_to_mods = BTreeMap::new();
    let mut summaries: HashMap<&str, ModConflictSummary> = HashMap::new();

    for (path, mut contributors) in file_map {
        if contributors.len() < 2 {
            continue;
        }

        contributors.sort_by_key(|(manifest, _)| manifest.load_order);

        let sources: Vec<ConflictSource> = contributors
            .iter()
            .map(|(manifest, entry)| ConflictSource {
                mod_id: manifest.mod_id.clone(),
                mod_name: manifest.mod_name.clone(),
                load_order: manifest.load_order,
                size: entry.size,
                content_hash: entry.content_hash.clone(),
            })
            .collect();

        let is_identical = sources
            .iter()
            .all(|s| s.content_hash.as_deref().is_some_and(|h| !h.is_empty()))
            && sources
                .windows(2)
                .all(|pair| pair[0].content_hash == pair[1].content_hash);

        let file_type = contributors[0].1.file_type;
        let severity = severity_for(file_type, is_identical);
        let conflict_type = if is_identical {
            ConflictType::Duplicate
        } else {
            ConflictType::Overwrite
        };

        let mod_names: Vec<&str> = sources.iter().map(|s| s.mod_id.as_str()).collect();
        let (score, matched_rules) =
            score_conflict(path, file_type, is_identical, sources.len(), &mod_names);

        let winner = sources.last().unwrap().clone();
        let losers: Vec<ConflictSource> = sources[..sources.len() - 1].to_vec();

        path_to_mods.insert(
            path.to_string(),
            sources.iter().map(|s| s.mod_id.clone()).collect(),
        );

        for (i, source) in sources.iter().enumerate() {
            let summary = summaries
                .entry(contributors[i].0.mod_id.as_str())
                .or_insert_with(|| ModConflictSummary {
                    mod_id: source.mod_id.clone(),
                    mod_name: source.mod_name.clone(),
                    win_count: 0,
                    lose_count: 0,
                    critical_count: 0,
                    high_count: 0,
                });

            if i == sources.len() - 1 {
                summary.win_count += 1;
            } else {
                summary.lose_count += 1;
            }
            match severity {
                Severity::Critical => summary.critical_count += 1,
                Severity::High => summary.high_count += 1,
                _ => {}
            }
        }

        let message = conflict_message(path, &winner, &losers, is_identical);

        conflicts.push(Conflict {
            path: path.to_string(),
            conflict_type,
            severity,
            score,
            file_type,
            sources,
            winner,
            losers,
            is_identical,
            matched_rules,
            message,
        });
    }

    conflicts.sort_by(|a, b| {
        a.severity
            .rank()
            .cmp(&b.severity.rank())
            .then(b.score.cmp(&a.score))
            .then(a.path.cmp(&b.path))
    });

    let mut stats = ConflictStats {
        total_conflicts: conflicts.len(),
        affected_mods: summaries.len(),
        total_files,
        ..ConflictStats::default()
    };
    for conflict in &conflicts {
        if conflict.is_identical {
            stats.identical_conflicts += 1;
        }
        match conflict.severity {
            Severity::Critical => stats.critical_count += 1,
            Severity::High => stats.high_count += 1,
            Severity::Medium => stats.medium_count += 1,
            Severity::Low => stats.low_count += 1,
            Severity::Info => stats.info_count += 1,
        }
    }

    let mut mod_summaries: Vec<ModConflictSummary> = summaries.into_values().collect();
    mod_summaries.sort_by(|a, b| {
        (b.critical_count + b.high_count)
            .cmp(&(a.critical_count + a.high_count))
            .then(a.mod_id.cmp(&b.mod_id))
    });

    ConflictReport {
        conflicts,
        mod_summaries,
        stats,
        path_to_mods,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::FileEntry;

    fn manifest(mod_id: &str, load_order: i32, files: Vec<FileEntry>) -> ModManifest {
        ModManifest {
            mod_id: mod_id.to_string(),
            mod_name: format!("Mod {}", mod_id),
            load_order,
            files,
        }
    }

    fn entry(path: &str, size: u64) -> FileEntry {
        FileEntry::new(path, size)
    }

    fn hashed(path: &str, size: u64, hash: &str) -> FileEntry {
        FileEntry::new(path, size).with_content_hash(hash.to_string())
    }

    #[test]
    fn test_identical_texture_duplicate() {
        let report = analyze_conflicts(&[
            manifest("A", 0, vec![hashed("textures/shared.dds", 1000, "abc123")]),
            manifest("B", 1, vec![hashed("textures/shared.dds", 1000, "abc123")]),
        ]);

        assert_eq!(report.conflicts.len(), 1);
        let conflict = &report.conflicts[0];
        assert_eq!(conflict.path, "textures/shared.dds");
        assert_eq!(conflict.conflict_type, ConflictType::Duplicate);
        assert_eq!(conflict.severity, Severity::Info);
        assert!(conflict.is_identical);
        assert_eq!(conflict.winner.mod_id, "B");
        assert_eq!(conflict.losers.len(), 1);
        assert_eq!(conflict.losers[0].mod_id, "A");
        assert_eq!(report.stats.identical_conflicts, 1);
    }

    #[test]
    fn test_plugin_overwrite_is_critical() {
        let report = analyze_conflicts(&[
            manifest("A", 0, vec![entry("plugin.esp", 100)]),
            manifest("B", 1, vec![entry("plugin.esp", 200)]),
        ]);

        assert_eq!(report.conflicts.len(), 1);
        assert_eq!(report.conflicts[0].severity, Severity::Critical);
        assert_eq!(report.conflicts[0].conflict_type, ConflictType::Overwrite);
        assert_eq!(report.stats.critical_count, 1);
    }

    #[test]
    fn test_winner_is_highest_load_order() {
        // Deliberately out of registry order.
        let report = analyze_conflicts(&[
            manifest("late", 5, vec![entry("meshes/sword.nif", 10)]),
            manifest("early", 1, vec![entry("meshes/sword.nif", 20)]),
            manifest("middle", 3, vec![entry("meshes/sword.nif", 30)]),
        ]);

        let conflict = &report.conflicts[0];
        assert_eq!(conflict.winner.mod_id, "late");
        assert_eq!(
            conflict.losers.iter().map(|l| l.mod_id.as_str()).collect::<Vec<_>>(),
            vec!["early", "middle"]
        );
        assert_eq!(conflict.sources.last().unwrap().mod_id, conflict.winner.mod_id);
    }

    #[test]
    fn test_path_hash_alone_is_not_identical() {
        // Without content hashes the same path must not read as identical.
        let report = analyze_conflicts(&[
            manifest("A", 0, vec![entry("textures/a.dds", 100)]),
            manifest("B", 1, vec![entry("textures/a.dds", 100)]),
        ]);

        assert!(!report.conflicts[0].is_identical);
        assert_eq!(report.conflicts[0].conflict_type, ConflictType::Overwrite);
        assert_eq!(report.conflicts[0].severity, Severity::Medium);
    }

    #[test]
    fn test_differing_hashes_not_identical() {
        let report = analyze_conflicts(&[
            manifest("A", 0, vec![hashed("scripts/x.pex", 10, "aaa")]),
            manifest("B", 1, vec![hashed("scripts/x.pex", 12, "bbb")]),
        ]);

        assert!(!report.conflicts[0].is_identical);
        assert_eq!(report.conflicts[0].severity, Severity::High);
    }

    #[test]
    fn test_normalized_paths_collide() {
        let report = analyze_conflicts(&[
            manifest("A", 0, vec![entry("Textures\\Armor\\steel.dds", 1)]),
            manifest("B", 1, vec![entry("textures/armor/Steel.DDS", 2)]),
        ]);

        assert_eq!(report.conflicts.len(), 1);
        assert_eq!(report.conflicts[0].path, "textures/armor/steel.dds");
    }

    #[test]
    fn test_no_conflict_single_contributor() {
        let report = analyze_conflicts(&[
            manifest("A", 0, vec![entry("a.esp", 1)]),
            manifest("B", 1, vec![entry("b.esp", 1)]),
        ]);
        assert!(report.conflicts.is_empty());
        assert_eq!(report.stats.total_conflicts, 0);
        assert_eq!(report.stats.total_files, 2);
    }

    #[test]
    fn test_score_in_range_and_extra_mod_bonus() {
        let mods: Vec<ModManifest> = (0..6)
            .map(|i| manifest(&format!("m{}", i), i, vec![entry("seq/test.seq", 5)]))
            .collect();
        let report = analyze_conflicts(&mods);

        let conflict = &report.conflicts[0];
        // SEQ baseline 30 + 5 per mod beyond two.
        assert_eq!(conflict.score, 30 + 5 * 4);
        assert!(conflict.score <= 100);
    }

    #[test]
    fn test_score_clamped_to_100() {
        let report = analyze_conflicts(&[
            manifest("A", 0, vec![entry("meshes/actors/character/behaviors/0_master.hkx", 1)]),
            manifest("B", 1, vec![entry("meshes/actors/character/behaviors/0_master.hkx", 2)]),
        ]);

        let conflict = &report.conflicts[0];
        // Other baseline 20 + behaviors 25 + .hkx 20 = 65; still bounded.
        assert!(conflict.score <= 100);
        assert!(conflict.matched_rules.contains(&"character-behaviors".to_string()));
        assert!(conflict.matched_rules.contains(&"havok-behavior".to_string()));
    }

    #[test]
    fn test_identical_discount_floors_at_zero() {
        let report = analyze_conflicts(&[
            manifest("A", 0, vec![hashed("readme.txt", 1, "same")]),
            manifest("B", 1, vec![hashed("readme.txt", 1, "same")]),
        ]);

        // Other baseline 20 - 80 floors at 0.
        assert_eq!(report.conflicts[0].score, 0);
    }

    #[test]
    fn test_sort_order() {
        let report = analyze_conflicts(&[
            manifest(
                "A",
                0,
                vec![
                    entry("b.esp", 1),
                    entry("a.esp", 1),
                    entry("textures/t.dds", 1),
                    entry("sounds/s.wav", 1),
                ],
            ),
            manifest(
                "B",
                1,
                vec![
                    entry("b.esp", 2),
                    entry("a.esp", 2),
                    entry("textures/t.dds", 2),
                    entry("sounds/s.wav", 2),
                ],
            ),
        ]);

        let order: Vec<&str> = report.conflicts.iter().map(|c| c.path.as_str()).collect();
        // Critical plugins first (ties broken by path), then medium, then low.
        assert_eq!(order, vec!["a.esp", "b.esp", "textures/t.dds", "sounds/s.wav"]);
    }

    #[test]
    fn test_mod_summaries_and_path_index() {
        let report = analyze_conflicts(&[
            manifest("A", 0, vec![entry("p.esp", 1), entry("scripts/s.pex", 1)]),
            manifest("B", 1, vec![entry("p.esp", 2)]),
            manifest("C", 2, vec![entry("scripts/s.pex", 3)]),
        ]);

        let a = report.mod_summaries.iter().find(|s| s.mod_id == "A").unwrap();
        assert_eq!(a.win_count, 0);
        assert_eq!(a.lose_count, 2);
        assert_eq!(a.critical_count, 1);
        assert_eq!(a.high_count, 1);

        let b = report.mod_summaries.iter().find(|s| s.mod_id == "B").unwrap();
        assert_eq!(b.win_count, 1);
        assert_eq!(b.critical_count, 1);

        assert_eq!(report.path_to_mods["p.esp"], vec!["A", "B"]);
        assert_eq!(report.path_to_mods["scripts/s.pex"], vec!["A", "C"]);
        assert_eq!(report.stats.affected_mods, 3);
    }

    #[test]
    fn test_messages() {
        let report = analyze_conflicts(&[
            manifest("A", 0, vec![entry("x.esp", 1), hashed("same.txt", 1, "h")]),
            manifest("B", 1, vec![entry("x.esp", 2), hashed("same.txt", 1, "h")]),
            manifest("C", 2, vec![entry("x.esp", 3)]),
        ]);

        let overwrite = report.conflicts.iter().find(|c| c.path == "x.esp").unwrap();
        assert!(overwrite.message.contains("Mod C"));
        assert!(overwrite.message.contains("2 other mods"));

        let duplicate = report.conflicts.iter().find(|c| c.path == "same.txt").unwrap();
        assert!(duplicate.message.contains("identical"));
    }
}
