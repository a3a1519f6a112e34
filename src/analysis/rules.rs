//! Incompatibility rules applied by the conflict scorer.
//!
//! Each rule filters on a path pattern, optionally on the file type, and
//! optionally on the set of mods involved. When every configured filter
//! matches, the rule's bonus is added to the conflict score.

use crate::manifest::FileType;
use serde::Serialize;
use std::sync::OnceLock;

/// How a rule's pattern is compared against the conflict path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleMatch {
    Exact,
    Prefix,
    Suffix,
    Contains,
    Regex,
}

/// One incompatibility rule.
#[derive(Debug)]
pub struct ConflictRule {
    pub id: &'static str,

    /// Matched against the normalized conflict path.
    pub pattern: &'static str,

    pub match_kind: RuleMatch,

    /// When non-empty, every pattern must bind to a distinct mod in the
    /// conflict (matched as a case-insensitive substring of the mod id or
    /// name).
    pub mod_patterns: &'static [&'static str],

    /// Restrict the rule to one file type.
    pub file_type: Option<FileType>,

    /// Score bonus added when the rule matches.
    pub bonus: i32,

    regex: OnceLock<Option<regex_lite::Regex>>,
}

impl ConflictRule {
    const fn new(
        id: &'static str,
        pattern: &'static str,
        match_kind: RuleMatch,
        file_type: Option<FileType>,
        bonus: i32,
    ) -> Self {
        Self {
            id,
            pattern,
            match_kind,
            mod_patterns: &[],
            file_type,
            bonus,
            regex: OnceLock::new(),
        }
    }

    /// Whether this rule applies to a conflict at `path` involving `mods`.
    pub fn matches(&self, path: &str, file_type: FileType, mods: &[&str]) -> bool {
        if let Some(required) = self.file_type {
            if required != file_type {
                return false;
            }
        }

        let path_matches = match self.match_kind {
            RuleMatch::Exact => path == self.pattern,
            RuleMatch::Prefix => path.starts_with(self.pattern),
            RuleMatch::Suffix => path.ends_with(self.pattern),
            RuleMatch::Contains => path.contains(self.pattern),
            RuleMatch::Regex => match self.compiled_regex() {
                Some(re) => re.is_match(path),
                None => false,
            },
        };
        if !path_matches {
            return false;
        }

        if self.mod_patterns.is_empty() {
            return true;
        }
        let mut used = vec![false; mods.len()];
        bind_distinct(self.mod_patterns, mods, &mut used)
    }

    fn compiled_regex(&self) -> Option<&regex_lite::Regex> {
        self.regex
            .get_or_init(|| match regex_lite::Regex::new(self.pattern) {
                Ok(re) => Some(re),
                Err(e) => {
                    tracing::warn!(rule = self.id, "invalid rule regex: {}", e);
                    None
                }
            })
            .as_ref()
    }
}

/// Assign each pattern to a distinct mod. Backtracking; rule pattern lists
/// are tiny.
fn bind_distinct(patterns: &[&str], mods: &[&str], used: &mut [bool]) -> bool {
    let Some((first, rest)) = patterns.split_first() else {
        return true;
    };
    let needle = first.to_lowercase();

    for (i, candidate) in mods.iter().enumerate() {
        if used[i] || !candidate.to_lowercase().contains(&needle) {
            continue;
        }
        used[i] = true;
        if bind_distinct(rest, mods, used) {
            return true;
        }
        used[i] = false;
    }

    false
}

static BUILTIN_RULES: [ConflictRule; 6] = [
    ConflictRule::new(
        "skyui-scripts",
        "scripts/skyui",
        RuleMatch::Prefix,
        Some(FileType::Script),
        15,
    ),
    ConflictRule::new(
        "character-behaviors",
        "meshes/actors/character/behaviors",
        RuleMatch::Prefix,
        None,
        25,
    ),
    ConflictRule::new("havok-behavior", ".hkx", RuleMatch::Suffix, None, 20),
    ConflictRule::new(
        "skeleton-mesh",
        "skeleton",
        RuleMatch::Contains,
        Some(FileType::Mesh),
        20,
    ),
    ConflictRule::new(
        "body-mesh",
        r"^meshes/actors/character/character assets/(fe)?male(body|hands|feet)_[01]\.nif$",
        RuleMatch::Regex,
        Some(FileType::Mesh),
        15,
    ),
    ConflictRule::new(
        "ui-interface",
        "interface/",
        RuleMatch::Prefix,
        Some(FileType::Interface),
        10,
    ),
];

/// The built-in rule set.
pub fn builtin_rules() -> &'static [ConflictRule] {
    &BUILTIN_RULES
}
