//! Load-order and conflict analyzers.

mod conflicts;
mod loadorder;
mod rules;

pub use conflicts::{
    analyze_conflicts, Conflict, ConflictReport, ConflictSource, ConflictStats, ConflictType,
    ModConflictSummary,
};
pub use loadorder::{
    analyze_load_order, LoadOrderIssue, LoadOrderIssueType, LoadOrderReport, LoadOrderStats,
    PluginEntry, PluginSummary,
};
pub use rules::{builtin_rules, ConflictRule, RuleMatch};

use serde::{Deserialize, Serialize};

/// How disruptive an overwrite conflict is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
    Info,
}

impl Severity {
    /// Sort rank; lower is more severe.
    pub fn rank(self) -> u8 {
        match self {
            Severity::Critical => 0,
            Severity::High => 1,
            Severity::Medium => 2,
            Severity::Low => 3,
            Severity::Info => 4,
        }
    }
}

/// Severity of a load-order issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueSeverity {
    Error,
    Warning,
}
