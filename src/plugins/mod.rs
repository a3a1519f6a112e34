//! Plugin (ESP/ESM/ESL) header model and parsing.

mod parser;

pub use parser::{parse_plugin_bytes, parse_plugin_file, parse_plugin_header};

use serde::{Deserialize, Serialize};

/// Plugin classification derived from header flags and filename.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PluginKind {
    Esm,
    Esp,
    Esl,
}

impl std::fmt::Display for PluginKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            PluginKind::Esm => "ESM",
            PluginKind::Esp => "ESP",
            PluginKind::Esl => "ESL",
        };
        write!(f, "{}", name)
    }
}

impl PluginKind {
    /// Kind implied by the filename extension alone.
    pub fn from_filename(filename: &str) -> Self {
        let lower = filename.to_lowercase();
        if lower.ends_with(".esm") {
            PluginKind::Esm
        } else if lower.ends_with(".esl") {
            PluginKind::Esl
        } else {
            PluginKind::Esp
        }
    }
}

/// A master dependency declared in a plugin header.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MasterRef {
    pub filename: String,

    /// Size of the master recorded in the DATA subrecord, when present.
    pub recorded_size: Option<u64>,
}

/// Parsed TES4 record header of a plugin file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginHeader {
    pub filename: String,

    pub kind: PluginKind,

    pub is_master: bool,
    pub is_light: bool,
    pub is_localized: bool,

    pub author: Option<String>,
    pub description: Option<String>,

    /// Declared masters, in header order. Comparisons against the load
    /// order are case-insensitive.
    pub masters: Vec<MasterRef>,

    pub form_version: u16,

    /// Record count from the HEDR subrecord.
    pub num_records: u32,

    /// File format version from the HEDR subrecord.
    pub version: f32,
}

impl PluginHeader {
    /// ESM flag bit
    pub const FLAG_MASTER: u32 = 0x0000_0001;

    /// Localized-strings flag bit
    pub const FLAG_LOCALIZED: u32 = 0x0000_0080;

    /// ESL flag bit (light plugin)
    pub const FLAG_LIGHT: u32 = 0x0000_0200;

    /// Light wins over master; otherwise the extension decides for
    /// non-master files.
    pub fn derive_kind(filename: &str, flags: u32) -> PluginKind {
        if flags & Self::FLAG_LIGHT != 0 {
            PluginKind::Esl
        } else if flags & Self::FLAG_MASTER != 0 {
            PluginKind::Esm
        } else {
            PluginKind::from_filename(filename)
        }
    }

    pub fn master_filenames(&self) -> impl Iterator<Item = &str> {
        self.masters.iter().map(|m| m.filename.as_str())
    }
}
