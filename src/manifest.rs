//! Path normalization, file classification, and manifest records.
//!
//! Every path comparison in the engine happens on the normalized form
//! produced here: forward slashes, lowercase, dot segments resolved, no
//! leading or trailing separators.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io::Read;
use std::path::Path;

/// Normalize an archive-internal path.
///
/// `""` and `"/"` both normalize to the empty string. `..` segments resolve
/// against earlier components and excess ones are dropped.
pub fn normalize_path(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();

    let normalized = path.replace('\\', "/");
    for segment in normalized.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }

    parts.join("/").to_lowercase()
}

/// Classification of a file by extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    Plugin,
    Mesh,
    Texture,
    Sound,
    Script,
    Interface,
    Seq,
    Bsa,
    Other,
}

impl std::fmt::Display for FileType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            FileType::Plugin => "plugin",
            FileType::Mesh => "mesh",
            FileType::Texture => "texture",
            FileType::Sound => "sound",
            FileType::Script => "script",
            FileType::Interface => "interface",
            FileType::Seq => "seq",
            FileType::Bsa => "bsa",
            FileType::Other => "other",
        };
        write!(f, "{}", name)
    }
}

/// Map a file extension (with or without the leading dot) to its type.
pub fn determine_file_type(extension: &str) -> FileType {
    match extension.trim_start_matches('.').to_lowercase().as_str() {
        "esp" | "esm" | "esl" => FileType::Plugin,
        "nif" => FileType::Mesh,
        "dds" | "png" | "tga" | "bmp" | "jpg" | "jpeg" => FileType::Texture,
        "wav" | "xwm" | "fuz" | "lip" => FileType::Sound,
        "pex" | "psc" => FileType::Script,
        "swf" => FileType::Interface,
        "seq" => FileType::Seq,
        "bsa" | "ba2" => FileType::Bsa,
        _ => FileType::Other,
    }
}

/// Stable hex identifier for a normalized path.
pub fn path_hash(normalized_path: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalized_path.as_bytes());
    hex::encode(hasher.finalize())
}

/// SHA-256 of a file body, hex encoded. Used to detect byte-identical
/// overwrites.
pub fn content_hash<R: Read>(mut reader: R) -> std::io::Result<String> {
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];

    loop {
        let read = reader.read(&mut buf)?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Normalized record for one file a mod would install.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileEntry {
    /// Normalized virtual install path.
    pub path: String,

    /// Path exactly as it appeared in the archive.
    pub original_path: String,

    pub size: u64,

    /// Path hash by default; content hash when the caller requests it.
    pub hash: String,

    /// Present only when content hashing was requested. Identical-overwrite
    /// detection keys off this field.
    pub content_hash: Option<String>,

    pub file_type: FileType,

    pub extension: String,

    /// Normalized parent directory, empty for root-level files.
    pub directory: String,

    pub filename: String,
}

impl FileEntry {
    /// Build an entry from an archive-internal path, keyed by path hash.
    pub fn new(original_path: &str, size: u64) -> Self {
        let path = normalize_path(original_path);
        let (directory, filename) = match path.rfind('/') {
            Some(idx) => (path[..idx].to_string(), path[idx + 1..].to_string()),
            None => (String::new(), path.clone()),
        };
        let extension = match filename.rfind('.') {
            Some(idx) if idx > 0 => filename[idx + 1..].to_string(),
            _ => String::new(),
        };

        Self {
            hash: path_hash(&path),
            content_hash: None,
            file_type: determine_file_type(&extension),
            path,
            original_path: original_path.to_string(),
            size,
            extension,
            directory,
            filename,
        }
    }

    /// Record a content hash, which also takes over as the entry's key hash.
    pub fn with_content_hash(mut self, hash: String) -> Self {
        self.hash = hash.clone();
        self.content_hash = Some(hash);
        self
    }

    /// Build an entry for a file on disk, hashing its content on request.
    pub fn from_file(original_path: &str, file: &Path, hash_content: bool) -> std::io::Result<Self> {
        let size = file.metadata()?.len();
        let entry = Self::new(original_path, size);

        if hash_content {
            let reader = std::fs::File::open(file)?;
            let hash = content_hash(reader)?;
            Ok(entry.with_content_hash(hash))
        } else {
            Ok(entry)
        }
    }
}

/// All files one mod contributes, at its position in the load order.
/// Lower `load_order` loads first and loses in an overwrite.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModManifest {
    pub mod_id: String,
    pub mod_name: String,
    pub load_order: i32,
    pub files: Vec<FileEntry>,
}
