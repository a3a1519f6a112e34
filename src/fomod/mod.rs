//! FOMOD installer parsing.
//!
//! A FOMOD lives in a `fomod/` directory (any capitalization) holding a
//! required `ModuleConfig.xml` and an optional `info.xml`, each in whatever
//! encoding its XML declaration names.

mod model;
mod simulate;
mod xml;

pub use model::{
    ConditionFlag, Dependency, FileInstall, FileList, FileState, FomodInfo, FomodModel,
    FomodPlugin, GroupType, InstallStep, OptionGroup, PluginType, TypeDescriptor, TypePattern,
};
pub use simulate::{
    simulate, Environment, GroupSelection, InstallPlan, PlannedInstall, Selections, StepSelection,
};
pub use xml::{parse_info_xml, parse_module_config_xml};

use crate::error::{Error, Result};
use std::path::{Path, PathBuf};

/// Decode XML bytes honoring a BOM or the declared encoding.
fn decode_xml_bytes(bytes: &[u8]) -> String {
    if bytes.len() >= 2 {
        if bytes[0] == 0xFF && bytes[1] == 0xFE {
            let (decoded, _, had_errors) = encoding_rs::UTF_16LE.decode(bytes);
            if had_errors {
                tracing::warn!("UTF-16LE decoding had errors, some characters may be incorrect");
            }
            return decoded.into_owned();
        } else if bytes[0] == 0xFE && bytes[1] == 0xFF {
            let (decoded, _, had_errors) = encoding_rs::UTF_16BE.decode(bytes);
            if had_errors {
                tracing::warn!("UTF-16BE decoding had errors, some characters may be incorrect");
            }
            return decoded.into_owned();
        }
    }

    if bytes.len() >= 3 && bytes[0] == 0xEF && bytes[1] == 0xBB && bytes[2] == 0xBF {
        return String::from_utf8_lossy(&bytes[3..]).into_owned();
    }

    // No BOM: honor the declaration's encoding label when it names one we
    // know, otherwise treat the input as UTF-8.
    if let Some(encoding) = declared_encoding(bytes) {
        let (decoded, _, had_errors) = encoding.decode(bytes);
        if had_errors {
            tracing::warn!(
                "decoding as {} had errors, some characters may be incorrect",
                encoding.name()
            );
        }
        return decoded.into_owned();
    }

    match std::str::from_utf8(bytes) {
        Ok(s) => s.to_string(),
        Err(_) => {
            tracing::warn!("XML file is not valid UTF-8, using lossy conversion");
            String::from_utf8_lossy(bytes).into_owned()
        }
    }
}

/// Pull the encoding label out of an `<?xml ... encoding="..."?>` prolog.
fn declared_encoding(bytes: &[u8]) -> Option<&'static encoding_rs::Encoding> {
    let head_len = bytes.len().min(256);
    let head = String::from_utf8_lossy(&bytes[..head_len]);
    let head = head.trim_start();

    if !head.starts_with("<?xml") {
        return None;
    }
    let prolog = &head[..head.find("?>").unwrap_or(head.len())];

    let idx = prolog.find("encoding")?;
    let rest = &prolog[idx + "encoding".len()..];
    let rest = rest.trim_start().strip_prefix('=')?.trim_start();
    let quote = rest.chars().next().filter(|c| *c == '"' || *c == '\'')?;
    let rest = &rest[1..];
    let label = &rest[..rest.find(quote)?];

    encoding_rs::Encoding::for_label(label.trim().as_bytes())
}

/// Find a directory entry by name, case-insensitively.
fn find_entry_case_insensitive(dir: &Path, target: &str, want_dir: bool) -> Option<PathBuf> {
    let target_lower = target.to_lowercase();

    let entries = std::fs::read_dir(dir).ok()?;
    for entry in entries.filter_map(|e| e.ok()) {
        let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
        if is_dir != want_dir {
            continue;
        }
        if entry.file_name().to_string_lossy().to_lowercase() == target_lower {
            return Some(entry.path());
        }
    }
    None
}

/// Locate the fomod directory among the children of `root`.
pub fn find_fomod_dir(root: &Path) -> Option<PathBuf> {
    find_entry_case_insensitive(root, "fomod", true)
}

/// Parse the FOMOD installer under `root` (an extracted tree containing a
/// `fomod/` directory). info.xml is read best-effort; ModuleConfig.xml is
/// required.
pub fn parse_fomod_dir(root: &Path) -> Result<FomodModel> {
    let fomod = find_fomod_dir(root).ok_or(Error::NoFomodDir)?;

    let config_path = find_entry_case_insensitive(&fomod, "moduleconfig.xml", false)
        .ok_or(Error::NoModuleConfig)?;

    tracing::debug!("loading FOMOD config from {}", config_path.display());

    let bytes = std::fs::read(&config_path)?;
    let content = decode_xml_bytes(&bytes);
    let doc = parse_module_config_xml(&content)?;

    let info = find_entry_case_insensitive(&fomod, "info.xml", false).and_then(|path| {
        let bytes = std::fs::read(&path).ok()?;
        match parse_info_xml(&decode_xml_bytes(&bytes)) {
            Ok(info) => Some(info),
            Err(e) => {
                tracing::debug!("ignoring unparseable info.xml: {}", e);
                None
            }
        }
    });

    FomodModel::from_xml(&doc, info.as_ref())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const MINIMAL_CONFIG: &str = r#"<config><moduleName>Fixture Mod</moduleName></config>"#;

    #[test]
    fn test_parse_fomod_dir_case_insensitive() {
        let dir = TempDir::new().unwrap();
        let fomod = dir.path().join("FOMOD");
        std::fs::create_dir_all(&fomod).unwrap();
        std::fs::write(fomod.join("ModuleConfig.XML"), MINIMAL_CONFIG).unwrap();

        let model = parse_fomod_dir(dir.path()).unwrap();
        assert_eq!(model.module_name, "Fixture Mod");
        assert!(model.info.is_none());
    }

    #[test]
    fn test_missing_fomod_dir() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(parse_fomod_dir(dir.path()), Err(Error::NoFomodDir)));
    }

    #[test]
    fn test_missing_module_config() {
        let dir = TempDir::new().unwrap();
        let fomod = dir.path().join("fomod");
        std::fs::create_dir_all(&fomod).unwrap();
        std::fs::write(fomod.join("info.xml"), "<fomod><Name>X</Name></fomod>").unwrap();

        assert!(matches!(
            parse_fomod_dir(dir.path()),
            Err(Error::NoModuleConfig)
        ));
    }

    #[test]
    fn test_info_xml_attached() {
        let dir = TempDir::new().unwrap();
        let fomod = dir.path().join("fomod");
        std::fs::create_dir_all(&fomod).unwrap();
        std::fs::write(fomod.join("moduleconfig.xml"), MINIMAL_CONFIG).unwrap();
        std::fs::write(
            fomod.join("Info.xml"),
            "<fomod><Name>Fixture</Name><Author>Someone</Author></fomod>",
        )
        .unwrap();

        let model = parse_fomod_dir(dir.path()).unwrap();
        let info = model.info.unwrap();
        assert_eq!(info.name.as_deref(), Some("Fixture"));
        assert_eq!(info.author.as_deref(), Some("Someone"));
    }

    #[test]
    fn test_bad_info_xml_is_ignored() {
        let dir = TempDir::new().unwrap();
        let fomod = dir.path().join("fomod");
        std::fs::create_dir_all(&fomod).unwrap();
        std::fs::write(fomod.join("ModuleConfig.xml"), MINIMAL_CONFIG).unwrap();
        std::fs::write(fomod.join("info.xml"), "<fomod><Name>Broken").unwrap();

        let model = parse_fomod_dir(dir.path()).unwrap();
        assert_eq!(model.module_name, "Fixture Mod");
        assert!(model.info.is_none());
    }

    #[test]
    fn test_decode_utf16le_bom() {
        let content = "<config><moduleName>Wide</moduleName></config>";
        let mut bytes = vec![0xFF, 0xFE];
        for unit in content.encode_utf16() {
            bytes.extend_from_slice(&unit.to_le_bytes());
        }

        let decoded = decode_xml_bytes(&bytes);
        let doc = parse_module_config_xml(&decoded).unwrap();
        assert_eq!(doc.module_name.unwrap().value, "Wide");
    }

    #[test]
    fn test_decode_declared_encoding() {
        // "Mödule" in windows-1252: 0xF6 for ö, invalid as UTF-8.
        let mut bytes = Vec::new();
        bytes.extend_from_slice(b"<?xml version=\"1.0\" encoding=\"windows-1252\"?>");
        bytes.extend_from_slice(b"<config><moduleName>M\xF6dule</moduleName></config>");

        let decoded = decode_xml_bytes(&bytes);
        assert!(decoded.contains("M\u{f6}dule"));
    }

    #[test]
    fn test_decode_utf8_bom() {
        let mut bytes = vec![0xEF, 0xBB, 0xBF];
        bytes.extend_from_slice(MINIMAL_CONFIG.as_bytes());

        let decoded = decode_xml_bytes(&bytes);
        assert!(parse_module_config_xml(&decoded).is_ok());
    }

    #[test]
    fn test_declared_encoding_parsing() {
        assert_eq!(
            declared_encoding(b"<?xml version='1.0' encoding='UTF-8'?><config/>")
                .map(|e| e.name()),
            Some("UTF-8")
        );
        assert_eq!(
            declared_encoding(b"<?xml version=\"1.0\" encoding = \"ISO-8859-1\" ?><config/>")
                .map(|e| e.name()),
            // encoding_rs maps latin-1 labels to windows-1252.
            Some("windows-1252")
        );
        assert_eq!(declared_encoding(b"<config/>"), None);
        assert_eq!(declared_encoding(b"<?xml version=\"1.0\"?><config/>"), None);
    }
}
