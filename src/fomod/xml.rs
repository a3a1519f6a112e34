//! Raw serde mapping of ModuleConfig.xml and info.xml.
//!
//! These structs mirror the document shape one-to-one and tolerate missing
//! pieces; coercion rules and validation live in the typed model.

use crate::error::{Error, Result};
use serde::Deserialize;

/// Element whose text content is the value. Attributes are tolerated and
/// ignored.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct XmlText {
    #[serde(rename = "$text", default)]
    pub value: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct XmlImage {
    #[serde(rename = "@path", default)]
    pub path: String,
}

/// Root element of ModuleConfig.xml
#[derive(Debug, Clone, Deserialize)]
#[serde(rename = "config")]
pub struct XmlModuleConfig {
    #[serde(rename = "moduleName", default)]
    pub module_name: Option<XmlText>,

    #[serde(rename = "moduleImage", default)]
    pub module_image: Option<XmlImage>,

    #[serde(rename = "moduleDependencies", default)]
    pub module_dependencies: Option<XmlDependencies>,

    #[serde(rename = "requiredInstallFiles", default)]
    pub required_install_files: Option<XmlFileList>,

    #[serde(rename = "installSteps", default)]
    pub install_steps: Option<XmlInstallSteps>,

    #[serde(rename = "conditionalFileInstalls", default)]
    pub conditional_file_installs: Option<XmlConditionalInstalls>,
}

/// A `<dependencies>` (or `<visible>`) element: optional operator plus
/// children in document order.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct XmlDependencies {
    #[serde(rename = "@operator")]
    pub operator: Option<String>,

    #[serde(rename = "$value", default)]
    pub children: Vec<XmlDependencyNode>,
}

/// One child of a dependency list, in document order.
#[derive(Debug, Clone, Deserialize)]
pub enum XmlDependencyNode {
    #[serde(rename = "fileDependency")]
    File {
        #[serde(rename = "@file", default)]
        file: String,
        #[serde(rename = "@state")]
        state: Option<String>,
    },

    #[serde(rename = "flagDependency")]
    Flag {
        #[serde(rename = "@flag", default)]
        flag: String,
        #[serde(rename = "@value", default)]
        value: String,
    },

    #[serde(rename = "gameDependency")]
    Game {
        #[serde(rename = "@version", default)]
        version: String,
    },

    #[serde(rename = "fommDependency")]
    Fomm {
        #[serde(rename = "@version", default)]
        version: String,
    },

    #[serde(rename = "dependencies")]
    Nested(XmlDependencies),
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct XmlInstallSteps {
    #[serde(rename = "@order")]
    pub order: Option<String>,

    #[serde(rename = "installStep", default)]
    pub steps: Vec<XmlInstallStep>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct XmlInstallStep {
    #[serde(rename = "@name", default)]
    pub name: String,

    #[serde(rename = "visible", default)]
    pub visible: Option<XmlDependencies>,

    #[serde(rename = "optionalFileGroups", default)]
    pub groups: Option<XmlGroups>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct XmlGroups {
    #[serde(rename = "@order")]
    pub order: Option<String>,

    #[serde(rename = "group", default)]
    pub groups: Vec<XmlGroup>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct XmlGroup {
    #[serde(rename = "@name", default)]
    pub name: String,

    #[serde(rename = "@type", default)]
    pub group_type: String,

    #[serde(rename = "plugins", default)]
    pub plugins: Option<XmlPlugins>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct XmlPlugins {
    #[serde(rename = "@order")]
    pub order: Option<String>,

    #[serde(rename = "plugin", default)]
    pub plugins: Vec<XmlPlugin>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct XmlPlugin {
    #[serde(rename = "@name", default)]
    pub name: String,

    #[serde(rename = "description", default)]
    pub description: Option<XmlText>,

    #[serde(rename = "image", default)]
    pub image: Option<XmlImage>,

    #[serde(rename = "files", default)]
    pub files: Option<XmlFileList>,

    #[serde(rename = "conditionFlags", default)]
    pub condition_flags: Option<XmlConditionFlags>,

    #[serde(rename = "typeDescriptor", default)]
    pub type_descriptor: Option<XmlTypeDescriptor>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct XmlConditionFlags {
    #[serde(rename = "flag", default)]
    pub flags: Vec<XmlFlag>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct XmlFlag {
    #[serde(rename = "@name", default)]
    pub name: String,

    #[serde(rename = "$text", default)]
    pub value: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct XmlTypeDescriptor {
    #[serde(rename = "type", default)]
    pub static_type: Option<XmlNamedType>,

    #[serde(rename = "dependencyType", default)]
    pub dependency_type: Option<XmlDependencyType>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct XmlNamedType {
    #[serde(rename = "@name", default)]
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct XmlDependencyType {
    #[serde(rename = "defaultType", default)]
    pub default_type: Option<XmlNamedType>,

    #[serde(rename = "patterns", default)]
    pub patterns: Option<XmlPatterns>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct XmlPatterns {
    #[serde(rename = "pattern", default)]
    pub patterns: Vec<XmlPattern>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct XmlPattern {
    #[serde(rename = "dependencies", default)]
    pub dependencies: Option<XmlDependencies>,

    #[serde(rename = "type", default)]
    pub pattern_type: Option<XmlNamedType>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct XmlFileList {
    #[serde(rename = "file", default)]
    pub files: Vec<XmlFileItem>,

    #[serde(rename = "folder", default)]
    pub folders: Vec<XmlFileItem>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct XmlFileItem {
    #[serde(rename = "@source", default)]
    pub source: String,

    #[serde(rename = "@destination")]
    pub destination: Option<String>,

    #[serde(rename = "@priority")]
    pub priority: Option<String>,

    #[serde(rename = "@alwaysInstall")]
    pub always_install: Option<String>,

    #[serde(rename = "@installIfUsable")]
    pub install_if_usable: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct XmlConditionalInstalls {
    #[serde(rename = "patterns", default)]
    pub patterns: Option<XmlPatternsWithFiles>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct XmlPatternsWithFiles {
    #[serde(rename = "pattern", default)]
    pub patterns: Vec<XmlInstallPattern>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct XmlInstallPattern {
    #[serde(rename = "dependencies", default)]
    pub dependencies: Option<XmlDependencies>,

    #[serde(rename = "files", default)]
    pub files: Option<XmlFileList>,
}

/// Root element of info.xml. Only the common metadata children are read;
/// anything else is ignored.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename = "fomod")]
pub struct XmlInfo {
    #[serde(rename = "Name", default)]
    pub name: Option<XmlText>,

    #[serde(rename = "Author", default)]
    pub author: Option<XmlText>,

    #[serde(rename = "Version", default)]
    pub version: Option<XmlText>,

    #[serde(rename = "Website", default)]
    pub website: Option<XmlText>,

    #[serde(rename = "Description", default)]
    pub description: Option<XmlText>,
}

/// Parse ModuleConfig.xml content into the raw document.
pub fn parse_module_config_xml(xml: &str) -> Result<XmlModuleConfig> {
    let xml = xml.trim_start_matches('\u{feff}').trim();

    quick_xml::de::from_str(xml).map_err(|e| {
        tracing::debug!("ModuleConfig.xml parse failure: {}", e);
        Error::InvalidXml(e.to_string())
    })
}

/// Parse info.xml content into the raw document.
pub fn parse_info_xml(xml: &str) -> Result<XmlInfo> {
    let xml = xml.trim_start_matches('\u{feff}').trim();
    quick_xml::de::from_str(xml).map_err(|e| Error::InvalidXml(e.to_string()))
}
