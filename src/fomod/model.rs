//! Typed FOMOD installer model.
//!
//! The raw document is coerced into this shape once, applying the attribute
//! rules (boolean/numeric coercion, whitespace stripping, single-child
//! dependency flattening). Clients pattern-match on [`Dependency`] to
//! simulate selections.

use super::xml::{
    XmlDependencies, XmlDependencyNode, XmlFileItem, XmlFileList, XmlInfo, XmlModuleConfig,
    XmlPlugin, XmlTypeDescriptor,
};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// How one option in a group may be treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PluginType {
    Required,
    Optional,
    Recommended,
    NotUsable,
    CouldBeUsable,
}

impl PluginType {
    /// Tolerant parse; unknown names degrade to `Optional`.
    pub fn parse(name: &str) -> Self {
        match name.trim() {
            "Required" => PluginType::Required,
            "Optional" => PluginType::Optional,
            "Recommended" => PluginType::Recommended,
            "NotUsable" => PluginType::NotUsable,
            "CouldBeUsable" => PluginType::CouldBeUsable,
            other => {
                tracing::debug!(name = other, "unknown plugin type, treating as Optional");
                PluginType::Optional
            }
        }
    }
}

/// Selection constraint of an option group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GroupType {
    SelectExactlyOne,
    SelectAtMostOne,
    SelectAtLeastOne,
    SelectAll,
    SelectAny,
}

impl GroupType {
    /// Tolerant parse; unknown names degrade to `SelectAny`.
    pub fn parse(name: &str) -> Self {
        match name.trim() {
            "SelectExactlyOne" => GroupType::SelectExactlyOne,
            "SelectAtMostOne" => GroupType::SelectAtMostOne,
            "SelectAtLeastOne" => GroupType::SelectAtLeastOne,
            "SelectAll" => GroupType::SelectAll,
            "SelectAny" => GroupType::SelectAny,
            other => {
                tracing::debug!(name = other, "unknown group type, treating as SelectAny");
                GroupType::SelectAny
            }
        }
    }
}

/// Required state of a file dependency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileState {
    Missing,
    Inactive,
    Active,
}

impl FileState {
    pub fn parse(name: &str) -> Self {
        match name.trim() {
            "Missing" => FileState::Missing,
            "Inactive" => FileState::Inactive,
            _ => FileState::Active,
        }
    }
}

/// A dependency expression. Leaves are single conditions; `Composite`
/// combines ordered children under an operator. A list with exactly one
/// child is flattened to that child.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Dependency {
    File {
        file: String,
        state: FileState,
    },
    Flag {
        flag: String,
        value: String,
    },
    Game {
        version: String,
    },
    Fomm {
        version: String,
    },
    Composite {
        /// `And`, `Or`, or whatever the document said; unknown operators
        /// pass through unchanged.
        operator: String,
        children: Vec<Dependency>,
    },
}

/// One file or folder mapping of a file list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileInstall {
    pub source: String,
    pub destination: Option<String>,
    pub priority: i32,
    pub always_install: bool,
    pub install_if_usable: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FileList {
    pub files: Vec<FileInstall>,
    pub folders: Vec<FileInstall>,
}

impl FileList {
    pub fn is_empty(&self) -> bool {
        self.files.is_empty() && self.folders.is_empty()
    }
}

/// Flag set when an option is selected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionFlag {
    pub name: String,
    pub value: String,
}

/// Static or condition-dependent option typing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TypeDescriptor {
    Static(PluginType),
    Dependent {
        default_type: PluginType,
        patterns: Vec<TypePattern>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypePattern {
    pub dependencies: Dependency,
    pub plugin_type: PluginType,
}

/// One selectable option.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FomodPlugin {
    pub name: String,
    pub description: Option<String>,
    pub image: Option<String>,
    pub files: Option<FileList>,
    pub condition_flags: Vec<ConditionFlag>,
    pub type_descriptor: Option<TypeDescriptor>,
}

/// A group of options, in display order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptionGroup {
    pub name: String,
    pub group_type: GroupType,
    pub plugins: Vec<FomodPlugin>,
}

/// One page of the installer wizard.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallStep {
    pub name: String,
    pub visible: Option<Dependency>,
    pub groups: Vec<OptionGroup>,
}

/// Files installed when a dependency expression holds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConditionalInstall {
    pub dependencies: Dependency,
    pub files: FileList,
}

/// Metadata from the optional info.xml.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FomodInfo {
    pub name: Option<String>,
    pub author: Option<String>,
    pub version: Option<String>,
    pub website: Option<String>,
    pub description: Option<String>,
}

/// The parsed installer. Group and plugin order as parsed is the display
/// order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FomodModel {
    pub module_name: String,
    pub module_image: Option<String>,
    pub module_dependencies: Option<Dependency>,
    pub required_install_files: Option<FileList>,
    pub install_steps: Vec<InstallStep>,
    pub conditional_file_installs: Vec<ConditionalInstall>,
    pub info: Option<FomodInfo>,
}

/// `true|1|yes` in any case (trimmed) is true; everything else is false.
fn bool_attr(raw: Option<&str>) -> bool {
    matches!(
        raw.map(|v| v.trim().to_lowercase()).as_deref(),
        Some("true") | Some("1") | Some("yes")
    )
}

/// Numeric attributes default to 0 when missing or malformed.
fn num_attr(raw: Option<&str>) -> i32 {
    raw.and_then(|v| v.trim().parse().ok()).unwrap_or(0)
}

fn non_empty(text: &str) -> Option<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn convert_node(node: &XmlDependencyNode) -> Dependency {
    match node {
        XmlDependencyNode::File { file, state } => Dependency::File {
            file: file.trim().to_string(),
            state: FileState::parse(state.as_deref().unwrap_or("Active")),
        },
        XmlDependencyNode::Flag { flag, value } => Dependency::Flag {
            flag: flag.trim().to_string(),
            value: value.trim().to_string(),
        },
        XmlDependencyNode::Game { version } => Dependency::Game {
            version: version.trim().to_string(),
        },
        XmlDependencyNode::Fomm { version } => Dependency::Fomm {
            version: version.trim().to_string(),
        },
        XmlDependencyNode::Nested(inner) => {
            convert_dependencies(inner).unwrap_or(Dependency::Composite {
                operator: inner.operator.clone().unwrap_or_else(|| "And".to_string()),
                children: Vec::new(),
            })
        }
    }
}

/// Convert a dependency list, flattening a single child into a leaf and
/// dropping empty lists entirely.
fn convert_dependencies(xml: &XmlDependencies) -> Option<Dependency> {
    let mut children: Vec<Dependency> = xml.children.iter().map(convert_node).collect();

    match children.len() {
        0 => None,
        1 => Some(children.remove(0)),
        _ => Some(Dependency::Composite {
            operator: xml.operator.clone().unwrap_or_else(|| "And".to_string()),
            children,
        }),
    }
}

fn convert_file_item(item: &XmlFileItem) -> FileInstall {
    FileInstall {
        source: item.source.trim().to_string(),
        destination: item.destination.as_deref().and_then(non_empty),
        priority: num_attr(item.priority.as_deref()),
        always_install: bool_attr(item.always_install.as_deref()),
        install_if_usable: bool_attr(item.install_if_usable.as_deref()),
    }
}

fn convert_file_list(list: &XmlFileList) -> FileList {
    FileList {
        files: list.files.iter().map(convert_file_item).collect(),
        folders: list.folders.iter().map(convert_file_item).collect(),
    }
}

fn convert_type_descriptor(xml: &XmlTypeDescriptor) -> Result<Option<TypeDescriptor>> {
    if let Some(dep_type) = &xml.dependency_type {
        let raw_patterns = dep_type
            .patterns
            .as_ref()
            .map(|p| p.patterns.as_slice())
            .unwrap_or(&[]);

        let default_type = match &dep_type.default_type {
            Some(t) => PluginType::parse(&t.name),
            None if !raw_patterns.is_empty() => {
                return Err(Error::InvalidXml(
                    "dependencyType with patterns is missing defaultType".to_string(),
                ))
            }
            None => PluginType::Optional,
        };

        let mut patterns = Vec::new();
        for pattern in raw_patterns {
            let Some(deps) = pattern.dependencies.as_ref().and_then(convert_dependencies) else {
                tracing::debug!("skipping type pattern without dependencies");
                continue;
            };
            patterns.push(TypePattern {
                dependencies: deps,
                plugin_type: pattern
                    .pattern_type
                    .as_ref()
                    .map(|t| PluginType::parse(&t.name))
                    .unwrap_or(PluginType::Optional),
            });
        }

        return Ok(Some(TypeDescriptor::Dependent {
            default_type,
            patterns,
        }));
    }

    if let Some(t) = &xml.static_type {
        return Ok(Some(TypeDescriptor::Static(PluginType::parse(&t.name))));
    }

    Ok(None)
}

fn convert_plugin(xml: &XmlPlugin) -> Result<FomodPlugin> {
    Ok(FomodPlugin {
        name: xml.name.trim().to_string(),
        description: xml.description.as_ref().and_then(|d| non_empty(&d.value)),
        image: xml.image.as_ref().and_then(|i| non_empty(&i.path)),
        files: xml.files.as_ref().map(convert_file_list),
        condition_flags: xml
            .condition_flags
            .as_ref()
            .map(|flags| {
                flags
                    .flags
                    .iter()
                    .map(|f| ConditionFlag {
                        name: f.name.trim().to_string(),
                        value: f.value.trim().to_string(),
                    })
                    .collect()
            })
            .unwrap_or_default(),
        type_descriptor: xml
            .type_descriptor
            .as_ref()
            .map(convert_type_descriptor)
            .transpose()?
            .flatten(),
    })
}

impl FomodModel {
    /// Build the typed model from the raw documents. The only fatal
    /// condition besides malformed type descriptors is a missing or empty
    /// moduleName.
    pub fn from_xml(doc: &XmlModuleConfig, info: Option<&XmlInfo>) -> Result<Self> {
        let module_name = doc
            .module_name
            .as_ref()
            .and_then(|n| non_empty(&n.value))
            .ok_or(Error::MissingModuleName)?;

        let mut install_steps = Vec::new();
        if let Some(steps) = &doc.install_steps {
            for step in &steps.steps {
                let mut groups = Vec::new();
                if let Some(xml_groups) = &step.groups {
                    for group in &xml_groups.groups {
                        let plugins = group
                            .plugins
                            .as_ref()
                            .map(|p| p.plugins.iter().map(convert_plugin).collect::<Result<Vec<_>>>())
                            .transpose()?
                            .unwrap_or_default();

                        groups.push(OptionGroup {
                            name: group.name.trim().to_string(),
                            group_type: GroupType::parse(&group.group_type),
                            plugins,
                        });
                    }
                }

                install_steps.push(InstallStep {
                    name: step.name.trim().to_string(),
                    visible: step.visible.as_ref().and_then(convert_dependencies),
                    groups,
                });
            }
        }

        let mut conditional_file_installs = Vec::new();
        if let Some(installs) = &doc.conditional_file_installs {
            if let Some(patterns) = &installs.patterns {
                for pattern in &patterns.patterns {
                    let Some(deps) = pattern.dependencies.as_ref().and_then(convert_dependencies)
                    else {
                        tracing::debug!("skipping conditional install without dependencies");
                        continue;
                    };
                    conditional_file_installs.push(ConditionalInstall {
                        dependencies: deps,
                        files: pattern
                            .files
                            .as_ref()
                            .map(convert_file_list)
                            .unwrap_or_default(),
                    });
                }
            }
        }

        Ok(Self {
            module_name,
            module_image: doc.module_image.as_ref().and_then(|i| non_empty(&i.path)),
            module_dependencies: doc
                .module_dependencies
                .as_ref()
                .and_then(convert_dependencies),
            required_install_files: doc.required_install_files.as_ref().map(convert_file_list),
            install_steps,
            conditional_file_installs,
            info: info.map(|i| FomodInfo {
                name: i.name.as_ref().and_then(|t| non_empty(&t.value)),
                author: i.author.as_ref().and_then(|t| non_empty(&t.value)),
                version: i.version.as_ref().and_then(|t| non_empty(&t.value)),
                website: i.website.as_ref().and_then(|t| non_empty(&t.value)),
                description: i.description.as_ref().and_then(|t| non_empty(&t.value)),
            }),
        })
    }
}
