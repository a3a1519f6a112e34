//! Selection simulation over a parsed installer.
//!
//! Given a [`FomodModel`], a set of user selections, and an environment
//! (flag values plus a file-state probe), computes the file set the
//! installer would produce without touching any real install.

use super::model::{
    Dependency, FileInstall, FileState, FomodModel, FomodPlugin, GroupType, PluginType,
    TypeDescriptor,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Evaluation context for dependency expressions.
pub struct Environment {
    flags: HashMap<String, String>,
    file_checker: Box<dyn Fn(&str) -> FileState + Send + Sync>,
    game_version: Option<String>,
}

impl std::fmt::Debug for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Environment")
            .field("flags", &self.flags)
            .field("game_version", &self.game_version)
            .field("file_checker", &"<function>")
            .finish()
    }
}

impl Default for Environment {
    fn default() -> Self {
        Self::new()
    }
}

impl Environment {
    /// Environment with no flags and every file reported missing.
    pub fn new() -> Self {
        Self {
            flags: HashMap::new(),
            file_checker: Box::new(|_| FileState::Missing),
            game_version: None,
        }
    }

    /// Use a custom file-state probe (e.g. backed by an install database).
    pub fn with_file_checker<F>(file_checker: F) -> Self
    where
        F: Fn(&str) -> FileState + Send + Sync + 'static,
    {
        Self {
            flags: HashMap::new(),
            file_checker: Box::new(file_checker),
            game_version: None,
        }
    }

    pub fn set_game_version(&mut self, version: impl Into<String>) {
        self.game_version = Some(version.into());
    }

    pub fn set_flag(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.flags.insert(name.into(), value.into());
    }

    pub fn flag(&self, name: &str) -> Option<&str> {
        self.flags.get(name).map(String::as_str)
    }

    /// Evaluate a dependency expression against the current state.
    pub fn evaluate(&self, dependency: &Dependency) -> bool {
        match dependency {
            Dependency::File { file, state } => (self.file_checker)(file) == *state,
            Dependency::Flag { flag, value } => {
                self.flags.get(flag).map(String::as_str) == Some(value.as_str())
            }
            Dependency::Game { version } => match &self.game_version {
                Some(current) => version_at_least(current, version),
                // With no game version configured the check is vacuous.
                None => true,
            },
            // The installer engine itself is assumed current.
            Dependency::Fomm { .. } => true,
            Dependency::Composite { operator, children } => {
                if children.is_empty() {
                    return true;
                }
                if operator.eq_ignore_ascii_case("or") {
                    children.iter().any(|c| self.evaluate(c))
                } else {
                    children.iter().all(|c| self.evaluate(c))
                }
            }
        }
    }
}

/// Dotted-numeric version comparison; non-numeric segments compare as 0.
fn version_at_least(current: &str, required: &str) -> bool {
    let parse = |v: &str| -> Vec<u64> {
        v.split(['.', '-'])
            .map(|part| part.trim().parse().unwrap_or(0))
            .collect()
    };

    let current = parse(current);
    let required = parse(required);
    let len = current.len().max(required.len());

    for i in 0..len {
        let c = current.get(i).copied().unwrap_or(0);
        let r = required.get(i).copied().unwrap_or(0);
        if c != r {
            return c > r;
        }
    }
    true
}

/// The user's picks for one group, matched by name case-insensitively.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupSelection {
    pub group: String,
    pub plugins: Vec<String>,
}

/// The user's picks for one install step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepSelection {
    pub step: String,
    pub groups: Vec<GroupSelection>,
}

/// All selections for one simulated run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Selections {
    pub steps: Vec<StepSelection>,
}

impl Selections {
    fn picked(&self, step: &str, group: &str, plugin: &str) -> bool {
        self.steps
            .iter()
            .filter(|s| s.step.eq_ignore_ascii_case(step))
            .flat_map(|s| &s.groups)
            .filter(|g| g.group.eq_ignore_ascii_case(group))
            .flat_map(|g| &g.plugins)
            .any(|p| p.eq_ignore_ascii_case(plugin))
    }
}

/// One file or folder mapping the simulated install would perform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlannedInstall {
    pub source: String,
    pub destination: String,
    pub priority: i32,
    pub is_folder: bool,
}

/// Result of simulating one set of selections.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallPlan {
    /// Mappings in install order; later entries of equal destination
    /// overwrite earlier ones, higher priority wins regardless of order.
    pub installs: Vec<PlannedInstall>,

    /// Flag values after all selected options applied.
    pub flags: HashMap<String, String>,

    /// Steps that were skipped because their visibility condition failed.
    pub skipped_steps: Vec<String>,
}

fn push_file_list(plan: &mut InstallPlan, list: &super::model::FileList) {
    for file in &list.files {
        plan.installs.push(PlannedInstall {
            source: file.source.clone(),
            destination: destination_of(file),
            priority: file.priority,
            is_folder: false,
        });
    }
    for folder in &list.folders {
        plan.installs.push(PlannedInstall {
            source: folder.source.clone(),
            destination: destination_of(folder),
            priority: folder.priority,
            is_folder: true,
        });
    }
}

fn destination_of(install: &FileInstall) -> String {
    match &install.destination {
        Some(dest) => dest.clone(),
        // Per the format, a missing destination mirrors the source path.
        None => install.source.clone(),
    }
}

/// Resolve the effective type of an option under the current environment.
fn effective_type(plugin: &FomodPlugin, env: &Environment) -> PluginType {
    match &plugin.type_descriptor {
        None => PluginType::Optional,
        Some(TypeDescriptor::Static(t)) => *t,
        Some(TypeDescriptor::Dependent {
            default_type,
            patterns,
        }) => patterns
            .iter()
            .find(|p| env.evaluate(&p.dependencies))
            .map(|p| p.plugin_type)
            .unwrap_or(*default_type),
    }
}

/// Walk the installer with the given selections and compute the file set.
///
/// Selections are honored within the installer's rules: `Required` options
/// are always taken, `NotUsable` options never are, and `SelectAll` groups
/// take everything. Group cardinality beyond that is the caller's concern.
pub fn simulate(model: &FomodModel, selections: &Selections, env: &mut Environment) -> InstallPlan {
    let mut plan = InstallPlan::default();

    if let Some(required) = &model.required_install_files {
        push_file_list(&mut plan, required);
    }

    for step in &model.install_steps {
        if let Some(visible) = &step.visible {
            if !env.evaluate(visible) {
                tracing::debug!(step = %step.name, "step not visible, skipping");
                plan.skipped_steps.push(step.name.clone());
                continue;
            }
        }

        for group in &step.groups {
            for plugin in &group.plugins {
                let plugin_type = effective_type(plugin, env);

                let take = match plugin_type {
                    PluginType::Required => true,
                    PluginType::NotUsable => false,
                    _ => {
                        group.group_type == GroupType::SelectAll
                            || selections.picked(&step.name, &group.name, &plugin.name)
                    }
                };
                if !take {
                    continue;
                }

                if let Some(files) = &plugin.files {
                    push_file_list(&mut plan, files);
                }
                for flag in &plugin.condition_flags {
                    env.set_flag(flag.name.clone(), flag.value.clone());
                }
            }
        }
    }

    for conditional in &model.conditional_file_installs {
        if env.evaluate(&conditional.dependencies) {
            push_file_list(&mut plan, &conditional.files);
        }
    }

    plan.flags = env.flags.clone();
    plan
}

#[cfg(test)]
mod tests {
    use super::super::parse_module_config_xml;
    use super::super::FomodModel;
    use super::*;

    fn model(xml: &str) -> FomodModel {
        let doc = parse_module_config_xml(xml).unwrap();
        FomodModel::from_xml(&doc, None).unwrap()
    }

    const WIZARD: &str = r#"
        <config>
            <moduleName>Simulated</moduleName>
            <requiredInstallFiles>
                <file source="core.esp"/>
            </requiredInstallFiles>
            <installSteps>
                <installStep name="Main">
                    <optionalFileGroups>
                        <group name="Variant" type="SelectExactlyOne">
                            <plugins>
                                <plugin name="Red">
                                    <files><folder source="red" destination="textures"/></files>
                                    <conditionFlags><flag name="color">red</flag></conditionFlags>
                                </plugin>
                                <plugin name="Blue">
                                    <files><folder source="blue" destination="textures"/></files>
                                    <conditionFlags><flag name="color">blue</flag></conditionFlags>
                                </plugin>
                            </plugins>
                        </group>
                        <group name="Extras" type="SelectAll">
                            <plugins>
                                <plugin name="Docs">
                                    <files><file source="readme.txt"/></files>
                                </plugin>
                            </plugins>
                        </group>
                    </optionalFileGroups>
                </installStep>
                <installStep name="Patches">
                    <visible>
                        <flagDependency flag="color" value="red"/>
                    </visible>
                    <optionalFileGroups>
                        <group name="Red Patches" type="SelectAny">
                            <plugins>
                                <plugin name="Red ENB Patch">
                                    <files><file source="red-enb.esp"/></files>
                                </plugin>
                            </plugins>
                        </group>
                    </optionalFileGroups>
                </installStep>
            </installSteps>
            <conditionalFileInstalls>
                <patterns>
                    <pattern>
                        <dependencies>
                            <flagDependency flag="color" value="blue"/>
                        </dependencies>
                        <files><file source="blue-extra.esp"/></files>
                    </pattern>
                </patterns>
            </conditionalFileInstalls>
        </config>
    "#;

    fn pick(step: &str, group: &str, plugins: &[&str]) -> StepSelection {
        StepSelection {
            step: step.to_string(),
            groups: vec![GroupSelection {
                group: group.to_string(),
                plugins: plugins.iter().map(|p| p.to_string()).collect(),
            }],
        }
    }

    #[test]
    fn test_simulation_follows_flags() {
        let model = model(WIZARD);
        let selections = Selections {
            steps: vec![
                pick("Main", "Variant", &["Red"]),
                pick("Patches", "Red Patches", &["Red ENB Patch"]),
            ],
        };

        let plan = simulate(&model, &selections, &mut Environment::new());

        let sources: Vec<&str> = plan.installs.iter().map(|i| i.source.as_str()).collect();
        // Required files, the red variant, the SelectAll docs, the visible
        // patch step; no blue conditional.
        assert_eq!(sources, vec!["core.esp", "red", "readme.txt", "red-enb.esp"]);
        assert_eq!(plan.flags.get("color").map(String::as_str), Some("red"));
        assert!(plan.skipped_steps.is_empty());
    }

    #[test]
    fn test_invisible_step_skipped_and_conditional_applied() {
        let model = model(WIZARD);
        let selections = Selections {
            steps: vec![pick("Main", "Variant", &["Blue"])],
        };

        let plan = simulate(&model, &selections, &mut Environment::new());

        let sources: Vec<&str> = plan.installs.iter().map(|i| i.source.as_str()).collect();
        assert_eq!(sources, vec!["core.esp", "blue", "readme.txt", "blue-extra.esp"]);
        assert_eq!(plan.skipped_steps, vec!["Patches"]);
    }

    #[test]
    fn test_selection_names_match_case_insensitively() {
        let model = model(WIZARD);
        let selections = Selections {
            steps: vec![pick("MAIN", "variant", &["RED"])],
        };

        let plan = simulate(&model, &selections, &mut Environment::new());
        assert!(plan.installs.iter().any(|i| i.source == "red"));
    }

    #[test]
    fn test_required_and_not_usable_override_selection() {
        let model = model(
            r#"
            <config>
                <moduleName>Forced</moduleName>
                <installSteps>
                    <installStep name="S">
                        <optionalFileGroups>
                            <group name="G" type="SelectAny">
                                <plugins>
                                    <plugin name="Mandatory">
                                        <files><file source="must.esp"/></files>
                                        <typeDescriptor><type name="Required"/></typeDescriptor>
                                    </plugin>
                                    <plugin name="Broken">
                                        <files><file source="never.esp"/></files>
                                        <typeDescriptor><type name="NotUsable"/></typeDescriptor>
                                    </plugin>
                                </plugins>
                            </group>
                        </optionalFileGroups>
                    </installStep>
                </installSteps>
            </config>
        "#,
        );

        // The user picked only the unusable option.
        let selections = Selections {
            steps: vec![pick("S", "G", &["Broken"])],
        };
        let plan = simulate(&model, &selections, &mut Environment::new());

        let sources: Vec<&str> = plan.installs.iter().map(|i| i.source.as_str()).collect();
        assert_eq!(sources, vec!["must.esp"]);
    }

    #[test]
    fn test_dependent_descriptor_switches_on_flags() {
        let model = model(
            r#"
            <config>
                <moduleName>Dependent</moduleName>
                <installSteps>
                    <installStep name="S">
                        <optionalFileGroups>
                            <group name="G" type="SelectAny">
                                <plugins>
                                    <plugin name="Patch">
                                        <files><file source="patch.esp"/></files>
                                        <typeDescriptor>
                                            <dependencyType>
                                                <defaultType name="NotUsable"/>
                                                <patterns>
                                                    <pattern>
                                                        <dependencies>
                                                            <flagDependency flag="base" value="on"/>
                                                        </dependencies>
                                                        <type name="Required"/>
                                                    </pattern>
                                                </patterns>
                                            </dependencyType>
                                        </typeDescriptor>
                                    </plugin>
                                </plugins>
                            </group>
                        </optionalFileGroups>
                    </installStep>
                </installSteps>
            </config>
        "#,
        );

        // Default NotUsable: nothing installs even when picked.
        let selections = Selections {
            steps: vec![pick("S", "G", &["Patch"])],
        };
        let plan = simulate(&model, &selections, &mut Environment::new());
        assert!(plan.installs.is_empty());

        // With the flag set the pattern flips the option to Required.
        let mut env = Environment::new();
        env.set_flag("base", "on");
        let plan = simulate(&model, &Selections::default(), &mut env);
        assert_eq!(plan.installs.len(), 1);
        assert_eq!(plan.installs[0].source, "patch.esp");
    }

    #[test]
    fn test_file_dependency_uses_checker() {
        let mut env = Environment::with_file_checker(|file| {
            if file.eq_ignore_ascii_case("SkyUI.esp") {
                FileState::Active
            } else {
                FileState::Missing
            }
        });

        assert!(env.evaluate(&Dependency::File {
            file: "SkyUI.esp".into(),
            state: FileState::Active,
        }));
        assert!(!env.evaluate(&Dependency::File {
            file: "Other.esp".into(),
            state: FileState::Active,
        }));
        assert!(env.evaluate(&Dependency::File {
            file: "Other.esp".into(),
            state: FileState::Missing,
        }));

        env.set_flag("f", "1");
        let composite = Dependency::Composite {
            operator: "Or".into(),
            children: vec![
                Dependency::Flag {
                    flag: "f".into(),
                    value: "2".into(),
                },
                Dependency::File {
                    file: "SkyUI.esp".into(),
                    state: FileState::Active,
                },
            ],
        };
        assert!(env.evaluate(&composite));
    }

    #[test]
    fn test_game_version_comparison() {
        assert!(version_at_least("1.6.640", "1.6.640"));
        assert!(version_at_least("1.6.640", "1.5.97"));
        assert!(!version_at_least("1.5.97", "1.6.640"));
        assert!(version_at_least("1.6.640.0", "1.6.640"));
        assert!(version_at_least("garbage", "garbage"));

        let mut env = Environment::new();
        let dep = Dependency::Game {
            version: "1.6.640".into(),
        };
        // Unknown game version: vacuously true.
        assert!(env.evaluate(&dep));

        env.set_game_version("1.5.97");
        assert!(!env.evaluate(&dep));
        env.set_game_version("1.6.1170");
        assert!(env.evaluate(&dep));
    }
}
