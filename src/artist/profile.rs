use std::collections::BTreeMap;
use std::path::PathBuf;

use regex::Regex;

use super::runner::CommandSpec;
use super::{ArtistError, ToolVersion};

pub const PARAMETER_FILE_PLACEHOLDER: &str = "{parameter_file}";

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommandTemplate {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: BTreeMap<String, String>,
}

/// Everything needed to drive one version of the generation tool.
#[derive(Debug, Clone)]
pub struct ToolProfile {
    pub version: ToolVersion,
    pub parameter_file: PathBuf,
    pub invocation: CommandTemplate,
    pub output_pattern: Regex,
}

impl ToolProfile {
    pub fn command_spec(&self) -> CommandSpec {
        let parameter_file = self.parameter_file.to_string_lossy();
        CommandSpec {
            program: self.invocation.program.clone(),
            args: self
                .invocation
                .args
                .iter()
                .map(|arg| arg.replace(PARAMETER_FILE_PLACEHOLDER, parameter_file.as_ref()))
                .collect(),
            cwd: self.invocation.cwd.clone(),
            env: self
                .invocation
                .env
                .iter()
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    profiles: BTreeMap<ToolVersion, ToolProfile>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_profile(mut self, profile: ToolProfile) -> Self {
        self.insert(profile);
        self
    }

    pub fn insert(&mut self, profile: ToolProfile) -> Option<ToolProfile> {
        self.profiles.insert(profile.version, profile)
    }

    /// Selector strings that do not parse, and versions without a
    /// configured profile, are both unknown.
    pub fn resolve(&self, selector: &str) -> Result<&ToolProfile, ArtistError> {
        let version = selector.parse::<ToolVersion>()?;
        self.profiles
            .get(&version)
            .ok_or_else(|| ArtistError::UnknownToolVersion(selector.trim().to_string()))
    }

    pub fn versions(&self) -> Vec<ToolVersion> {
        self.profiles.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(version: ToolVersion) -> ToolProfile {
        ToolProfile {
            version,
            parameter_file: PathBuf::from("/srv/invokeai/params.txt"),
            invocation: CommandTemplate {
                program: String::from("/opt/conda/envs/invokeai/bin/python"),
                args: vec![
                    String::from("scripts/invoke.py"),
                    String::from("--from_file={parameter_file}"),
                ],
                cwd: Some(PathBuf::from("/srv/invokeai")),
                env: BTreeMap::from([(
                    String::from("INVOKEAI_ROOT"),
                    String::from("/srv/invokeai"),
                )]),
            },
            output_pattern: Regex::new(r"(?P<path>/\S*outputs/\S+png)").expect("valid regex"),
        }
    }

    #[test]
    fn command_spec_substitutes_parameter_file_placeholder() {
        let spec = profile(ToolVersion::V1).command_spec();
        assert_eq!(spec.program, "/opt/conda/envs/invokeai/bin/python");
        assert_eq!(
            spec.args,
            vec![
                String::from("scripts/invoke.py"),
                String::from("--from_file=/srv/invokeai/params.txt"),
            ]
        );
        assert_eq!(spec.cwd, Some(PathBuf::from("/srv/invokeai")));
        assert_eq!(
            spec.env,
            vec![(String::from("INVOKEAI_ROOT"), String::from("/srv/invokeai"))]
        );
    }

    #[test]
    fn resolve_finds_configured_version() {
        let registry = ToolRegistry::new().with_profile(profile(ToolVersion::V2));
        let resolved = registry.resolve("V2").expect("v2 should resolve");
        assert_eq!(resolved.version, ToolVersion::V2);
    }

    #[test]
    fn resolve_rejects_parseable_but_unconfigured_version() {
        let registry = ToolRegistry::new().with_profile(profile(ToolVersion::V2));
        let err = registry.resolve("v1").expect_err("v1 is not configured");
        assert!(matches!(err, ArtistError::UnknownToolVersion(ref v) if v == "v1"));
    }

    #[test]
    fn resolve_rejects_unparseable_selector() {
        let registry = ToolRegistry::new()
            .with_profile(profile(ToolVersion::V1))
            .with_profile(profile(ToolVersion::V2));
        let err = registry.resolve("v9").expect_err("v9 is unknown");
        assert!(matches!(err, ArtistError::UnknownToolVersion(_)));
        assert_eq!(registry.versions(), vec![ToolVersion::V1, ToolVersion::V2]);
    }
}
