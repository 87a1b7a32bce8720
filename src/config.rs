use std::collections::BTreeMap;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::artist::imaging::ResponseFormat;
use crate::artist::profile::{CommandTemplate, ToolProfile, ToolRegistry};
use crate::artist::service::{BusyPolicy, GenerationOptions};
use crate::artist::ToolVersion;

pub const CONFIG_PATH_ENV: &str = "ARTIST_CONFIG";
pub const BIND_ENV: &str = "ARTIST_BIND";
pub const DEFAULT_CONFIG_PATH: &str = "config/artist.toml";

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ArtistConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub tools: BTreeMap<String, ToolProfileConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ServerConfig {
    pub bind: String,
    pub job_timeout_secs: u64,
    pub busy_policy: BusyPolicy,
    pub response_format: ResponseFormat,
    pub response_max_side: Option<u32>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: String::from("0.0.0.0:8083"),
            job_timeout_secs: 600,
            busy_policy: BusyPolicy::Queue,
            response_format: ResponseFormat::Original,
            response_max_side: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ToolProfileConfig {
    pub parameter_file: PathBuf,
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub cwd: Option<PathBuf>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    pub output_pattern: String,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("failed to read artist config '{path}': {message}")]
    ReadFile { path: String, message: String },
    #[error("failed to parse artist config TOML '{path}': {message}")]
    ParseToml { path: String, message: String },
    #[error("artist config declares unknown tool version '{0}'")]
    UnknownToolVersion(String),
    #[error("tool '{version}' output_pattern is not a valid regex: {message}")]
    InvalidPattern { version: String, message: String },
    #[error("tool '{version}' field '{field}' must not be empty")]
    EmptyField { version: String, field: String },
    #[error("artist config must declare at least one [tools.<version>] table")]
    NoTools,
    #[error("invalid bind address '{value}': {message}")]
    InvalidBind { value: String, message: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConfigSummary {
    pub bind: String,
    pub job_timeout_secs: u64,
    pub busy_policy: &'static str,
    pub response_format: &'static str,
    pub response_max_side: Option<u32>,
    pub tools: Vec<ToolSummary>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolSummary {
    pub version: &'static str,
    pub parameter_file: String,
    pub program: String,
    pub output_pattern: String,
}

pub fn resolve_config_path(explicit_path: Option<&str>) -> PathBuf {
    explicit_path
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .or_else(|| {
            std::env::var(CONFIG_PATH_ENV)
                .ok()
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .map(PathBuf::from)
        })
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

pub fn load_config(path: &Path) -> Result<ArtistConfig, ConfigError> {
    let raw = fs::read_to_string(path).map_err(|error| ConfigError::ReadFile {
        path: path.display().to_string(),
        message: error.to_string(),
    })?;
    parse_config(raw.as_str(), path)
}

pub fn parse_config(raw: &str, path: &Path) -> Result<ArtistConfig, ConfigError> {
    toml::from_str::<ArtistConfig>(raw).map_err(|error| ConfigError::ParseToml {
        path: path.display().to_string(),
        message: error.to_string(),
    })
}

impl ArtistConfig {
    pub fn build_registry(&self) -> Result<ToolRegistry, ConfigError> {
        if self.tools.is_empty() {
            return Err(ConfigError::NoTools);
        }
        let mut registry = ToolRegistry::new();
        for (key, tool) in &self.tools {
            let version = key
                .parse::<ToolVersion>()
                .map_err(|_| ConfigError::UnknownToolVersion(key.clone()))?;
            registry.insert(tool.to_profile(version)?);
        }
        Ok(registry)
    }

    /// `ARTIST_BIND` wins over the file.
    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        let value = std::env::var(BIND_ENV)
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| self.server.bind.clone());
        value
            .parse::<SocketAddr>()
            .map_err(|error| ConfigError::InvalidBind {
                message: error.to_string(),
                value,
            })
    }

    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.server.job_timeout_secs.max(1))
    }

    pub fn generation_options(&self) -> GenerationOptions {
        GenerationOptions {
            busy_policy: self.server.busy_policy,
            response_format: self.server.response_format,
            response_max_side: self.server.response_max_side,
        }
    }

    pub fn summary(&self) -> Result<ConfigSummary, ConfigError> {
        let registry = self.build_registry()?;
        let tools = registry
            .versions()
            .into_iter()
            .filter_map(|version| {
                registry
                    .resolve(version.as_str())
                    .ok()
                    .map(|profile| ToolSummary {
                        version: version.as_str(),
                        parameter_file: profile.parameter_file.display().to_string(),
                        program: profile.invocation.program.clone(),
                        output_pattern: profile.output_pattern.as_str().to_string(),
                    })
            })
            .collect();
        Ok(ConfigSummary {
            bind: self.server.bind.clone(),
            job_timeout_secs: self.job_timeout().as_secs(),
            busy_policy: self.server.busy_policy.as_str(),
            response_format: self.server.response_format.as_str(),
            response_max_side: self.server.response_max_side,
            tools,
        })
    }
}

impl ToolProfileConfig {
    fn to_profile(&self, version: ToolVersion) -> Result<ToolProfile, ConfigError> {
        let empty = |field: &str| ConfigError::EmptyField {
            version: version.to_string(),
            field: field.to_string(),
        };
        if self.program.trim().is_empty() {
            return Err(empty("program"));
        }
        if self.parameter_file.as_os_str().is_empty() {
            return Err(empty("parameter_file"));
        }
        if self.output_pattern.trim().is_empty() {
            return Err(empty("output_pattern"));
        }
        let output_pattern =
            Regex::new(self.output_pattern.as_str()).map_err(|error| ConfigError::InvalidPattern {
                version: version.to_string(),
                message: error.to_string(),
            })?;

        Ok(ToolProfile {
            version,
            parameter_file: self.parameter_file.clone(),
            invocation: CommandTemplate {
                program: self.program.trim().to_string(),
                args: self.args.clone(),
                cwd: self.cwd.clone(),
                env: self.env.clone(),
            },
            output_pattern,
        })
    }
}
