pub mod imaging;
pub mod output_parser;
pub mod parameter_file;
pub mod profile;
pub mod runner;
pub mod service;

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ToolVersion {
    V1,
    V2,
}

impl ToolVersion {
    pub const ALL: [Self; 2] = [Self::V1, Self::V2];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::V1 => "v1",
            Self::V2 => "v2",
        }
    }
}

impl fmt::Display for ToolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ToolVersion {
    type Err = ArtistError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "v1" => Ok(Self::V1),
            "v2" => Ok(Self::V2),
            _ => Err(ArtistError::UnknownToolVersion(value.trim().to_string())),
        }
    }
}

/// Upscale multiplier passed through to the tool. Whole values render
/// without a fractional part (`2`, not `2.0`).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UpscaleFactor(pub f64);

impl fmt::Display for UpscaleFactor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_finite() && self.0.fract() == 0.0 {
            write!(f, "{:.0}", self.0)
        } else {
            write!(f, "{}", self.0)
        }
    }
}

/// One generation job as delivered by the HTTP layer. Values are carried
/// as given; the tool is the judge of whether they make sense.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub tags: String,
    pub seed: String,
    pub width: u32,
    pub height: u32,
    pub steps: u32,
    pub upscale_factor: UpscaleFactor,
    pub tool_version: String,
}

#[derive(Debug, Error)]
pub enum ArtistError {
    #[error("unknown tool version '{0}'")]
    UnknownToolVersion(String),
    #[error("failed to write parameter file {path}: {source}")]
    ParameterFile {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to launch generation tool ({program}): {source}")]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("generation tool I/O failed: {0}")]
    Process(#[source] std::io::Error),
    #[error("filename not found in tool output (exit code {status_code}, {lines} lines scanned)")]
    ArtifactNotFound { status_code: i32, lines: usize },
    #[error("generation tool timed out after {elapsed_ms}ms")]
    ProcessTimeout { elapsed_ms: u64 },
    #[error("failed to read artifact {path}: {source}")]
    ArtifactRead {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to re-encode artifact {path}: {source}")]
    ArtifactImage {
        path: String,
        #[source]
        source: image::ImageError,
    },
    #[error("another generation job is already running")]
    Busy,
    #[error("{0}")]
    Internal(String),
}
