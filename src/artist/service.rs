use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use serde::Deserialize;
use tokio::sync::{Mutex, MutexGuard};
use tracing::info;

use super::imaging::{prepare_artifact, ResponseFormat};
use super::parameter_file::write_parameter_file;
use super::profile::ToolRegistry;
use super::runner::{JobRunner, SharedToolCommandRunner};
use super::{ArtistError, GenerationRequest};

/// What a caller sees while another job holds the tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BusyPolicy {
    #[default]
    Queue,
    Reject,
}

impl BusyPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queue => "queue",
            Self::Reject => "reject",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GenerationOptions {
    pub busy_policy: BusyPolicy,
    pub response_format: ResponseFormat,
    pub response_max_side: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedImage {
    pub artifact_path: PathBuf,
    pub bytes: Vec<u8>,
    pub content_type: &'static str,
}

/// Entry point for one generation request. Writing the parameter file,
/// running the tool and reading the artifact happen under one lock, so at
/// most one job touches a parameter file at a time.
#[derive(Clone)]
pub struct GenerationService {
    registry: Arc<ToolRegistry>,
    jobs: JobRunner,
    options: GenerationOptions,
    in_flight: Arc<Mutex<()>>,
}

impl GenerationService {
    pub fn new(
        registry: Arc<ToolRegistry>,
        runner: SharedToolCommandRunner,
        options: GenerationOptions,
    ) -> Self {
        Self {
            registry,
            jobs: JobRunner::new(runner),
            options,
            in_flight: Arc::new(Mutex::new(())),
        }
    }

    pub fn registry(&self) -> &ToolRegistry {
        self.registry.as_ref()
    }

    pub fn options(&self) -> GenerationOptions {
        self.options
    }

    pub async fn generate(
        &self,
        request: &GenerationRequest,
    ) -> Result<GeneratedImage, ArtistError> {
        let profile = self.registry.resolve(request.tool_version.as_str())?;
        let started = Instant::now();

        let guard = self.acquire().await?;
        write_parameter_file(profile, request).await?;
        let artifact_path = self.jobs.run(profile).await?;
        let bytes = tokio::fs::read(artifact_path.as_path())
            .await
            .map_err(|source| ArtistError::ArtifactRead {
                path: artifact_path.display().to_string(),
                source,
            })?;
        drop(guard);

        info!(
            version = %profile.version,
            artifact = %artifact_path.display(),
            bytes = bytes.len(),
            elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            "generation job finished"
        );

        let options = self.options;
        let path_for_encode = artifact_path.clone();
        let encoded = tokio::task::spawn_blocking(move || {
            prepare_artifact(
                path_for_encode.as_path(),
                bytes,
                options.response_format,
                options.response_max_side,
            )
        })
        .await
        .map_err(|join_error| {
            ArtistError::Internal(format!("artifact encoding task failed: {join_error}"))
        })??;

        Ok(GeneratedImage {
            artifact_path,
            bytes: encoded.bytes,
            content_type: encoded.content_type,
        })
    }

    async fn acquire(&self) -> Result<MutexGuard<'_, ()>, ArtistError> {
        match self.options.busy_policy {
            BusyPolicy::Queue => Ok(self.in_flight.lock().await),
            BusyPolicy::Reject => self.in_flight.try_lock().map_err(|_| ArtistError::Busy),
        }
    }
}
