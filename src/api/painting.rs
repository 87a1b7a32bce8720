use axum::extract::rejection::FormRejection;
use axum::extract::{Form, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use serde_json::Value;

use crate::api::error::ErrorKind;
use crate::api::handler_utils::{
    error_response, infra_error, internal_error, validation_error, ApiObject,
};
use crate::api::server::AppState;
use crate::artist::{ArtistError, GenerationRequest, UpscaleFactor};

/// Form body posted by the upstream scheduler. `idea` is sent but unused.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PaintingForm {
    #[serde(default)]
    pub idea: Option<String>,
    #[serde(default)]
    pub tags: Option<String>,
    #[serde(default)]
    pub seed: Option<String>,
    #[serde(default)]
    pub width: Option<String>,
    #[serde(default)]
    pub height: Option<String>,
    #[serde(default)]
    pub steps: Option<String>,
    #[serde(default)]
    pub upscale: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
}

pub async fn painting_handler(
    State(state): State<AppState>,
    payload: Result<Form<PaintingForm>, FormRejection>,
) -> Response {
    let Form(payload) = match payload {
        Ok(form) => form,
        Err(rejection) => {
            return validation_error(format!("Invalid form body: {}", rejection.body_text()))
                .into_response();
        }
    };
    let request = match build_generation_request(&payload) {
        Ok(request) => request,
        Err(message) => return validation_error(message).into_response(),
    };

    match state.generation.generate(&request).await {
        Ok(image) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, image.content_type)],
            image.bytes,
        )
            .into_response(),
        Err(error) => map_artist_error(error).into_response(),
    }
}

pub fn build_generation_request(payload: &PaintingForm) -> Result<GenerationRequest, String> {
    let tags = required_text(payload.tags.as_deref(), "tags")?;
    let seed = required_text(payload.seed.as_deref(), "seed")?;
    if seed.parse::<u64>().is_err() {
        return Err(String::from("Field 'seed' must be a non-negative integer"));
    }
    let width = positive_integer(payload.width.as_deref(), "width")?;
    let height = positive_integer(payload.height.as_deref(), "height")?;
    let steps = positive_integer(payload.steps.as_deref(), "steps")?;
    let upscale = required_text(payload.upscale.as_deref(), "upscale")?
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite() && *v > 0.0)
        .ok_or_else(|| String::from("Field 'upscale' must be a positive number"))?;
    let tool_version = required_text(payload.version.as_deref(), "version")?;

    Ok(GenerationRequest {
        tags,
        seed,
        width,
        height,
        steps,
        upscale_factor: UpscaleFactor(upscale),
        tool_version,
    })
}

fn required_text(raw: Option<&str>, field: &str) -> Result<String, String> {
    raw.map(str::trim)
        .filter(|v| !v.is_empty())
        .map(ToOwned::to_owned)
        .ok_or_else(|| format!("Field '{field}' is required"))
}

fn positive_integer(raw: Option<&str>, field: &str) -> Result<u32, String> {
    required_text(raw, field)?
        .parse::<u32>()
        .ok()
        .filter(|v| *v > 0)
        .ok_or_else(|| format!("Field '{field}' must be a positive integer"))
}

fn map_artist_error(error: ArtistError) -> ApiObject<Value> {
    match error {
        ArtistError::UnknownToolVersion(version) => error_response(
            StatusCode::BAD_REQUEST,
            ErrorKind::Validation,
            "unknown_tool_version",
            format!("Unknown tool version '{version}'"),
        ),
        ArtistError::Busy => error_response(
            StatusCode::CONFLICT,
            ErrorKind::Policy,
            "generation_busy",
            "Another generation job is already running",
        ),
        error @ ArtistError::ParameterFile { .. } => infra_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "parameter_file_unwritable",
            "Failed to write generation parameters",
            error.to_string(),
        ),
        error @ ArtistError::Launch { .. } => infra_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "tool_launch_failed",
            "Failed to launch generation tool",
            error.to_string(),
        ),
        error @ ArtistError::Process(_) => infra_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "tool_io_failed",
            "Generation tool I/O failed",
            error.to_string(),
        ),
        error @ ArtistError::ArtifactNotFound { .. } => infra_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "artifact_not_found",
            "filename not found",
            error.to_string(),
        ),
        error @ ArtistError::ProcessTimeout { .. } => infra_error(
            StatusCode::GATEWAY_TIMEOUT,
            "tool_timeout",
            "Generation tool timed out",
            error.to_string(),
        ),
        error @ ArtistError::ArtifactRead { .. } => infra_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "artifact_unreadable",
            "Generated artifact could not be read",
            error.to_string(),
        ),
        error @ ArtistError::ArtifactImage { .. } => infra_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "artifact_image_failed",
            "Generated artifact could not be re-encoded",
            error.to_string(),
        ),
        ArtistError::Internal(detail) => internal_error(detail),
    }
}
