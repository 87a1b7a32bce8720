use super::profile::ToolProfile;
use super::{ArtistError, GenerationRequest};

/// `<tags> -S<seed> -W<width> -H<height> -s<steps> -U<upscale>`
pub fn render_job_line(request: &GenerationRequest) -> String {
    format!(
        "{} -S{} -W{} -H{} -s{} -U{}",
        single_line(request.tags.as_str()),
        single_line(request.seed.as_str()),
        request.width,
        request.height,
        request.steps,
        request.upscale_factor,
    )
}

/// Replaces the profile's parameter file with exactly one job line.
/// Missing parent directories are an error, not something to create.
pub async fn write_parameter_file(
    profile: &ToolProfile,
    request: &GenerationRequest,
) -> Result<(), ArtistError> {
    let mut line = render_job_line(request);
    line.push('\n');
    tokio::fs::write(profile.parameter_file.as_path(), line.as_bytes())
        .await
        .map_err(|source| ArtistError::ParameterFile {
            path: profile.parameter_file.display().to_string(),
            source,
        })
}

// The tool reads one job per line.
fn single_line(value: &str) -> String {
    value.replace("\r\n", " ").replace(['\r', '\n'], " ")
}
