use std::io::Cursor;
use std::path::Path;

use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat};
use serde::Deserialize;

use super::ArtistError;

const FALLBACK_CONTENT_TYPE: &str = "application/octet-stream";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseFormat {
    #[default]
    Original,
    Png,
    Jpeg,
}

impl ResponseFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Original => "original",
            Self::Png => "png",
            Self::Jpeg => "jpeg",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedImage {
    pub bytes: Vec<u8>,
    pub content_type: &'static str,
}

/// Turns raw artifact bytes into the response body. `Original` without a
/// size cap is a passthrough; anything else decodes and re-encodes.
pub fn prepare_artifact(
    artifact_path: &Path,
    bytes: Vec<u8>,
    format: ResponseFormat,
    max_side: Option<u32>,
) -> Result<EncodedImage, ArtistError> {
    let source_format = image::guess_format(bytes.as_slice()).ok();
    if format == ResponseFormat::Original && max_side.is_none() {
        return Ok(EncodedImage {
            content_type: source_format.map_or(FALLBACK_CONTENT_TYPE, |f| f.to_mime_type()),
            bytes,
        });
    }

    let image_error = |source| ArtistError::ArtifactImage {
        path: artifact_path.display().to_string(),
        source,
    };
    let decoded = image::load_from_memory(bytes.as_slice()).map_err(image_error)?;
    let resized = match max_side.filter(|side| *side > 0) {
        Some(side) if decoded.width() > side || decoded.height() > side => {
            decoded.resize(side, side, FilterType::Lanczos3)
        }
        _ => decoded,
    };

    let target = match format {
        ResponseFormat::Png => ImageFormat::Png,
        ResponseFormat::Jpeg => ImageFormat::Jpeg,
        ResponseFormat::Original => match source_format {
            Some(ImageFormat::Jpeg) => ImageFormat::Jpeg,
            _ => ImageFormat::Png,
        },
    };
    let encodable = if target == ImageFormat::Jpeg {
        DynamicImage::ImageRgb8(resized.to_rgb8())
    } else {
        resized
    };

    let mut out = Cursor::new(Vec::new());
    encodable.write_to(&mut out, target).map_err(image_error)?;
    Ok(EncodedImage {
        bytes: out.into_inner(),
        content_type: target.to_mime_type(),
    })
}
