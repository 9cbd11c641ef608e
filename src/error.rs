use std::path::PathBuf;
use std::process::ExitStatus;
use std::time::Duration;

use async_openai::error::OpenAIError;
use ffmpeg_next as ffmpeg;
use thiserror::Error;

/// Failures that abort the pipeline for a media item.
///
/// Unsupported files and bad paths are not errors; they surface as
/// [`crate::pipeline::ProcessResult::Error`] instead.
#[derive(Debug, Error)]
pub(crate) enum AnnotateError {
    #[error("No decodable video frame in {0}")]
    Extraction(PathBuf),

    #[error("Vision request failed: {0}")]
    Request(#[from] OpenAIError),

    #[error("Vision request timed out after {0:?}")]
    Timeout(Duration),

    #[error("No content in response from the vision model")]
    EmptyResponse,

    #[error("Malformed vision response: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Failed to rewrite metadata in {path}: {reason}")]
    Metadata { path: PathBuf, reason: String },

    #[error("{tool} exited with {status}: {stderr}")]
    ExternalTool {
        tool: String,
        status: ExitStatus,
        stderr: String,
    },

    #[error("FFmpeg error: {0}")]
    Ffmpeg(#[from] ffmpeg::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl AnnotateError {
    pub(crate) fn metadata(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::Metadata {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}
