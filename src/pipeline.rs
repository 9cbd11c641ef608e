use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;

use crate::ai::{Describe, StillRequest};
use crate::error::AnnotateError;
use crate::media::{MediaItem, MediaKind};
use crate::{image_meta, video};

/// Outcome for a file, or for each file of a directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub(crate) enum ProcessResult {
    Labels { labels: String },
    Error { error: String },
    Batch(BTreeMap<String, ProcessResult>),
}

/// Everything the pipeline needs besides the path itself.
pub(crate) struct Annotator<D> {
    pub(crate) describer: D,
    pub(crate) exiftool: PathBuf,
}

impl<D: Describe + Sync> Annotator<D> {
    /// Annotates a single file, or every supported file directly inside a
    /// directory.
    pub(crate) async fn process_path(
        &self,
        path: &Path,
        location: Option<&str>,
    ) -> Result<ProcessResult, AnnotateError> {
        if path.is_dir() {
            self.process_dir(path, location).await
        } else if path.is_file() {
            self.process_file(path, location, None).await
        } else {
            Ok(ProcessResult::Error {
                error: format!("Path '{}' is not a valid file or directory.", path.display()),
            })
        }
    }

    async fn process_dir(
        &self,
        dir: &Path,
        location: Option<&str>,
    ) -> Result<ProcessResult, AnnotateError> {
        let files = eligible_files(dir)?;
        tracing::info!(dir = %dir.display(), files = files.len(), "processing directory");

        let progress = ProgressBar::new(files.len() as u64);
        if let Ok(style) =
            ProgressStyle::with_template("{spinner:.green} {bar:40.cyan/blue} {pos}/{len} {msg}")
        {
            progress.set_style(style.progress_chars("##-"));
        }

        let mut results = BTreeMap::new();
        for file in files {
            let file_name = file
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default();
            progress.set_message(file_name.clone());
            let result = self.process_file(&file, location, Some(&progress)).await?;
            results.insert(file_name, result);
            progress.inc(1);
        }
        progress.finish_and_clear();

        Ok(ProcessResult::Batch(results))
    }

    async fn process_file(
        &self,
        path: &Path,
        location: Option<&str>,
        progress: Option<&ProgressBar>,
    ) -> Result<ProcessResult, AnnotateError> {
        let Some(mut item) = MediaItem::new(path) else {
            return Ok(ProcessResult::Error {
                error: format!("Unsupported file type: '{}'", path.display()),
            });
        };

        let file_name = item.file_name();
        let image = fs::read(item.derive_still()?)?;
        let described = self
            .describer
            .describe(StillRequest {
                image: &image,
                mime_type: item.still_mime_type(),
                file_name: &file_name,
                location,
            })
            .await?;

        match item.kind {
            MediaKind::Image => image_meta::embed(&item.path, &described.description)?,
            MediaKind::Video => {
                video::embed(&item.path, &described.description, &self.exiftool).await?
            }
        }
        // Drops the temporary frame of a video.
        drop(item);

        let name = &described.description.name;
        let report = || tracing::info!(file = %file_name, title = %name, "embedded metadata");
        // Keeps the line from being overdrawn by the bar.
        match progress {
            Some(progress) => progress.suspend(report),
            None => report(),
        }

        Ok(ProcessResult::Labels {
            labels: described.raw,
        })
    }
}

/// Supported regular files directly inside `dir`, sorted by name.
fn eligible_files(dir: &Path) -> Result<Vec<PathBuf>, AnnotateError> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && MediaKind::from_path(&path).is_some() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}
