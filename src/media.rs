use std::path::{Path, PathBuf};

use crate::capture::{self, StillFrame};
use crate::error::AnnotateError;

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png"];
const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mov", "m4v"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MediaKind {
    Image,
    Video,
}

impl MediaKind {
    /// Classifies a path by its extension, case-insensitively.
    pub(crate) fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
            Some(Self::Image)
        } else if VIDEO_EXTENSIONS.contains(&ext.as_str()) {
            Some(Self::Video)
        } else {
            None
        }
    }
}

/// A file going through the pipeline together with the still image that
/// represents it.
///
/// For videos the still is a temporary frame owned by the item, so it is
/// removed as soon as the item goes out of scope.
pub(crate) struct MediaItem {
    pub(crate) path: PathBuf,
    pub(crate) kind: MediaKind,
    frame: Option<StillFrame>,
}

impl MediaItem {
    pub(crate) fn new(path: &Path) -> Option<Self> {
        Some(Self {
            path: path.to_path_buf(),
            kind: MediaKind::from_path(path)?,
            frame: None,
        })
    }

    pub(crate) fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.display().to_string())
    }

    /// Makes sure a still image exists, decoding the first frame of a video.
    pub(crate) fn derive_still(&mut self) -> Result<&Path, AnnotateError> {
        if self.kind == MediaKind::Video && self.frame.is_none() {
            self.frame = Some(capture::extract_first_frame(&self.path)?);
        }
        Ok(self.still_path())
    }

    pub(crate) fn still_path(&self) -> &Path {
        match &self.frame {
            Some(frame) => frame.path(),
            None => &self.path,
        }
    }

    pub(crate) fn still_mime_type(&self) -> &'static str {
        let is_png = self
            .still_path()
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("png"));
        if is_png {
            "image/png"
        } else {
            "image/jpeg"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_by_extension_ignoring_case() {
        assert_eq!(
            MediaKind::from_path(Path::new("a/beach.JPG")),
            Some(MediaKind::Image)
        );
        assert_eq!(
            MediaKind::from_path(Path::new("sunset.png")),
            Some(MediaKind::Image)
        );
        assert_eq!(
            MediaKind::from_path(Path::new("clip.Mov")),
            Some(MediaKind::Video)
        );
        assert_eq!(MediaKind::from_path(Path::new("notes.txt")), None);
        assert_eq!(MediaKind::from_path(Path::new("README")), None);
    }

    #[test]
    fn image_items_use_the_source_as_still() {
        let mut item = MediaItem::new(Path::new("/tmp/photo.png")).unwrap();
        assert_eq!(item.derive_still().unwrap(), Path::new("/tmp/photo.png"));
        assert_eq!(item.still_mime_type(), "image/png");
        assert_eq!(item.file_name(), "photo.png");
    }
}
