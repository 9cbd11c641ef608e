use std::path::Path;
use std::sync::OnceLock;

use ffmpeg::util::frame::video::Video;
use ffmpeg::{codec, format, media, software};
use ffmpeg_next::{self as ffmpeg};
use image::codecs::jpeg;
use image::{ImageBuffer, RgbImage};
use tempfile::TempPath;

use crate::error::AnnotateError;

static INIT: OnceLock<Result<(), ffmpeg::Error>> = OnceLock::new();

pub(crate) fn init() -> Result<(), AnnotateError> {
    (*INIT.get_or_init(ffmpeg::init))?;
    Ok(())
}

/// A decoded video frame saved as a temporary JPEG.
///
/// The file is removed when the value is dropped.
pub(crate) struct StillFrame {
    path: TempPath,
}

impl StillFrame {
    fn write(image: &RgbImage, dir: &Path) -> Result<Self, AnnotateError> {
        let mut file = tempfile::Builder::new()
            .prefix("stocktag-frame-")
            .suffix(".jpg")
            .tempfile_in(dir)?;
        jpeg::JpegEncoder::new_with_quality(&mut file, 95).encode(
            image.as_raw(),
            image.width(),
            image.height(),
            image::ExtendedColorType::Rgb8,
        )?;
        Ok(Self {
            path: file.into_temp_path(),
        })
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }
}

pub(crate) fn extract_first_frame(input_path: &Path) -> Result<StillFrame, AnnotateError> {
    extract_first_frame_in(input_path, &std::env::temp_dir())
}

pub(crate) fn extract_first_frame_in(
    input_path: &Path,
    dir: &Path,
) -> Result<StillFrame, AnnotateError> {
    init()?;
    let image = decode_first_frame(input_path)?;
    let frame = StillFrame::write(&image, dir)?;
    tracing::debug!(
        video = %input_path.display(),
        still = %frame.path().display(),
        "extracted first frame"
    );
    Ok(frame)
}

fn decode_first_frame(input_path: &Path) -> Result<RgbImage, AnnotateError> {
    let no_frame = || AnnotateError::Extraction(input_path.to_path_buf());

    let mut input = format::input(&input_path)?;
    let (video_stream_index, mut decoder) = {
        let video_stream = input
            .streams()
            .best(media::Type::Video)
            .ok_or_else(no_frame)?;
        let decoder = codec::context::Context::from_parameters(video_stream.parameters())?
            .decoder()
            .video()?;
        (video_stream.index(), decoder)
    };

    let mut decoded = Video::empty();
    for (stream, packet) in input.packets() {
        if stream.index() != video_stream_index {
            continue;
        }
        if let Err(err) = decoder.send_packet(&packet) {
            tracing::debug!(%err, "skipping undecodable packet");
            continue;
        }
        if decoder.receive_frame(&mut decoded).is_ok() {
            return to_rgb_image(&decoded).ok_or_else(no_frame);
        }
    }

    decoder.send_eof()?;
    if decoder.receive_frame(&mut decoded).is_ok() {
        return to_rgb_image(&decoded).ok_or_else(no_frame);
    }
    Err(no_frame())
}

fn to_rgb_image(decoded: &Video) -> Option<RgbImage> {
    let mut scaler = software::scaling::context::Context::get(
        decoded.format(),
        decoded.width(),
        decoded.height(),
        format::Pixel::RGB24,
        decoded.width(),
        decoded.height(),
        software::scaling::Flags::BILINEAR,
    )
    .ok()?;
    let mut rgb_frame = Video::empty();
    scaler.run(decoded, &mut rgb_frame).ok()?;

    // Rows may be padded past width * 3.
    let width = rgb_frame.width();
    let height = rgb_frame.height();
    let row_len = width as usize * 3;
    let stride = rgb_frame.stride(0);
    let mut pixels = Vec::with_capacity(row_len * height as usize);
    for row in rgb_frame.data(0).chunks(stride).take(height as usize) {
        pixels.extend_from_slice(row.get(..row_len)?);
    }
    ImageBuffer::from_raw(width, height, pixels)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entries(dir: &Path) -> usize {
        std::fs::read_dir(dir).unwrap().count()
    }

    #[test]
    fn still_frame_is_removed_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let image = RgbImage::from_pixel(16, 8, image::Rgb([200, 40, 40]));

        let frame = StillFrame::write(&image, dir.path()).unwrap();
        let path = frame.path().to_path_buf();
        assert!(path.exists());
        assert_eq!(path.extension().unwrap(), "jpg");
        let decoded = image::open(&path).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (16, 8));

        drop(frame);
        assert!(!path.exists());
        assert_eq!(entries(dir.path()), 0);
    }

    #[test]
    fn undecodable_video_leaves_no_frame_behind() {
        let media = tempfile::tempdir().unwrap();
        let scratch = tempfile::tempdir().unwrap();
        let bogus = media.path().join("clip.mp4");
        std::fs::write(&bogus, b"definitely not an mp4 container").unwrap();

        assert!(extract_first_frame_in(&bogus, scratch.path()).is_err());
        assert_eq!(entries(scratch.path()), 0);
    }

    #[test]
    fn first_frame_of_clip_is_written_and_cleaned_up() {
        let media = tempfile::tempdir().unwrap();
        let scratch = tempfile::tempdir().unwrap();
        let clip = media.path().join("clip.mp4");
        crate::video::tests::write_clip(&clip, 64, 48, 5);

        let frame = extract_first_frame_in(&clip, scratch.path()).unwrap();
        let path = frame.path().to_path_buf();
        assert!(path.starts_with(scratch.path()));
        let decoded = image::open(&path).unwrap().to_rgb8();
        assert_eq!(decoded.dimensions(), (64, 48));
        // Gradient runs dark to light left to right.
        assert!(decoded.get_pixel(2, 24)[0] < decoded.get_pixel(61, 24)[0]);

        drop(frame);
        assert_eq!(entries(scratch.path()), 0);
    }
}
