use std::fs;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use img_parts::jpeg::{Jpeg, JpegSegment};
use img_parts::png::{Png, PngChunk};

use crate::ai::Description;
use crate::error::AnnotateError;
use crate::iptc::{self, IptcRecords};

const APP13: u8 = 0xED;
const APPLICATION_SEGMENTS: std::ops::RangeInclusive<u8> = 0xE0..=0xEF;

const TEXT_CHUNK: [u8; 4] = *b"tEXt";
const COMPRESSED_TEXT_CHUNK: [u8; 4] = *b"zTXt";
const DATA_CHUNK: [u8; 4] = *b"IDAT";

pub(crate) fn backup_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push("~");
    PathBuf::from(name)
}

/// Writes object name and keywords into the image's IPTC block in place.
///
/// The original bytes are kept in `<path>~` while the new file is written,
/// and the backup is removed once the write succeeds.
pub(crate) fn embed(path: &Path, description: &Description) -> Result<(), AnnotateError> {
    let original = fs::read(path)?;
    let update = |records: &mut IptcRecords| {
        if let Some(previous) = records.object_name() {
            tracing::debug!(
                path = %path.display(),
                %previous,
                keywords = records.keywords().len(),
                "replacing existing IPTC fields"
            );
        }
        records.set_description(&description.name, &description.keywords)
    };
    let rewritten = if is_png(&original) {
        rewrite_png(path, original.clone().into(), update)?
    } else {
        rewrite_jpeg(path, original.clone().into(), update)?
    };

    let backup = backup_path(path);
    fs::write(&backup, &original)?;
    fs::write(path, rewritten)?;
    if backup.exists() {
        fs::remove_file(&backup)?;
    }

    tracing::debug!(
        path = %path.display(),
        keywords = description.keywords.len(),
        "embedded IPTC fields"
    );
    Ok(())
}

fn is_png(bytes: &[u8]) -> bool {
    bytes.starts_with(&[0x89, b'P', b'N', b'G', b'\r', b'\n', 0x1A, b'\n'])
}

fn rewrite_jpeg(
    path: &Path,
    bytes: Bytes,
    update: impl FnOnce(&mut IptcRecords),
) -> Result<Vec<u8>, AnnotateError> {
    let mut jpeg = Jpeg::from_bytes(bytes).map_err(|e| AnnotateError::metadata(path, e))?;

    let segments = jpeg.segments_mut();
    let existing = segments.iter().position(|segment| {
        segment.marker() == APP13
            && segment.contents().starts_with(iptc::PHOTOSHOP_SIGNATURE)
    });
    let payload = iptc::rewrite_app13(
        existing.map(|i| segments[i].contents().as_ref()),
        update,
    );
    let segment = JpegSegment::new_with_contents(APP13, Bytes::from(payload));
    match existing {
        Some(i) => segments[i] = segment,
        None => {
            // After JFIF/EXIF and any other leading application segments.
            let at = segments
                .iter()
                .position(|s| !APPLICATION_SEGMENTS.contains(&s.marker()))
                .unwrap_or(segments.len());
            segments.insert(at, segment);
        }
    }

    let mut out = Vec::new();
    jpeg.encoder()
        .write_to(&mut out)
        .map_err(|e| AnnotateError::metadata(path, e))?;
    Ok(out)
}

fn rewrite_png(
    path: &Path,
    bytes: Bytes,
    update: impl FnOnce(&mut IptcRecords),
) -> Result<Vec<u8>, AnnotateError> {
    let mut png = Png::from_bytes(bytes).map_err(|e| AnnotateError::metadata(path, e))?;

    let chunks = png.chunks_mut();
    let mut records = chunks
        .iter()
        .filter(|chunk| chunk.kind() == TEXT_CHUNK)
        .find_map(|chunk| profile_text(chunk.contents()))
        .and_then(iptc::decode_png_profile)
        .and_then(|iim| IptcRecords::parse(&iim))
        .unwrap_or_default();
    update(&mut records);

    // A compressed profile cannot be merged, so it is replaced too.
    chunks.retain(|chunk| {
        !((chunk.kind() == TEXT_CHUNK || chunk.kind() == COMPRESSED_TEXT_CHUNK)
            && has_profile_keyword(chunk.contents()))
    });
    let mut contents = iptc::PNG_PROFILE_KEYWORD.as_bytes().to_vec();
    contents.push(0);
    contents.extend_from_slice(iptc::encode_png_profile(&records.encode()).as_bytes());
    let at = chunks
        .iter()
        .position(|chunk| chunk.kind() == DATA_CHUNK)
        .unwrap_or(chunks.len());
    chunks.insert(at, PngChunk::new(TEXT_CHUNK, Bytes::from(contents)));

    let mut out = Vec::new();
    png.encoder()
        .write_to(&mut out)
        .map_err(|e| AnnotateError::metadata(path, e))?;
    Ok(out)
}

fn has_profile_keyword(contents: &[u8]) -> bool {
    contents
        .strip_prefix(iptc::PNG_PROFILE_KEYWORD.as_bytes())
        .is_some_and(|rest| rest.first() == Some(&0))
}

fn profile_text(contents: &[u8]) -> Option<&str> {
    if !has_profile_keyword(contents) {
        return None;
    }
    std::str::from_utf8(&contents[iptc::PNG_PROFILE_KEYWORD.len() + 1..]).ok()
}
