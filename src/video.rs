use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use ffmpeg_next::{self as ffmpeg, codec, encoder, format, media, Dictionary, Error, Rational};
use tempfile::TempPath;
use tokio::process::Command;

use crate::ai::Description;
use crate::capture;
use crate::error::AnnotateError;

/// Container tags written by the remux pass.
pub(crate) fn container_tags(description: &Description) -> Vec<(&'static str, String)> {
    vec![
        ("title", description.name.clone()),
        ("keywords", description.keywords.join(",")),
        ("comment", description.name.clone()),
        ("description", description.name.clone()),
    ]
}

/// Arguments for the XMP pass: one `Subject` assignment per keyword, in order.
pub(crate) fn exiftool_args(path: &Path, description: &Description) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec!["-overwrite_original".into()];
    args.extend(
        description
            .keywords
            .iter()
            .map(|keyword| format!("-XMP-dc:Subject={keyword}").into()),
    );
    args.push(path.as_os_str().to_owned());
    args
}

/// Embeds the description into a video in place.
///
/// Container tags are rewritten by a stream-copy remux, then the XMP subject
/// list is overwritten with `exiftool`.
pub(crate) async fn embed(
    path: &Path,
    description: &Description,
    exiftool: &Path,
) -> Result<(), AnnotateError> {
    remux_with_tags(path, &container_tags(description))?;
    write_subjects(path, description, exiftool).await
}

fn remux_with_tags(path: &Path, tags: &[(&str, String)]) -> Result<(), AnnotateError> {
    capture::init()?;
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let extension = path
        .extension()
        .map(|ext| format!(".{}", ext.to_string_lossy()))
        .unwrap_or_default();
    // Same directory so the final rename stays on one filesystem.
    let remuxed = tempfile::Builder::new()
        .prefix(".stocktag-remux-")
        .suffix(&extension)
        .tempfile_in(&parent)?
        .into_temp_path();

    copy_streams(path, &remuxed, tags)?;
    replace_keeping_permissions(remuxed, path)?;
    tracing::debug!(path = %path.display(), ?tags, "remuxed with container tags");
    Ok(())
}

/// Renames `replacement` over `path`, carrying over the original's permissions.
fn replace_keeping_permissions(replacement: TempPath, path: &Path) -> Result<(), AnnotateError> {
    fs::set_permissions(&replacement, fs::metadata(path)?.permissions())?;
    replacement
        .persist(path)
        .map_err(|e| AnnotateError::metadata(path, e.error))?;
    Ok(())
}

fn copy_streams(
    input_path: &Path,
    output_path: &Path,
    tags: &[(&str, String)],
) -> Result<(), AnnotateError> {
    let mut input = format::input(&input_path)?;
    let mut output = format::output(&output_path)?;

    let mut stream_mapping: Vec<Option<usize>> = vec![None; input.nb_streams() as _];
    let mut input_stream_time_base = vec![Rational(0, 1); input.nb_streams() as _];
    let mut output_stream_index = 0;
    for (ist_index, ist) in input.streams().enumerate() {
        let ist_medium = ist.parameters().medium();
        if ist_medium != media::Type::Audio
            && ist_medium != media::Type::Video
            && ist_medium != media::Type::Subtitle
        {
            continue;
        }
        stream_mapping[ist_index] = Some(output_stream_index);
        input_stream_time_base[ist_index] = ist.time_base();
        output_stream_index += 1;

        let mut ost = output.add_stream(encoder::find(codec::Id::None))?;
        ost.set_parameters(ist.parameters());
        // Let the muxer pick a codec tag valid for the target container.
        unsafe {
            (*ost.parameters().as_mut_ptr()).codec_tag = 0;
        }
    }

    let mut metadata = input.metadata().to_owned();
    for (key, value) in tags {
        metadata.set(key, value);
    }
    output.set_metadata(metadata);

    let mut muxer_options = Dictionary::new();
    muxer_options.set("movflags", "use_metadata_tags");
    output.write_header_with(muxer_options)?;

    for (ist, mut packet) in input.packets() {
        let ist_index = ist.index();
        let Some(ost_index) = stream_mapping.get(ist_index).copied().flatten() else {
            continue;
        };
        let ost_time_base = output
            .stream(ost_index)
            .ok_or(AnnotateError::Ffmpeg(Error::StreamNotFound))?
            .time_base();
        packet.rescale_ts(input_stream_time_base[ist_index], ost_time_base);
        packet.set_position(-1);
        packet.set_stream(ost_index);
        packet.write_interleaved(&mut output)?;
    }

    output.write_trailer()?;
    Ok(())
}

async fn write_subjects(
    path: &Path,
    description: &Description,
    exiftool: &Path,
) -> Result<(), AnnotateError> {
    let args = exiftool_args(path, description);
    tracing::debug!(tool = %exiftool.display(), ?args, "writing XMP subjects");

    let output = Command::new(exiftool).args(&args).output().await?;
    if !output.status.success() {
        return Err(AnnotateError::ExternalTool {
            tool: exiftool.display().to_string(),
            status: output.status,
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
        });
    }
    Ok(())
}
