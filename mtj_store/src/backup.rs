//! Backup bundles (§6 `.mtj` files): a zip of the immutable source archive,
//! an optional replacement cover, and the project/segment state as JSON.

use crate::model::{Project, Segment};
use crate::{Error, Result, Store};
use snafu::{OptionExt, ResultExt, Snafu};
use std::io::{Cursor, Read, Write};
use tracing::instrument;

#[derive(Debug, Snafu)]
#[snafu(context(suffix(Error)))]
pub enum BundleError {
    #[snafu(display("bundle is not a valid zip file: {source}"))]
    OpenBundleError { source: zip::result::ZipError },
    #[snafu(display("bundle is missing required entry {path}"))]
    MissingEntryError { path: String },
    #[snafu(display("could not read bundle entry {path}: {source}"))]
    ReadEntryError { path: String, source: zip::result::ZipError },
    #[snafu(display("project.json is not valid JSON: {source}"))]
    InvalidProjectJsonError { source: serde_json::Error },
    #[snafu(display("segments.json is not valid JSON: {source}"))]
    InvalidSegmentsJsonError { source: serde_json::Error },
    #[snafu(display("failed to build bundle archive: {source}"))]
    WriteBundleError { source: zip::result::ZipError },
    #[snafu(display("failed to write bundle entry: {source}"))]
    IoError { source: std::io::Error },
}

const BACKUP_FORMAT_VERSION: u32 = 1;

#[derive(Debug, serde::Serialize, serde::Deserialize)]
struct ProjectEnvelope {
    version: u32,
    #[serde(rename = "timestamp")]
    timestamp_ms: i64,
    #[serde(rename = "projectData")]
    project_data: Project,
}

/// Build a `.mtj` bundle from the current project and segment state.
#[instrument(skip_all)]
pub async fn backup(store: &Store, now_epoch_ms: i64) -> Result<Vec<u8>> {
    let project = store.get_project().await?.context(crate::NoProjectError)?;
    let segments = store.all_segments().await?;

    let mut buf = Vec::new();
    {
        let mut zip = zip::ZipWriter::new(Cursor::new(&mut buf));
        let options = zip::write::FileOptions::default().compression_method(zip::CompressionMethod::Deflated);

        zip.start_file("source.epub", options)
            .context(WriteBundleError)
            .map_err(bundle_to_store_error)?;
        zip.write_all(project.archive_bytes.as_deref().unwrap_or_default())
            .context(IoError)
            .map_err(bundle_to_store_error)?;

        if let Some(cover) = &project.cover_bytes {
            zip.start_file("custom-cover.bin", options)
                .context(WriteBundleError)
                .map_err(bundle_to_store_error)?;
            zip.write_all(cover).context(IoError).map_err(bundle_to_store_error)?;
        }

        let mut project_for_json = project.clone();
        project_for_json.archive_bytes = None;
        project_for_json.cover_bytes = None;
        let envelope = ProjectEnvelope {
            version: BACKUP_FORMAT_VERSION,
            timestamp_ms: now_epoch_ms,
            project_data: project_for_json,
        };
        let project_json = serde_json::to_vec_pretty(&envelope)
            .context(InvalidProjectJsonError)
            .map_err(bundle_to_store_error)?;
        zip.start_file("project.json", options)
            .context(WriteBundleError)
            .map_err(bundle_to_store_error)?;
        zip.write_all(&project_json).context(IoError).map_err(bundle_to_store_error)?;

        let segments_json = serde_json::to_vec_pretty(&segments)
            .context(InvalidSegmentsJsonError)
            .map_err(bundle_to_store_error)?;
        zip.start_file("segments.json", options)
            .context(WriteBundleError)
            .map_err(bundle_to_store_error)?;
        zip.write_all(&segments_json).context(IoError).map_err(bundle_to_store_error)?;

        zip.finish().context(WriteBundleError).map_err(bundle_to_store_error)?;
    }
    Ok(buf)
}

/// Validate and load a `.mtj` bundle, wiping and replacing the current
/// project atomically. Structural problems are fatal and leave the store
/// untouched.
#[instrument(skip_all)]
pub async fn restore(store: &Store, bundle_bytes: &[u8]) -> Result<()> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bundle_bytes))
        .context(OpenBundleError)
        .map_err(bundle_to_store_error)?;

    let source_epub = read_entry(&mut archive, "source.epub")?;
    let project_json = read_entry(&mut archive, "project.json")?;
    let segments_json = read_entry(&mut archive, "segments.json")?;
    let cover_bytes = read_entry(&mut archive, "custom-cover.bin").ok();

    let mut project = parse_project_envelope(&project_json)?;
    let segments: Vec<Segment> = serde_json::from_slice(&segments_json)
        .context(InvalidSegmentsJsonError)
        .map_err(bundle_to_store_error)?;

    project.archive_bytes = Some(source_epub);
    project.cover_bytes = cover_bytes;

    store.restore_project(project, segments).await
}

fn read_entry(archive: &mut zip::ZipArchive<Cursor<&[u8]>>, path: &str) -> Result<Vec<u8>> {
    let mut file = archive
        .by_name(path)
        .map_err(|_| MissingEntryError { path: path.to_owned() }.build())
        .map_err(bundle_to_store_error)?;
    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes)
        .context(IoError)
        .map_err(bundle_to_store_error)?;
    Ok(bytes)
}

/// `project.json` is normally `{version, timestamp, projectData}`, but
/// legacy bundles store the project object directly with no wrapper.
fn parse_project_envelope(bytes: &[u8]) -> Result<Project> {
    if let Ok(envelope) = serde_json::from_slice::<ProjectEnvelope>(bytes) {
        return Ok(envelope.project_data);
    }
    serde_json::from_slice::<Project>(bytes)
        .context(InvalidProjectJsonError)
        .map_err(bundle_to_store_error)
}

fn bundle_to_store_error(source: BundleError) -> Error {
    Error::BundleError { source }
}
