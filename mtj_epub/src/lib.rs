//! Opens a zipped EPUB archive, locates the package document via the
//! container manifest, and resolves spine, metadata and cover.
//!
//! Mirrors the fixed-point algorithm in the EPUB 2/3 container spec: the
//! archive itself never dictates where the package document lives, only
//! `META-INF/container.xml` does.

use std::{collections::HashMap, io::Cursor, io::Read};

use quick_xml::events::Event;
use quick_xml::Reader;
use snafu::{OptionExt, ResultExt, Snafu};
use tracing::{instrument, trace, warn};

type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
#[snafu(context(suffix(Error)))]
pub enum Error {
    #[snafu(display("archive is not a valid zip file"))]
    OpenArchiveError { source: zip::result::ZipError },
    #[snafu(display("META-INF/container.xml is missing or unreadable"))]
    MissingContainerError,
    #[snafu(display("container.xml does not reference a rootfile"))]
    UnparsableContainerError,
    #[snafu(display("the package document at {path} is missing"))]
    MissingOpfError { path: String },
    #[snafu(display("the package document could not be parsed: {source}"))]
    UnparsableOpfError { source: quick_xml::Error },
    #[snafu(display("the spine is empty"))]
    EmptySpineError,
    #[snafu(display("failed to read zip entry {path}"))]
    ReadEntryError {
        path: String,
        source: zip::result::ZipError,
    },
    #[snafu(display("zip entry {path} is not valid UTF-8"))]
    Utf8Error {
        path: String,
        source: std::string::FromUtf8Error,
    },
}

/// Schema version recorded on a newly imported project. Always 2 for fresh
/// imports; 1 is retained only for projects imported before orphan text
/// node capture existed.
pub const CURRENT_SCHEMA_VERSION: i32 = 2;

#[derive(Debug, Clone)]
pub struct BookMetadata {
    pub title: String,
    pub author: Option<String>,
    pub cover_bytes: Option<Vec<u8>>,
    pub schema_version: i32,
}

/// A spine entry: its archive path, in spine order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentDocRef {
    pub path: String,
}

#[derive(Debug, Clone)]
pub struct EpubReadResult {
    pub metadata: BookMetadata,
    pub spine: Vec<ContentDocRef>,
}

/// Manifest item as read out of the OPF, before spine resolution.
#[derive(Debug, Clone)]
struct ManifestItem {
    href: String,
    properties: Option<String>,
}

#[instrument(skip_all)]
pub fn read_epub(bytes: &[u8]) -> Result<EpubReadResult> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).context(OpenArchiveError)?;

    let opf_path = locate_opf(&mut archive)?;
    let opf_dir = dirname(&opf_path);

    let opf_bytes = read_opf_entry(&mut archive, &opf_path)?;
    let opf_xml =
        String::from_utf8(opf_bytes).map_err(|source| Error::Utf8Error { path: opf_path.clone(), source })?;

    let package = parse_opf(&opf_xml)?;

    let cover_bytes = package
        .cover_href
        .as_ref()
        .map(|href| resolve_path(&opf_dir, href))
        .and_then(|path| match read_zip_entry(&mut archive, &path) {
            Ok(bytes) => Some(bytes),
            Err(err) => {
                warn!(%path, %err, "cover referenced but unreadable, skipping");
                None
            }
        });

    if package.spine_idrefs.is_empty() {
        return EmptySpineError.fail();
    }

    let mut spine = Vec::with_capacity(package.spine_idrefs.len());
    for idref in &package.spine_idrefs {
        let Some(item) = package.manifest.get(idref) else {
            warn!(idref, "spine itemref has no matching manifest item, skipping");
            continue;
        };
        spine.push(ContentDocRef {
            path: resolve_path(&opf_dir, &item.href),
        });
    }

    if spine.is_empty() {
        return EmptySpineError.fail();
    }

    trace!(title = %package.title, spine_len = spine.len(), "read epub container");

    Ok(EpubReadResult {
        metadata: BookMetadata {
            title: package.title,
            author: package.creator,
            cover_bytes,
            schema_version: CURRENT_SCHEMA_VERSION,
        },
        spine,
    })
}

/// Read one archive entry by its zip-internal path. Used to fetch content
/// document bytes for segmentation and (during reassembly) the untouched
/// resources that are copied through unmodified.
#[instrument(skip(bytes))]
pub fn read_archive_entry(bytes: &[u8], path: &str) -> Result<Vec<u8>> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).context(OpenArchiveError)?;
    read_zip_entry(&mut archive, path)
}

/// Resolve the package document's archive path, same rule as step 1 of
/// §4.1. Exposed for the reassembler, which needs to re-open and rewrite
/// the OPF without re-running the rest of import.
#[instrument(skip_all)]
pub fn locate_opf_path(bytes: &[u8]) -> Result<String> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).context(OpenArchiveError)?;
    locate_opf(&mut archive)
}

/// Resolve the cover image's archive path using the same rule as step 3
/// of §4.1, without requiring its bytes to be readable. Exposed so the
/// reassembler can overwrite the same path when a replacement cover is
/// supplied (§4.5 "same rule as the Reader").
#[instrument(skip_all)]
pub fn find_cover_path(bytes: &[u8]) -> Result<Option<String>> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).context(OpenArchiveError)?;
    let opf_path = locate_opf(&mut archive)?;
    let opf_dir = dirname(&opf_path);
    let opf_bytes = read_opf_entry(&mut archive, &opf_path)?;
    let opf_xml =
        String::from_utf8(opf_bytes).map_err(|source| Error::Utf8Error { path: opf_path.clone(), source })?;
    let package = parse_opf(&opf_xml)?;
    Ok(package.cover_href.map(|href| resolve_path(&opf_dir, &href)))
}

/// Read the package document's own entry, same as [`read_zip_entry`] but
/// surfacing the named `MissingOpf` failure (§4.1 step 1) instead of the
/// generic entry-read error when container.xml points at a path the
/// archive doesn't actually contain.
fn read_opf_entry<R: Read + std::io::Seek>(archive: &mut zip::ZipArchive<R>, path: &str) -> Result<Vec<u8>> {
    read_zip_entry(archive, path).map_err(|_| Error::MissingOpfError { path: path.to_owned() })
}

fn read_zip_entry<R: Read + std::io::Seek>(
    archive: &mut zip::ZipArchive<R>,
    path: &str,
) -> Result<Vec<u8>> {
    let mut file = archive.by_name(path).context(ReadEntryError { path: path.to_owned() })?;
    let mut buf = Vec::with_capacity(file.size() as usize);
    file.read_to_end(&mut buf)
        .map_err(|source| Error::ReadEntryError {
            path: path.to_owned(),
            source: zip::result::ZipError::Io(source),
        })?;
    Ok(buf)
}

fn locate_opf<R: Read + std::io::Seek>(archive: &mut zip::ZipArchive<R>) -> Result<String> {
    let container_bytes = archive
        .by_name("META-INF/container.xml")
        .ok()
        .map(|mut f| {
            let mut buf = Vec::new();
            let _ = f.read_to_end(&mut buf);
            buf
        })
        .context(MissingContainerError)?;

    let container_xml =
        String::from_utf8(container_bytes).map_err(|_| Error::UnparsableContainerError)?;

    let mut reader = Reader::from_str(&container_xml);
    reader.trim_text(true);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Empty(ref e)) | Ok(Event::Start(ref e)) => {
                if local_name(e.name().as_ref()) == "rootfile" {
                    for attr in e.attributes().flatten() {
                        if local_name(attr.key.as_ref()) == "full-path" {
                            return Ok(attr.unescape_value().unwrap_or_default().into_owned());
                        }
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(_) => return UnparsableContainerError.fail(),
            _ => {}
        }
        buf.clear();
    }
    UnparsableContainerError.fail()
}

struct Package {
    title: String,
    creator: Option<String>,
    cover_href: Option<String>,
    manifest: HashMap<String, ManifestItem>,
    spine_idrefs: Vec<String>,
}

fn parse_opf(xml: &str) -> Result<Package> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut title = None;
    let mut creator = None;
    let mut manifest: HashMap<String, ManifestItem> = HashMap::new();
    let mut cover_href = None;
    let mut spine_idrefs = Vec::new();

    // Tracks which dc:* text element we're inside, to capture its character data.
    let mut in_title = false;
    let mut in_creator = false;

    let mut buf = Vec::new();
    loop {
        let event = reader.read_event_into(&mut buf).context(UnparsableOpfError)?;
        match event {
            Event::Start(ref e) => match local_name(e.name().as_ref()) {
                "title" if title.is_none() => in_title = true,
                "creator" if creator.is_none() => in_creator = true,
                _ => {}
            },
            Event::Empty(ref e) => {
                let name = local_name(e.name().as_ref()).to_owned();
                if name == "item" {
                    let mut id = None;
                    let mut href = None;
                    let mut properties = None;
                    for attr in e.attributes().flatten() {
                        match local_name(attr.key.as_ref()) {
                            "id" => id = Some(attr.unescape_value().unwrap_or_default().into_owned()),
                            "href" => href = Some(attr.unescape_value().unwrap_or_default().into_owned()),
                            "properties" => {
                                properties = Some(attr.unescape_value().unwrap_or_default().into_owned())
                            }
                            _ => {}
                        }
                    }
                    if let (Some(id), Some(href)) = (id, href) {
                        let is_cover = id.to_lowercase().contains("cover")
                            || properties
                                .as_deref()
                                .is_some_and(|p| p.contains("cover-image"));
                        if is_cover && cover_href.is_none() {
                            cover_href = Some(href.clone());
                        }
                        manifest.insert(id, ManifestItem { href, properties });
                    }
                } else if name == "itemref" {
                    for attr in e.attributes().flatten() {
                        if local_name(attr.key.as_ref()) == "idref" {
                            spine_idrefs
                                .push(attr.unescape_value().unwrap_or_default().into_owned());
                        }
                    }
                }
            }
            Event::Text(ref t) => {
                let text = t.unescape().unwrap_or_default().into_owned();
                if in_title {
                    title = Some(text);
                } else if in_creator {
                    creator = Some(text);
                }
            }
            Event::End(ref e) => match local_name(e.name().as_ref()) {
                "title" => in_title = false,
                "creator" => in_creator = false,
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok(Package {
        title: title.unwrap_or_else(|| "Untitled".to_owned()),
        creator,
        cover_href,
        manifest,
        spine_idrefs,
    })
}

/// Extract the local name from a (possibly namespaced) quick-xml tag/attr
/// name, e.g. `dc:title` -> `title`, `opf:role` -> `role`.
fn local_name(qualified: &[u8]) -> &str {
    let s = std::str::from_utf8(qualified).unwrap_or("");
    match s.rsplit_once(':') {
        Some((_, local)) => local,
        None => s,
    }
}

fn dirname(path: &str) -> String {
    match path.rsplit_once('/') {
        Some((dir, _)) => dir.to_owned(),
        None => String::new(),
    }
}

/// Resolve an href found in the OPF relative to the OPF's own directory,
/// collapsing `.` and `..` components the way a zip-internal path must
/// (there is no filesystem to ask).
fn resolve_path(base_dir: &str, href: &str) -> String {
    let decoded = percent_decode(href);
    if base_dir.is_empty() {
        return normalize_segments(&decoded);
    }
    normalize_segments(&format!("{base_dir}/{decoded}"))
}

fn percent_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            if let Ok(b) = u8::from_str_radix(&s[i + 1..i + 3], 16) {
                out.push(b);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8(out).unwrap_or_else(|_| s.to_owned())
}

fn normalize_segments(path: &str) -> String {
    let mut stack: Vec<&str> = Vec::new();
    for seg in path.split('/') {
        match seg {
            "" | "." => {}
            ".." => {
                stack.pop();
            }
            seg => stack.push(seg),
        }
    }
    stack.join("/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn build_epub(container: &str, opf_path: &str, opf: &str, extra: &[(&str, &[u8])]) -> Vec<u8> {
        let mut buf = Vec::new();
        {
            let mut zip = zip::ZipWriter::new(Cursor::new(&mut buf));
            let opts = zip::write::FileOptions::default();
            zip.start_file("META-INF/container.xml", opts).unwrap();
            zip.write_all(container.as_bytes()).unwrap();
            zip.start_file(opf_path, opts).unwrap();
            zip.write_all(opf.as_bytes()).unwrap();
            for (path, content) in extra {
                zip.start_file(*path, opts).unwrap();
                zip.write_all(content).unwrap();
            }
            zip.finish().unwrap();
        }
        buf
    }

    const CONTAINER: &str = r#"<?xml version="1.0"?>
<container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
  <rootfiles>
    <rootfile full-path="OEBPS/content.opf" media-type="application/oebps-package+xml"/>
  </rootfiles>
</container>"#;

    const OPF: &str = r#"<?xml version="1.0"?>
<package xmlns="http://www.idpf.org/2007/opf" version="3.0">
  <metadata xmlns:dc="http://purl.org/dc/elements/1.1/">
    <dc:title>My Book</dc:title>
    <dc:creator>Jane Author</dc:creator>
  </metadata>
  <manifest>
    <item id="cover-image" href="images/cover.jpg" media-type="image/jpeg" properties="cover-image"/>
    <item id="ch1" href="text/ch1.xhtml" media-type="application/xhtml+xml"/>
    <item id="ch2" href="text/ch2.xhtml" media-type="application/xhtml+xml"/>
  </manifest>
  <spine>
    <itemref idref="ch1"/>
    <itemref idref="ch2"/>
  </spine>
</package>"#;

    #[test]
    fn reads_title_spine_and_cover() {
        let bytes = build_epub(
            CONTAINER,
            "OEBPS/content.opf",
            OPF,
            &[
                ("OEBPS/images/cover.jpg", b"fakejpeg"),
                ("OEBPS/text/ch1.xhtml", b"<html><body><p>one</p></body></html>"),
                ("OEBPS/text/ch2.xhtml", b"<html><body><p>two</p></body></html>"),
            ],
        );
        let result = read_epub(&bytes).unwrap();
        assert_eq!(result.metadata.title, "My Book");
        assert_eq!(result.metadata.author.as_deref(), Some("Jane Author"));
        assert_eq!(result.metadata.cover_bytes.as_deref(), Some(&b"fakejpeg"[..]));
        assert_eq!(
            result.spine,
            vec![
                ContentDocRef { path: "OEBPS/text/ch1.xhtml".to_owned() },
                ContentDocRef { path: "OEBPS/text/ch2.xhtml".to_owned() },
            ]
        );
    }

    #[test]
    fn missing_container_is_fatal() {
        let mut buf = Vec::new();
        {
            let mut zip = zip::ZipWriter::new(Cursor::new(&mut buf));
            zip.start_file("OEBPS/content.opf", zip::write::FileOptions::default())
                .unwrap();
            zip.write_all(OPF.as_bytes()).unwrap();
            zip.finish().unwrap();
        }
        let err = read_epub(&buf).unwrap_err();
        assert!(matches!(err, Error::MissingContainerError));
    }

    #[test]
    fn missing_opf_is_fatal() {
        let mut buf = Vec::new();
        {
            let mut zip = zip::ZipWriter::new(Cursor::new(&mut buf));
            zip.start_file("META-INF/container.xml", zip::write::FileOptions::default())
                .unwrap();
            zip.write_all(CONTAINER.as_bytes()).unwrap();
            zip.finish().unwrap();
        }
        let err = read_epub(&buf).unwrap_err();
        assert!(matches!(err, Error::MissingOpfError { path } if path == "OEBPS/content.opf"));
    }

    #[test]
    fn empty_spine_is_fatal() {
        let opf_no_spine = r#"<?xml version="1.0"?>
<package xmlns="http://www.idpf.org/2007/opf" version="3.0">
  <metadata xmlns:dc="http://purl.org/dc/elements/1.1/"><dc:title>T</dc:title></metadata>
  <manifest></manifest>
  <spine></spine>
</package>"#;
        let bytes = build_epub(CONTAINER, "OEBPS/content.opf", opf_no_spine, &[]);
        let err = read_epub(&bytes).unwrap_err();
        assert!(matches!(err, Error::EmptySpineError));
    }

    #[test]
    fn locate_opf_path_and_find_cover_path_agree_with_read_epub() {
        let bytes = build_epub(
            CONTAINER,
            "OEBPS/content.opf",
            OPF,
            &[
                ("OEBPS/images/cover.jpg", b"fakejpeg"),
                ("OEBPS/text/ch1.xhtml", b"<html><body><p>one</p></body></html>"),
                ("OEBPS/text/ch2.xhtml", b"<html><body><p>two</p></body></html>"),
            ],
        );
        assert_eq!(locate_opf_path(&bytes).unwrap(), "OEBPS/content.opf");
        assert_eq!(find_cover_path(&bytes).unwrap(), Some("OEBPS/images/cover.jpg".to_owned()));
    }

    #[test]
    fn resolves_relative_paths_correctly() {
        assert_eq!(resolve_path("OEBPS", "text/ch1.xhtml"), "OEBPS/text/ch1.xhtml");
        assert_eq!(resolve_path("OEBPS/text", "../images/cover.jpg"), "OEBPS/images/cover.jpg");
        assert_eq!(resolve_path("", "content.opf"), "content.opf");
    }
}
