//! Re-walks each original content document with the segmenter's own
//! classification rules (§4.5) and splices translated markup back in at
//! exactly the boundaries the segmenter chose, via a patch plan rather
//! than in-place tree surgery (§9 "deep tree mutation").

pub mod opf;

use std::collections::HashMap;
use std::io::{Cursor, Read, Write};

use mtj_segment::classify::SchemaVersion;
use mtj_segment::dom::{self, Element, NodeData};
use mtj_segment::patch::PatchPlan;
use snafu::{OptionExt, ResultExt, Snafu};
use tracing::{instrument, warn};
use zip::write::FileOptions;

type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
#[snafu(context(suffix(Error)))]
pub enum Error {
    #[snafu(display("could not read original archive: {source}"))]
    ReadArchiveError { source: mtj_epub::Error },
    #[snafu(display("failed to read archive entry: {source}"))]
    ReadEntryError { source: zip::result::ZipError },
    #[snafu(display("{path} is not valid UTF-8"))]
    Utf8Error { path: String },
    #[snafu(display("parsing content document: {source}"))]
    ParseDocumentError { source: dom::DomError },
    #[snafu(display("content document has no <body> element"))]
    MissingBodyError,
    #[snafu(display("parsing package document: {source}"))]
    OpfParseError { source: dom::DomError },
    #[snafu(display("package document has no root <package> element"))]
    OpfMissingError,
    #[snafu(display("failed to write archive entry: {source}"))]
    WriteEntryError { source: zip::result::ZipError },
    #[snafu(display("i/o error building archive: {source}"))]
    IoError { source: std::io::Error },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Ltr,
    Rtl,
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Ltr => "ltr",
            Direction::Rtl => "rtl",
        }
    }

    /// The reference case is English -> Arabic, so `ar` is always RTL;
    /// the other common RTL language codes are recognised on the same
    /// basis rather than hard-coding only the reference language.
    pub fn for_language_code(code: &str) -> Self {
        match code.to_ascii_lowercase().as_str() {
            "ar" | "he" | "fa" | "ur" => Direction::Rtl,
            _ => Direction::Ltr,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextAlignment {
    Left,
    Center,
    Right,
    Justify,
}

impl TextAlignment {
    pub fn as_str(self) -> &'static str {
        match self {
            TextAlignment::Left => "left",
            TextAlignment::Center => "center",
            TextAlignment::Right => "right",
            TextAlignment::Justify => "justify",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExportSettings {
    pub text_alignment: TextAlignment,
    pub force_alignment: bool,
}

/// The minimal per-segment information the reassembler needs: which
/// batch of which document, and (if translated) its markup. FAILED,
/// SKIPPED and PENDING segments are all "not translated" from this
/// component's point of view, which never distinguishes why a segment
/// wasn't translated, only whether it was (§4.5 step 4, §7).
#[derive(Debug, Clone)]
pub struct SegmentInput {
    pub content_doc_path: String,
    pub batch_index: i64,
    pub translated_html: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ReassembleRequest {
    pub archive_bytes: Vec<u8>,
    pub schema_version: i32,
    pub segments: Vec<SegmentInput>,
    pub replacement_cover_bytes: Option<Vec<u8>>,
    pub target_language_code: String,
    pub translated_title: Option<String>,
    pub export_settings: ExportSettings,
    /// Must match the limit the project was segmented with at import time
    /// (§6 `batchCharLimit`), or re-walking a content document here would
    /// land on different batch boundaries than the ones segments were
    /// recorded against.
    pub batch_char_limit: usize,
}

/// Produce a freshly packaged `application/epub+zip` archive (§4.5,
/// §6 "Exported archive"). Every entry of the original archive is copied
/// through unchanged except: the package document (language, spine
/// direction, optional title), the cover image (if a replacement was
/// supplied), and every content document that has segments to splice in.
#[instrument(skip_all)]
pub fn reassemble(request: ReassembleRequest) -> Result<Vec<u8>> {
    let opf_path = mtj_epub::locate_opf_path(&request.archive_bytes).context(ReadArchiveError)?;
    let cover_path = mtj_epub::find_cover_path(&request.archive_bytes).context(ReadArchiveError)?;
    let entries = read_all_entries(&request.archive_bytes)?;

    let schema = SchemaVersion::from_i32(request.schema_version);
    let direction = Direction::for_language_code(&request.target_language_code);

    let mut segments_by_doc: HashMap<&str, Vec<SegmentInput>> = HashMap::new();
    for seg in &request.segments {
        segments_by_doc.entry(seg.content_doc_path.as_str()).or_default().push(seg.clone());
    }

    let mut buf = Vec::new();
    {
        let mut writer = zip::ZipWriter::new(Cursor::new(&mut buf));

        for (name, bytes) in &entries {
            let options = FileOptions::default().compression_method(if name == "mimetype" {
                zip::CompressionMethod::Stored
            } else {
                zip::CompressionMethod::Deflated
            });
            writer.start_file(name.as_str(), options).context(WriteEntryError)?;

            if *name == opf_path {
                let xml = std::str::from_utf8(bytes).map_err(|_| Error::Utf8Error { path: name.clone() })?;
                let serialized = rewrite_opf(xml, &request)?;
                writer.write_all(serialized.as_bytes()).context(IoError)?;
            } else if request.replacement_cover_bytes.is_some() && cover_path.as_deref() == Some(name.as_str()) {
                writer.write_all(request.replacement_cover_bytes.as_ref().unwrap()).context(IoError)?;
            } else if let Some(segs) = segments_by_doc.get(name.as_str()) {
                let xml = std::str::from_utf8(bytes).map_err(|_| Error::Utf8Error { path: name.clone() })?;
                let rewritten = reassemble_document(
                    xml,
                    schema,
                    name,
                    segs,
                    &request.target_language_code,
                    direction,
                    &request.export_settings,
                    request.batch_char_limit,
                )?;
                writer.write_all(rewritten.as_bytes()).context(IoError)?;
            } else {
                writer.write_all(bytes).context(IoError)?;
            }
        }

        writer.finish().context(WriteEntryError)?;
    }
    Ok(buf)
}

fn read_all_entries(bytes: &[u8]) -> Result<Vec<(String, Vec<u8>)>> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))
        .map_err(|source| Error::ReadArchiveError { source: mtj_epub::Error::OpenArchiveError { source } })?;
    let mut out = Vec::with_capacity(archive.len());
    for i in 0..archive.len() {
        let mut file = archive.by_index(i).context(ReadEntryError)?;
        let name = file.name().to_owned();
        let mut data = Vec::with_capacity(file.size() as usize);
        file.read_to_end(&mut data).context(IoError)?;
        out.push((name, data));
    }
    Ok(out)
}

fn rewrite_opf(xml: &str, request: &ReassembleRequest) -> Result<String> {
    let mut nodes = dom::parse_nodes(xml).context(OpfParseError)?;
    let package_idx = nodes
        .iter()
        .position(|n| matches!(n, NodeData::Element(_)))
        .context(OpfMissingError)?;
    let direction = Direction::for_language_code(&request.target_language_code);
    if let NodeData::Element(package) = &mut nodes[package_idx] {
        opf::update_package(
            package,
            &request.target_language_code,
            direction.as_str(),
            request.translated_title.as_deref(),
        );
    }
    Ok(format!("<?xml version=\"1.0\" encoding=\"utf-8\"?>\n{}", dom::serialize(&nodes)))
}

#[instrument(skip_all, fields(doc_path))]
fn reassemble_document(
    xml: &str,
    schema: SchemaVersion,
    doc_path: &str,
    segments: &[SegmentInput],
    target_language_code: &str,
    direction: Direction,
    export: &ExportSettings,
    batch_char_limit: usize,
) -> Result<String> {
    let mut root = dom::parse_document(xml).context(ParseDocumentError)?;
    root.set_attr("lang", target_language_code);
    root.set_attr("xml:lang", target_language_code);
    inject_style(&mut root, direction, export);

    let body_idx = root
        .children
        .iter()
        .position(|c| matches!(c, NodeData::Element(el) if el.name.eq_ignore_ascii_case("body")))
        .context(MissingBodyError)?;

    let body_snapshot = match &root.children[body_idx] {
        NodeData::Element(el) => el.clone(),
        _ => unreachable!("position() matched an Element"),
    };
    let batches = mtj_segment::segment_body(&body_snapshot, schema, batch_char_limit);
    let by_index: HashMap<i64, &SegmentInput> = segments.iter().map(|s| (s.batch_index, s)).collect();

    let mut plan = PatchPlan::new();
    for batch in &batches {
        let Some(seg) = by_index.get(&batch.batch_index) else { continue };
        let Some(translated_html) = seg.translated_html.as_deref() else { continue };
        let Some(first_path) = batch.node_paths.first() else { continue };

        let Some(mut nodes) = parse_translated_fragment(translated_html) else {
            warn!(doc_path, batch_index = batch.batch_index, "translated markup unparsable by any fallback, leaving original nodes in place");
            continue;
        };
        for node in &mut nodes {
            if let NodeData::Element(el) = node {
                el.set_attr("dir", direction.as_str());
            }
        }
        plan.insert_before(first_path.clone(), nodes);
        for path in &batch.node_paths {
            plan.remove(path.clone());
        }
    }

    if let NodeData::Element(body) = &mut root.children[body_idx] {
        body.set_attr("dir", direction.as_str());
        body.set_attr("lang", target_language_code);
        body.children = mtj_segment::patch::rebuild_children(&body.children, &[], &plan);
    }

    let serialized = dom::serialize(std::slice::from_ref(&NodeData::Element(root)));
    Ok(format!("<?xml version=\"1.0\" encoding=\"utf-8\"?>\n{serialized}"))
}

/// §4.5 step 4: strict XML first, then a second try with bare `&`
/// escaped, then lenient HTML as a last resort. `None` means every
/// fallback failed.
fn parse_translated_fragment(html: &str) -> Option<Vec<NodeData>> {
    if let Ok(nodes) = dom::parse_nodes(html) {
        return Some(nodes);
    }
    let escaped = dom::escape_bare_ampersands(html);
    if let Ok(nodes) = dom::parse_nodes(&escaped) {
        return Some(nodes);
    }
    dom::parse_lenient_html(html).ok()
}

fn inject_style(root: &mut Element, direction: Direction, export: &ExportSettings) {
    let css = build_css(direction, export);
    let mut style_el = Element::new("style");
    style_el.attrs.push(("type".to_owned(), "text/css".to_owned()));
    style_el.children.push(NodeData::Text(css));

    match root.find_child_mut("head") {
        Some(head) => head.children.insert(0, NodeData::Element(style_el)),
        None => {
            let mut head = Element::new("head");
            head.children.push(NodeData::Element(style_el));
            root.children.insert(0, NodeData::Element(head));
        }
    }
}

/// A gentle html/body-only rule lets the book's own styles win on
/// specificity; `forceAlignment` instead targets a broad set of block
/// selectors with `!important` (§4.5 step 3).
fn build_css(direction: Direction, export: &ExportSettings) -> String {
    let dir = direction.as_str();
    let align = export.text_alignment.as_str();
    let mut css = format!("html, body {{ direction: {dir}; }}\n");
    if export.force_alignment {
        css.push_str(&format!(
            "p, div, blockquote, li, h1, h2, h3, h4, h5, h6, section, article, aside, header, footer, td, th {{ text-align: {align} !important; }}\n"
        ));
    } else {
        css.push_str(&format!("html, body {{ text-align: {align}; }}\n"));
    }
    css
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    fn build_epub(extra: &[(&str, &[u8])]) -> Vec<u8> {
        let container = r#"<?xml version="1.0"?>
<container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
  <rootfiles>
    <rootfile full-path="OEBPS/content.opf" media-type="application/oebps-package+xml"/>
  </rootfiles>
</container>"#;
        let opf = r#"<?xml version="1.0"?>
<package xmlns="http://www.idpf.org/2007/opf" version="3.0">
  <metadata xmlns:dc="http://purl.org/dc/elements/1.1/">
    <dc:title>My Book</dc:title>
    <dc:creator>Jane Author</dc:creator>
  </metadata>
  <manifest>
    <item id="cover-image" href="images/cover.jpg" media-type="image/jpeg" properties="cover-image"/>
    <item id="ch1" href="text/ch1.xhtml" media-type="application/xhtml+xml"/>
  </manifest>
  <spine>
    <itemref idref="ch1"/>
  </spine>
</package>"#;
        let mut buf = Vec::new();
        {
            let mut zip = zip::ZipWriter::new(Cursor::new(&mut buf));
            let opts = zip::write::FileOptions::default();
            zip.start_file("mimetype", opts).unwrap();
            zip.write_all(b"application/epub+zip").unwrap();
            zip.start_file("META-INF/container.xml", opts).unwrap();
            zip.write_all(container.as_bytes()).unwrap();
            zip.start_file("OEBPS/content.opf", opts).unwrap();
            zip.write_all(opf.as_bytes()).unwrap();
            for (path, content) in extra {
                zip.start_file(*path, opts).unwrap();
                zip.write_all(content).unwrap();
            }
            zip.finish().unwrap();
        }
        buf
    }

    #[test]
    fn single_paragraph_document_reassembles_as_spec_example_1() {
        let bytes = build_epub(&[
            ("OEBPS/images/cover.jpg", b"fakejpeg"),
            (
                "OEBPS/text/ch1.xhtml",
                b"<html><head><title>t</title></head><body><p>Hello world.</p></body></html>",
            ),
        ]);

        let request = ReassembleRequest {
            archive_bytes: bytes,
            schema_version: 2,
            segments: vec![SegmentInput {
                content_doc_path: "OEBPS/text/ch1.xhtml".into(),
                batch_index: 0,
                translated_html: Some("<p>مرحبا بالعالم.</p>".into()),
            }],
            replacement_cover_bytes: None,
            target_language_code: "ar".into(),
            translated_title: None,
            export_settings: ExportSettings { text_alignment: TextAlignment::Justify, force_alignment: false },
            batch_char_limit: 6000,
        };

        let output = reassemble(request).unwrap();
        let mut archive = zip::ZipArchive::new(Cursor::new(&output)).unwrap();
        let mut ch1 = archive.by_name("OEBPS/text/ch1.xhtml").unwrap();
        let mut content = String::new();
        ch1.read_to_string(&mut content).unwrap();

        assert!(content.contains(r#"<body dir="rtl" lang="ar">"#));
        assert!(content.contains(r#"<p dir="rtl">مرحبا بالعالم.</p>"#));
        assert!(content.contains("direction: rtl"));
    }

    #[test]
    fn untranslated_segment_is_left_in_place() {
        let bytes = build_epub(&[(
            "OEBPS/text/ch1.xhtml",
            b"<html><head></head><body><p>Hello world.</p></body></html>",
        )]);
        let request = ReassembleRequest {
            archive_bytes: bytes,
            schema_version: 2,
            segments: vec![SegmentInput {
                content_doc_path: "OEBPS/text/ch1.xhtml".into(),
                batch_index: 0,
                translated_html: None,
            }],
            replacement_cover_bytes: None,
            target_language_code: "ar".into(),
            translated_title: None,
            export_settings: ExportSettings { text_alignment: TextAlignment::Justify, force_alignment: false },
            batch_char_limit: 6000,
        };
        let output = reassemble(request).unwrap();
        let mut archive = zip::ZipArchive::new(Cursor::new(&output)).unwrap();
        let mut ch1 = archive.by_name("OEBPS/text/ch1.xhtml").unwrap();
        let mut content = String::new();
        ch1.read_to_string(&mut content).unwrap();
        assert!(content.contains("Hello world."));
    }

    #[test]
    fn unparsable_translation_falls_back_to_original_and_still_completes() {
        let bytes = build_epub(&[(
            "OEBPS/text/ch1.xhtml",
            b"<html><head></head><body><p>Hello world.</p></body></html>",
        )]);
        let request = ReassembleRequest {
            archive_bytes: bytes,
            schema_version: 2,
            segments: vec![SegmentInput {
                content_doc_path: "OEBPS/text/ch1.xhtml".into(),
                batch_index: 0,
                translated_html: Some("<p unterminated".into()),
            }],
            replacement_cover_bytes: None,
            target_language_code: "ar".into(),
            translated_title: None,
            export_settings: ExportSettings { text_alignment: TextAlignment::Justify, force_alignment: false },
            batch_char_limit: 6000,
        };
        let output = reassemble(request).unwrap();
        let mut archive = zip::ZipArchive::new(Cursor::new(&output)).unwrap();
        let mut ch1 = archive.by_name("OEBPS/text/ch1.xhtml").unwrap();
        let mut content = String::new();
        ch1.read_to_string(&mut content).unwrap();
        assert!(content.contains("Hello world."));
    }

    #[test]
    fn opf_gets_language_and_spine_direction() {
        let bytes = build_epub(&[(
            "OEBPS/text/ch1.xhtml",
            b"<html><head></head><body><p>x</p></body></html>",
        )]);
        let request = ReassembleRequest {
            archive_bytes: bytes,
            schema_version: 2,
            segments: vec![],
            replacement_cover_bytes: None,
            target_language_code: "ar".into(),
            translated_title: Some("عنوان مترجم".into()),
            export_settings: ExportSettings { text_alignment: TextAlignment::Right, force_alignment: true },
            batch_char_limit: 6000,
        };
        let output = reassemble(request).unwrap();
        let mut archive = zip::ZipArchive::new(Cursor::new(&output)).unwrap();
        let mut opf = archive.by_name("OEBPS/content.opf").unwrap();
        let mut content = String::new();
        opf.read_to_string(&mut content).unwrap();
        assert!(content.contains("<dc:language>ar</dc:language>"));
        assert!(content.contains(r#"page-progression-direction="rtl""#));
        assert!(content.contains("عنوان مترجم"));
    }

    #[test]
    fn replacement_cover_overwrites_cover_path() {
        let bytes = build_epub(&[
            ("OEBPS/images/cover.jpg", b"original"),
            ("OEBPS/text/ch1.xhtml", b"<html><head></head><body><p>x</p></body></html>"),
        ]);
        let request = ReassembleRequest {
            archive_bytes: bytes,
            schema_version: 2,
            segments: vec![],
            replacement_cover_bytes: Some(b"NEWCOVER".to_vec()),
            target_language_code: "ar".into(),
            translated_title: None,
            export_settings: ExportSettings { text_alignment: TextAlignment::Justify, force_alignment: false },
            batch_char_limit: 6000,
        };
        let output = reassemble(request).unwrap();
        let mut archive = zip::ZipArchive::new(Cursor::new(&output)).unwrap();
        let mut cover = archive.by_name("OEBPS/images/cover.jpg").unwrap();
        let mut content = Vec::new();
        cover.read_to_end(&mut content).unwrap();
        assert_eq!(content, b"NEWCOVER");
    }
}
