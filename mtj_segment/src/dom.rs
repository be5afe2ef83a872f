//! A small owned markup tree.
//!
//! We deliberately don't build on `tl`'s arena (`NodeHandle`/`Parser`
//! indices) for the primary parse: the reassembler needs to splice whole
//! subtrees in and delete others, which is far simpler against an owned
//! `Vec<NodeData>` than against handle-indexed storage. `tl` is kept around
//! purely as the lenient last-resort parser for translated fragments that
//! fail strict parsing (see [`parse_lenient_html`]).

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use snafu::{OptionExt, ResultExt, Snafu};

#[derive(Debug, Snafu)]
#[snafu(context(suffix(Error)))]
pub enum DomError {
    #[snafu(display("xml parse error: {source}"))]
    XmlError { source: quick_xml::Error },
    #[snafu(display("unclosed tag(s) at end of document"))]
    UnclosedTagError,
    #[snafu(display("document has no <html> element"))]
    NoRootElementError,
    #[snafu(display("lenient HTML parse failed: {message}"))]
    LenientParseError { message: String },
}

type Result<T, E = DomError> = std::result::Result<T, E>;

#[derive(Debug, Clone, PartialEq)]
pub enum NodeData {
    Element(Element),
    Text(String),
    Comment(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Element {
    pub name: String,
    pub attrs: Vec<(String, String)>,
    pub children: Vec<NodeData>,
    /// Was this element written as `<tag/>` in its source? Preserved so
    /// reassembled markup round-trips the same way the LLM was shown it.
    pub self_closed: bool,
}

impl Element {
    pub fn new(name: impl Into<String>) -> Self {
        Element {
            name: name.into(),
            attrs: Vec::new(),
            children: Vec::new(),
            self_closed: false,
        }
    }

    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    pub fn set_attr(&mut self, key: &str, value: impl Into<String>) {
        let value = value.into();
        if let Some(existing) = self.attrs.iter_mut().find(|(k, _)| k == key) {
            existing.1 = value;
        } else {
            self.attrs.push((key.to_owned(), value));
        }
    }

    pub fn find_child(&self, name: &str) -> Option<&Element> {
        self.children.iter().find_map(|c| match c {
            NodeData::Element(el) if el.name.eq_ignore_ascii_case(name) => Some(el),
            _ => None,
        })
    }

    pub fn find_child_mut(&mut self, name: &str) -> Option<&mut Element> {
        self.children.iter_mut().find_map(|c| match c {
            NodeData::Element(el) if el.name.eq_ignore_ascii_case(name) => Some(el),
            _ => None,
        })
    }
}

/// Recursively collect all text under a node, ignoring markup.
pub fn text_content(node: &NodeData) -> String {
    match node {
        NodeData::Text(t) => t.clone(),
        NodeData::Comment(_) => String::new(),
        NodeData::Element(el) => el.children.iter().map(text_content).collect(),
    }
}

pub fn text_content_nodes(nodes: &[NodeData]) -> String {
    nodes.iter().map(text_content).collect()
}

/// Parse a complete buffer of XML/XHTML into its top-level nodes. A well
/// formed content document parses to exactly one top-level `Element`
/// (`<html>`), preceded by nodes we drop (decl, doctype, comments before
/// the root). Callers that need the document itself should use
/// [`parse_document`].
pub fn parse_nodes(xml: &str) -> Result<Vec<NodeData>> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(false);
    reader.check_end_names(true);
    reader.check_comments(false);

    let mut top: Vec<NodeData> = Vec::new();
    let mut stack: Vec<Element> = Vec::new();
    let mut buf = Vec::new();

    loop {
        let event = reader.read_event_into(&mut buf).context(XmlError)?;
        match event {
            Event::Start(ref e) => {
                stack.push(element_from_start(e, false)?);
            }
            Event::Empty(ref e) => {
                let el = element_from_start(e, true)?;
                push_node(&mut stack, &mut top, NodeData::Element(el));
            }
            Event::End(_) => {
                let el = stack.pop().context(UnclosedTagError)?;
                push_node(&mut stack, &mut top, NodeData::Element(el));
            }
            Event::Text(ref t) => {
                let text = t.unescape().context(XmlError)?.into_owned();
                push_node(&mut stack, &mut top, NodeData::Text(text));
            }
            Event::CData(ref c) => {
                let text = String::from_utf8_lossy(c.as_ref()).into_owned();
                push_node(&mut stack, &mut top, NodeData::Text(text));
            }
            Event::Comment(ref c) => {
                let text = c.unescape().context(XmlError)?.into_owned();
                push_node(&mut stack, &mut top, NodeData::Comment(text));
            }
            Event::Decl(_) | Event::DocType(_) | Event::PI(_) => {}
            Event::Eof => break,
        }
        buf.clear();
    }

    if !stack.is_empty() {
        return UnclosedTagError.fail();
    }

    Ok(top)
}

fn push_node(stack: &mut [Element], top: &mut Vec<NodeData>, node: NodeData) {
    if let Some(parent) = stack.last_mut() {
        parent.children.push(node);
    } else {
        top.push(node);
    }
}

fn element_from_start(e: &BytesStart, self_closed: bool) -> Result<Element> {
    let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
    let mut el = Element::new(name);
    el.self_closed = self_closed;
    for attr in e.attributes() {
        let attr = attr
            .map_err(quick_xml::Error::InvalidAttr)
            .context(XmlError)?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr.unescape_value().context(XmlError)?.into_owned();
        el.attrs.push((key, value));
    }
    Ok(el)
}

/// Parse a full content document and return its `<html>` root.
pub fn parse_document(xml: &str) -> Result<Element> {
    let nodes = parse_nodes(xml)?;
    nodes
        .into_iter()
        .find_map(|n| match n {
            NodeData::Element(el) if el.name.eq_ignore_ascii_case("html") => Some(el),
            _ => None,
        })
        .context(NoRootElementError)
}

/// Escape bare `&` that aren't already part of a recognised entity or
/// numeric reference, so a near-miss XML fragment (the single most common
/// way LLM output fails strict parsing) has a second chance.
pub fn escape_bare_ampersands(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for (i, c) in s.char_indices() {
        if c == '&' {
            let rest = &s[i + 1..];
            let looks_like_entity = rest.starts_with("amp;")
                || rest.starts_with("lt;")
                || rest.starts_with("gt;")
                || rest.starts_with("quot;")
                || rest.starts_with("apos;")
                || is_numeric_entity(rest);
            out.push('&');
            if !looks_like_entity {
                out.push_str("amp;");
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// Last-resort lenient HTML parse via `tl`, for translated fragments that
/// fail both the strict and ampersand-escaped XML parses.
pub fn parse_lenient_html(html: &str) -> Result<Vec<NodeData>> {
    let dom = tl::parse(html, tl::ParserOptions::default())
        .map_err(|e| LenientParseError { message: e.to_string() }.build())?;
    let parser = dom.parser();
    let mut out = Vec::new();
    for handle in dom.children() {
        if let Some(node) = handle.get(parser) {
            out.push(convert_tl_node(node, parser));
        }
    }
    Ok(out)
}

fn convert_tl_node(node: &tl::Node, parser: &tl::Parser) -> NodeData {
    match node {
        tl::Node::Raw(bytes) => NodeData::Text(bytes.as_utf8_str().into_owned()),
        tl::Node::Comment(bytes) => NodeData::Comment(bytes.as_utf8_str().into_owned()),
        tl::Node::Tag(tag) => {
            let name = tag.name().as_utf8_str().into_owned();
            let mut el = Element::new(name);
            for (k, v) in tag.attributes().iter() {
                let key = k.as_ref().to_owned();
                let value = v.map(|v| v.as_utf8_str().into_owned()).unwrap_or_default();
                el.attrs.push((key, value));
            }
            let children = tag.children();
            el.self_closed = children.top().is_empty() && name_is_void(&el.name);
            for handle in children.top().iter() {
                if let Some(child) = handle.get(parser) {
                    el.children.push(convert_tl_node(child, parser));
                }
            }
            NodeData::Element(el)
        }
    }
}

fn name_is_void(name: &str) -> bool {
    matches!(
        name.to_ascii_lowercase().as_str(),
        "area" | "base" | "br" | "col" | "embed" | "hr" | "img" | "input" | "link" | "meta"
            | "param" | "source" | "track" | "wbr"
    )
}

/// Serialise a sequence of nodes back to markup.
pub fn serialize(nodes: &[NodeData]) -> String {
    let mut out = String::new();
    for n in nodes {
        serialize_into(n, &mut out);
    }
    out
}

fn serialize_into(node: &NodeData, out: &mut String) {
    match node {
        NodeData::Text(t) => out.push_str(&escape_text(t)),
        NodeData::Comment(c) => {
            out.push_str("<!--");
            out.push_str(c);
            out.push_str("-->");
        }
        NodeData::Element(el) => {
            out.push('<');
            out.push_str(&el.name);
            for (k, v) in &el.attrs {
                out.push(' ');
                out.push_str(k);
                out.push_str("=\"");
                out.push_str(&escape_attr(v));
                out.push('"');
            }
            if el.self_closed && el.children.is_empty() {
                out.push_str("/>");
                return;
            }
            out.push('>');
            for c in &el.children {
                serialize_into(c, out);
            }
            out.push_str("</");
            out.push_str(&el.name);
            out.push('>');
        }
    }
}

fn escape_text(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

fn escape_attr(s: &str) -> String {
    escape_text(s).replace('"', "&quot;")
}

/// Addresses a node by the chain of child indices from some starting slice.
pub type NodePath = Vec<usize>;

pub fn resolve<'a>(children: &'a [NodeData], path: &[usize]) -> Option<&'a NodeData> {
    let (&first, rest) = path.split_first()?;
    let node = children.get(first)?;
    if rest.is_empty() {
        return Some(node);
    }
    match node {
        NodeData::Element(el) => resolve(&el.children, rest),
        _ => None,
    }
}
