//! Markup tree model, tag classification, and the segmentation walk.
//!
//! This crate is deliberately the one piece of code shared, unmodified,
//! between import-time segmenting and export-time reassembly: both must
//! walk a content document and arrive at exactly the same batch
//! boundaries, or a translated segment would land on the wrong nodes.

pub mod classify;
pub mod dom;
pub mod patch;

use classify::{SchemaVersion, TagClass};
use dom::{Element, NodeData, NodePath};
use snafu::{OptionExt, ResultExt, Snafu};
use tracing::instrument;

#[derive(Debug, Snafu)]
#[snafu(context(suffix(Error)))]
pub enum SegmentError {
    #[snafu(display("parsing content document: {source}"))]
    ParseError { source: dom::DomError },
    #[snafu(display("content document has no <body> element"))]
    MissingBodyError,
}

type Result<T, E = SegmentError> = std::result::Result<T, E>;

/// One flushed batch of captured nodes: the segmenter stores
/// `original_html`, the reassembler uses `node_paths` to locate the same
/// nodes in a freshly parsed copy of the document.
#[derive(Debug, Clone, PartialEq)]
pub struct CapturedBatch {
    pub batch_index: i64,
    pub original_html: String,
    pub node_paths: Vec<NodePath>,
}

struct WalkState {
    batches: Vec<CapturedBatch>,
    next_index: i64,
    current_paths: Vec<NodePath>,
    current_html: String,
    current_len: usize,
    batch_char_limit: usize,
}

impl WalkState {
    fn new(batch_char_limit: usize) -> Self {
        WalkState {
            batches: Vec::new(),
            next_index: 0,
            current_paths: Vec::new(),
            current_html: String::new(),
            current_len: 0,
            batch_char_limit,
        }
    }

    fn flush(&mut self) {
        if self.current_paths.is_empty() {
            return;
        }
        self.batches.push(CapturedBatch {
            batch_index: self.next_index,
            original_html: std::mem::take(&mut self.current_html),
            node_paths: std::mem::take(&mut self.current_paths),
        });
        self.next_index += 1;
        self.current_len = 0;
    }

    /// Capture one whole node, flushing first if it would overflow the
    /// budget and the batch already holds something.
    fn capture(&mut self, path: NodePath, serialized: String) {
        let added = serialized.chars().count();
        if !self.current_paths.is_empty() && self.current_len + added > self.batch_char_limit {
            self.flush();
        }
        self.current_len += added;
        self.current_html.push_str(&serialized);
        self.current_paths.push(path);
    }

    /// Headers (and, in principle, any other always-alone node) flush
    /// before and after so they never share a batch with anything else.
    fn capture_alone(&mut self, path: NodePath, serialized: String) {
        self.flush();
        self.current_len = serialized.chars().count();
        self.current_html.push_str(&serialized);
        self.current_paths.push(path);
        self.flush();
    }
}

fn contains_block_or_breaker_descendant(el: &Element, schema: SchemaVersion) -> bool {
    el.children.iter().any(|child| {
        if let NodeData::Element(c) = child {
            match classify::classify_tag(&c.name, schema) {
                TagClass::Block | TagClass::Breaker | TagClass::Header => true,
                TagClass::Other => contains_block_or_breaker_descendant(c, schema),
            }
        } else {
            false
        }
    })
}

/// A block-tag element with non-empty trimmed text and no nested block or
/// breaker: captured whole rather than descended into.
pub fn is_leaf_translatable_block(el: &Element, schema: SchemaVersion) -> bool {
    let text = dom::text_content(&NodeData::Element(el.clone()));
    if text.trim().is_empty() {
        return false;
    }
    !contains_block_or_breaker_descendant(el, schema)
}

/// Walk `nodes` (the children of `body`, or of some already-descended-into
/// element) in document order, accumulating captures into `state`.
/// `path_prefix` addresses `nodes` from the body itself.
fn walk(nodes: &[NodeData], path_prefix: &mut Vec<usize>, schema: SchemaVersion, state: &mut WalkState) {
    for (idx, node) in nodes.iter().enumerate() {
        path_prefix.push(idx);
        match node {
            NodeData::Element(el) => {
                let class = classify::classify_tag(&el.name, schema);
                match class {
                    TagClass::Breaker => {
                        state.flush();
                    }
                    TagClass::Header => {
                        let serialized = dom::serialize(std::slice::from_ref(node));
                        state.capture_alone(path_prefix.clone(), serialized);
                    }
                    TagClass::Block if is_leaf_translatable_block(el, schema) => {
                        let serialized = dom::serialize(std::slice::from_ref(node));
                        state.capture(path_prefix.clone(), serialized);
                    }
                    _ => {
                        if !el.children.is_empty() {
                            walk(&el.children, path_prefix, schema, state);
                        }
                    }
                }
            }
            NodeData::Text(text) => {
                if schema == SchemaVersion::V2 && !text.trim().is_empty() {
                    let serialized = dom::serialize(std::slice::from_ref(node));
                    state.capture(path_prefix.clone(), serialized);
                }
            }
            NodeData::Comment(_) => {}
        }
        path_prefix.pop();
    }
}

/// Segment a parsed `<body>` element into ordered, budget-bounded batches.
/// `batch_char_limit` is the configured limit (§6 `batchCharLimit`); import
/// and export must be called with the same value or batch boundaries drift.
#[instrument(skip_all)]
pub fn segment_body(body: &Element, schema: SchemaVersion, batch_char_limit: usize) -> Vec<CapturedBatch> {
    let mut state = WalkState::new(batch_char_limit);
    let mut prefix = Vec::new();
    walk(&body.children, &mut prefix, schema, &mut state);
    state.flush();
    state.batches
}

/// Parse a full content document and segment its body. This is the entry
/// point the segmenter uses at import time; the reassembler instead calls
/// [`segment_body`] directly against its own freshly parsed document so it
/// can keep the `Element` tree around to mutate.
#[instrument(skip_all)]
pub fn segment_document(xml: &str, schema: SchemaVersion, batch_char_limit: usize) -> Result<Vec<CapturedBatch>> {
    let root = dom::parse_document(xml).context(ParseError)?;
    let body = root.find_child("body").context(MissingBodyError)?;
    Ok(segment_body(body, schema, batch_char_limit))
}

#[cfg(test)]
mod tests {
    use super::*;
    use classify::{SchemaVersion::V2, BATCH_CHAR_LIMIT};

    fn segment(html: &str) -> Vec<CapturedBatch> {
        let wrapped = format!("<html><body>{html}</body></html>");
        segment_document(&wrapped, V2, BATCH_CHAR_LIMIT).unwrap()
    }

    #[test]
    fn single_paragraph_is_one_batch() {
        let batches = segment("<p>Hello world.</p>");
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].original_html, "<p>Hello world.</p>");
        assert_eq!(batches[0].batch_index, 0);
    }

    #[test]
    fn images_flush_and_are_never_captured() {
        let batches = segment("<p>Before</p><img src=\"a.png\"/><p>After</p>");
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].original_html, "<p>Before</p>");
        assert_eq!(batches[1].original_html, "<p>After</p>");
    }

    #[test]
    fn headers_always_flush_alone() {
        let batches = segment("<p>Before</p><h1>Title</h1><p>After</p>");
        assert_eq!(batches.len(), 3);
        assert_eq!(batches[0].original_html, "<p>Before</p>");
        assert_eq!(batches[1].original_html, "<h1>Title</h1>");
        assert_eq!(batches[2].original_html, "<p>After</p>");
    }

    #[test]
    fn nested_wrapper_div_is_descended_not_captured_whole() {
        let batches = segment("<div><p>one</p><p>two</p></div>");
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].original_html, "<p>one</p><p>two</p>");
    }

    #[test]
    fn budget_split_matches_spec_example() {
        let p = |n: usize| format!("<p>{}</p>", "a".repeat(n));
        let html = format!("{}{}{}", p(2495), p(2495), p(2495));
        let batches = segment(&html);
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].node_paths.len(), 2);
        assert_eq!(batches[1].node_paths.len(), 1);
    }

    #[test]
    fn oversized_single_block_forms_its_own_segment() {
        let oversized = format!("<p>{}</p>", "a".repeat(BATCH_CHAR_LIMIT + 500));
        let batches = segment(&format!("<p>small</p>{oversized}"));
        assert_eq!(batches.len(), 2);
        assert!(batches[1].original_html.len() > BATCH_CHAR_LIMIT);
    }

    #[test]
    fn orphan_text_node_captured_in_v2_only() {
        let wrapped = "<html><body>stray text<p>p</p></body></html>";
        let v2 = segment_document(wrapped, classify::SchemaVersion::V2, BATCH_CHAR_LIMIT).unwrap();
        assert_eq!(v2.len(), 2);
        assert_eq!(v2[0].original_html, "stray text");

        let v1 = segment_document(wrapped, classify::SchemaVersion::V1, BATCH_CHAR_LIMIT).unwrap();
        assert_eq!(v1.len(), 1);
        assert_eq!(v1[0].original_html, "<p>p</p>");
    }

    #[test]
    fn node_paths_resolve_back_to_the_same_nodes() {
        let wrapped = "<html><body><div><p>one</p></div><p>two</p></body></html>";
        let batches = segment_document(wrapped, V2, BATCH_CHAR_LIMIT).unwrap();
        let root = dom::parse_document(wrapped).unwrap();
        let body = root.find_child("body").unwrap();
        for batch in &batches {
            for path in &batch.node_paths {
                assert!(dom::resolve(&body.children, path).is_some());
            }
        }
    }
}

/// Budget/boundary invariants (§8) checked against randomly generated
/// bodies rather than hand-picked examples, following `boko`'s use of
/// `proptest` for structural fuzzing over hand-rolled parsers.
#[cfg(test)]
mod proptests {
    use super::*;
    use classify::{SchemaVersion::V2, BATCH_CHAR_LIMIT};
    use proptest::prelude::*;

    #[derive(Debug, Clone)]
    enum Block {
        Paragraph(usize),
        Header(u8),
        Image,
        Wrapper(Vec<Block>),
    }

    fn block_strategy() -> impl Strategy<Value = Block> {
        let leaf = prop_oneof![
            (1usize..=400).prop_map(Block::Paragraph),
            (1u8..=6).prop_map(Block::Header),
            Just(Block::Image),
        ];
        leaf.prop_recursive(3, 16, 4, |inner| {
            prop::collection::vec(inner, 0..4).prop_map(Block::Wrapper)
        })
    }

    fn render(block: &Block, out: &mut String) {
        match block {
            Block::Paragraph(len) => {
                out.push_str("<p>");
                out.extend(std::iter::repeat('a').take(*len));
                out.push_str("</p>");
            }
            Block::Header(level) => {
                out.push_str(&format!("<h{level}>heading</h{level}>"));
            }
            Block::Image => out.push_str("<img src=\"x.png\"/>"),
            Block::Wrapper(children) => {
                out.push_str("<div>");
                for child in children {
                    render(child, out);
                }
                out.push_str("</div>");
            }
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        /// Batch indices are a contiguous 0-based range (§3 segment invariant).
        #[test]
        fn batch_indices_are_contiguous_from_zero(blocks in prop::collection::vec(block_strategy(), 0..12)) {
            let mut body_html = String::new();
            for block in &blocks {
                render(block, &mut body_html);
            }
            let wrapped = format!("<html><body>{body_html}</body></html>");
            let batches = segment_document(&wrapped, V2, BATCH_CHAR_LIMIT).unwrap();
            for (expected, batch) in batches.iter().enumerate() {
                prop_assert_eq!(batch.batch_index, expected as i64);
            }
        }

        /// Every recorded node path resolves against the same document
        /// (segment round-trip invariant, §8).
        #[test]
        fn all_node_paths_resolve(blocks in prop::collection::vec(block_strategy(), 0..12)) {
            let mut body_html = String::new();
            for block in &blocks {
                render(block, &mut body_html);
            }
            let wrapped = format!("<html><body>{body_html}</body></html>");
            let batches = segment_document(&wrapped, V2, BATCH_CHAR_LIMIT).unwrap();
            let root = dom::parse_document(&wrapped).unwrap();
            let body = root.find_child("body").unwrap();
            for batch in &batches {
                for path in &batch.node_paths {
                    prop_assert!(dom::resolve(&body.children, path).is_some());
                }
            }
        }

        /// A header is always the sole node of its batch, regardless of
        /// surrounding content (§4.2 "header tags always flushed alone").
        #[test]
        fn headers_never_share_a_batch(blocks in prop::collection::vec(block_strategy(), 0..12)) {
            let mut body_html = String::new();
            for block in &blocks {
                render(block, &mut body_html);
            }
            let wrapped = format!("<html><body>{body_html}</body></html>");
            let batches = segment_document(&wrapped, V2, BATCH_CHAR_LIMIT).unwrap();
            for batch in &batches {
                let bytes = batch.original_html.as_bytes();
                let is_header = bytes.first() == Some(&b'<')
                    && bytes.get(1) == Some(&b'h')
                    && matches!(bytes.get(2), Some(b'1'..=b'6'));
                if is_header {
                    prop_assert_eq!(batch.node_paths.len(), 1);
                }
            }
        }

        /// No batch with more than one node exceeds the character budget
        /// (§4.2: a batch only grows past the limit when it is a single,
        /// already-oversized leaf block).
        #[test]
        fn multi_node_batches_respect_the_budget(blocks in prop::collection::vec(block_strategy(), 0..12)) {
            let mut body_html = String::new();
            for block in &blocks {
                render(block, &mut body_html);
            }
            let wrapped = format!("<html><body>{body_html}</body></html>");
            let batches = segment_document(&wrapped, V2, BATCH_CHAR_LIMIT).unwrap();
            for batch in &batches {
                if batch.node_paths.len() > 1 {
                    prop_assert!(batch.original_html.chars().count() <= BATCH_CHAR_LIMIT);
                }
            }
        }
    }
}
