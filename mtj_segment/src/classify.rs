//! Tag classification shared verbatim between the segmenter's forward walk
//! and the reassembler's re-walk. Both must agree node-for-node, so this
//! lives in one place rather than being duplicated per caller.

/// Soft character budget for one batch's serialised markup.
pub const BATCH_CHAR_LIMIT: usize = 6000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaVersion {
    V1,
    V2,
}

impl SchemaVersion {
    pub fn from_i32(v: i32) -> Self {
        if v <= 1 {
            SchemaVersion::V1
        } else {
            SchemaVersion::V2
        }
    }

    pub fn as_i32(self) -> i32 {
        match self {
            SchemaVersion::V1 => 1,
            SchemaVersion::V2 => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagClass {
    Block,
    Breaker,
    Header,
    Other,
}

const HEADER_TAGS: &[&str] = &["h1", "h2", "h3", "h4", "h5", "h6"];

const BLOCK_TAGS: &[&str] = &[
    "p", "div", "blockquote", "li", "section", "article", "aside", "main", "header", "footer",
];

const BREAKER_TAGS: &[&str] = &["img", "hr", "pre", "svg", "figure"];

/// Classify an element by its local (namespace-stripped) tag name.
///
/// Headings take precedence over the generic block list even though
/// heading levels are also enumerated among the block tags in spec
/// prose, but they need the always-flush-alone treatment, not ordinary
/// leaf capture.
pub fn classify_tag(local_name: &str, schema: SchemaVersion) -> TagClass {
    let name = local_name.to_ascii_lowercase();

    if HEADER_TAGS.contains(&name.as_str()) {
        return TagClass::Header;
    }
    if name == "table" {
        return match schema {
            SchemaVersion::V2 => TagClass::Block,
            SchemaVersion::V1 => TagClass::Breaker,
        };
    }
    if BREAKER_TAGS.contains(&name.as_str()) {
        return TagClass::Breaker;
    }
    if BLOCK_TAGS.contains(&name.as_str()) {
        return TagClass::Block;
    }
    TagClass::Other
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn headings_are_header_not_block() {
        assert_eq!(classify_tag("h1", SchemaVersion::V2), TagClass::Header);
        assert_eq!(classify_tag("H3", SchemaVersion::V2), TagClass::Header);
    }

    #[test]
    fn table_depends_on_schema() {
        assert_eq!(classify_tag("table", SchemaVersion::V1), TagClass::Breaker);
        assert_eq!(classify_tag("table", SchemaVersion::V2), TagClass::Block);
    }

    #[test]
    fn unknown_tags_are_other() {
        assert_eq!(classify_tag("span", SchemaVersion::V2), TagClass::Other);
        assert_eq!(classify_tag("em", SchemaVersion::V2), TagClass::Other);
    }
}
