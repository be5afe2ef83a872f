//! Tag-integrity checking (§4.4): the mandatory invariant that a
//! translated fragment contains exactly the same opening/closing tag
//! tokens as the original, as a multiset.

use regex::Regex;
use std::sync::OnceLock;

fn tag_token_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"</?[A-Za-z][A-Za-z0-9]*").expect("static regex"))
}

/// Extract the sorted multiset of tag opener/closer tokens from `s`, e.g.
/// `<p>Hi <b>there</b>.</p>` -> `["<b", "<p", "</b", "</p"]`.
pub fn tag_multiset(s: &str) -> Vec<String> {
    let mut tokens: Vec<String> = tag_token_re().find_iter(s).map(|m| m.as_str().to_owned()).collect();
    tokens.sort_unstable();
    tokens
}

/// `true` iff `original` and `translated` have the same tag multiset.
pub fn integrity_holds(original: &str, translated: &str) -> bool {
    tag_multiset(original) == tag_multiset(translated)
}

/// Strip a leading ` ```html ` (or bare ` ``` `) fence and a trailing
/// ` ``` `, the single most common way an LLM wraps markup it was told
/// not to wrap.
pub fn strip_code_fence(s: &str) -> &str {
    let trimmed = s.trim();
    let without_open = trimmed
        .strip_prefix("```html")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed)
        .trim_start_matches(['\n', '\r'])
        .trim_start();
    without_open.strip_suffix("```").map(|s| s.trim_end()).unwrap_or(without_open)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multiset_ignores_attributes_and_case() {
        let tokens = tag_multiset(r#"<P class="x">Hi</P>"#);
        assert_eq!(tokens, vec!["<P".to_owned(), "</P".to_owned()]);
    }

    #[test]
    fn integrity_detects_dropped_tag() {
        assert!(!integrity_holds("<p>Hi <b>there</b>.</p>", "<p>مرحبا هناك.</p>"));
        assert!(integrity_holds("<p>Hi <b>there</b>.</p>", "<p>مرحبا <b>هناك</b>.</p>"));
    }

    #[test]
    fn strips_fence_with_language_tag() {
        assert_eq!(strip_code_fence("```html\n<p>hi</p>\n```"), "<p>hi</p>");
        assert_eq!(strip_code_fence("```\n<p>hi</p>\n```"), "<p>hi</p>");
        assert_eq!(strip_code_fence("<p>hi</p>"), "<p>hi</p>");
    }
}
