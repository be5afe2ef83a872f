//! Package-document (OPF) metadata rewriting for export: target language,
//! spine reading direction, and an optional replacement title (§4.5 "OPF
//! metadata update").
//!
//! Reuses `mtj_segment::dom`'s generic XML tree: it was written for
//! content documents but has no HTML-specific assumptions, so it parses
//! and re-serialises an OPF package document just as well.

use mtj_segment::dom::{Element, NodeData};

/// `dc:title` -> `title`, `opf:role` -> `role`, same local-name rule the
/// reader uses when walking the OPF.
fn local_name(qualified: &str) -> &str {
    match qualified.rsplit_once(':') {
        Some((_, local)) => local,
        None => qualified,
    }
}

fn find_child_by_local<'a>(el: &'a Element, local: &str) -> Option<&'a Element> {
    el.children.iter().find_map(|c| match c {
        NodeData::Element(child) if local_name(&child.name).eq_ignore_ascii_case(local) => Some(child),
        _ => None,
    })
}

fn find_child_by_local_mut<'a>(el: &'a mut Element, local: &str) -> Option<&'a mut Element> {
    el.children.iter_mut().find_map(|c| match c {
        NodeData::Element(child) if local_name(&child.name).eq_ignore_ascii_case(local) => Some(child),
        _ => None,
    })
}

fn set_text_content(el: &mut Element, text: &str) {
    el.children = vec![NodeData::Text(text.to_owned())];
}

/// Mutate a parsed `<package>` element in place: set/create the
/// `dc:language` element, set the spine's `page-progression-direction`,
/// and replace the title text if a translated one was supplied.
pub fn update_package(package: &mut Element, target_language_code: &str, target_direction: &str, translated_title: Option<&str>) {
    if let Some(metadata) = find_child_by_local_mut(package, "metadata") {
        match find_child_by_local_mut(metadata, "language") {
            Some(lang_el) => set_text_content(lang_el, target_language_code),
            None => {
                let mut lang_el = Element::new("dc:language");
                lang_el.children.push(NodeData::Text(target_language_code.to_owned()));
                metadata.children.push(NodeData::Element(lang_el));
            }
        }

        if let Some(title) = translated_title {
            if let Some(title_el) = find_child_by_local_mut(metadata, "title") {
                set_text_content(title_el, title);
            }
        }
    }

    if let Some(spine) = find_child_by_local_mut(package, "spine") {
        spine.set_attr("page-progression-direction", target_direction);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mtj_segment::dom;

    #[test]
    fn sets_language_creates_element_if_absent() {
        let xml = r#"<package xmlns:dc="http://purl.org/dc/elements/1.1/">
<metadata><dc:title>T</dc:title></metadata>
<spine></spine>
</package>"#;
        let nodes = dom::parse_nodes(xml).unwrap();
        let NodeData::Element(mut package) = nodes.into_iter().next().unwrap() else { panic!() };
        update_package(&mut package, "ar", "rtl", None);
        let metadata = find_child_by_local(&package, "metadata").unwrap();
        let lang = find_child_by_local(metadata, "language").unwrap();
        assert_eq!(dom::text_content_nodes(&lang.children), "ar");
        let spine = find_child_by_local(&package, "spine").unwrap();
        assert_eq!(spine.attr("page-progression-direction"), Some("rtl"));
    }

    #[test]
    fn replaces_existing_language_and_title() {
        let xml = r#"<package xmlns:dc="http://purl.org/dc/elements/1.1/">
<metadata><dc:title>T</dc:title><dc:language>en</dc:language></metadata>
<spine></spine>
</package>"#;
        let nodes = dom::parse_nodes(xml).unwrap();
        let NodeData::Element(mut package) = nodes.into_iter().next().unwrap() else { panic!() };
        update_package(&mut package, "ar", "rtl", Some("عنوان"));
        let metadata = find_child_by_local(&package, "metadata").unwrap();
        let lang = find_child_by_local(metadata, "language").unwrap();
        assert_eq!(dom::text_content_nodes(&lang.children), "ar");
        let title = find_child_by_local(metadata, "title").unwrap();
        assert_eq!(dom::text_content_nodes(&title.children), "عنوان");
    }
}
