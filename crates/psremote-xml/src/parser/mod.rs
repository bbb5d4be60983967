pub use roxmltree::*;

pub fn parse(xml: &str) -> Result<Document<'_>, roxmltree::Error> {
    roxmltree::Document::parse(xml)
}

/// Namespace-agnostic navigation by local element name.
///
/// WinRM responses use whatever prefixes the server chooses, so lookups match the
/// local name only.
pub trait NodeExt<'a, 'input: 'a> {
    fn child(&self, local_name: &str) -> Option<Node<'a, 'input>>;

    fn children_named(&self, local_name: &str) -> Vec<Node<'a, 'input>>;

    fn descendant(&self, local_name: &str) -> Option<Node<'a, 'input>>;

    /// Concatenated text of all descendant text nodes.
    fn deep_text(&self) -> String;

    fn text_or_empty(&self) -> &'a str;
}

impl<'a, 'input: 'a> NodeExt<'a, 'input> for Node<'a, 'input> {
    fn child(&self, local_name: &str) -> Option<Node<'a, 'input>> {
        self.children()
            .find(|n| n.is_element() && n.tag_name().name() == local_name)
    }

    fn children_named(&self, local_name: &str) -> Vec<Node<'a, 'input>> {
        self.children()
            .filter(|n| n.is_element() && n.tag_name().name() == local_name)
            .collect()
    }

    fn descendant(&self, local_name: &str) -> Option<Node<'a, 'input>> {
        self.descendants()
            .skip(1)
            .find(|n| n.is_element() && n.tag_name().name() == local_name)
    }

    fn deep_text(&self) -> String {
        self.descendants()
            .filter(Node::is_text)
            .filter_map(|n| n.text())
            .collect()
    }

    fn text_or_empty(&self) -> &'a str {
        self.text().unwrap_or_default()
    }
}
