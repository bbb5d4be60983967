use core::fmt;
use std::hash::Hash;

/// Namespace bound to the `xml:` prefix by definition; it is never declared.
pub const XML_NAMESPACE: &str = "http://www.w3.org/XML/1998/namespace";

/// Represents a namespace in XML.
#[derive(Debug, Clone, Copy, Eq)]
pub struct Namespace<'a> {
    pub url: &'a str,
}

impl PartialEq for Namespace<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.url == other.url
    }
}

impl fmt::Display for Namespace<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.url.fmt(f)
    }
}

impl Hash for Namespace<'_> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.url.hash(state);
    }
}

impl<'a> Namespace<'a> {
    /// Creates a new instance of `Namespace` with the given URI.
    ///
    /// # Example
    ///
    /// ```
    /// use psremote_xml::builder::Namespace;
    /// let namespace = Namespace::new("http://example.com");
    /// assert_eq!(namespace.url, "http://example.com");
    /// ```
    pub fn new(uri: &'a str) -> Self {
        Namespace { url: uri }
    }

    pub(crate) fn is_xml(&self) -> bool {
        self.url == XML_NAMESPACE
    }
}

impl<'a> From<&'a str> for Namespace<'a> {
    fn from(url: &'a str) -> Self {
        Namespace::new(url)
    }
}
