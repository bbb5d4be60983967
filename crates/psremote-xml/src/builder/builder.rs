use crate::builder::{Element, NamespaceWrite, XmlBuilderError};

/// Serializes a root element into a document string.
pub struct Builder<'a> {
    element: Element<'a>,
}

impl<'a> Builder<'a> {
    pub fn new(element: Element<'a>) -> Self {
        Builder { element }
    }

    pub fn write_to<W: std::io::Write>(&self, mut w: W) -> Result<(), XmlBuilderError> {
        self.element.ns_write(&mut w, None)
    }

    pub fn to_xml_string(&self) -> Result<String, XmlBuilderError> {
        let mut buf = Vec::new();
        self.write_to(&mut buf)?;
        Ok(String::from_utf8(buf)?)
    }
}
