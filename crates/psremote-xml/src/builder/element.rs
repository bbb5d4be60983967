use std::borrow::Cow;

use crate::builder::{AliasMap, Attribute, Namespace, NamespaceWrite, XmlBuilderError, escape};

#[derive(Debug, Clone)]
pub enum Content<'a> {
    /// Text content, escaped when written.
    Text(Cow<'a, str>),
    /// Child elements.
    Elements(Vec<Element<'a>>),

    None,
}

/// Represents an XML element.
#[derive(Debug, Clone)]
pub struct Element<'a> {
    name: &'a str,
    namespace: Option<Namespace<'a>>,
    /// `xmlns` declarations emitted on this element, in insertion order.
    declarations: Vec<(Namespace<'a>, Option<&'a str>)>,
    attributes: Vec<Attribute<'a>>,
    content: Content<'a>,
}

impl<'a> Element<'a> {
    /// Creates a new instance of `Element` with the given name.
    ///
    /// # Example
    ///
    /// ```
    /// use psremote_xml::builder::Element;
    /// let element = Element::new("root");
    /// ```
    pub fn new(name: &'a str) -> Self {
        Element {
            name,
            namespace: None,
            declarations: Vec::new(),
            attributes: Vec::new(),
            content: Content::None,
        }
    }

    pub fn set_namespace(mut self, namespace: impl Into<Namespace<'a>>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Declares `url` on this element. `None` declares the default namespace.
    pub fn add_namespace_declaration(mut self, url: &'a str, alias: Option<&'a str>) -> Self {
        self.declarations.push((Namespace::new(url), alias));
        self
    }

    pub fn add_attribute(mut self, attribute: Attribute<'a>) -> Self {
        self.attributes.push(attribute);
        self
    }

    /// Adds a child element. Any text content is replaced.
    pub fn add_child(mut self, child: Element<'a>) -> Self {
        match self.content {
            Content::None | Content::Text(_) => {
                self.content = Content::Elements(vec![child]);
            }
            Content::Elements(ref mut children) => {
                children.push(child);
            }
        }
        self
    }

    pub fn add_children(mut self, children: impl IntoIterator<Item = Element<'a>>) -> Self {
        for child in children {
            self = self.add_child(child);
        }
        self
    }

    /// Sets the text content. Any child elements are replaced.
    pub fn set_text(mut self, text: impl Into<Cow<'a, str>>) -> Self {
        self.content = Content::Text(text.into());
        self
    }

    fn qualified_name(&self, scope: &AliasMap<'a>) -> Result<Cow<'a, str>, XmlBuilderError> {
        let Some(ns) = &self.namespace else {
            return Ok(Cow::Borrowed(self.name));
        };

        if ns.is_xml() {
            return Ok(Cow::Owned(format!("xml:{}", self.name)));
        }

        match scope.get(ns) {
            Some(Some(alias)) => Ok(Cow::Owned(format!("{alias}:{}", self.name))),
            Some(None) => Ok(Cow::Borrowed(self.name)),
            None => Err(XmlBuilderError::NamespaceNotDeclared {
                tag: self.name.to_string(),
                ns: ns.url.to_string(),
            }),
        }
    }
}

impl<'a> NamespaceWrite<'a> for Element<'a> {
    fn ns_write<W: std::io::Write>(
        &self,
        w: &mut W,
        aliases: Option<&AliasMap<'a>>,
    ) -> Result<(), XmlBuilderError> {
        let mut scope = aliases.cloned().unwrap_or_default();
        for (ns, alias) in &self.declarations {
            scope.insert(*ns, *alias);
        }

        let name = self.qualified_name(&scope)?;
        write!(w, "<{name}")?;

        for (ns, alias) in &self.declarations {
            match alias {
                Some(alias) => write!(w, " xmlns:{alias}=\"{}\"", escape(ns.url))?,
                None => write!(w, " xmlns=\"{}\"", escape(ns.url))?,
            }
        }

        for attribute in &self.attributes {
            attribute.ns_write(w, Some(&scope))?;
        }

        match &self.content {
            Content::None => write!(w, "/>")?,
            Content::Text(text) => write!(w, ">{}</{name}>", escape(text))?,
            Content::Elements(children) => {
                write!(w, ">")?;
                for child in children {
                    child.ns_write(w, Some(&scope))?;
                }
                write!(w, "</{name}>")?;
            }
        }

        Ok(())
    }
}
