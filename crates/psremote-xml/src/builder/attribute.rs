use std::borrow::Cow;

use crate::builder::{AliasMap, Namespace, NamespaceWrite, XmlBuilderError, escape};

/// Represents an XML attribute with a name and value.
#[derive(Debug, Clone)]
pub struct Attribute<'a> {
    /// The name of the attribute.
    name: &'a str,
    /// The value of the attribute, escaped when written.
    value: Cow<'a, str>,

    namespace: Option<Namespace<'a>>,
}

impl<'a> Attribute<'a> {
    /// Creates a new instance of `Attribute`.
    ///
    /// # Example
    ///
    /// ```
    /// use psremote_xml::builder::Attribute;
    /// let attribute = Attribute::new("name", "value");
    /// ```
    pub fn new(name: &'a str, value: impl Into<Cow<'a, str>>) -> Self {
        Attribute {
            name,
            value: value.into(),
            namespace: None,
        }
    }

    pub fn set_namespace(mut self, namespace: impl Into<Namespace<'a>>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }
}

impl<'a> NamespaceWrite<'a> for Attribute<'a> {
    fn ns_write<W: std::io::Write>(
        &self,
        w: &mut W,
        aliases: Option<&AliasMap<'a>>,
    ) -> Result<(), XmlBuilderError> {
        let name = match &self.namespace {
            None => Cow::Borrowed(self.name),
            Some(ns) if ns.is_xml() => Cow::Owned(format!("xml:{}", self.name)),
            Some(ns) => {
                let alias = aliases.and_then(|map| map.get(ns)).ok_or_else(|| {
                    XmlBuilderError::MissingAliasMapForAttribute {
                        attr: self.name.to_string(),
                        ns: ns.url.to_string(),
                    }
                })?;

                // Unprefixed attributes never take the default namespace.
                let alias = (*alias).ok_or_else(|| XmlBuilderError::NamespaceHasNoAlias {
                    tag: self.name.to_string(),
                    ns: ns.url.to_string(),
                })?;
                Cow::Owned(format!("{alias}:{}", self.name))
            }
        };

        write!(w, " {}=\"{}\"", name, escape(&self.value))?;
        Ok(())
    }
}
