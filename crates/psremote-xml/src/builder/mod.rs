//! A small namespaced XML writer.
//!
//! Namespaces are declared on an element with [`Element::add_namespace_declaration`] and are
//! in scope for its descendants. Text and attribute values are escaped on output.
mod attribute;
mod builder;
mod element;
mod namespace;

use std::{borrow::Cow, collections::HashMap};

pub use self::attribute::*;
pub use self::builder::*;
pub use self::element::*;
pub use self::namespace::*;

pub type AliasMap<'a> = HashMap<Namespace<'a>, Option<&'a str>>;

#[derive(Debug, thiserror::Error)]
pub enum XmlBuilderError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("UTF-8 error: {0}")]
    Utf8Error(#[from] std::string::FromUtf8Error),
    #[error("Missing alias map for attribute '{attr}' in namespace '{ns}'")]
    MissingAliasMapForAttribute { attr: String, ns: String },
    #[error("Namespace '{ns}' not declared for tag '{tag}'")]
    NamespaceNotDeclared { tag: String, ns: String },
    #[error("Namespace '{ns}' has no alias for '{tag}'")]
    NamespaceHasNoAlias { tag: String, ns: String },
}

pub trait NamespaceWrite<'a> {
    fn ns_write<W: std::io::Write>(
        &self,
        w: &mut W,
        aliases: Option<&AliasMap<'a>>,
    ) -> Result<(), XmlBuilderError>;
}

/// Escapes the five predefined XML entities.
pub fn escape(value: &str) -> Cow<'_, str> {
    if !value.contains(['&', '<', '>', '"', '\'']) {
        return Cow::Borrowed(value);
    }

    let mut escaped = String::with_capacity(value.len() + 16);
    for c in value.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            c => escaped.push(c),
        }
    }
    Cow::Owned(escaped)
}
