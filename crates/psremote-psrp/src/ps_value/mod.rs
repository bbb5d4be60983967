//! Encode-only CLIXML serialization.
//!
//! Only the handful of shapes needed by the client's outbound documents are supported.
mod documents;

use psremote_xml::builder::{Attribute, Builder, Element};

pub use documents::*;

use crate::{MessageType, PsrpError};

/// A message body that can be sent to the server.
pub trait PsObjectWithType {
    fn message_type(&self) -> MessageType;
    fn to_ps_object(&self) -> PsValue;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PsValue {
    Nil,
    I32(i32),
    Str(String),
    Version(String),
    Bool(bool),
    /// An enumeration member, carried as its underlying integer.
    Enum(i32),
    /// A property bag, `<Obj><MS>..</MS></Obj>`.
    Object(Vec<PsProperty>),
    /// A typed list, `<Obj><LST>..</LST></Obj>`.
    List(Vec<PsValue>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PsProperty {
    pub name: String,
    pub value: PsValue,
}

impl PsProperty {
    pub fn new(name: impl Into<String>, value: PsValue) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }
}

impl From<&str> for PsValue {
    fn from(value: &str) -> Self {
        PsValue::Str(value.to_owned())
    }
}

impl From<String> for PsValue {
    fn from(value: String) -> Self {
        PsValue::Str(value)
    }
}

impl From<bool> for PsValue {
    fn from(value: bool) -> Self {
        PsValue::Bool(value)
    }
}

impl From<i32> for PsValue {
    fn from(value: i32) -> Self {
        PsValue::I32(value)
    }
}

impl<T: Into<PsValue>> From<Option<T>> for PsValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(PsValue::Nil, Into::into)
    }
}

impl PsValue {
    pub fn to_xml_string(&self) -> Result<String, PsrpError> {
        let mut ref_ids = 0;
        let element = self.to_element(None, &mut ref_ids);
        Ok(Builder::new(element).to_xml_string()?)
    }

    fn to_element<'a>(&'a self, name: Option<&'a str>, ref_ids: &mut u32) -> Element<'a> {
        let tag = match self {
            PsValue::Nil => "Nil",
            PsValue::I32(_) => "I32",
            PsValue::Str(_) => "S",
            PsValue::Version(_) => "Version",
            PsValue::Bool(_) => "B",
            PsValue::Enum(_) | PsValue::Object(_) | PsValue::List(_) => "Obj",
        };

        let mut element = Element::new(tag);
        if let Some(name) = name {
            element = element.add_attribute(Attribute::new("N", name));
        }

        match self {
            PsValue::Nil => element,
            PsValue::I32(value) => element.set_text(value.to_string()),
            PsValue::Str(value) | PsValue::Version(value) => element.set_text(value.as_str()),
            PsValue::Bool(value) => element.set_text(if *value { "true" } else { "false" }),
            PsValue::Enum(value) => element
                .add_attribute(next_ref_id(ref_ids))
                .add_child(Element::new("I32").set_text(value.to_string())),
            PsValue::Object(properties) => {
                let element = element.add_attribute(next_ref_id(ref_ids));
                let mut members = Element::new("MS");
                for property in properties {
                    let child = property
                        .value
                        .to_element(Some(property.name.as_str()), ref_ids);
                    members = members.add_child(child);
                }
                element.add_child(members)
            }
            PsValue::List(items) => {
                let element = element.add_attribute(next_ref_id(ref_ids));
                let mut list = Element::new("LST");
                for item in items {
                    list = list.add_child(item.to_element(None, ref_ids));
                }
                element.add_child(list)
            }
        }
    }
}

fn next_ref_id<'a>(ref_ids: &mut u32) -> Attribute<'a> {
    let id = *ref_ids;
    *ref_ids += 1;
    Attribute::new("RefId", id.to_string())
}
