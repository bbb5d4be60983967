pub mod envelope;
pub mod namespaces;
pub mod response;

pub use envelope::*;
pub use response::*;

#[derive(Debug, thiserror::Error)]
pub enum SoapError {
    #[error("XML error: {0}")]
    Xml(#[from] psremote_xml::XmlError),

    #[error("invalid base64 in {element}: {source}")]
    Base64 {
        element: &'static str,
        #[source]
        source: base64::DecodeError,
    },

    #[error("response has no {0} element")]
    MissingElement(&'static str),
}

impl From<psremote_xml::parser::Error> for SoapError {
    fn from(err: psremote_xml::parser::Error) -> Self {
        Self::Xml(err.into())
    }
}

impl From<psremote_xml::builder::XmlBuilderError> for SoapError {
    fn from(err: psremote_xml::builder::XmlBuilderError) -> Self {
        Self::Xml(err.into())
    }
}
