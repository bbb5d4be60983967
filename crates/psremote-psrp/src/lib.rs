pub mod escape;
pub mod fragmentation;
pub mod messages;
pub mod ps_value;
pub mod records;

use std::borrow::Cow;

pub use fragmentation::*;
pub use messages::*;
pub use ps_value::{PsObjectWithType, PsProperty, PsValue};
pub use records::{PsrpRecord, extract_records};

#[derive(Debug, thiserror::Error)]
pub enum PsrpError {
    #[error("Invalid PowerShell remoting message: {0}")]
    InvalidMessage(Cow<'static, str>),

    #[error("Fragment reassembly failed: {0}")]
    Reassembly(Cow<'static, str>),

    #[error("Message of {size} bytes does not fit in a single fragment of at most {limit} bytes")]
    MessageTooLarge { size: usize, limit: usize },

    #[error("IO Error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("PsFragment cannot be read as a valid XML message: {0}")]
    Utf8Error(#[from] std::str::Utf8Error),

    #[error("Failed to parse XML: {0}")]
    XmlError(#[from] psremote_xml::XmlError),
}

impl From<psremote_xml::parser::Error> for PsrpError {
    fn from(err: psremote_xml::parser::Error) -> Self {
        Self::XmlError(err.into())
    }
}

impl From<psremote_xml::builder::XmlBuilderError> for PsrpError {
    fn from(err: psremote_xml::builder::XmlBuilderError) -> Self {
        Self::XmlError(err.into())
    }
}
