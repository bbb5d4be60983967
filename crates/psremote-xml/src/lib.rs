pub mod builder;
pub mod parser;

#[derive(Debug, thiserror::Error)]
pub enum XmlError {
    #[error("Invalid XML: {0}")]
    ParserError(#[from] crate::parser::Error),

    #[error("XML Builder error: {0}")]
    BuilderError(#[from] crate::builder::XmlBuilderError),
}
