use std::borrow::Cow;

pub mod config;
pub mod connector;
pub mod credentials;
pub mod runspace;

pub use config::{Authentication, Endpoint, NtlmSecret, Scheme, WinRmConfig};
pub use connector::{AuthNegotiator, KdcClient, SoapTransport, WinRmTransport};
pub use credentials::{ClientAuthIdentity, ClientUserName};
pub use runspace::{CancellationToken, CommandOutput, OutputRecord, RunspaceSession};

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Authentication error: {0}")]
    Auth(Cow<'static, str>),

    #[error("Transport error: {0}")]
    Transport(Cow<'static, str>),

    #[error("Unexpected HTTP status {0}")]
    UnexpectedStatus(u16),

    #[error("Server rejected the request after re-authentication")]
    Unauthorized,

    #[error("Protocol error: {0}")]
    Protocol(Cow<'static, str>),

    #[error("Message integrity check failed: {0}")]
    Integrity(&'static str),

    #[error("Remote command failed: {0}")]
    CommandFailed(String),

    #[error("Invalid configuration: {0}")]
    Config(Cow<'static, str>),

    #[error("PSRP error: {0}")]
    Psrp(#[from] psremote_psrp::PsrpError),

    #[error("SOAP error: {0}")]
    Soap(#[from] psremote_wsman::SoapError),

    #[error("XML error: {0}")]
    Xml(#[from] psremote_xml::XmlError),

    #[error("SSPI error: {0}")]
    Sspi(#[from] sspi::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
