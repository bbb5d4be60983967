use tracing::{debug, instrument};

// Kerberos KDC traffic is described with the security package's own types.
pub use sspi::{generator::NetworkRequest, network_client::NetworkProtocol};

use crate::{
    ClientError,
    config::{Authentication, WinRmConfig},
    connector::{
        basic::BasicNegotiator,
        channel::EncryptedChannel,
        channel_binding::ChannelBinding,
        encryption::SealedMessage,
        http::HttpClient,
        kerberos::KerberosMechanism,
        ntlm::NtlmMechanism,
    },
};

pub use kerberos::KdcClient;
pub use transport::{SoapTransport, WinRmTransport};

pub mod basic;
pub mod channel;
pub mod channel_binding;
pub mod encryption;
pub mod http;
pub mod kerberos;
pub mod ntlm;
pub mod transport;

/// Carries one SOAP envelope to the server and returns the reply envelope.
///
/// Implementations own whatever authentication state the scheme needs and recover from a
/// server-side session reset on their own.
pub trait AuthNegotiator {
    fn send(
        &mut self,
        http: &mut dyn HttpClient,
        url: &str,
        soap: &str,
    ) -> Result<String, ClientError>;

    fn name(&self) -> &'static str;
}

/// A connection-bound authentication handshake that ends in a sealing session.
pub trait SecurityMechanism {
    type Session: SealingSession;

    /// `protocol=` value of the `multipart/encrypted` content type.
    fn protocol(&self) -> &'static str;

    fn handshake(
        &mut self,
        http: &mut dyn HttpClient,
        url: &str,
    ) -> Result<Self::Session, ClientError>;
}

/// Message confidentiality and integrity established by a [`SecurityMechanism`].
pub trait SealingSession {
    fn wrap(&mut self, plaintext: &[u8]) -> Result<SealedMessage, ClientError>;

    /// Verifies and decrypts a reply.
    ///
    /// A failed check may already have consumed cipher state, so the session must not be used
    /// again afterwards.
    fn unwrap(&mut self, sealed: &SealedMessage) -> Result<Vec<u8>, ClientError>;
}

/// Picks the negotiator for the configured authentication scheme.
///
/// `kdc` carries Kerberos traffic to the KDC; it is ignored by the other schemes.
#[instrument(skip_all, fields(auth = config.authentication.name()))]
pub fn negotiator_for(
    config: &WinRmConfig,
    kdc: Option<Box<dyn KdcClient>>,
) -> Result<Box<dyn AuthNegotiator>, ClientError> {
    let channel_binding = config
        .server_certificate
        .as_deref()
        .filter(|_| config.endpoint.is_tls())
        .map(ChannelBinding::from_certificate);
    debug!(channel_binding = channel_binding.is_some(), "selecting negotiator");

    let negotiator: Box<dyn AuthNegotiator> = match &config.authentication {
        Authentication::Basic { username, password } => {
            Box::new(BasicNegotiator::new(username.clone(), password.clone()))
        }
        Authentication::Ntlm {
            username,
            domain,
            secret,
        } => Box::new(EncryptedChannel::new(NtlmMechanism::new(
            username.clone(),
            domain.clone(),
            secret.clone(),
            config.endpoint.default_spn(),
            channel_binding,
        ))),
        Authentication::Kerberos {
            username,
            domain,
            password,
            spn,
            kdc_url,
            client_computer_name,
        } => {
            let kdc = kdc.ok_or_else(|| {
                ClientError::Config("Kerberos authentication needs a KDC client".into())
            })?;
            let mechanism = KerberosMechanism::builder()
                .username(username.clone())
                .domain(domain.clone())
                .password(password.clone())
                .spn(spn.clone().unwrap_or_else(|| config.endpoint.default_spn()))
                .kdc_url(kdc_url.clone())
                .client_computer_name(
                    client_computer_name
                        .clone()
                        .unwrap_or_else(|| {
                            whoami::fallible::hostname().unwrap_or_else(|_| "localhost".to_string())
                        }),
                )
                .channel_binding(channel_binding)
                .kdc(kdc)
                .build();
            Box::new(EncryptedChannel::new(mechanism))
        }
    };

    Ok(negotiator)
}
