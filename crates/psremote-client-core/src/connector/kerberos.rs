//! Kerberos through the sspi security package, sealed with
//! `application/HTTP-Kerberos-session-encrypted`.
use std::fmt;

use base64::Engine;
use sspi::generator::GeneratorState;
use sspi::{
    BufferType, ClientRequestFlags, CredentialUse, Credentials, DataRepresentation,
    EncryptionFlags, Kerberos, SecurityBuffer, SecurityBufferRef, SecurityStatus, Sspi, SspiImpl,
};
use tracing::{debug, info, instrument, warn};
use typed_builder::TypedBuilder;
use url::Url;

use crate::{
    ClientError,
    connector::{
        NetworkRequest, SealingSession, SecurityMechanism,
        channel_binding::ChannelBinding,
        encryption::{KERBEROS_PROTOCOL, SealedMessage},
        http::{HttpBody, HttpClient, HttpRequest, HttpResponse},
    },
    credentials::{ClientAuthIdentity, ClientUserName},
};

const AUTH_SCHEME: &str = "Kerberos";

/// Mutual authentication takes two HTTP round trips; anything beyond this is a broken server.
const MAX_HTTP_ROUNDS: usize = 3;

type CredentialsHandle = <Kerberos as SspiImpl>::CredentialsHandle;

/// Carries the security package's KDC traffic.
///
/// The reply must include whatever framing the transport adds (for TCP, the four byte length
/// prefix), exactly as received.
pub trait KdcClient {
    fn send(&mut self, request: &NetworkRequest) -> Result<Vec<u8>, ClientError>;
}

#[derive(TypedBuilder)]
pub struct KerberosMechanism {
    username: String,
    domain: Option<String>,
    password: String,
    spn: String,
    kdc_url: Option<Url>,
    client_computer_name: String,
    #[builder(default)]
    channel_binding: Option<ChannelBinding>,
    kdc: Box<dyn KdcClient>,
    /// Acquired by the first handshake and kept for every re-authentication.
    #[builder(default, setter(skip))]
    credentials_handle: Option<CredentialsHandle>,
}

pub struct KerberosSession {
    provider: Kerberos,
    seq: u32,
}

impl KerberosMechanism {
    fn new_provider(&self) -> Result<Kerberos, ClientError> {
        let config = sspi::KerberosConfig {
            kdc_url: self.kdc_url.clone(),
            client_computer_name: Some(self.client_computer_name.clone()),
        };
        Ok(Kerberos::new_client_from_config(config)?)
    }

    fn take_credentials(
        &mut self,
        provider: &mut Kerberos,
    ) -> Result<CredentialsHandle, ClientError> {
        if let Some(credentials_handle) = self.credentials_handle.take() {
            debug!("reusing Kerberos credentials");
            return Ok(credentials_handle);
        }

        let username = ClientUserName::new(&self.username, self.domain.as_deref())?;
        let identity = ClientAuthIdentity::new(username, self.password.clone());
        let credentials = Credentials::AuthIdentity(identity.into_inner());

        let credentials_handle = provider
            .acquire_credentials_handle()
            .with_credential_use(CredentialUse::Outbound)
            .with_auth_data(&credentials)
            .execute(provider)?
            .credentials_handle;
        info!("acquired Kerberos credentials");
        Ok(credentials_handle)
    }

    /// One `InitializeSecurityContext` call, answering the package's KDC requests as they come.
    fn step(
        &mut self,
        provider: &mut Kerberos,
        credentials_handle: &mut CredentialsHandle,
        server_token: Option<Vec<u8>>,
    ) -> Result<(SecurityStatus, Vec<u8>), ClientError> {
        let mut output = [SecurityBuffer::new(Vec::new(), BufferType::Token)];
        let mut input = Vec::new();
        if let Some(token) = server_token {
            input.push(SecurityBuffer::new(token, BufferType::Token));
        }
        if let Some(binding) = &self.channel_binding {
            input.push(SecurityBuffer::new(
                binding.sec_channel_bindings(),
                BufferType::ChannelBindings,
            ));
        }

        let status = {
            let mut builder = provider
                .initialize_security_context()
                .with_credentials_handle(credentials_handle)
                .with_context_requirements(
                    ClientRequestFlags::MUTUAL_AUTH
                        | ClientRequestFlags::CONFIDENTIALITY
                        | ClientRequestFlags::INTEGRITY
                        | ClientRequestFlags::REPLAY_DETECT
                        | ClientRequestFlags::SEQUENCE_DETECT,
                )
                .with_target_data_representation(DataRepresentation::Native)
                .with_target_name(&self.spn)
                .with_output(&mut output);
            if !input.is_empty() {
                builder = builder.with_input(input.as_mut_slice());
            }

            let mut generator = provider.initialize_security_context_impl(&mut builder)?;
            let mut state = generator.start();
            loop {
                match state {
                    GeneratorState::Suspended(request) => {
                        debug!(protocol = ?request.protocol, url = %request.url, "KDC request");
                        let reply = self.kdc.send(&request).map_err(|e| {
                            sspi::Error::new(
                                sspi::ErrorKind::NoAuthenticatingAuthority,
                                e.to_string(),
                            )
                        });
                        state = generator.resume(reply);
                    }
                    GeneratorState::Completed(result) => break result?.status,
                }
            }
        };

        Ok((status, std::mem::take(&mut output[0].buffer)))
    }

    /// Drives the context to completion, exchanging tokens in `Authorization` headers.
    fn establish(
        &mut self,
        http: &mut dyn HttpClient,
        url: &str,
        provider: &mut Kerberos,
        credentials_handle: &mut CredentialsHandle,
    ) -> Result<(), ClientError> {
        let mut server_token = None;

        for round in 0..MAX_HTTP_ROUNDS {
            let (status, token) = self.step(provider, credentials_handle, server_token.take())?;
            debug!(round, ?status, token_len = token.len(), "security context step");

            let response = if token.is_empty() {
                None
            } else {
                Some(self.post_token(http, url, &token)?)
            };

            match status {
                SecurityStatus::Ok => return Ok(()),
                SecurityStatus::ContinueNeeded => {
                    let response = response.ok_or_else(|| {
                        ClientError::Auth(
                            "security package wants to continue without a token".into(),
                        )
                    })?;
                    server_token = Some(response.auth_token(AUTH_SCHEME).ok_or_else(|| {
                        warn!(status = response.status_code, "no Kerberos token in response");
                        ClientError::Auth(
                            format!(
                                "server answered with status {} and no Kerberos token",
                                response.status_code
                            )
                            .into(),
                        )
                    })?);
                }
                other => {
                    return Err(ClientError::Auth(
                        format!("unexpected security status {other:?}").into(),
                    ));
                }
            }
        }

        Err(ClientError::Auth("Kerberos handshake did not converge".into()))
    }

    fn post_token(
        &self,
        http: &mut dyn HttpClient,
        url: &str,
        token: &[u8],
    ) -> Result<HttpResponse, ClientError> {
        http.send(
            HttpRequest::post(url, HttpBody::None).with_authorization(format!(
                "{AUTH_SCHEME} {}",
                base64::engine::general_purpose::STANDARD.encode(token)
            )),
        )
    }
}

impl SecurityMechanism for KerberosMechanism {
    type Session = KerberosSession;

    fn protocol(&self) -> &'static str {
        KERBEROS_PROTOCOL
    }

    #[instrument(skip_all, fields(user = %self.username, spn = %self.spn))]
    fn handshake(
        &mut self,
        http: &mut dyn HttpClient,
        url: &str,
    ) -> Result<KerberosSession, ClientError> {
        // Every context needs a fresh provider; the credentials outlive it.
        let mut provider = self.new_provider()?;
        let mut credentials_handle = self.take_credentials(&mut provider)?;
        let established = self.establish(http, url, &mut provider, &mut credentials_handle);
        self.credentials_handle = Some(credentials_handle);

        established?;
        info!("Kerberos handshake finished");
        Ok(KerberosSession { provider, seq: 0 })
    }
}

impl SealingSession for KerberosSession {
    fn wrap(&mut self, plaintext: &[u8]) -> Result<SealedMessage, ClientError> {
        let trailer = self.provider.query_context_sizes()?.security_trailer as usize;
        let mut token = vec![0u8; trailer];
        let mut data = plaintext.to_vec();

        let mut buffers = [
            SecurityBufferRef::token_buf(&mut token),
            SecurityBufferRef::data_buf(&mut data),
        ];
        self.provider
            .encrypt_message(EncryptionFlags::empty(), &mut buffers, self.seq)?;

        Ok(SealedMessage {
            token: buffers[0].data().to_vec(),
            ciphertext: buffers[1].data().to_vec(),
        })
    }

    fn unwrap(&mut self, sealed: &SealedMessage) -> Result<Vec<u8>, ClientError> {
        let mut token = sealed.token.clone();
        let mut data = sealed.ciphertext.clone();

        let mut buffers = [
            SecurityBufferRef::token_buf(&mut token),
            SecurityBufferRef::data_buf(&mut data),
        ];
        self.provider.decrypt_message(&mut buffers, self.seq).map_err(|e| {
            warn!(seq = self.seq, error = %e, "Kerberos unwrap failed");
            ClientError::Integrity("Kerberos message did not verify")
        })?;

        let plaintext = buffers[1].data().to_vec();
        self.seq = self.seq.wrapping_add(1);
        Ok(plaintext)
    }
}

impl fmt::Debug for KerberosMechanism {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KerberosMechanism")
            .field("username", &self.username)
            .field("domain", &self.domain)
            .field("spn", &self.spn)
            .field("kdc_url", &self.kdc_url)
            .field("client_computer_name", &self.client_computer_name)
            .field("channel_binding", &self.channel_binding.is_some())
            .finish_non_exhaustive()
    }
}

impl fmt::Debug for KerberosSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KerberosSession")
            .field("seq", &self.seq)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::{cell::RefCell, rc::Rc};

    use super::*;

    /// A KDC that is never reachable, recording where it was asked to go.
    struct UnreachableKdc {
        requests: Rc<RefCell<Vec<String>>>,
    }

    impl KdcClient for UnreachableKdc {
        fn send(&mut self, request: &NetworkRequest) -> Result<Vec<u8>, ClientError> {
            self.requests.borrow_mut().push(request.url.to_string());
            Err(ClientError::Transport("KDC unreachable".into()))
        }
    }

    /// A listener that never completes Kerberos.
    #[derive(Default)]
    struct RejectingServer {
        posts: usize,
    }

    impl HttpClient for RejectingServer {
        fn send(&mut self, _request: HttpRequest) -> Result<HttpResponse, ClientError> {
            self.posts += 1;
            Ok(HttpResponse {
                status_code: 401,
                headers: Vec::new(),
                body: Vec::new(),
            })
        }
    }

    fn mechanism(requests: &Rc<RefCell<Vec<String>>>) -> KerberosMechanism {
        KerberosMechanism::builder()
            .username("alice@CORP.LOCAL".to_owned())
            .domain(None)
            .password("Passw0rd!".to_owned())
            .spn("HTTP/web01.corp.local".to_owned())
            .kdc_url(Some(Url::parse("tcp://dc01.corp.local:88").unwrap()))
            .client_computer_name("ws01".to_owned())
            .kdc(Box::new(UnreachableKdc {
                requests: Rc::clone(requests),
            }))
            .build()
    }

    #[test]
    #[tracing_test::traced_test]
    fn test_credentials_survive_failed_handshakes() {
        let requests = Rc::new(RefCell::new(Vec::new()));
        let mut mechanism = mechanism(&requests);
        let mut server = RejectingServer::default();

        assert!(mechanism.handshake(&mut server, "http://web01:5985/wsman").is_err());
        assert!(mechanism.credentials_handle.is_some());
        assert!(logs_contain("acquired Kerberos credentials"));

        assert!(mechanism.handshake(&mut server, "http://web01:5985/wsman").is_err());
        assert!(mechanism.credentials_handle.is_some());
        assert!(logs_contain("reusing Kerberos credentials"));

        // Whichever side the package turned to first, nothing ever succeeded.
        assert!(server.posts + requests.borrow().len() >= 2);
        for url in requests.borrow().iter() {
            assert!(url.starts_with("tcp://dc01.corp.local"));
        }
    }

    #[test]
    fn test_debug_hides_password() {
        let requests = Rc::new(RefCell::new(Vec::new()));
        let rendered = format!("{:?}", mechanism(&requests));
        assert!(rendered.contains("HTTP/web01.corp.local"));
        assert!(!rendered.contains("Passw0rd!"));
    }
}
