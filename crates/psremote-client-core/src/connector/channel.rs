use std::fmt;

use tracing::{debug, info, instrument, warn};

use crate::{
    ClientError,
    connector::{
        AuthNegotiator, SealingSession, SecurityMechanism,
        encryption::{build_multipart, parse_multipart},
        http::{HttpBody, HttpClient, HttpRequest, HttpResponse},
    },
};

/// Sends every envelope sealed inside a `multipart/encrypted` body.
///
/// The handshake runs lazily before the first request. When the server answers 401 the
/// session is discarded, the handshake repeated once and the envelope resent; a second
/// 401 is reported as [`ClientError::Unauthorized`]. A reply that fails verification also
/// discards the session, so the next request authenticates again.
pub struct EncryptedChannel<M: SecurityMechanism> {
    mechanism: M,
    session: Option<M::Session>,
}

impl<M: SecurityMechanism> EncryptedChannel<M> {
    pub fn new(mechanism: M) -> Self {
        Self {
            mechanism,
            session: None,
        }
    }

    pub fn is_established(&self) -> bool {
        self.session.is_some()
    }

    fn post_sealed(
        &mut self,
        http: &mut dyn HttpClient,
        url: &str,
        soap: &str,
    ) -> Result<(HttpResponse, M::Session), ClientError> {
        let mut session = match self.session.take() {
            Some(session) => session,
            None => self.mechanism.handshake(http, url)?,
        };

        let sealed = session.wrap(soap.as_bytes())?;
        let protocol = self.mechanism.protocol();
        let body = HttpBody::Encrypted {
            protocol,
            data: build_multipart(protocol, soap.len(), &sealed),
        };

        let response = http.send(HttpRequest::post(url, body))?;
        Ok((response, session))
    }
}

impl<M: SecurityMechanism + fmt::Debug> fmt::Debug for EncryptedChannel<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptedChannel")
            .field("mechanism", &self.mechanism)
            .field("established", &self.session.is_some())
            .finish()
    }
}

impl<M: SecurityMechanism> AuthNegotiator for EncryptedChannel<M> {
    #[instrument(skip_all, fields(protocol = self.mechanism.protocol()))]
    fn send(
        &mut self,
        http: &mut dyn HttpClient,
        url: &str,
        soap: &str,
    ) -> Result<String, ClientError> {
        let (mut response, mut session) = self.post_sealed(http, url, soap)?;

        if response.status_code == 401 {
            info!("server rejected the sealed session, authenticating again");
            drop(session);
            http.reset_connection();
            (response, session) = self.post_sealed(http, url, soap)?;

            if response.status_code == 401 {
                warn!("server rejected the request after re-authentication");
                return Err(ClientError::Unauthorized);
            }
        }

        // Unexpected statuses and malformed bodies never reach the cipher state.
        let session = self.session.insert(session);

        if !matches!(response.status_code, 200 | 500) {
            return Err(ClientError::UnexpectedStatus(response.status_code));
        }

        let sealed = parse_multipart(&response.body)?;
        let plaintext = match session.unwrap(&sealed) {
            Ok(plaintext) => plaintext,
            Err(error) => {
                warn!(%error, "sealed reply did not verify, dropping the session");
                self.session = None;
                return Err(error);
            }
        };
        debug!(status = response.status_code, len = plaintext.len(), "received sealed reply");

        String::from_utf8(plaintext)
            .map_err(|_| ClientError::Protocol("decrypted reply is not valid UTF-8".into()))
    }

    fn name(&self) -> &'static str {
        self.mechanism.protocol()
    }
}
