use tracing::{debug, instrument, trace};

use crate::{
    ClientError,
    config::WinRmConfig,
    connector::{AuthNegotiator, KdcClient, http::HttpClient, negotiator_for},
};

/// Exchanges SOAP envelopes with one WinRM endpoint.
pub trait SoapTransport {
    fn send(&mut self, envelope: &str) -> Result<String, ClientError>;
}

/// [`SoapTransport`] over an [`HttpClient`], authenticated by the configured negotiator.
pub struct WinRmTransport<C: HttpClient> {
    http: C,
    url: String,
    negotiator: Box<dyn AuthNegotiator>,
}

impl<C: HttpClient> WinRmTransport<C> {
    pub fn new(
        http: C,
        config: &WinRmConfig,
        kdc: Option<Box<dyn KdcClient>>,
    ) -> Result<Self, ClientError> {
        Ok(Self::with_negotiator(
            http,
            config.endpoint.url(),
            negotiator_for(config, kdc)?,
        ))
    }

    pub fn with_negotiator(http: C, url: String, negotiator: Box<dyn AuthNegotiator>) -> Self {
        Self {
            http,
            url,
            negotiator,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl<C: HttpClient> SoapTransport for WinRmTransport<C> {
    #[instrument(skip_all, fields(url = %self.url, auth = self.negotiator.name()))]
    fn send(&mut self, envelope: &str) -> Result<String, ClientError> {
        trace!(envelope, "outgoing envelope");
        let reply = self.negotiator.send(&mut self.http, &self.url, envelope)?;
        debug!(len = reply.len(), "received envelope");
        trace!(reply = reply.as_str(), "incoming envelope");
        Ok(reply)
    }
}

impl<T: SoapTransport + ?Sized> SoapTransport for Box<T> {
    fn send(&mut self, envelope: &str) -> Result<String, ClientError> {
        (**self).send(envelope)
    }
}

impl<C: HttpClient + std::fmt::Debug> std::fmt::Debug for WinRmTransport<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WinRmTransport")
            .field("http", &self.http)
            .field("url", &self.url)
            .field("auth", &self.negotiator.name())
            .finish()
    }
}
