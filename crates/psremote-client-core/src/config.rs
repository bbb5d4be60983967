use std::fmt;

use typed_builder::TypedBuilder;
use url::Url;

use crate::ClientError;

pub const DEFAULT_HTTP_PORT: u16 = 5985;
pub const DEFAULT_HTTPS_PORT: u16 = 5986;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Http,
    Https,
}

impl Scheme {
    pub fn default_port(self) -> u16 {
        match self {
            Scheme::Http => DEFAULT_HTTP_PORT,
            Scheme::Https => DEFAULT_HTTPS_PORT,
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scheme::Http => f.write_str("http"),
            Scheme::Https => f.write_str("https"),
        }
    }
}

/// Where the WS-Management listener lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    Host {
        host: String,
        port: Option<u16>,
        scheme: Scheme,
    },
    Url(Url),
}

impl Endpoint {
    pub fn host(host: impl Into<String>, scheme: Scheme) -> Self {
        Endpoint::Host {
            host: host.into(),
            port: None,
            scheme,
        }
    }

    pub fn parse_url(value: &str) -> Result<Self, ClientError> {
        let url = Url::parse(value)
            .map_err(|e| ClientError::Config(format!("invalid URL {value}: {e}").into()))?;
        if url.host_str().is_none() {
            return Err(ClientError::Config("URL has no host".into()));
        }
        Ok(Endpoint::Url(url))
    }

    pub fn url(&self) -> String {
        match self {
            Endpoint::Host { host, port, scheme } => {
                let port = port.unwrap_or_else(|| scheme.default_port());
                format!("{scheme}://{host}:{port}/wsman")
            }
            Endpoint::Url(url) => url.to_string(),
        }
    }

    pub fn hostname(&self) -> String {
        match self {
            Endpoint::Host { host, .. } => host.clone(),
            Endpoint::Url(url) => url.host_str().unwrap_or_default().to_owned(),
        }
    }

    pub fn port(&self) -> u16 {
        match self {
            Endpoint::Host { port, scheme, .. } => port.unwrap_or_else(|| scheme.default_port()),
            Endpoint::Url(url) => url.port_or_known_default().unwrap_or(DEFAULT_HTTP_PORT),
        }
    }

    pub fn is_tls(&self) -> bool {
        match self {
            Endpoint::Host { scheme, .. } => *scheme == Scheme::Https,
            Endpoint::Url(url) => url.scheme() == "https",
        }
    }

    /// `HTTP/<host>`, the service principal WinRM registers.
    pub fn default_spn(&self) -> String {
        format!("HTTP/{}", self.hostname())
    }
}

/// NTLM secret: a password, or the NT hash of one.
#[derive(Clone)]
pub enum NtlmSecret {
    Password(String),
    NtHash([u8; 16]),
}

impl NtlmSecret {
    /// Parses a 32 character hex NT hash. An `LM:NT` pair is accepted and the LM half ignored.
    pub fn nt_hash_from_hex(value: &str) -> Result<Self, ClientError> {
        let nt = value.rsplit_once(':').map_or(value, |(_, nt)| nt).trim();
        let hash = hex::decode(nt)
            .map_err(|_| ClientError::Config("NT hash is not valid hex".into()))?
            .try_into()
            .map_err(|_| ClientError::Config("NT hash must be 32 hex characters".into()))?;
        Ok(NtlmSecret::NtHash(hash))
    }
}

impl fmt::Debug for NtlmSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NtlmSecret::Password(_) => f.write_str("Password(***)"),
            NtlmSecret::NtHash(_) => f.write_str("NtHash(***)"),
        }
    }
}

#[derive(Debug, Clone)]
pub enum Authentication {
    Basic {
        username: String,
        password: String,
    },
    Ntlm {
        username: String,
        domain: String,
        secret: NtlmSecret,
    },
    Kerberos {
        username: String,
        domain: Option<String>,
        password: String,
        /// Defaults to `HTTP/<host>`.
        spn: Option<String>,
        /// Discovered through DNS when unset.
        kdc_url: Option<Url>,
        /// Defaults to the local hostname.
        client_computer_name: Option<String>,
    },
}

impl Authentication {
    pub fn name(&self) -> &'static str {
        match self {
            Authentication::Basic { .. } => "basic",
            Authentication::Ntlm { .. } => "ntlm",
            Authentication::Kerberos { .. } => "kerberos",
        }
    }
}

#[derive(Debug, Clone, TypedBuilder)]
pub struct WinRmConfig {
    pub endpoint: Endpoint,
    pub authentication: Authentication,
    /// Seconds the server may hold a request before replying with a timeout fault.
    #[builder(default = psremote_wsman::DEFAULT_OPERATION_TIMEOUT)]
    pub operation_timeout: u32,
    #[builder(default = psremote_wsman::DEFAULT_MAX_ENVELOPE_SIZE)]
    pub max_envelope_size: u32,
    #[builder(default = psremote_wsman::DEFAULT_LOCALE.to_owned(), setter(into))]
    pub locale: String,
    /// DER encoding of the server's leaf certificate, for channel binding over HTTPS.
    #[builder(default, setter(strip_option))]
    pub server_certificate: Option<Vec<u8>>,
}
