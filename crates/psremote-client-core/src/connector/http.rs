use base64::Engine;

use crate::ClientError;

pub const SOAP_CONTENT_TYPE: &str = "application/soap+xml;charset=UTF-8";

#[derive(Debug, Clone)]
pub enum HttpBody {
    Xml(String),
    /// A sealed multipart body; `protocol` names the session-encryption profile.
    Encrypted {
        protocol: &'static str,
        data: Vec<u8>,
    },
    None,
}

impl HttpBody {
    pub fn content_type(&self) -> Option<String> {
        match self {
            HttpBody::Xml(_) => Some(SOAP_CONTENT_TYPE.to_owned()),
            HttpBody::Encrypted { protocol, .. } => Some(format!(
                r#"multipart/encrypted;protocol="{protocol}";boundary="{}""#,
                super::encryption::ENCRYPTION_BOUNDARY
            )),
            HttpBody::None => None,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            HttpBody::Xml(xml) => xml.as_bytes(),
            HttpBody::Encrypted { data, .. } => data,
            HttpBody::None => &[],
        }
    }

    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.as_bytes().is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: HttpBody,
}

impl HttpRequest {
    /// A POST to `url`; `Content-Type` follows the body.
    pub fn post(url: impl Into<String>, body: HttpBody) -> Self {
        let mut headers = Vec::new();
        if let Some(content_type) = body.content_type() {
            headers.push(("Content-Type".to_owned(), content_type));
        }
        Self {
            url: url.into(),
            headers,
            body,
        }
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_owned(), value.into()));
        self
    }

    pub fn with_authorization(self, value: impl Into<String>) -> Self {
        self.with_header("Authorization", value)
    }

    /// Adds `Authorization: Basic <base64(username:password)>`.
    /// WARNING: never log the resulting header value.
    pub fn with_basic(self, username: &str, password: &str) -> Self {
        let creds = format!("{username}:{password}");
        let b64 = base64::engine::general_purpose::STANDARD.encode(creds.as_bytes());
        self.with_authorization(format!("Basic {b64}"))
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status_code: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    /// Token carried by a `WWW-Authenticate: <scheme> <base64>` header.
    ///
    /// If several challenges are present the first one for `scheme` wins.
    pub fn auth_token(&self, scheme: &str) -> Option<Vec<u8>> {
        self.headers
            .iter()
            .filter(|(key, _)| key.eq_ignore_ascii_case("www-authenticate"))
            .find_map(|(_, value)| {
                let (name, token) = value.trim().split_once(' ')?;
                if !name.eq_ignore_ascii_case(scheme) {
                    return None;
                }
                base64::engine::general_purpose::STANDARD
                    .decode(token.trim())
                    .ok()
            })
    }

    pub fn body_text(&self) -> Result<String, ClientError> {
        String::from_utf8(self.body.clone())
            .map_err(|_| ClientError::Protocol("response body is not valid UTF-8".into()))
    }
}

fn find_header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.as_str())
}

/// Blocking HTTP client used by the negotiators.
///
/// Connection-oriented handshakes (NTLM) expect consecutive requests to reuse one
/// connection until [`HttpClient::reset_connection`] is called.
pub trait HttpClient {
    fn send(&mut self, request: HttpRequest) -> Result<HttpResponse, ClientError>;

    /// Drops any kept-alive connection so the next request starts a fresh one.
    fn reset_connection(&mut self) {}
}
