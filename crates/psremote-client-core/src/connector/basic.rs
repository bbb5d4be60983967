use std::fmt;

use tracing::{instrument, warn};

use crate::{
    ClientError,
    connector::{
        AuthNegotiator,
        http::{HttpBody, HttpClient, HttpRequest},
    },
};

/// HTTP Basic authentication. The envelope travels unsealed, so this is only sensible over
/// HTTPS or on a listener with `AllowUnencrypted`.
#[derive(Clone)]
pub struct BasicNegotiator {
    username: String,
    password: String,
}

impl BasicNegotiator {
    pub fn new(username: String, password: String) -> Self {
        Self { username, password }
    }
}

impl AuthNegotiator for BasicNegotiator {
    #[instrument(skip_all, fields(user = %self.username))]
    fn send(
        &mut self,
        http: &mut dyn HttpClient,
        url: &str,
        soap: &str,
    ) -> Result<String, ClientError> {
        let request = HttpRequest::post(url, HttpBody::Xml(soap.to_owned()))
            .with_basic(&self.username, &self.password);
        let response = http.send(request)?;

        match response.status_code {
            200 | 500 => response.body_text(),
            401 => {
                warn!("credentials rejected");
                Err(ClientError::Unauthorized)
            }
            status => Err(ClientError::UnexpectedStatus(status)),
        }
    }

    fn name(&self) -> &'static str {
        "basic"
    }
}

impl fmt::Debug for BasicNegotiator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BasicNegotiator")
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connector::http::HttpResponse;

    struct Canned {
        status: u16,
        seen: Vec<HttpRequest>,
    }

    impl HttpClient for Canned {
        fn send(&mut self, request: HttpRequest) -> Result<HttpResponse, ClientError> {
            self.seen.push(request);
            Ok(HttpResponse {
                status_code: self.status,
                headers: Vec::new(),
                body: b"<s:Envelope/>".to_vec(),
            })
        }
    }

    #[test]
    fn test_basic_posts_plain_envelope() {
        let mut http = Canned {
            status: 500,
            seen: Vec::new(),
        };
        let mut negotiator = BasicNegotiator::new("user".into(), "pass".into());

        let reply = negotiator.send(&mut http, "http://h:5985/wsman", "<x/>").unwrap();
        assert_eq!(reply, "<s:Envelope/>");

        let request = &http.seen[0];
        assert_eq!(request.header("Authorization"), Some("Basic dXNlcjpwYXNz"));
        assert_eq!(request.body.as_bytes(), b"<x/>");
        assert!(!format!("{negotiator:?}").contains("pass"));
    }

    #[test]
    fn test_basic_status_mapping() {
        let mut negotiator = BasicNegotiator::new("user".into(), "pass".into());

        let mut http = Canned {
            status: 401,
            seen: Vec::new(),
        };
        assert!(matches!(
            negotiator.send(&mut http, "http://h/wsman", "<x/>"),
            Err(ClientError::Unauthorized)
        ));
        assert_eq!(http.seen.len(), 1);

        http.status = 404;
        assert!(matches!(
            negotiator.send(&mut http, "http://h/wsman", "<x/>"),
            Err(ClientError::UnexpectedStatus(404))
        ));
    }
}
