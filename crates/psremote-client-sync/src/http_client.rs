use std::{io::Read, sync::Arc, time::Duration};

use psremote_client_core::{
    ClientError,
    connector::http::{HttpClient, HttpRequest, HttpResponse},
};
use tracing::{debug, error, info, info_span, instrument};

/// Blocking [`HttpClient`] on top of a keep-alive `ureq` agent.
///
/// Consecutive requests reuse the agent's pooled connection, which is what the NTLM handshake
/// relies on. [`HttpClient::reset_connection`] replaces the agent and with it the pool.
pub struct UreqHttpClient {
    agent: ureq::Agent,
    connect_timeout: Duration,
    read_timeout: Duration,
    tls: Arc<native_tls::TlsConnector>,
}

impl UreqHttpClient {
    pub fn new(
        connect_timeout: Duration,
        read_timeout: Duration,
        tls: Arc<native_tls::TlsConnector>,
    ) -> Self {
        let agent = build_agent(connect_timeout, read_timeout, &tls);
        Self {
            agent,
            connect_timeout,
            read_timeout,
            tls,
        }
    }
}

fn build_agent(
    connect_timeout: Duration,
    read_timeout: Duration,
    tls: &Arc<native_tls::TlsConnector>,
) -> ureq::Agent {
    ureq::AgentBuilder::new()
        .timeout_connect(connect_timeout)
        .timeout_read(read_timeout)
        .tls_connector(Arc::clone(tls))
        .build()
}

fn collect_headers(response: &ureq::Response) -> Vec<(String, String)> {
    // Names repeat once per occurrence; `all` already returns every value of a name.
    let mut names = response.headers_names();
    let mut seen = Vec::with_capacity(names.len());
    names.retain(|name| {
        let first = !seen.contains(name);
        if first {
            seen.push(name.clone());
        }
        first
    });

    names
        .iter()
        .flat_map(|name| {
            response
                .all(name)
                .into_iter()
                .map(move |value| (name.clone(), value.to_owned()))
        })
        .collect()
}

fn into_http_response(response: ureq::Response) -> Result<HttpResponse, ClientError> {
    let status_code = response.status();
    let headers = collect_headers(&response);

    let mut body = Vec::new();
    response.into_reader().read_to_end(&mut body).map_err(|e| {
        error!(error = %e, "failed to read response body");
        ClientError::Transport(format!("failed to read response body: {e}").into())
    })?;

    Ok(HttpResponse {
        status_code,
        headers,
        body,
    })
}

impl HttpClient for UreqHttpClient {
    #[instrument(
        name = "http_client.send",
        level = "info",
        skip(self, request),
        fields(url = %request.url),
        err
    )]
    fn send(&mut self, request: HttpRequest) -> Result<HttpResponse, ClientError> {
        let span = info_span!("http.request", body_len = request.body.len());
        let _enter = span.enter();

        let mut ureq_request = self.agent.post(&request.url);
        for (name, value) in &request.headers {
            ureq_request = ureq_request.set(name, value);
        }
        debug!(headers_count = request.headers.len(), "request configured");

        let response = match ureq_request.send_bytes(request.body.as_bytes()) {
            Ok(response) => into_http_response(response)?,
            // 401 and 500 carry meaning for the negotiators; hand them back like any other reply.
            Err(ureq::Error::Status(status, response)) => {
                debug!(status, "received status response");
                into_http_response(response)?
            }
            Err(ureq::Error::Transport(transport)) => {
                error!(error = %transport, "request failed");
                return Err(ClientError::Transport(transport.to_string().into()));
            }
        };

        info!(
            status_code = response.status_code,
            response_body_length = response.body.len(),
            "response received"
        );
        Ok(response)
    }

    fn reset_connection(&mut self) {
        debug!("dropping pooled connections");
        self.agent = build_agent(self.connect_timeout, self.read_timeout, &self.tls);
    }
}

impl std::fmt::Debug for UreqHttpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UreqHttpClient")
            .field("connect_timeout", &self.connect_timeout)
            .field("read_timeout", &self.read_timeout)
            .finish_non_exhaustive()
    }
}
