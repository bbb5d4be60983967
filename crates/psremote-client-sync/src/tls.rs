use std::{net::TcpStream, sync::Arc, time::Duration};

use anyhow::Context;
use tracing::{info, instrument, warn};

/// WinRM listeners usually present self-signed certificates, so peer verification is off.
/// Channel binding ties the authentication to the certificate actually seen.
pub fn connector() -> anyhow::Result<Arc<native_tls::TlsConnector>> {
    let connector = native_tls::TlsConnector::builder()
        .danger_accept_invalid_certs(true)
        .danger_accept_invalid_hostnames(true)
        .build()
        .context("failed to build TLS connector")?;
    Ok(Arc::new(connector))
}

/// DER encoding of the certificate the listener presents.
#[instrument(name = "tls.fetch_certificate", level = "info", err)]
pub fn fetch_server_certificate(
    host: &str,
    port: u16,
    timeout: Duration,
) -> anyhow::Result<Vec<u8>> {
    warn!("server certificate is not verified");

    let stream = TcpStream::connect((host, port))
        .with_context(|| format!("failed to connect to {host}:{port}"))?;
    stream.set_read_timeout(Some(timeout))?;
    stream.set_write_timeout(Some(timeout))?;

    let tls = connector()?
        .connect(host, stream)
        .map_err(|e| anyhow::anyhow!("TLS handshake with {host}:{port} failed: {e}"))?;

    let certificate = tls
        .peer_certificate()
        .context("failed to read the server certificate")?
        .context("server presented no certificate")?;
    let der = certificate
        .to_der()
        .context("failed to encode the server certificate")?;

    info!(len = der.len(), "server certificate captured");
    Ok(der)
}
