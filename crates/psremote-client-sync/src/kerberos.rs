use std::{
    io::{Read, Write},
    net::TcpStream,
    time::Duration,
};

use byteorder::{BigEndian, ReadBytesExt};
use psremote_client_core::{
    ClientError, KdcClient,
    connector::{NetworkProtocol, NetworkRequest},
};
use tracing::{info, instrument};

const DEFAULT_KDC_PORT: u16 = 88;

/// Largest KDC reply accepted; real tickets are a few kilobytes.
const MAX_KDC_REPLY: u32 = 1 << 20;

/// Delivers the security package's KDC requests over TCP.
#[derive(Debug, Clone)]
pub struct TcpKdcClient {
    timeout: Duration,
}

impl TcpKdcClient {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    #[instrument(
        name = "kerberos.tcp",
        level = "info",
        skip(self, packet),
        fields(host = packet.url.host_str(), port = packet.url.port()),
        err
    )]
    fn send_tcp_packet(&self, packet: &NetworkRequest) -> Result<Vec<u8>, ClientError> {
        let host = packet
            .url
            .host_str()
            .ok_or_else(|| ClientError::Config("KDC URL has no host".into()))?;
        let port = packet.url.port().unwrap_or(DEFAULT_KDC_PORT);

        info!("establishing TCP connection to KDC");
        let mut stream = TcpStream::connect((host, port))?;
        stream.set_read_timeout(Some(self.timeout))?;
        stream.set_write_timeout(Some(self.timeout))?;

        // The request already carries its length prefix.
        stream.write_all(&packet.data)?;
        stream.flush()?;

        info!("packet sent, waiting for KDC response");
        let response_len = stream.read_u32::<BigEndian>()?;
        if response_len > MAX_KDC_REPLY {
            return Err(ClientError::Auth(
                format!("KDC reply of {response_len} bytes is too large").into(),
            ));
        }

        let mut response_data = vec![0u8; response_len as usize + 4];
        response_data[..4].copy_from_slice(&response_len.to_be_bytes());
        stream.read_exact(&mut response_data[4..])?;

        info!(response_len = response_data.len(), "received response from KDC");
        Ok(response_data)
    }
}

impl KdcClient for TcpKdcClient {
    #[instrument(
        name = "kerberos.send_packet",
        level = "info",
        skip(self, request),
        fields(protocol = ?request.protocol, url = %request.url, data_len = request.data.len())
    )]
    fn send(&mut self, request: &NetworkRequest) -> Result<Vec<u8>, ClientError> {
        match &request.protocol {
            NetworkProtocol::Tcp => self.send_tcp_packet(request),
            other => Err(ClientError::Auth(
                format!("KDC transport {other:?} is not supported, use tcp://").into(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{net::TcpListener, thread};

    use byteorder::WriteBytesExt;
    use url::Url;

    use super::*;

    fn framed(body: &[u8]) -> Vec<u8> {
        let mut data = Vec::new();
        data.write_u32::<BigEndian>(body.len() as u32).unwrap();
        data.extend_from_slice(body);
        data
    }

    #[test]
    #[tracing_test::traced_test]
    fn test_tcp_exchange_keeps_length_prefix() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let server = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let len = stream.read_u32::<BigEndian>().unwrap();
            let mut request = vec![0u8; len as usize];
            stream.read_exact(&mut request).unwrap();
            stream.write_all(&framed(b"AS-REP")).unwrap();
            request
        });

        let request = NetworkRequest {
            protocol: NetworkProtocol::Tcp,
            url: Url::parse(&format!("tcp://{addr}")).unwrap(),
            data: framed(b"AS-REQ"),
        };
        let reply = TcpKdcClient::new(Duration::from_secs(5))
            .send(&request)
            .unwrap();

        assert_eq!(reply, framed(b"AS-REP"));
        assert_eq!(server.join().unwrap(), b"AS-REQ");
        assert!(logs_contain("received response from KDC"));
    }

    #[test]
    fn test_udp_is_rejected() {
        let request = NetworkRequest {
            protocol: NetworkProtocol::Udp,
            url: Url::parse("udp://dc01.corp.local:88").unwrap(),
            data: Vec::new(),
        };
        let error = TcpKdcClient::new(Duration::from_secs(1))
            .send(&request)
            .unwrap_err();
        assert!(matches!(error, ClientError::Auth(_)));
    }
}
