//! `multipart/encrypted` framing shared by the NTLM and Kerberos sealed channels.
use tracing::{debug, instrument};

use crate::ClientError;

pub const ENCRYPTION_BOUNDARY: &str = "Encrypted Boundary";
pub const SPNEGO_PROTOCOL: &str = "application/HTTP-SPNEGO-session-encrypted";
pub const KERBEROS_PROTOCOL: &str = "application/HTTP-Kerberos-session-encrypted";

const OCTET_STREAM_HEADER: &[u8] = b"Content-Type: application/octet-stream\r\n";
const CLOSING_BOUNDARY: &[u8] = b"--Encrypted Boundary--\r\n";

/// Security token and ciphertext of one sealed message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedMessage {
    pub token: Vec<u8>,
    pub ciphertext: Vec<u8>,
}

/// Assembles the two-part body: metadata, then `u32 LE token length | token | ciphertext`.
pub fn build_multipart(protocol: &str, plain_len: usize, sealed: &SealedMessage) -> Vec<u8> {
    let mut body = Vec::with_capacity(256 + sealed.token.len() + sealed.ciphertext.len());

    write_str(&mut body, "--");
    write_str(&mut body, ENCRYPTION_BOUNDARY);
    write_crlf(&mut body);
    write_str(&mut body, "Content-Type: ");
    write_str(&mut body, protocol);
    write_crlf(&mut body);
    write_str(
        &mut body,
        "OriginalContent: type=application/soap+xml;charset=UTF-8;Length=",
    );
    write_str(&mut body, &plain_len.to_string());
    write_crlf(&mut body);

    write_str(&mut body, "--");
    write_str(&mut body, ENCRYPTION_BOUNDARY);
    write_crlf(&mut body);
    body.extend_from_slice(OCTET_STREAM_HEADER);

    body.extend_from_slice(&(sealed.token.len() as u32).to_le_bytes());
    body.extend_from_slice(&sealed.token);
    body.extend_from_slice(&sealed.ciphertext);

    // No CRLF between the ciphertext and the closing boundary.
    body.extend_from_slice(CLOSING_BOUNDARY);
    body
}

/// Splits a sealed response body back into token and ciphertext.
#[instrument(skip(data), fields(data_len = data.len()))]
pub fn parse_multipart(data: &[u8]) -> Result<SealedMessage, ClientError> {
    if find_subsequence(data, b"application/soap+xml").is_none() {
        return Err(ClientError::Protocol(
            "sealed body does not declare its original content".into(),
        ));
    }

    let start = find_subsequence(data, OCTET_STREAM_HEADER)
        .map(|pos| pos + OCTET_STREAM_HEADER.len())
        .ok_or_else(|| ClientError::Protocol("sealed body has no octet-stream part".into()))?;

    let end = rfind_subsequence(data, CLOSING_BOUNDARY)
        .filter(|&end| end >= start)
        .ok_or_else(|| ClientError::Protocol("sealed body has no closing boundary".into()))?;

    let payload = &data[start..end];
    let Some((len_bytes, rest)) = payload.split_first_chunk::<4>() else {
        return Err(ClientError::Protocol("sealed payload too short".into()));
    };

    let token_len = u32::from_le_bytes(*len_bytes) as usize;
    if rest.len() < token_len {
        return Err(ClientError::Protocol(
            format!(
                "sealed payload declares a {token_len} byte token but has {} bytes",
                rest.len()
            )
            .into(),
        ));
    }

    let (token, ciphertext) = rest.split_at(token_len);
    debug!(token_len, ciphertext_len = ciphertext.len(), "parsed sealed body");

    Ok(SealedMessage {
        token: token.to_vec(),
        ciphertext: ciphertext.to_vec(),
    })
}

fn write_str(body: &mut Vec<u8>, s: &str) {
    body.extend_from_slice(s.as_bytes());
}

fn write_crlf(body: &mut Vec<u8>) {
    body.extend_from_slice(b"\r\n");
}

fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

fn rfind_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .rposition(|window| window == needle)
}
