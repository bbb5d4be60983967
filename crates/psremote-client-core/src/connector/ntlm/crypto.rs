//! NTLMv2 key derivation (MS-NLMP 3.3.2 and 3.4.5).
use hmac::{Hmac, Mac};
use md4::Md4;
use md5::{Digest, Md5};
use rc4::{KeyInit, Rc4, StreamCipher, consts::U16};

use crate::ClientError;

type HmacMd5 = Hmac<Md5>;

pub(crate) type Rc4Cipher = Rc4<U16>;

const CLIENT_SIGNING: &[u8] = b"session key to client-to-server signing key magic constant\0";
const SERVER_SIGNING: &[u8] = b"session key to server-to-client signing key magic constant\0";
const CLIENT_SEALING: &[u8] = b"session key to client-to-server sealing key magic constant\0";
const SERVER_SEALING: &[u8] = b"session key to server-to-client sealing key magic constant\0";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    ClientToServer,
    ServerToClient,
}

pub fn utf16le(value: &str) -> Vec<u8> {
    value.encode_utf16().flat_map(u16::to_le_bytes).collect()
}

/// MD4 of the UTF-16LE password.
pub fn nt_hash(password: &str) -> [u8; 16] {
    Md4::digest(utf16le(password)).into()
}

pub fn hmac_md5(key: &[u8], parts: &[&[u8]]) -> Result<[u8; 16], ClientError> {
    let mut mac = <HmacMd5 as Mac>::new_from_slice(key)
        .map_err(|_| ClientError::Auth("invalid HMAC-MD5 key".into()))?;
    for part in parts {
        mac.update(part);
    }
    Ok(mac.finalize().into_bytes().into())
}

/// `NTOWFv2`: HMAC-MD5 keyed by the NT hash over the uppercased user name and the domain.
pub fn ntowf_v2(nt_hash: &[u8; 16], user: &str, domain: &str) -> Result<[u8; 16], ClientError> {
    let identity = utf16le(&format!("{}{domain}", user.to_uppercase()));
    hmac_md5(nt_hash, &[&identity])
}

pub fn rc4_cipher(key: &[u8; 16]) -> Result<Rc4Cipher, ClientError> {
    Rc4Cipher::new_from_slice(key).map_err(|_| ClientError::Auth("invalid RC4 key length".into()))
}

pub fn rc4(key: &[u8; 16], data: &[u8]) -> Result<Vec<u8>, ClientError> {
    let mut out = data.to_vec();
    rc4_cipher(key)?.apply_keystream(&mut out);
    Ok(out)
}

pub fn sign_key(exported_session_key: &[u8; 16], direction: Direction) -> [u8; 16] {
    let magic = match direction {
        Direction::ClientToServer => CLIENT_SIGNING,
        Direction::ServerToClient => SERVER_SIGNING,
    };
    md5_concat(exported_session_key, magic)
}

/// 128-bit sealing key; weaker key sizes are refused during negotiation.
pub fn seal_key(exported_session_key: &[u8; 16], direction: Direction) -> [u8; 16] {
    let magic = match direction {
        Direction::ClientToServer => CLIENT_SEALING,
        Direction::ServerToClient => SERVER_SEALING,
    };
    md5_concat(exported_session_key, magic)
}

fn md5_concat(key: &[u8], magic: &[u8]) -> [u8; 16] {
    let mut md5 = Md5::new();
    md5.update(key);
    md5.update(magic);
    md5.finalize().into()
}
