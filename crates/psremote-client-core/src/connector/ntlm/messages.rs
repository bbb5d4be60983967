//! NTLM negotiate, challenge and authenticate messages (MS-NLMP 2.2.1).
use std::io::{Cursor, Read};

use byteorder::{LittleEndian, ReadBytesExt};

use crate::ClientError;

pub const SIGNATURE: &[u8; 8] = b"NTLMSSP\0";

pub const NEGOTIATE_UNICODE: u32 = 0x0000_0001;
pub const NEGOTIATE_OEM: u32 = 0x0000_0002;
pub const REQUEST_TARGET: u32 = 0x0000_0004;
pub const NEGOTIATE_SIGN: u32 = 0x0000_0010;
pub const NEGOTIATE_SEAL: u32 = 0x0000_0020;
pub const NEGOTIATE_NTLM: u32 = 0x0000_0200;
pub const NEGOTIATE_ALWAYS_SIGN: u32 = 0x0000_8000;
pub const NEGOTIATE_EXTENDED_SESSIONSECURITY: u32 = 0x0008_0000;
pub const NEGOTIATE_128: u32 = 0x2000_0000;
pub const NEGOTIATE_KEY_EXCH: u32 = 0x4000_0000;
pub const NEGOTIATE_56: u32 = 0x8000_0000;

/// Capabilities announced in the negotiate message.
pub const CLIENT_FLAGS: u32 = NEGOTIATE_56
    | NEGOTIATE_KEY_EXCH
    | NEGOTIATE_128
    | NEGOTIATE_EXTENDED_SESSIONSECURITY
    | NEGOTIATE_ALWAYS_SIGN
    | NEGOTIATE_NTLM
    | NEGOTIATE_SEAL
    | NEGOTIATE_SIGN
    | REQUEST_TARGET
    | NEGOTIATE_OEM
    | NEGOTIATE_UNICODE;

/// Flags a sealed WinRM session cannot work without.
pub const REQUIRED_FLAGS: u32 = NEGOTIATE_UNICODE
    | NEGOTIATE_SIGN
    | NEGOTIATE_SEAL
    | NEGOTIATE_EXTENDED_SESSIONSECURITY
    | NEGOTIATE_128
    | NEGOTIATE_KEY_EXCH;

const NEGOTIATE_TYPE: u32 = 1;
const CHALLENGE_TYPE: u32 = 2;
const AUTHENTICATE_TYPE: u32 = 3;

const NEGOTIATE_LEN: usize = 32;
const AUTHENTICATE_HEADER_LEN: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum AvId {
    Eol = 0,
    NbComputerName = 1,
    NbDomainName = 2,
    DnsComputerName = 3,
    DnsDomainName = 4,
    DnsTreeName = 5,
    Flags = 6,
    Timestamp = 7,
    SingleHost = 8,
    TargetName = 9,
    ChannelBindings = 10,
}

/// `AV_PAIR` list from a challenge's target info. The terminating `MsvAvEOL` is implicit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AvPairs {
    pairs: Vec<(u16, Vec<u8>)>,
}

impl AvPairs {
    pub fn parse(data: &[u8]) -> Result<Self, ClientError> {
        let mut cursor = Cursor::new(data);
        let mut pairs = Vec::new();

        loop {
            let id = cursor.read_u16::<LittleEndian>().map_err(|_| truncated("AV pair"))?;
            let len = cursor.read_u16::<LittleEndian>().map_err(|_| truncated("AV pair"))?;
            if id == AvId::Eol as u16 {
                break;
            }

            let mut value = vec![0u8; usize::from(len)];
            cursor.read_exact(&mut value).map_err(|_| truncated("AV pair value"))?;
            pairs.push((id, value));
        }

        Ok(Self { pairs })
    }

    pub fn get(&self, id: AvId) -> Option<&[u8]> {
        self.pairs
            .iter()
            .find(|(pair_id, _)| *pair_id == id as u16)
            .map(|(_, value)| value.as_slice())
    }

    /// Replaces the value for `id`, or appends it.
    pub fn set(&mut self, id: AvId, value: Vec<u8>) {
        match self.pairs.iter_mut().find(|(pair_id, _)| *pair_id == id as u16) {
            Some((_, existing)) => *existing = value,
            None => self.pairs.push((id as u16, value)),
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for (id, value) in &self.pairs {
            out.extend_from_slice(&id.to_le_bytes());
            out.extend_from_slice(&(value.len() as u16).to_le_bytes());
            out.extend_from_slice(value);
        }
        out.extend_from_slice(&[0; 4]);
        out
    }
}

pub fn negotiate_message(flags: u32) -> Vec<u8> {
    let mut out = Vec::with_capacity(NEGOTIATE_LEN);
    out.extend_from_slice(SIGNATURE);
    out.extend_from_slice(&NEGOTIATE_TYPE.to_le_bytes());
    out.extend_from_slice(&flags.to_le_bytes());
    // Empty domain and workstation fields.
    write_field(&mut out, 0, NEGOTIATE_LEN);
    write_field(&mut out, 0, NEGOTIATE_LEN);
    out
}

#[derive(Debug, Clone)]
pub struct ChallengeMessage {
    pub flags: u32,
    pub server_challenge: [u8; 8],
    pub target_info: AvPairs,
}

impl ChallengeMessage {
    pub fn parse(data: &[u8]) -> Result<Self, ClientError> {
        let mut cursor = Cursor::new(data);
        check_header(&mut cursor, CHALLENGE_TYPE)?;

        let _target_name = read_field(&mut cursor)?;
        let flags = cursor.read_u32::<LittleEndian>().map_err(|_| truncated("challenge"))?;

        let mut server_challenge = [0u8; 8];
        cursor
            .read_exact(&mut server_challenge)
            .map_err(|_| truncated("server challenge"))?;

        let mut reserved = [0u8; 8];
        cursor.read_exact(&mut reserved).map_err(|_| truncated("challenge"))?;

        let target_info = match read_field(&mut cursor) {
            Ok((len, offset)) if len > 0 => AvPairs::parse(slice_field(data, len, offset)?)?,
            _ => AvPairs::default(),
        };

        Ok(Self {
            flags,
            server_challenge,
            target_info,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticateMessage {
    pub flags: u32,
    pub lm_response: Vec<u8>,
    pub nt_response: Vec<u8>,
    pub domain: Vec<u8>,
    pub user: Vec<u8>,
    pub workstation: Vec<u8>,
    pub encrypted_session_key: Vec<u8>,
}

impl AuthenticateMessage {
    pub fn to_bytes(&self) -> Vec<u8> {
        let payloads: [&[u8]; 6] = [
            &self.lm_response,
            &self.nt_response,
            &self.domain,
            &self.user,
            &self.workstation,
            &self.encrypted_session_key,
        ];

        let mut out = Vec::with_capacity(
            AUTHENTICATE_HEADER_LEN + payloads.iter().map(|p| p.len()).sum::<usize>(),
        );
        out.extend_from_slice(SIGNATURE);
        out.extend_from_slice(&AUTHENTICATE_TYPE.to_le_bytes());

        let mut offset = AUTHENTICATE_HEADER_LEN;
        for payload in payloads {
            write_field(&mut out, payload.len(), offset);
            offset += payload.len();
        }
        out.extend_from_slice(&self.flags.to_le_bytes());

        for payload in payloads {
            out.extend_from_slice(payload);
        }
        out
    }

    pub fn parse(data: &[u8]) -> Result<Self, ClientError> {
        let mut cursor = Cursor::new(data);
        check_header(&mut cursor, AUTHENTICATE_TYPE)?;

        let mut fields = [(0usize, 0usize); 6];
        for field in &mut fields {
            *field = read_field(&mut cursor)?;
        }
        let flags = cursor
            .read_u32::<LittleEndian>()
            .map_err(|_| truncated("authenticate"))?;

        let [lm, nt, domain, user, workstation, key] =
            fields.map(|(len, offset)| slice_field(data, len, offset).map(<[u8]>::to_vec));

        Ok(Self {
            flags,
            lm_response: lm?,
            nt_response: nt?,
            domain: domain?,
            user: user?,
            workstation: workstation?,
            encrypted_session_key: key?,
        })
    }
}

fn check_header(cursor: &mut Cursor<&[u8]>, expected_type: u32) -> Result<(), ClientError> {
    let mut signature = [0u8; 8];
    cursor.read_exact(&mut signature).map_err(|_| truncated("NTLM header"))?;
    if &signature != SIGNATURE {
        return Err(ClientError::Auth("not an NTLMSSP message".into()));
    }

    let message_type = cursor
        .read_u32::<LittleEndian>()
        .map_err(|_| truncated("NTLM header"))?;
    if message_type != expected_type {
        return Err(ClientError::Auth(
            format!("expected NTLM message type {expected_type}, got {message_type}").into(),
        ));
    }
    Ok(())
}

fn write_field(out: &mut Vec<u8>, len: usize, offset: usize) {
    out.extend_from_slice(&(len as u16).to_le_bytes());
    out.extend_from_slice(&(len as u16).to_le_bytes());
    out.extend_from_slice(&(offset as u32).to_le_bytes());
}

fn read_field(cursor: &mut Cursor<&[u8]>) -> Result<(usize, usize), ClientError> {
    let len = cursor.read_u16::<LittleEndian>().map_err(|_| truncated("field"))?;
    let _max_len = cursor.read_u16::<LittleEndian>().map_err(|_| truncated("field"))?;
    let offset = cursor.read_u32::<LittleEndian>().map_err(|_| truncated("field"))?;
    Ok((usize::from(len), offset as usize))
}

fn slice_field(data: &[u8], len: usize, offset: usize) -> Result<&[u8], ClientError> {
    offset
        .checked_add(len)
        .and_then(|end| data.get(offset..end))
        .ok_or_else(|| truncated("field payload"))
}

fn truncated(what: &str) -> ClientError {
    ClientError::Auth(format!("truncated NTLM {what}").into())
}
