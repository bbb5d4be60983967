use std::fmt;

use rc4::StreamCipher;
use tracing::{debug, warn};

use super::crypto::{self, Direction, Rc4Cipher};
use crate::ClientError;
use crate::connector::SealingSession;
use crate::connector::encryption::SealedMessage;

const SIGNATURE_VERSION: u32 = 1;
const SIGNATURE_LEN: usize = 16;

/// NTLM session security with extended session security and key exchange (MS-NLMP 3.4.4.2).
///
/// Requests and responses run in lockstep, so one sequence number covers both directions.
/// It advances only once a response has been verified.
pub struct NtlmSealing {
    seq: u32,
    outbound_sign: [u8; 16],
    outbound_seal: Rc4Cipher,
    inbound_sign: [u8; 16],
    inbound_seal: Rc4Cipher,
}

impl NtlmSealing {
    /// `outbound` is the direction of messages this side produces.
    pub fn new(exported_session_key: &[u8; 16], outbound: Direction) -> Result<Self, ClientError> {
        let inbound = match outbound {
            Direction::ClientToServer => Direction::ServerToClient,
            Direction::ServerToClient => Direction::ClientToServer,
        };

        Ok(Self {
            seq: 0,
            outbound_sign: crypto::sign_key(exported_session_key, outbound),
            outbound_seal: crypto::rc4_cipher(&crypto::seal_key(exported_session_key, outbound))?,
            inbound_sign: crypto::sign_key(exported_session_key, inbound),
            inbound_seal: crypto::rc4_cipher(&crypto::seal_key(exported_session_key, inbound))?,
        })
    }

    pub fn sequence_number(&self) -> u32 {
        self.seq
    }

    /// Seals the reply to a request this side has just verified, reusing its sequence number.
    #[cfg(test)]
    pub(crate) fn seal_reply(&mut self, plaintext: &[u8]) -> Result<SealedMessage, ClientError> {
        self.seq = self.seq.wrapping_sub(1);
        let sealed = self.wrap(plaintext)?;
        self.seq = self.seq.wrapping_add(1);
        Ok(sealed)
    }
}

impl SealingSession for NtlmSealing {
    fn wrap(&mut self, plaintext: &[u8]) -> Result<SealedMessage, ClientError> {
        let seq = self.seq.to_le_bytes();

        let mut ciphertext = plaintext.to_vec();
        self.outbound_seal.apply_keystream(&mut ciphertext);

        let mac = crypto::hmac_md5(&self.outbound_sign, &[&seq, plaintext])?;
        let mut checksum = [0u8; 8];
        checksum.copy_from_slice(&mac[..8]);
        self.outbound_seal.apply_keystream(&mut checksum);

        let mut token = Vec::with_capacity(SIGNATURE_LEN);
        token.extend_from_slice(&SIGNATURE_VERSION.to_le_bytes());
        token.extend_from_slice(&checksum);
        token.extend_from_slice(&seq);

        debug!(seq = self.seq, len = plaintext.len(), "sealed NTLM message");
        Ok(SealedMessage { token, ciphertext })
    }

    fn unwrap(&mut self, sealed: &SealedMessage) -> Result<Vec<u8>, ClientError> {
        let token = sealed.token.as_slice();
        if token.len() != SIGNATURE_LEN {
            return Err(ClientError::Integrity("NTLM signature has the wrong length"));
        }
        if token[..4] != SIGNATURE_VERSION.to_le_bytes() {
            return Err(ClientError::Integrity("unsupported NTLM signature version"));
        }

        let seq = self.seq.to_le_bytes();
        if token[12..16] != seq {
            warn!(expected = self.seq, "NTLM sequence number mismatch");
            return Err(ClientError::Integrity("NTLM sequence number mismatch"));
        }

        let mut plaintext = sealed.ciphertext.clone();
        self.inbound_seal.apply_keystream(&mut plaintext);

        let mac = crypto::hmac_md5(&self.inbound_sign, &[&seq, &plaintext])?;
        let mut expected = [0u8; 8];
        expected.copy_from_slice(&mac[..8]);
        self.inbound_seal.apply_keystream(&mut expected);

        if token[4..12] != expected {
            warn!(seq = self.seq, "NTLM checksum mismatch");
            return Err(ClientError::Integrity("NTLM checksum mismatch"));
        }

        self.seq = self.seq.wrapping_add(1);
        Ok(plaintext)
    }
}

impl fmt::Debug for NtlmSealing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NtlmSealing")
            .field("seq", &self.seq)
            .finish_non_exhaustive()
    }
}
