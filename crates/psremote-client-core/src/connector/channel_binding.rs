//! TLS channel binding (`tls-server-end-point`, RFC 5929) for NTLM and Kerberos.
use md5::Md5;
use sha2::{Digest, Sha256};

const TLS_SERVER_END_POINT: &[u8] = b"tls-server-end-point:";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelBinding {
    application_data: Vec<u8>,
}

impl ChannelBinding {
    /// Binds to the server's leaf certificate, hashed with SHA-256.
    pub fn from_certificate(der: &[u8]) -> Self {
        let mut application_data = TLS_SERVER_END_POINT.to_vec();
        application_data.extend_from_slice(&Sha256::digest(der));
        Self { application_data }
    }

    pub fn application_data(&self) -> &[u8] {
        &self.application_data
    }

    /// `gss_channel_bindings_struct` with empty addresses, as hashed into the
    /// `MsvAvChannelBindings` AV pair.
    pub fn gss_bindings(&self) -> Vec<u8> {
        let mut bindings = vec![0u8; 16];
        bindings.extend_from_slice(&(self.application_data.len() as u32).to_le_bytes());
        bindings.extend_from_slice(&self.application_data);
        bindings
    }

    pub fn ntlm_hash(&self) -> [u8; 16] {
        Md5::digest(self.gss_bindings()).into()
    }

    /// `SEC_CHANNEL_BINDINGS` layout expected by the security package: eight `u32` fields
    /// followed by the application data.
    pub fn sec_channel_bindings(&self) -> Vec<u8> {
        const HEADER_LEN: u32 = 32;

        let mut bindings = Vec::with_capacity(HEADER_LEN as usize + self.application_data.len());
        // Initiator and acceptor address type, length and offset are all empty.
        bindings.extend_from_slice(&[0u8; 24]);
        bindings.extend_from_slice(&(self.application_data.len() as u32).to_le_bytes());
        bindings.extend_from_slice(&HEADER_LEN.to_le_bytes());
        bindings.extend_from_slice(&self.application_data);
        bindings
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_structures() {
        let binding = ChannelBinding::from_certificate(b"certificate");
        assert_eq!(binding.application_data().len(), 21 + 32);
        assert!(binding.application_data().starts_with(b"tls-server-end-point:"));

        let gss = binding.gss_bindings();
        assert_eq!(&gss[..16], &[0; 16]);
        assert_eq!(&gss[16..20], &53u32.to_le_bytes());
        assert_eq!(&gss[20..], binding.application_data());

        let sec = binding.sec_channel_bindings();
        assert_eq!(&sec[24..28], &53u32.to_le_bytes());
        assert_eq!(&sec[28..32], &32u32.to_le_bytes());
        assert_eq!(&sec[32..], binding.application_data());

        assert_eq!(binding.ntlm_hash(), <[u8; 16]>::from(Md5::digest(&gss)));
    }
}
