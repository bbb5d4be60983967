//! NTLMv2 over `Authorization: Negotiate`, sealed with `application/HTTP-SPNEGO-session-encrypted`.
use std::{
    fmt,
    time::{SystemTime, UNIX_EPOCH},
};

use base64::Engine;
use tracing::{debug, info, instrument, warn};

use crate::{
    ClientError,
    config::NtlmSecret,
    connector::{
        SecurityMechanism,
        channel_binding::ChannelBinding,
        encryption::SPNEGO_PROTOCOL,
        http::{HttpBody, HttpClient, HttpRequest},
    },
};

pub use crypto::Direction;
pub use messages::{AuthenticateMessage, AvId, AvPairs, ChallengeMessage};
pub use sealing::NtlmSealing;

pub mod crypto;
pub mod messages;
pub mod sealing;

const AUTH_SCHEME: &str = "Negotiate";

/// Seconds between 1601-01-01 and the Unix epoch.
const FILETIME_EPOCH_OFFSET: u64 = 11_644_473_600;

pub struct NtlmMechanism {
    username: String,
    domain: String,
    secret: NtlmSecret,
    spn: String,
    channel_binding: Option<ChannelBinding>,
}

/// Inputs of an authenticate message that are normally random or time based.
#[derive(Debug, Clone, Copy)]
pub struct AuthenticateNonces {
    pub client_challenge: [u8; 8],
    pub exported_session_key: [u8; 16],
    /// Used when the challenge carries no `MsvAvTimestamp`.
    pub filetime: u64,
}

impl AuthenticateNonces {
    pub fn generate() -> Self {
        let unix = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        Self {
            client_challenge: rand::random(),
            exported_session_key: rand::random(),
            filetime: (unix + FILETIME_EPOCH_OFFSET) * 10_000_000,
        }
    }
}

impl NtlmMechanism {
    pub fn new(
        username: String,
        domain: String,
        secret: NtlmSecret,
        spn: String,
        channel_binding: Option<ChannelBinding>,
    ) -> Self {
        Self {
            username,
            domain,
            secret,
            spn,
            channel_binding,
        }
    }

    fn nt_hash(&self) -> [u8; 16] {
        match &self.secret {
            NtlmSecret::Password(password) => crypto::nt_hash(password),
            NtlmSecret::NtHash(hash) => *hash,
        }
    }

    /// Builds the NTLMv2 authenticate message answering `challenge` and returns it together
    /// with the exported session key both sides derive the sealing keys from.
    pub fn authenticate(
        &self,
        challenge: &ChallengeMessage,
        nonces: AuthenticateNonces,
    ) -> Result<(AuthenticateMessage, [u8; 16]), ClientError> {
        let flags = challenge.flags & messages::CLIENT_FLAGS;
        if flags & messages::REQUIRED_FLAGS != messages::REQUIRED_FLAGS {
            return Err(ClientError::Auth(
                format!(
                    "server does not offer 128-bit NTLM session security (flags {:#010x})",
                    challenge.flags
                )
                .into(),
            ));
        }

        let mut target_info = challenge.target_info.clone();
        if target_info.get(AvId::TargetName).is_none() {
            target_info.set(AvId::TargetName, crypto::utf16le(&self.spn));
        }
        if let Some(binding) = &self.channel_binding {
            target_info.set(AvId::ChannelBindings, binding.ntlm_hash().to_vec());
        }

        let server_timestamp = challenge.target_info.get(AvId::Timestamp);
        let timestamp = match server_timestamp {
            Some(ts) if ts.len() == 8 => ts.to_vec(),
            _ => nonces.filetime.to_le_bytes().to_vec(),
        };

        let key = crypto::ntowf_v2(&self.nt_hash(), &self.username, &self.domain)?;
        let server_challenge = challenge.server_challenge;
        let client_challenge = nonces.client_challenge;

        let mut temp = vec![0x01, 0x01, 0, 0, 0, 0, 0, 0];
        temp.extend_from_slice(&timestamp);
        temp.extend_from_slice(&client_challenge);
        temp.extend_from_slice(&[0; 4]);
        temp.extend_from_slice(&target_info.to_bytes());
        temp.extend_from_slice(&[0; 4]);

        let nt_proof = crypto::hmac_md5(&key, &[&server_challenge, &temp])?;
        let mut nt_response = nt_proof.to_vec();
        nt_response.extend_from_slice(&temp);

        // With a server timestamp the LMv2 response must be zeroed (MS-NLMP 3.1.5.1.2).
        let lm_response = if server_timestamp.is_some() {
            vec![0; 24]
        } else {
            let mut lm = crypto::hmac_md5(&key, &[&server_challenge, &client_challenge])?.to_vec();
            lm.extend_from_slice(&client_challenge);
            lm
        };

        let key_exchange_key = crypto::hmac_md5(&key, &[&nt_proof])?;
        let exported = nonces.exported_session_key;
        let encrypted_session_key = crypto::rc4(&key_exchange_key, &exported)?;

        let message = AuthenticateMessage {
            flags,
            lm_response,
            nt_response,
            domain: crypto::utf16le(&self.domain),
            user: crypto::utf16le(&self.username),
            workstation: Vec::new(),
            encrypted_session_key,
        };
        Ok((message, exported))
    }
}

impl SecurityMechanism for NtlmMechanism {
    type Session = NtlmSealing;

    fn protocol(&self) -> &'static str {
        SPNEGO_PROTOCOL
    }

    #[instrument(skip_all, fields(user = %self.username, domain = %self.domain))]
    fn handshake(
        &mut self,
        http: &mut dyn HttpClient,
        url: &str,
    ) -> Result<NtlmSealing, ClientError> {
        let negotiate = messages::negotiate_message(messages::CLIENT_FLAGS);
        let response = http.send(
            HttpRequest::post(url, HttpBody::None).with_authorization(format!(
                "{AUTH_SCHEME} {}",
                base64::engine::general_purpose::STANDARD.encode(negotiate)
            )),
        )?;

        let Some(token) = response.auth_token(AUTH_SCHEME) else {
            warn!(status = response.status_code, "no NTLM challenge in response");
            return Err(ClientError::Auth(
                format!(
                    "server answered the NTLM negotiate with status {} and no challenge",
                    response.status_code
                )
                .into(),
            ));
        };

        let challenge = ChallengeMessage::parse(&token)?;
        debug!(flags = challenge.flags, "received NTLM challenge");

        let (authenticate, exported) =
            self.authenticate(&challenge, AuthenticateNonces::generate())?;
        let response = http.send(
            HttpRequest::post(url, HttpBody::None).with_authorization(format!(
                "{AUTH_SCHEME} {}",
                base64::engine::general_purpose::STANDARD.encode(authenticate.to_bytes())
            )),
        )?;

        // The verdict arrives with the first sealed request.
        if response.status_code == 401 {
            warn!("server answered the NTLM authenticate with 401");
        }
        info!(status = response.status_code, "NTLM handshake finished");

        NtlmSealing::new(&exported, Direction::ClientToServer)
    }
}

impl fmt::Debug for NtlmMechanism {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NtlmMechanism")
            .field("username", &self.username)
            .field("domain", &self.domain)
            .field("spn", &self.spn)
            .field("channel_binding", &self.channel_binding.is_some())
            .finish_non_exhaustive()
    }
}
