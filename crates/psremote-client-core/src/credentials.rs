use crate::ClientError;

#[derive(Debug, Clone)]
pub struct ClientUserName {
    inner: sspi::Username,
}

impl ClientUserName {
    /// A `DOMAIN\user` name when a domain is given, otherwise `value` parsed as either
    /// `user@realm` or `DOMAIN\user`.
    pub fn new(account_name: &str, netbios_domain_name: Option<&str>) -> Result<Self, ClientError> {
        let inner = match netbios_domain_name {
            Some(domain) if !domain.is_empty() => {
                sspi::Username::new_down_level_logon_name(account_name, domain).map_err(|_| {
                    ClientError::Auth("failed to create down-level logon name".into())
                })?
            }
            _ => sspi::Username::parse(account_name)
                .map_err(|_| ClientError::Auth("failed to parse username".into()))?,
        };
        Ok(Self { inner })
    }
}

/// Credentials handed to the security package, without exposing sspi types.
#[derive(Debug, Clone)]
pub struct ClientAuthIdentity {
    inner: sspi::AuthIdentity,
}

impl ClientAuthIdentity {
    pub fn new(username: ClientUserName, password: String) -> Self {
        let inner = sspi::AuthIdentity {
            username: username.inner,
            password: password.into(),
        };
        Self { inner }
    }

    pub(crate) fn into_inner(self) -> sspi::AuthIdentity {
        self.inner
    }
}
