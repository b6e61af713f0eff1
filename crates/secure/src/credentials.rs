use std::fmt;

use {
    anyhow::{Context, Result},
    secrecy::{ExposeSecret, Secret},
    tollgate_config::AuthConfig,
};

/// Client credentials exchanged for tickets. Immutable once built.
#[derive(Clone)]
pub struct Credentials {
    client_id: String,
    client_secret: Secret<String>,
}

impl Credentials {
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: Secret::new(client_secret.into()),
        }
    }

    /// Credentials required by the configured mode, or `None` when the mode
    /// needs none (including unknown modes).
    pub fn from_config(auth: &AuthConfig) -> Result<Option<Self>> {
        let mode = auth.resolved_mode();
        if !mode.requires_credentials() {
            return Ok(None);
        }

        let client_id = auth
            .client_id
            .clone()
            .filter(|id| !id.is_empty())
            .with_context(|| format!("client_id is required for {} mode", mode.as_str()))?;
        let client_secret = auth
            .client_secret
            .clone()
            .filter(|secret| !secret.expose_secret().is_empty())
            .with_context(|| format!("client_secret is required for {} mode", mode.as_str()))?;

        Ok(Some(Self {
            client_id,
            client_secret,
        }))
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn client_secret(&self) -> &str {
        self.client_secret.expose_secret()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .finish()
    }
}

/// An authorization value ready to be attached to a call, e.g. `"TVM2 <ticket>"`.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Token(String);

impl Token {
    /// Format `ticket` for the `auth_type` protocol.
    pub fn new(auth_type: &str, ticket: &str) -> Self {
        Self(format!("{auth_type} {ticket}"))
    }

    /// The token sent when no authentication is configured.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.split_once(' ') {
            Some((scheme, _)) => write!(f, "Token({scheme} [REDACTED])"),
            None if self.0.is_empty() => f.write_str("Token(<empty>)"),
            None => f.write_str("Token([REDACTED])"),
        }
    }
}
