/// Config schema: locator endpoints and authentication settings.
use std::{fmt, str::FromStr};

use {
    secrecy::{ExposeSecret, Secret},
    serde::{Deserialize, Serialize, Serializer},
};

/// Port the locator listens on when an endpoint omits one.
pub const DEFAULT_LOCATOR_PORT: u16 = 10053;

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TollgateConfig {
    /// Locator endpoints used for service discovery.
    pub endpoints: Vec<Endpoint>,
    pub auth: AuthConfig,
}

impl Default for TollgateConfig {
    fn default() -> Self {
        Self {
            endpoints: default_endpoints(),
            auth: AuthConfig::default(),
        }
    }
}

/// Built-in locator endpoints.
pub fn default_endpoints() -> Vec<Endpoint> {
    vec![
        Endpoint::new("localhost", DEFAULT_LOCATOR_PORT),
        Endpoint::new("::", DEFAULT_LOCATOR_PORT),
    ]
}

/// A locator address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EndpointParseError {
    #[error("endpoint is empty")]
    Empty,
    #[error("invalid port in endpoint '{0}'")]
    InvalidPort(String),
    #[error("unterminated IPv6 bracket in endpoint '{0}'")]
    UnterminatedBracket(String),
}

impl FromStr for Endpoint {
    type Err = EndpointParseError;

    /// Accepts `host`, `host:port`, `[v6]` and `[v6]:port`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(EndpointParseError::Empty);
        }

        let parse_port = |p: &str| {
            p.parse::<u16>()
                .map_err(|_| EndpointParseError::InvalidPort(s.to_string()))
        };

        if let Some(bracketed) = s.strip_prefix('[') {
            let (host, tail) = bracketed
                .split_once(']')
                .ok_or_else(|| EndpointParseError::UnterminatedBracket(s.to_string()))?;
            let port = match tail.strip_prefix(':') {
                Some(p) => parse_port(p)?,
                None if tail.is_empty() => DEFAULT_LOCATOR_PORT,
                None => return Err(EndpointParseError::InvalidPort(s.to_string())),
            };
            return Ok(Self::new(host, port));
        }

        // More than one colon without brackets is a bare IPv6 address.
        match s.split_once(':') {
            Some((host, port)) if !port.contains(':') => Ok(Self::new(host, parse_port(port)?)),
            _ => Ok(Self::new(s, DEFAULT_LOCATOR_PORT)),
        }
    }
}

impl TryFrom<String> for Endpoint {
    type Error = EndpointParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Endpoint> for String {
    fn from(value: Endpoint) -> Self {
        value.to_string()
    }
}

/// Authentication settings for secure repositories.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// `""`, `"TVM"` or `"TVM2"`. Anything else falls back to no authentication.
    pub mode: String,

    /// Seconds a fetched token stays valid. `0` means fetch once and keep it.
    pub token_expiration_secs: u64,

    pub client_id: Option<String>,

    #[serde(serialize_with = "serialize_redacted")]
    pub client_secret: Option<Secret<String>>,
}

impl AuthConfig {
    pub fn resolved_mode(&self) -> AuthMode {
        AuthMode::parse(&self.mode)
    }
}

fn serialize_redacted<S: Serializer>(
    secret: &Option<Secret<String>>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match secret {
        Some(_) => serializer.serialize_str("[REDACTED]"),
        None => serializer.serialize_none(),
    }
}

/// Authentication protocol selected by the `mode` string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMode {
    /// No credential; calls carry an empty authorization value.
    None,
    Tvm,
    Tvm2,
}

impl AuthMode {
    /// Case-sensitive; unknown strings map to [`AuthMode::None`].
    pub fn parse(mode: &str) -> Self {
        match mode {
            "TVM" => Self::Tvm,
            "TVM2" => Self::Tvm2,
            _ => Self::None,
        }
    }

    /// Whether `mode` names a supported protocol (or is the empty default).
    pub fn is_recognized(mode: &str) -> bool {
        mode.is_empty() || Self::parse(mode) != Self::None
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "",
            Self::Tvm => "TVM",
            Self::Tvm2 => "TVM2",
        }
    }

    /// Name of the ticket-issuing service for this protocol.
    pub fn ticket_service(&self) -> Option<&'static str> {
        match self {
            Self::None => None,
            Self::Tvm => Some("tvm"),
            Self::Tvm2 => Some("tvm2"),
        }
    }

    pub fn requires_credentials(&self) -> bool {
        !matches!(self, Self::None)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueSeverity {
    Warning,
    Error,
}

/// A problem found by [`TollgateConfig::validate`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConfigIssue {
    pub severity: IssueSeverity,
    pub field: &'static str,
    pub message: String,
}

impl TollgateConfig {
    /// Report configuration problems without failing.
    ///
    /// An unknown mode is only a warning: repositories silently fall back to
    /// unauthenticated calls, which remote endpoints may then reject.
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();

        if self.endpoints.is_empty() {
            issues.push(ConfigIssue {
                severity: IssueSeverity::Error,
                field: "endpoints",
                message: "no locator endpoints configured".into(),
            });
        }

        let mode = self.auth.resolved_mode();
        if !AuthMode::is_recognized(&self.auth.mode) {
            issues.push(ConfigIssue {
                severity: IssueSeverity::Warning,
                field: "auth.mode",
                message: format!(
                    "unknown auth mode '{}', calls will not be authenticated",
                    self.auth.mode
                ),
            });
        }

        if mode.requires_credentials() {
            if self.auth.client_id.as_deref().is_none_or(str::is_empty) {
                issues.push(ConfigIssue {
                    severity: IssueSeverity::Error,
                    field: "auth.client_id",
                    message: format!("client_id is required for {} mode", mode.as_str()),
                });
            }
            if self
                .auth
                .client_secret
                .as_ref()
                .is_none_or(|s| s.expose_secret().is_empty())
            {
                issues.push(ConfigIssue {
                    severity: IssueSeverity::Error,
                    field: "auth.client_secret",
                    message: format!("client_secret is required for {} mode", mode.as_str()),
                });
            }
        }

        issues
    }
}
