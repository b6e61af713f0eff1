//! Credential providers: how a token is obtained for each authentication mode.

use std::{fmt, sync::Arc};

use {
    anyhow::Context,
    async_trait::async_trait,
    serde_json::{Map, Value},
    tollgate_config::{AuthMode, Endpoint},
    tollgate_service::{Call, Error, Handle, HandleFactory, Result},
    tracing::{debug, warn},
};

use crate::credentials::{Credentials, Token};

/// Grant type sent with TVM `ticket_full` requests.
const TVM_GRANT_TYPE: &str = "client_credentials";

/// Something that can produce an authorization token.
#[async_trait]
pub trait TokenSource: Send + Sync {
    /// Fetch a fresh token. Failures are returned as-is; callers decide
    /// whether to retry.
    async fn fetch_token(&self) -> Result<Token>;

    /// Short protocol label used in logs.
    fn kind(&self) -> &str;
}

/// Read a ticket out of a response value.
fn ticket_from_value(value: Value) -> Result<String> {
    match value {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(Error::UnexpectedValue(format!(
            "expected ticket string, got {other}"
        ))),
    }
}

/// TVM protocol: `ticket_full(client_id, client_secret, grant_type, extra)`.
pub struct TvmProvider {
    service: Arc<dyn Handle>,
    credentials: Credentials,
}

impl TvmProvider {
    pub const TYPE: &'static str = "TVM";

    pub fn new(service: Arc<dyn Handle>, credentials: Credentials) -> Self {
        Self {
            service,
            credentials,
        }
    }
}

#[async_trait]
impl TokenSource for TvmProvider {
    async fn fetch_token(&self) -> Result<Token> {
        let call = Call::new()
            .arg(self.credentials.client_id())
            .arg(self.credentials.client_secret())
            .arg(TVM_GRANT_TYPE)
            .arg(Value::Object(Map::new()));

        let mut channel = self.service.invoke("ticket_full", call).await?;
        let ticket = ticket_from_value(channel.get().await?)?;

        debug!(service = %self.service.name(), "TVM ticket fetched");
        Ok(Token::new(Self::TYPE, &ticket))
    }

    fn kind(&self) -> &str {
        Self::TYPE
    }
}

/// TVM2 protocol: `ticket(client_id, client_secret)`.
pub struct Tvm2Provider {
    service: Arc<dyn Handle>,
    credentials: Credentials,
}

impl Tvm2Provider {
    pub const TYPE: &'static str = "TVM2";

    pub fn new(service: Arc<dyn Handle>, credentials: Credentials) -> Self {
        Self {
            service,
            credentials,
        }
    }
}

#[async_trait]
impl TokenSource for Tvm2Provider {
    async fn fetch_token(&self) -> Result<Token> {
        let call = Call::new()
            .arg(self.credentials.client_id())
            .arg(self.credentials.client_secret());

        let mut channel = self.service.invoke("ticket", call).await?;
        let ticket = ticket_from_value(channel.get().await?)?;

        debug!(service = %self.service.name(), "TVM2 ticket fetched");
        Ok(Token::new(Self::TYPE, &ticket))
    }

    fn kind(&self) -> &str {
        Self::TYPE
    }
}

/// The provider a repository signs calls with.
pub enum CredentialProvider {
    /// No authentication: every fetch yields an empty token. Endpoints that
    /// require credentials reject the call with an ordinary remote error.
    Null,
    Tvm(TvmProvider),
    Tvm2(Tvm2Provider),
    /// Any other backend.
    Custom(Arc<dyn TokenSource>),
}

impl CredentialProvider {
    /// Build the provider for `mode`, creating its ticket service from
    /// `endpoints`. Unknown modes fall back to [`CredentialProvider::Null`].
    pub fn from_mode(
        factory: &dyn HandleFactory,
        mode: &str,
        endpoints: &[Endpoint],
        credentials: Option<Credentials>,
    ) -> anyhow::Result<Self> {
        let ticket_service = create_ticket_service(factory, mode, endpoints);
        create_secure_provider(mode, ticket_service, credentials)
    }

    /// The ticket service handle, if this provider talks to one.
    pub fn ticket_service(&self) -> Option<&Arc<dyn Handle>> {
        match self {
            Self::Tvm(p) => Some(&p.service),
            Self::Tvm2(p) => Some(&p.service),
            Self::Null | Self::Custom(_) => None,
        }
    }
}

impl fmt::Debug for CredentialProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CredentialProvider").field(&self.kind()).finish()
    }
}

#[async_trait]
impl TokenSource for CredentialProvider {
    async fn fetch_token(&self) -> Result<Token> {
        match self {
            Self::Null => Ok(Token::empty()),
            Self::Tvm(p) => p.fetch_token().await,
            Self::Tvm2(p) => p.fetch_token().await,
            Self::Custom(p) => p.fetch_token().await,
        }
    }

    fn kind(&self) -> &str {
        match self {
            Self::Null => "none",
            Self::Tvm(p) => p.kind(),
            Self::Tvm2(p) => p.kind(),
            Self::Custom(p) => p.kind(),
        }
    }
}

/// Build the ticket-issuing service for `mode`, or `None` when the mode has
/// no ticket service.
pub fn create_ticket_service(
    factory: &dyn HandleFactory,
    mode: &str,
    endpoints: &[Endpoint],
) -> Option<Arc<dyn Handle>> {
    let name = AuthMode::parse(mode).ticket_service()?;
    let locator = factory.locator(endpoints);
    Some(factory.service(name, &locator))
}

/// Build the provider for `mode` around an already created ticket service.
pub fn create_secure_provider(
    mode: &str,
    ticket_service: Option<Arc<dyn Handle>>,
    credentials: Option<Credentials>,
) -> anyhow::Result<CredentialProvider> {
    let auth_mode = AuthMode::parse(mode);
    if auth_mode == AuthMode::None {
        if !mode.is_empty() {
            warn!(mode = %mode, "unknown auth mode, calls will not be authenticated");
        }
        return Ok(CredentialProvider::Null);
    }

    let service = ticket_service
        .with_context(|| format!("{} mode requires a ticket service", auth_mode.as_str()))?;
    let credentials = credentials
        .with_context(|| format!("{} mode requires client credentials", auth_mode.as_str()))?;

    Ok(match auth_mode {
        AuthMode::Tvm => CredentialProvider::Tvm(TvmProvider::new(service, credentials)),
        AuthMode::Tvm2 => CredentialProvider::Tvm2(Tvm2Provider::new(service, credentials)),
        AuthMode::None => CredentialProvider::Null,
    })
}
