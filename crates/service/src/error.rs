/// Errors surfaced by service handles and the adaptors wrapping them.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The credential could not be obtained; the call was never sent.
    #[error("failed to fetch secure token: {0}")]
    TokenFetch(#[source] Box<Error>),

    #[error("failed to connect to service '{service}': {reason}")]
    Connection { service: String, reason: String },

    /// Error reply from the remote side.
    #[error("service '{service}' error {code}: {message}")]
    Remote {
        service: String,
        code: i64,
        message: String,
    },

    #[error("response channel closed before a value was received")]
    ChannelClosed,

    #[error("unexpected response value: {0}")]
    UnexpectedValue(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    pub fn token_fetch(cause: Error) -> Self {
        Self::TokenFetch(Box::new(cause))
    }

    pub fn is_token_fetch(&self) -> bool {
        matches!(self, Self::TokenFetch(_))
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
