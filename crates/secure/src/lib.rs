//! Credential injection for service handles.
//!
//! [`SecureServiceCache`] hands out one [`SecureAdaptor`] per service name.
//! Each adaptor fetches a token from the shared [`CredentialProvider`] on
//! first use, refreshes it after the configured expiration, and passes it to
//! the wrapped handle as the `authorization` argument of every call.

pub mod adaptor;
pub mod clock;
pub mod credentials;
pub mod provider;
pub mod repository;

pub use {
    adaptor::{AUTHORIZATION, SecureAdaptor, TokenState},
    clock::{Clock, ManualClock, SystemClock},
    credentials::{Credentials, Token},
    provider::{
        CredentialProvider, TokenSource, Tvm2Provider, TvmProvider, create_secure_provider,
        create_ticket_service,
    },
    repository::{SecureServiceCache, make_secure_adaptor},
};
