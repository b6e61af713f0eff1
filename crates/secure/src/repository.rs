//! Repositories that hand out credential-injecting adaptors by service name.

use std::{fmt, sync::Arc};

use {
    dashmap::DashMap,
    tollgate_config::{AuthConfig, Endpoint, TollgateConfig, default_endpoints},
    tollgate_service::{Handle, HandleFactory, ServiceCache},
    tracing::{debug, info},
};

use crate::{
    adaptor::SecureAdaptor,
    clock::{Clock, SystemClock},
    credentials::Credentials,
    provider::{CredentialProvider, TokenSource},
};

/// A [`ServiceCache`] that also memoizes one [`SecureAdaptor`] per name.
///
/// Every adaptor shares the provider built at construction, and wraps the
/// same handle that [`SecureServiceCache::resolve`] returns for its name.
pub struct SecureServiceCache {
    services: ServiceCache,
    provider: Arc<CredentialProvider>,
    token_expiration_secs: u64,
    clock: Arc<dyn Clock>,
    secured: DashMap<String, Arc<SecureAdaptor>>,
}

impl SecureServiceCache {
    /// Build the repository and its credential provider.
    ///
    /// Fails only when a recognized mode is missing `client_id` or
    /// `client_secret`; unknown modes fall back to unauthenticated calls.
    pub fn new(
        factory: Arc<dyn HandleFactory>,
        endpoints: Vec<Endpoint>,
        auth: &AuthConfig,
    ) -> anyhow::Result<Self> {
        let credentials = Credentials::from_config(auth)?;
        let provider =
            CredentialProvider::from_mode(&*factory, &auth.mode, &endpoints, credentials)?;

        info!(
            mode = provider.kind(),
            token_expiration_secs = auth.token_expiration_secs,
            "secure service cache created"
        );

        Ok(Self::with_provider(
            ServiceCache::new(factory, endpoints),
            provider,
            auth.token_expiration_secs,
        ))
    }

    pub fn from_config(
        factory: Arc<dyn HandleFactory>,
        config: &TollgateConfig,
    ) -> anyhow::Result<Self> {
        Self::new(factory, config.endpoints.clone(), &config.auth)
    }

    /// Wrap an existing cache with an already built provider.
    pub fn with_provider(
        services: ServiceCache,
        provider: CredentialProvider,
        token_expiration_secs: u64,
    ) -> Self {
        Self {
            services,
            provider: Arc::new(provider),
            token_expiration_secs,
            clock: Arc::new(SystemClock),
            secured: DashMap::new(),
        }
    }

    /// Clock used by adaptors created after this call.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// The plain handle for `name`, without credential injection.
    pub fn resolve(&self, name: &str) -> Arc<dyn Handle> {
        self.services.resolve(name)
    }

    /// The credential-injecting adaptor for `name`, built on first access.
    pub fn resolve_secure(&self, name: &str) -> Arc<SecureAdaptor> {
        if let Some(adaptor) = self.secured.get(name) {
            debug!(service = %name, "secure service cache hit");
            return Arc::clone(adaptor.value());
        }

        let entry = self.secured.entry(name.to_string()).or_insert_with(|| {
            debug!(service = %name, "creating secure adaptor");
            let adaptor = SecureAdaptor::new(
                self.services.resolve(name),
                Arc::clone(&self.provider),
                self.token_expiration_secs,
            )
            .with_clock(Arc::clone(&self.clock));
            Arc::new(adaptor)
        });
        Arc::clone(entry.value())
    }

    pub fn services(&self) -> &ServiceCache {
        &self.services
    }

    pub fn provider(&self) -> &Arc<CredentialProvider> {
        &self.provider
    }

    pub fn token_expiration_secs(&self) -> u64 {
        self.token_expiration_secs
    }

    /// Number of cached adaptors.
    pub fn secured_len(&self) -> usize {
        self.secured.len()
    }
}

impl fmt::Debug for SecureServiceCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecureServiceCache")
            .field("services", &self.services)
            .field("provider", &self.provider)
            .field("token_expiration_secs", &self.token_expiration_secs)
            .field("secured", &self.secured.len())
            .finish()
    }
}

/// Wrap a single handle in a [`SecureAdaptor`] with its own provider.
///
/// The ticket service is resolved through `endpoints`, falling back to the
/// handle's own locator endpoints and then to the built-in defaults. Empty
/// lists count as absent.
pub fn make_secure_adaptor(
    factory: &dyn HandleFactory,
    handle: Arc<dyn Handle>,
    endpoints: Option<&[Endpoint]>,
    auth: &AuthConfig,
) -> anyhow::Result<SecureAdaptor> {
    let endpoints = endpoints
        .filter(|e| !e.is_empty())
        .map(<[Endpoint]>::to_vec)
        .or_else(|| handle.endpoints().filter(|e| !e.is_empty()))
        .unwrap_or_else(default_endpoints);

    let credentials = Credentials::from_config(auth)?;
    let provider = CredentialProvider::from_mode(factory, &auth.mode, &endpoints, credentials)?;

    Ok(SecureAdaptor::new(
        handle,
        Arc::new(provider),
        auth.token_expiration_secs,
    ))
}
