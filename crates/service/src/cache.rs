//! Memoized service handles, one per name for the lifetime of the cache.

use std::{fmt, sync::Arc};

use {
    dashmap::DashMap,
    tollgate_config::{Endpoint, TollgateConfig, default_endpoints},
    tracing::{debug, info},
};

use crate::handle::{Handle, HandleFactory};

/// Name under which the locator exposes itself as a service.
pub const LOCATOR_SERVICE_NAME: &str = "locator";

/// Maps service names to singleton handles.
///
/// Entries are never evicted. Creation is serialized per name, so concurrent
/// first lookups of the same name observe one handle and the factory runs
/// once.
pub struct ServiceCache {
    factory: Arc<dyn HandleFactory>,
    endpoints: Vec<Endpoint>,
    locator: Arc<dyn Handle>,
    cache: DashMap<String, Arc<dyn Handle>>,
}

impl ServiceCache {
    pub fn new(factory: Arc<dyn HandleFactory>, endpoints: Vec<Endpoint>) -> Self {
        let locator = factory.locator(&endpoints);
        debug!(endpoints = ?endpoints, "service cache created");
        Self {
            factory,
            endpoints,
            locator,
            cache: DashMap::new(),
        }
    }

    pub fn with_default_endpoints(factory: Arc<dyn HandleFactory>) -> Self {
        Self::new(factory, default_endpoints())
    }

    pub fn from_config(factory: Arc<dyn HandleFactory>, config: &TollgateConfig) -> Self {
        Self::new(factory, config.endpoints.clone())
    }

    /// Return the handle for `name`, building it on first access.
    ///
    /// The factory runs under the per-name entry lock and must not call back
    /// into this cache.
    pub fn resolve(&self, name: &str) -> Arc<dyn Handle> {
        if name == LOCATOR_SERVICE_NAME {
            return Arc::clone(&self.locator);
        }

        if let Some(handle) = self.cache.get(name) {
            debug!(service = %name, "service cache hit");
            return Arc::clone(handle.value());
        }

        let entry = self.cache.entry(name.to_string()).or_insert_with(|| {
            info!(service = %name, "creating service handle");
            self.factory.service(name, &self.locator)
        });
        Arc::clone(entry.value())
    }

    /// The discovery resolver shared by every handle of this cache.
    pub fn locator(&self) -> &Arc<dyn Handle> {
        &self.locator
    }

    pub fn endpoints(&self) -> &[Endpoint] {
        &self.endpoints
    }

    pub fn factory(&self) -> &Arc<dyn HandleFactory> {
        &self.factory
    }

    pub fn contains(&self, name: &str) -> bool {
        self.cache.contains_key(name)
    }

    /// Number of cached handles (the locator is not counted).
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}

impl fmt::Debug for ServiceCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<String> = self.cache.iter().map(|e| e.key().clone()).collect();
        f.debug_struct("ServiceCache")
            .field("endpoints", &self.endpoints)
            .field("services", &names)
            .finish()
    }
}
