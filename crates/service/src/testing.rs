//! Recording mocks for the handle seam.

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use {
    async_trait::async_trait,
    serde_json::{Value, json},
    tollgate_config::Endpoint,
};

use crate::{
    cache::LOCATOR_SERVICE_NAME,
    error::{Error, Result},
    handle::{Call, Channel, Handle, HandleFactory},
};

type Responder = Box<dyn Fn(&Call) -> Result<Value> + Send + Sync>;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Pointer equality for handles behind trait objects.
pub fn same_handle<A: ?Sized, B: ?Sized>(a: &Arc<A>, b: &Arc<B>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

/// A handle that records every call and answers from per-method responders.
///
/// Methods without a responder reply with `{"method": <name>}`.
pub struct MockHandle {
    name: String,
    endpoints: Option<Vec<Endpoint>>,
    responders: HashMap<String, Responder>,
    latency: Option<Duration>,
    calls: Mutex<Vec<(String, Call)>>,
    connects: Mutex<Vec<Option<u64>>>,
    disconnects: AtomicUsize,
}

impl MockHandle {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            endpoints: None,
            responders: HashMap::new(),
            latency: None,
            calls: Mutex::new(Vec::new()),
            connects: Mutex::new(Vec::new()),
            disconnects: AtomicUsize::new(0),
        }
    }

    #[must_use]
    pub fn with_endpoints(mut self, endpoints: Vec<Endpoint>) -> Self {
        self.endpoints = Some(endpoints);
        self
    }

    /// Answer `method` with `value` every time.
    #[must_use]
    pub fn with_reply(self, method: &str, value: impl Into<Value>) -> Self {
        let value = value.into();
        self.on(method, move |_| Ok(value.clone()))
    }

    /// Fail `method` with a remote error every time.
    #[must_use]
    pub fn with_remote_error(self, method: &str, code: i64, message: &str) -> Self {
        let service = self.name.clone();
        let message = message.to_string();
        self.on(method, move |_| {
            Err(Error::Remote {
                service: service.clone(),
                code,
                message: message.clone(),
            })
        })
    }

    #[must_use]
    pub fn on(
        mut self,
        method: &str,
        responder: impl Fn(&Call) -> Result<Value> + Send + Sync + 'static,
    ) -> Self {
        self.responders.insert(method.into(), Box::new(responder));
        self
    }

    /// Sleep before answering each call.
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn calls(&self) -> Vec<(String, Call)> {
        lock(&self.calls).clone()
    }

    pub fn call_count(&self, method: &str) -> usize {
        lock(&self.calls).iter().filter(|(m, _)| m == method).count()
    }

    pub fn connects(&self) -> Vec<Option<u64>> {
        lock(&self.connects).clone()
    }

    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Handle for MockHandle {
    fn name(&self) -> &str {
        &self.name
    }

    fn endpoints(&self) -> Option<Vec<Endpoint>> {
        self.endpoints.clone()
    }

    async fn connect(&self, trace_id: Option<u64>) -> Result<()> {
        lock(&self.connects).push(trace_id);
        Ok(())
    }

    fn disconnect(&self) {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
    }

    async fn invoke(&self, method: &str, call: Call) -> Result<Channel> {
        lock(&self.calls).push((method.to_string(), call.clone()));

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        let value = match self.responders.get(method) {
            Some(responder) => responder(&call)?,
            None => json!({ "method": method }),
        };
        Ok(Channel::ready(value))
    }
}

/// A factory that counts constructions and hands out registered mocks.
#[derive(Default)]
pub struct MockFactory {
    registered: Mutex<HashMap<String, Arc<MockHandle>>>,
    built: Mutex<HashMap<String, Arc<MockHandle>>>,
    created: Mutex<HashMap<String, usize>>,
    locators: AtomicUsize,
}

impl MockFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Serve `handle` for its name instead of a blank mock.
    pub fn register(&self, handle: MockHandle) -> Arc<MockHandle> {
        let handle = Arc::new(handle);
        lock(&self.registered).insert(handle.name.clone(), Arc::clone(&handle));
        handle
    }

    /// The last handle built for `name`.
    pub fn handle(&self, name: &str) -> Option<Arc<MockHandle>> {
        lock(&self.built).get(name).cloned()
    }

    /// How many times `service(name, ..)` ran.
    pub fn created(&self, name: &str) -> usize {
        lock(&self.created).get(name).copied().unwrap_or(0)
    }

    pub fn locators_built(&self) -> usize {
        self.locators.load(Ordering::SeqCst)
    }
}

impl HandleFactory for MockFactory {
    fn locator(&self, endpoints: &[Endpoint]) -> Arc<dyn Handle> {
        self.locators.fetch_add(1, Ordering::SeqCst);
        Arc::new(MockHandle::new(LOCATOR_SERVICE_NAME).with_endpoints(endpoints.to_vec()))
    }

    fn service(&self, name: &str, locator: &Arc<dyn Handle>) -> Arc<dyn Handle> {
        *lock(&self.created).entry(name.to_string()).or_default() += 1;

        let handle = lock(&self.registered).get(name).cloned().unwrap_or_else(|| {
            let mut handle = MockHandle::new(name);
            handle.endpoints = locator.endpoints();
            Arc::new(handle)
        });
        lock(&self.built).insert(name.to_string(), Arc::clone(&handle));
        handle
    }
}
