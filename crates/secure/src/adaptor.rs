//! Handle decorator that signs every call with a credential.

use std::{
    fmt,
    sync::{Arc, PoisonError, RwLock},
};

use {
    async_trait::async_trait,
    serde_json::Value,
    tokio::sync::Mutex,
    tollgate_config::Endpoint,
    tollgate_service::{Call, Channel, Error, Handle, Result},
    tracing::{debug, warn},
};

use crate::{
    clock::{Clock, SystemClock},
    credentials::Token,
    provider::{CredentialProvider, TokenSource},
};

/// Named argument carrying the credential on every forwarded call.
pub const AUTHORIZATION: &str = "authorization";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Expiry {
    /// Unix milliseconds.
    At(u64),
    Never,
}

impl Expiry {
    fn is_due(self, now: u64) -> bool {
        match self {
            Self::At(deadline) => now >= deadline,
            Self::Never => false,
        }
    }
}

struct TokenCache {
    token: Option<Token>,
    expires_at: Expiry,
}

/// Lifecycle of an adaptor's credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenState {
    /// No fetch has succeeded yet.
    Unfetched,
    Valid,
    /// A token is held but the next call will refresh it.
    Expired,
}

/// Wraps a [`Handle`] and injects an `authorization` argument into each call.
///
/// The token is fetched lazily on the first call and refreshed once `now`
/// reaches the expiry deadline. With an expiration of `0` the first token is
/// kept for the adaptor's lifetime. `connect` and `disconnect` are forwarded
/// unchanged.
pub struct SecureAdaptor {
    wrapped: Arc<dyn Handle>,
    provider: Arc<CredentialProvider>,
    token_expiration_secs: u64,
    clock: Arc<dyn Clock>,
    // Never held across an await.
    cache: RwLock<TokenCache>,
    // Serializes fetches so callers racing on an expired token share one.
    refresh: Mutex<()>,
}

impl SecureAdaptor {
    pub fn new(
        wrapped: Arc<dyn Handle>,
        provider: Arc<CredentialProvider>,
        token_expiration_secs: u64,
    ) -> Self {
        Self {
            wrapped,
            provider,
            token_expiration_secs,
            clock: Arc::new(SystemClock),
            cache: RwLock::new(TokenCache {
                token: None,
                expires_at: Expiry::At(0),
            }),
            refresh: Mutex::new(()),
        }
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn wrapped(&self) -> &Arc<dyn Handle> {
        &self.wrapped
    }

    pub fn provider(&self) -> &Arc<CredentialProvider> {
        &self.provider
    }

    pub fn token_expiration_secs(&self) -> u64 {
        self.token_expiration_secs
    }

    pub fn token_state(&self) -> TokenState {
        let cache = self.cache.read().unwrap_or_else(PoisonError::into_inner);
        match (&cache.token, cache.expires_at.is_due(self.clock.now_millis())) {
            (None, _) => TokenState::Unfetched,
            (Some(_), false) => TokenState::Valid,
            (Some(_), true) => TokenState::Expired,
        }
    }

    fn cached_token(&self) -> Option<Token> {
        let cache = self.cache.read().unwrap_or_else(PoisonError::into_inner);
        if cache.expires_at.is_due(self.clock.now_millis()) {
            return None;
        }
        cache.token.clone()
    }

    /// Return a valid token, fetching a new one if the current one expired.
    ///
    /// A failed fetch leaves the stored token and deadline untouched, so the
    /// next call tries again.
    async fn current_token(&self) -> Result<Token> {
        if let Some(token) = self.cached_token() {
            return Ok(token);
        }

        let _guard = self.refresh.lock().await;
        if let Some(token) = self.cached_token() {
            return Ok(token);
        }

        debug!(
            service = %self.wrapped.name(),
            provider = self.provider.kind(),
            "refreshing secure token"
        );

        let token = match self.provider.fetch_token().await {
            Ok(token) => token,
            Err(e) => {
                warn!(
                    service = %self.wrapped.name(),
                    provider = self.provider.kind(),
                    error = %e,
                    "failed to fetch secure token"
                );
                return Err(Error::token_fetch(e));
            },
        };

        let expires_at = match self.token_expiration_secs {
            0 => Expiry::Never,
            secs => Expiry::At(
                self.clock
                    .now_millis()
                    .saturating_add(secs.saturating_mul(1_000)),
            ),
        };

        let mut cache = self.cache.write().unwrap_or_else(PoisonError::into_inner);
        cache.token = Some(token.clone());
        cache.expires_at = expires_at;
        Ok(token)
    }
}

impl fmt::Debug for SecureAdaptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecureAdaptor")
            .field("service", &self.wrapped.name())
            .field("provider", &self.provider)
            .field("token_expiration_secs", &self.token_expiration_secs)
            .field("state", &self.token_state())
            .finish()
    }
}

#[async_trait]
impl Handle for SecureAdaptor {
    fn name(&self) -> &str {
        self.wrapped.name()
    }

    fn endpoints(&self) -> Option<Vec<Endpoint>> {
        self.wrapped.endpoints()
    }

    async fn connect(&self, trace_id: Option<u64>) -> Result<()> {
        self.wrapped.connect(trace_id).await
    }

    fn disconnect(&self) {
        self.wrapped.disconnect();
    }

    async fn invoke(&self, method: &str, mut call: Call) -> Result<Channel> {
        let token = self.current_token().await?;
        call.kwargs
            .insert(AUTHORIZATION.to_string(), Value::String(token.into_string()));
        self.wrapped.invoke(method, call).await
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use std::time::Duration;

    use {
        super::*,
        crate::{
            clock::ManualClock,
            credentials::Credentials,
            provider::{Tvm2Provider, TvmProvider},
        },
        serde_json::json,
        std::sync::atomic::{AtomicUsize, Ordering},
        tollgate_service::testing::MockHandle,
    };

    const T0: u64 = 1_700_000_000;

    /// Counts fetches and hands out numbered tokens; fails when told to.
    #[derive(Default)]
    struct CountingSource {
        fetches: AtomicUsize,
        fail: std::sync::atomic::AtomicBool,
    }

    #[async_trait]
    impl TokenSource for CountingSource {
        async fn fetch_token(&self) -> Result<Token> {
            let n = self.fetches.fetch_add(1, Ordering::SeqCst) + 1;
            if self.fail.load(Ordering::SeqCst) {
                return Err(Error::Connection {
                    service: "tvm2".into(),
                    reason: "connection refused".into(),
                });
            }
            Ok(Token::new("TEST", &n.to_string()))
        }

        fn kind(&self) -> &str {
            "test"
        }
    }

    struct Fixture {
        adaptor: SecureAdaptor,
        wrapped: Arc<MockHandle>,
        source: Arc<CountingSource>,
        clock: Arc<ManualClock>,
    }

    fn fixture(expiration: u64) -> Fixture {
        let wrapped = Arc::new(MockHandle::new("storage").with_reply("read", "payload"));
        let source = Arc::new(CountingSource::default());
        let clock = Arc::new(ManualClock::new(T0));
        let provider = Arc::new(CredentialProvider::Custom(source.clone()));
        let adaptor = SecureAdaptor::new(wrapped.clone(), provider, expiration)
            .with_clock(clock.clone());
        Fixture {
            adaptor,
            wrapped,
            source,
            clock,
        }
    }

    fn auth_of(call: &Call) -> &str {
        call.get_kwarg(AUTHORIZATION)
            .and_then(Value::as_str)
            .unwrap()
    }

    #[tokio::test]
    async fn token_is_fetched_lazily() {
        let fx = fixture(60);
        assert_eq!(fx.adaptor.token_state(), TokenState::Unfetched);
        assert_eq!(fx.source.fetches.load(Ordering::SeqCst), 0);

        fx.adaptor.invoke("read", Call::new()).await.unwrap();

        assert_eq!(fx.source.fetches.load(Ordering::SeqCst), 1);
        assert_eq!(fx.adaptor.token_state(), TokenState::Valid);
    }

    #[tokio::test]
    async fn injects_authorization_and_keeps_arguments() {
        let fx = fixture(60);
        let call = Call::with_args(["a", "b"]).kwarg("timeout", 5);

        let mut channel = fx.adaptor.invoke("read", call).await.unwrap();
        assert_eq!(channel.get().await.unwrap(), json!("payload"));

        let calls = fx.wrapped.calls();
        assert_eq!(calls.len(), 1);
        let (method, forwarded) = &calls[0];
        assert_eq!(method, "read");
        assert_eq!(forwarded.args, vec![json!("a"), json!("b")]);
        assert_eq!(forwarded.get_kwarg("timeout"), Some(&json!(5)));
        assert_eq!(auth_of(forwarded), "TEST 1");
        assert_eq!(forwarded.kwargs.len(), 2);
    }

    #[tokio::test]
    async fn forwards_any_method_name() {
        let fx = fixture(60);
        let mut channel = fx
            .adaptor
            .invoke("some_method_nobody_declared", Call::new())
            .await
            .unwrap();
        assert_eq!(
            channel.get().await.unwrap(),
            json!({ "method": "some_method_nobody_declared" })
        );
    }

    #[tokio::test]
    async fn refreshes_only_after_expiry() {
        let fx = fixture(60);

        fx.adaptor.invoke("read", Call::new()).await.unwrap();
        assert_eq!(fx.source.fetches.load(Ordering::SeqCst), 1);

        fx.clock.set(T0 + 59);
        fx.adaptor.invoke("read", Call::new()).await.unwrap();
        assert_eq!(fx.source.fetches.load(Ordering::SeqCst), 1);

        fx.clock.set(T0 + 61);
        assert_eq!(fx.adaptor.token_state(), TokenState::Expired);
        fx.adaptor.invoke("read", Call::new()).await.unwrap();
        assert_eq!(fx.source.fetches.load(Ordering::SeqCst), 2);

        let tokens: Vec<String> = fx
            .wrapped
            .calls()
            .iter()
            .map(|(_, c)| auth_of(c).to_string())
            .collect();
        assert_eq!(tokens, vec!["TEST 1", "TEST 1", "TEST 2"]);
    }

    #[tokio::test]
    async fn deadline_is_inclusive() {
        let fx = fixture(60);
        fx.adaptor.invoke("read", Call::new()).await.unwrap();

        fx.clock.set(T0 + 60);
        fx.adaptor.invoke("read", Call::new()).await.unwrap();
        assert_eq!(fx.source.fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn expiry_is_measured_from_the_exact_fetch_time() {
        let fx = fixture(1);
        fx.clock.set_millis(T0 * 1_000 + 900);
        fx.adaptor.invoke("read", Call::new()).await.unwrap();

        fx.clock.set_millis(T0 * 1_000 + 1_100);
        fx.adaptor.invoke("read", Call::new()).await.unwrap();
        assert_eq!(fx.source.fetches.load(Ordering::SeqCst), 1);

        fx.clock.set_millis(T0 * 1_000 + 1_900);
        fx.adaptor.invoke("read", Call::new()).await.unwrap();
        assert_eq!(fx.source.fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn zero_expiration_fetches_once() {
        let fx = fixture(0);
        for _ in 0..3 {
            fx.adaptor.invoke("read", Call::new()).await.unwrap();
            fx.clock.advance(1_000_000);
        }
        assert_eq!(fx.source.fetches.load(Ordering::SeqCst), 1);
        assert_eq!(fx.adaptor.token_state(), TokenState::Valid);
    }

    #[tokio::test]
    async fn fetch_failure_aborts_the_call() {
        let fx = fixture(60);
        fx.source.fail.store(true, Ordering::SeqCst);

        let err = fx.adaptor.invoke("read", Call::new()).await.unwrap_err();

        assert!(err.is_token_fetch());
        assert!(err.to_string().starts_with("failed to fetch secure token"));
        match &err {
            Error::TokenFetch(cause) => assert!(matches!(**cause, Error::Connection { .. })),
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(fx.wrapped.calls().is_empty());
        assert_eq!(fx.adaptor.token_state(), TokenState::Unfetched);
    }

    #[tokio::test]
    async fn failed_refresh_keeps_previous_token() {
        let fx = fixture(60);
        fx.adaptor.invoke("read", Call::new()).await.unwrap();

        fx.clock.set(T0 + 120);
        fx.source.fail.store(true, Ordering::SeqCst);
        assert!(fx.adaptor.invoke("read", Call::new()).await.is_err());
        assert_eq!(fx.adaptor.token_state(), TokenState::Expired);
        assert_eq!(fx.wrapped.calls().len(), 1);

        fx.source.fail.store(false, Ordering::SeqCst);
        fx.adaptor.invoke("read", Call::new()).await.unwrap();
        assert_eq!(auth_of(&fx.wrapped.calls()[1].1), "TEST 3");
    }

    #[tokio::test]
    async fn remote_errors_pass_through_unchanged() {
        let wrapped: Arc<dyn Handle> =
            Arc::new(MockHandle::new("storage").with_remote_error("write", 401, "bad token"));
        let adaptor = SecureAdaptor::new(wrapped, Arc::new(CredentialProvider::Null), 0);

        match adaptor.invoke("write", Call::new()).await {
            Err(Error::Remote {
                service,
                code,
                message,
            }) => {
                assert_eq!(service, "storage");
                assert_eq!(code, 401);
                assert_eq!(message, "bad token");
            },
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn null_provider_injects_empty_token() {
        let wrapped = Arc::new(MockHandle::new("storage"));
        let adaptor = SecureAdaptor::new(wrapped.clone(), Arc::new(CredentialProvider::Null), 0);

        adaptor.invoke("read", Call::new()).await.unwrap();
        assert_eq!(auth_of(&wrapped.calls()[0].1), "");
    }

    #[tokio::test]
    async fn connect_and_disconnect_are_forwarded() {
        let fx = fixture(60);
        fx.adaptor.connect(Some(7)).await.unwrap();
        fx.adaptor.connect(None).await.unwrap();
        fx.adaptor.disconnect();

        assert_eq!(fx.wrapped.connects(), vec![Some(7), None]);
        assert_eq!(fx.wrapped.disconnects(), 1);
        assert_eq!(fx.source.fetches.load(Ordering::SeqCst), 0);
        assert_eq!(fx.adaptor.name(), "storage");
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_fetch() {
        let tvm = Arc::new(
            MockHandle::new("tvm")
                .with_reply("ticket_full", "shared")
                .with_latency(Duration::from_millis(20)),
        );
        let provider = CredentialProvider::Tvm(TvmProvider::new(
            tvm.clone(),
            Credentials::new("backend", "s3cr3t"),
        ));
        let wrapped = Arc::new(MockHandle::new("storage"));
        let adaptor = SecureAdaptor::new(wrapped.clone(), Arc::new(provider), 300);

        let calls = (0..8).map(|i| adaptor.invoke("read", Call::new().arg(i)));
        for result in futures::future::join_all(calls).await {
            result.unwrap();
        }

        assert_eq!(tvm.call_count("ticket_full"), 1);
        assert_eq!(wrapped.calls().len(), 8);
        assert!(
            wrapped
                .calls()
                .iter()
                .all(|(_, c)| auth_of(c) == "TVM shared")
        );
    }

    #[tokio::test]
    async fn cancelled_fetch_leaves_state_untouched() {
        let tvm2 = Arc::new(
            MockHandle::new("tvm2")
                .with_reply("ticket", "late")
                .with_latency(Duration::from_millis(50)),
        );
        let provider = CredentialProvider::Tvm2(Tvm2Provider::new(
            tvm2.clone(),
            Credentials::new("backend", "s3cr3t"),
        ));
        let wrapped = Arc::new(MockHandle::new("storage"));
        let adaptor = SecureAdaptor::new(wrapped.clone(), Arc::new(provider), 300);

        let cancelled = tokio::time::timeout(
            Duration::from_millis(5),
            adaptor.invoke("read", Call::new()),
        )
        .await;
        assert!(cancelled.is_err());
        assert_eq!(adaptor.token_state(), TokenState::Unfetched);
        assert!(wrapped.calls().is_empty());

        adaptor.invoke("read", Call::new()).await.unwrap();
        assert_eq!(tvm2.call_count("ticket"), 2);
        assert_eq!(auth_of(&wrapped.calls()[0].1), "TVM2 late");
    }
}
