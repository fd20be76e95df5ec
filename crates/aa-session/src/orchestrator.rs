//! Session orchestrator.
//!
//! Sequences identity login, signer binding, smart account resolution and
//! chain reads into a single observable session. At most one operation runs
//! at a time; a second caller gets `Busy` instead of waiting.

use std::sync::{
    Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard,
    atomic::{AtomicBool, Ordering},
};

use aa_session_account::{ChainStateReader, ProviderSigner, SignerBinder};
use aa_session_core::{
    AccountResolver, Address, IdentityConfig, IdentityProvider, NetworkConfig, ProviderHandle,
    SessionError, SessionSnapshot, SessionStatus, Signer, SnapshotStore, Step,
    session::Pending,
    traits::ResolveError,
};
use uuid::Uuid;

use crate::{
    config::OrchestratorConfig,
    guard::{InFlight, InFlightGuard},
    session::{Established, Session},
};

/// Orchestrator error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OrchestratorError {
    #[error("Another session operation is in flight")]
    Busy,
    #[error("Identity provider not initialized")]
    NotInitialized,
    #[error("Cannot {operation} while session is {status}")]
    InvalidState {
        operation: &'static str,
        status: SessionStatus,
    },
    #[error("Session orchestrator disposed")]
    Disposed,
    #[error(transparent)]
    Failed(#[from] SessionError),
}

impl OrchestratorError {
    /// Stable machine-readable code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Busy => "busy",
            Self::NotInitialized => "not_initialized",
            Self::InvalidState { .. } => "invalid_state",
            Self::Disposed => "disposed",
            Self::Failed(_) => "failed",
        }
    }

    /// Whether the caller may simply try again.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Busy => true,
            Self::Failed(err) => err.retryable,
            Self::NotInitialized | Self::InvalidState { .. } | Self::Disposed => false,
        }
    }
}

/// Session orchestrator.
pub struct SessionOrchestrator<I, R>
where
    I: IdentityProvider + 'static,
    R: AccountResolver,
{
    identity: Arc<I>,
    resolver: R,
    network: Arc<NetworkConfig>,
    identity_config: IdentityConfig,
    config: OrchestratorConfig,
    binder: SignerBinder,
    reader: ChainStateReader,
    session: RwLock<Session>,
    in_flight: InFlight,
    live: AtomicBool,
    events: Arc<SnapshotStore>,
}

impl<I, R> SessionOrchestrator<I, R>
where
    I: IdentityProvider + 'static,
    R: AccountResolver,
{
    /// Create an orchestrator for `network`.
    #[must_use]
    pub fn new(identity: I, resolver: R, network: Arc<NetworkConfig>) -> Self {
        Self {
            identity: Arc::new(identity),
            resolver,
            identity_config: IdentityConfig::for_network(&network),
            reader: ChainStateReader::for_network(&network),
            network,
            config: OrchestratorConfig::default(),
            binder: SignerBinder,
            session: RwLock::new(Session::new()),
            in_flight: InFlight::new(),
            live: AtomicBool::new(true),
            events: Arc::new(SnapshotStore::new()),
        }
    }

    #[must_use]
    pub fn with_config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    /// Override the identity provider configuration derived from the network.
    #[must_use]
    pub fn with_identity_config(mut self, identity_config: IdentityConfig) -> Self {
        self.identity_config = identity_config;
        self
    }

    pub fn identity(&self) -> &I {
        &self.identity
    }

    pub const fn resolver(&self) -> &R {
        &self.resolver
    }

    pub fn network(&self) -> &NetworkConfig {
        &self.network
    }

    /// Event store carrying transitions and snapshots.
    pub fn events(&self) -> Arc<SnapshotStore> {
        Arc::clone(&self.events)
    }

    /// Current snapshot.
    pub fn snapshot(&self) -> SessionSnapshot {
        self.read().snapshot()
    }

    pub fn status(&self) -> SessionStatus {
        self.read().status
    }

    /// Signer of the ready session.
    pub fn signer(&self) -> Option<Arc<dyn Signer>> {
        self.read().established().map(|e| Arc::clone(&e.signer))
    }

    /// Provider handle of the ready session.
    pub fn provider(&self) -> Option<ProviderHandle> {
        self.read().established().map(|e| Arc::clone(&e.provider))
    }

    pub fn is_disposed(&self) -> bool {
        !self.live.load(Ordering::Acquire)
    }

    /// Initialize the identity provider and resume a session it restored.
    ///
    /// Only a session that never got past initialization is resumed: status
    /// `Unauthenticated`, or `Error` from a failed earlier `initialize`. A
    /// session that is ready, or that failed a login, is returned unchanged
    /// even if the identity provider still reports a connection.
    ///
    /// # Errors
    /// Returns `Failed` with step `initialize` if the provider cannot be
    /// constructed, or the failure of the resumed session.
    pub async fn initialize(&self) -> Result<SessionSnapshot, OrchestratorError> {
        self.ensure_live()?;
        let guard = self.in_flight.try_acquire().ok_or(OrchestratorError::Busy)?;

        if let Err(e) = self.identity.initialize(&self.identity_config).await {
            tracing::error!("Identity provider initialization failed: {e}");
            let err = SessionError::init(&e);
            self.update(None, |s| s.fail(err.clone()))
                .ok_or(OrchestratorError::Disposed)?;
            return Err(OrchestratorError::Failed(err));
        }

        if !self.read().can_resume() {
            tracing::debug!("Identity provider ready, keeping {} session", self.status());
            return Ok(self.snapshot());
        }
        let Some(provider) = self
            .identity
            .provider()
            .filter(|_| self.identity.is_connected())
        else {
            tracing::debug!("Identity provider ready, no session to restore");
            return Ok(self.snapshot());
        };

        tracing::info!("Resuming restored identity session");
        let attempt = self.begin_attempt()?;
        let _scope = AttemptScope::new(self, attempt, guard);
        self.sequence(attempt, provider).await
    }

    /// Run the interactive login and set up the smart account.
    ///
    /// A ready session is returned unchanged.
    ///
    /// # Errors
    /// Returns `Busy` while another operation runs, `NotInitialized` before
    /// a successful `initialize`, or `Failed` with the step that failed.
    pub async fn login(&self) -> Result<SessionSnapshot, OrchestratorError> {
        self.ensure_live()?;
        let guard = self.in_flight.try_acquire().ok_or(OrchestratorError::Busy)?;

        if self.status() == SessionStatus::Ready {
            tracing::debug!("Login requested on a ready session");
            return Ok(self.snapshot());
        }
        if !self.identity.is_ready() {
            return Err(OrchestratorError::NotInitialized);
        }

        let attempt = self.begin_attempt()?;
        let _scope = AttemptScope::new(self, attempt, guard);
        tracing::info!("Starting login");

        let provider = match self.identity.connect().await {
            Ok(provider) => provider,
            Err(e) => {
                let err = SessionError::auth(Step::Connect, &e);
                tracing::warn!("Login failed at {}: {}", err.step, err.message);
                return Err(self.fail_attempt(attempt, err));
            }
        };
        self.sequence(attempt, provider).await
    }

    /// End the session. Local state is cleared even if the identity provider
    /// cannot be reached.
    ///
    /// # Errors
    /// Returns `Busy` while another operation runs.
    pub async fn logout(&self) -> Result<SessionSnapshot, OrchestratorError> {
        self.ensure_live()?;
        let _guard = self.in_flight.try_acquire().ok_or(OrchestratorError::Busy)?;

        if let Err(e) = self.identity.disconnect().await {
            tracing::warn!("Identity provider disconnect failed, clearing session anyway: {e}");
        }
        let snapshot = self
            .update(None, |s| {
                s.clear();
                s.snapshot()
            })
            .ok_or(OrchestratorError::Disposed)?;
        tracing::info!("Logged out");
        Ok(snapshot)
    }

    /// Re-read the balance of the ready session.
    ///
    /// On failure the last known values stay in place and the error is
    /// recorded in `last_error`.
    ///
    /// # Errors
    /// Returns `InvalidState` unless the session is ready, `Busy` while
    /// another operation runs, or `Failed` with step `balance`.
    pub async fn refresh(&self) -> Result<SessionSnapshot, OrchestratorError> {
        self.ensure_live()?;
        let _guard = self.in_flight.try_acquire().ok_or(OrchestratorError::Busy)?;

        let (provider, address) = {
            let session = self.read();
            let Some(established) = session.established() else {
                return Err(OrchestratorError::InvalidState {
                    operation: "refresh",
                    status: session.status,
                });
            };
            (Arc::clone(&established.provider), established.address)
        };
        let current = move |s: &Session| s.established().is_some_and(|e| e.address == address);

        match self.reader.read_balance(provider.as_ref(), address).await {
            Ok(balance) => {
                tracing::debug!("Refreshed balance of {address}: {balance}");
                self.update(None, |s| {
                    if current(&*s) {
                        s.set_balance(balance);
                        s.last_error = None;
                    }
                    s.snapshot()
                })
                .ok_or(OrchestratorError::Disposed)
            }
            Err(e) => {
                tracing::warn!("Balance refresh failed: {e}");
                let err = SessionError::read(Step::Balance, &e);
                self.update(None, |s| {
                    if current(&*s) {
                        s.last_error = Some(err.clone());
                    }
                })
                .ok_or(OrchestratorError::Disposed)?;
                Err(OrchestratorError::Failed(err))
            }
        }
    }

    /// Stop accepting operations and drop pending completions.
    pub fn dispose(&self) {
        let _session = self.write();
        if self.live.swap(false, Ordering::AcqRel) {
            self.events.push_disposed();
            tracing::info!("Session orchestrator disposed");
        }
    }

    /// Steps shared by login and restore, from a connected provider to `Ready`.
    ///
    /// An attempt that went stale after connecting hands the identity
    /// session back before reporting.
    async fn sequence(
        &self,
        attempt: Uuid,
        provider: ProviderHandle,
    ) -> Result<SessionSnapshot, OrchestratorError> {
        let result = self.establish(attempt, provider).await;
        if let Err(err @ (OrchestratorError::Disposed | OrchestratorError::InvalidState { .. })) =
            &result
        {
            tracing::info!("Login attempt superseded ({err}), releasing identity session");
            if let Err(e) = self.identity.disconnect().await {
                tracing::warn!("Identity provider disconnect failed: {e}");
            }
        }
        result
    }

    async fn establish(
        &self,
        attempt: Uuid,
        provider: ProviderHandle,
    ) -> Result<SessionSnapshot, OrchestratorError> {
        self.advance(attempt, SessionStatus::Authenticated(Pending::Profile))?;

        let signer = match self.binder.bind(Arc::clone(&provider)).await {
            Ok(signer) => signer,
            Err(e) => return Err(self.abort(attempt, SessionError::bind(&e)).await),
        };
        let owner = signer.owner();

        let address = match self.resolve(&signer).await {
            Ok(address) => address,
            Err(e) => return Err(self.abort(attempt, SessionError::resolve(&e)).await),
        };
        self.advance(attempt, SessionStatus::Authenticated(Pending::Account))?;

        let profile = match self.identity.fetch_profile().await {
            Ok(profile) => profile,
            Err(e) => {
                return Err(self
                    .abort(attempt, SessionError::auth(Step::Profile, &e))
                    .await);
            }
        };
        let balance = match self.reader.read_balance(provider.as_ref(), address).await {
            Ok(balance) => balance,
            Err(e) => {
                return Err(self
                    .abort(attempt, SessionError::read(Step::Balance, &e))
                    .await);
            }
        };

        let established = Established {
            provider,
            signer: Arc::new(signer),
            owner,
            address,
            profile,
            balance,
        };
        let snapshot = self
            .update(Some(attempt), move |s| {
                s.establish(established);
                s.snapshot()
            })
            .ok_or_else(|| self.stale_error())?;
        tracing::info!("Session ready: account {address} owned by {owner}");
        Ok(snapshot)
    }

    async fn resolve(&self, signer: &ProviderSigner) -> Result<Address, ResolveError> {
        let policy = self.config.resolve_retry;
        let mut retry = 0;
        loop {
            match self.resolver.resolve(signer, &self.network).await {
                Err(e) if e.is_retryable() && retry < policy.max_retries && !self.is_disposed() => {
                    let delay = policy.backoff(retry);
                    tracing::warn!("Smart account resolution failed ({e}), retrying in {delay:?}");
                    tokio::time::sleep(delay).await;
                    retry += 1;
                }
                result => return result,
            }
        }
    }

    /// Fail an attempt after the identity provider connected.
    async fn abort(&self, attempt: Uuid, err: SessionError) -> OrchestratorError {
        tracing::warn!("Login failed at {}: {}", err.step, err.message);
        if let Err(e) = self.identity.disconnect().await {
            tracing::warn!("Disconnect after failed login also failed: {e}");
        }
        self.fail_attempt(attempt, err)
    }

    fn fail_attempt(&self, attempt: Uuid, err: SessionError) -> OrchestratorError {
        match self.update(Some(attempt), |s| s.fail(err.clone())) {
            Some(()) => OrchestratorError::Failed(err),
            None => self.stale_error(),
        }
    }

    fn begin_attempt(&self) -> Result<Uuid, OrchestratorError> {
        let attempt = Uuid::new_v4();
        self.update(None, |s| s.begin(attempt))
            .ok_or(OrchestratorError::Disposed)?;
        Ok(attempt)
    }

    fn advance(&self, attempt: Uuid, status: SessionStatus) -> Result<(), OrchestratorError> {
        self.update(Some(attempt), |s| s.status = status)
            .ok_or_else(|| self.stale_error())
    }

    /// Reset the session if `attempt` never completed, and release the
    /// identity session it may have opened.
    ///
    /// The disconnect runs on a spawned task that keeps `guard`, so no new
    /// operation starts until the provider is released.
    fn abandon(&self, attempt: Uuid, guard: InFlightGuard) {
        if self.read().attempt != Some(attempt) {
            return;
        }
        if self.update(Some(attempt), Session::clear).is_some() {
            tracing::warn!("Login attempt dropped before completing, session reset");
        }
        if !self.identity.is_connected() {
            return;
        }
        let identity = Arc::clone(&self.identity);
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    let _guard = guard;
                    match identity.disconnect().await {
                        Ok(()) => tracing::info!("Released identity session of dropped attempt"),
                        Err(e) => tracing::warn!("Identity provider disconnect failed: {e}"),
                    }
                });
            }
            Err(_) => {
                tracing::warn!("No runtime to release the identity session of a dropped attempt");
            }
        }
    }

    /// Apply `f` unless the orchestrator is disposed or `attempt` is no longer
    /// current, then publish the resulting transition and snapshot.
    fn update<T>(&self, attempt: Option<Uuid>, f: impl FnOnce(&mut Session) -> T) -> Option<T> {
        let mut session = self.write();
        if self.is_disposed() {
            return None;
        }
        if attempt.is_some() && session.attempt != attempt {
            return None;
        }
        let from = session.status;
        let result = f(&mut *session);
        let to = session.status;
        if from != to {
            tracing::debug!("Session {from} -> {to}");
            self.events.push_transition(from, to);
        }
        self.events.push_snapshot(session.snapshot());
        Some(result)
    }

    fn stale_error(&self) -> OrchestratorError {
        if self.is_disposed() {
            OrchestratorError::Disposed
        } else {
            OrchestratorError::InvalidState {
                operation: "complete login",
                status: self.status(),
            }
        }
    }

    fn ensure_live(&self) -> Result<(), OrchestratorError> {
        if self.is_disposed() {
            Err(OrchestratorError::Disposed)
        } else {
            Ok(())
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Session> {
        self.session.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Session> {
        self.session.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<I, R> Drop for SessionOrchestrator<I, R>
where
    I: IdentityProvider + 'static,
    R: AccountResolver,
{
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Holds the in-flight claim of a login or restore attempt and resets the
/// session when the attempt's future is dropped mid-way.
struct AttemptScope<'a, I, R>
where
    I: IdentityProvider + 'static,
    R: AccountResolver,
{
    orchestrator: &'a SessionOrchestrator<I, R>,
    attempt: Uuid,
    guard: Option<InFlightGuard>,
}

impl<'a, I, R> AttemptScope<'a, I, R>
where
    I: IdentityProvider + 'static,
    R: AccountResolver,
{
    fn new(
        orchestrator: &'a SessionOrchestrator<I, R>,
        attempt: Uuid,
        guard: InFlightGuard,
    ) -> Self {
        Self {
            orchestrator,
            attempt,
            guard: Some(guard),
        }
    }
}

impl<I, R> Drop for AttemptScope<'_, I, R>
where
    I: IdentityProvider + 'static,
    R: AccountResolver,
{
    fn drop(&mut self) {
        if let Some(guard) = self.guard.take() {
            self.orchestrator.abandon(self.attempt, guard);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use aa_session_core::{
        SessionEvent,
        testing::{FakeIdentity, FakeProvider, FakeResolver},
        traits::{AuthError, InitError},
    };

    use super::*;
    use crate::config::RetryPolicy;

    type TestOrchestrator = SessionOrchestrator<FakeIdentity, FakeResolver>;

    fn owner() -> Address {
        "0x00000000000000000000000000000000000000aa".parse().unwrap()
    }

    fn build(config: OrchestratorConfig) -> (Arc<FakeProvider>, Arc<TestOrchestrator>) {
        let mut network = NetworkConfig::polygon_mumbai();
        network.client_id = "test-client".to_string();
        network.paymaster_api_key = Some("pm".to_string());
        let provider = Arc::new(FakeProvider::new(80001, vec![owner()]));
        provider.set_balance(
            FakeResolver::derive(owner(), &network),
            "1500000000000000000",
        );
        let orchestrator = SessionOrchestrator::new(
            FakeIdentity::new(Arc::clone(&provider)),
            FakeResolver::new(),
            Arc::new(network),
        )
        .with_config(config);
        (provider, Arc::new(orchestrator))
    }

    async fn initialized() -> (Arc<FakeProvider>, Arc<TestOrchestrator>) {
        let (provider, orchestrator) = build(OrchestratorConfig::default());
        orchestrator.initialize().await.unwrap();
        (provider, orchestrator)
    }

    async fn wait_for_status(orchestrator: &TestOrchestrator, status: SessionStatus) {
        for _ in 0..1_000 {
            if orchestrator.status() == status {
                return;
            }
            tokio::task::yield_now().await;
        }
        panic!("session never reached {status}");
    }

    fn failure(result: Result<SessionSnapshot, OrchestratorError>) -> SessionError {
        match result {
            Err(OrchestratorError::Failed(err)) => err,
            other => panic!("expected a session failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_login_reaches_ready() {
        let (_, orchestrator) = initialized().await;
        let snapshot = tokio_test::assert_ok!(orchestrator.login().await);

        assert_eq!(snapshot.status, SessionStatus::Ready);
        assert!(snapshot.is_complete());
        assert_eq!(snapshot.owner, Some(owner()));
        assert_eq!(
            snapshot.address,
            Some(FakeResolver::derive(owner(), orchestrator.network()))
        );
        assert_eq!(snapshot.balance.as_deref(), Some("1.5"));
        assert_eq!(
            snapshot.profile.unwrap().email.as_deref(),
            Some("ada@example.com")
        );
        assert!(snapshot.last_error.is_none());
        assert!(orchestrator.signer().is_some());
        assert!(orchestrator.provider().is_some());
    }

    #[tokio::test]
    async fn test_login_publishes_ordered_transitions() {
        let (_, orchestrator) = initialized().await;
        orchestrator.login().await.unwrap();

        let history = orchestrator.events().get_history();
        let transitions: Vec<_> = history
            .iter()
            .filter_map(|event| match event {
                SessionEvent::Transition { from, to } => Some((*from, *to)),
                _ => None,
            })
            .collect();
        assert_eq!(
            transitions,
            vec![
                (SessionStatus::Unauthenticated, SessionStatus::Authenticating),
                (
                    SessionStatus::Authenticating,
                    SessionStatus::Authenticated(Pending::Profile)
                ),
                (
                    SessionStatus::Authenticated(Pending::Profile),
                    SessionStatus::Authenticated(Pending::Account)
                ),
                (
                    SessionStatus::Authenticated(Pending::Account),
                    SessionStatus::Ready
                ),
            ]
        );
        for event in history {
            if let SessionEvent::Snapshot { snapshot } = event {
                if snapshot.status != SessionStatus::Ready {
                    assert!(snapshot.profile.is_none());
                    assert!(snapshot.address.is_none());
                    assert!(snapshot.balance.is_none());
                }
            }
        }
    }

    #[tokio::test]
    async fn test_operations_during_login_are_busy() {
        let (_, orchestrator) = initialized().await;
        let gate = orchestrator.identity().gate_connect();
        let pending = tokio::spawn({
            let orchestrator = Arc::clone(&orchestrator);
            async move { orchestrator.login().await }
        });
        wait_for_status(&orchestrator, SessionStatus::Authenticating).await;

        assert_eq!(orchestrator.login().await, Err(OrchestratorError::Busy));
        assert_eq!(orchestrator.logout().await, Err(OrchestratorError::Busy));
        assert_eq!(orchestrator.refresh().await, Err(OrchestratorError::Busy));

        gate.notify_one();
        let snapshot = pending.await.unwrap().unwrap();
        assert_eq!(snapshot.status, SessionStatus::Ready);
        assert_eq!(orchestrator.identity().connect_count(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_connect_can_be_retried() {
        let (_, orchestrator) = initialized().await;
        orchestrator
            .identity()
            .fail_next_connect(AuthError::UserCancelled);

        let err = failure(orchestrator.login().await);
        assert_eq!(err.step, Step::Connect);
        assert!(err.retryable);
        let snapshot = orchestrator.snapshot();
        assert_eq!(snapshot.status, SessionStatus::Error);
        assert_eq!(snapshot.last_error, Some(err));
        assert!(snapshot.address.is_none());
        assert_eq!(orchestrator.identity().disconnect_count(), 0);

        let snapshot = orchestrator.login().await.unwrap();
        assert_eq!(snapshot.status, SessionStatus::Ready);
        assert!(snapshot.last_error.is_none());
    }

    #[tokio::test]
    async fn test_invalid_account_config_fails_and_disconnects() {
        let (_, orchestrator) = initialized().await;
        orchestrator
            .resolver()
            .fail_next(ResolveError::InvalidConfig("paymaster missing".to_string()));

        let err = failure(orchestrator.login().await);
        assert_eq!(err.step, Step::Resolve);
        assert!(!err.retryable);
        assert_eq!(orchestrator.identity().disconnect_count(), 1);
        assert!(orchestrator.signer().is_none());
        assert_eq!(
            orchestrator.refresh().await,
            Err(OrchestratorError::InvalidState {
                operation: "refresh",
                status: SessionStatus::Error,
            })
        );
    }

    #[tokio::test]
    async fn test_unreachable_bundler_without_retry_fails_once() {
        let (_, orchestrator) = initialized().await;
        orchestrator
            .resolver()
            .fail_next(ResolveError::NetworkUnreachable("timeout".to_string()));

        let err = failure(orchestrator.login().await);
        assert_eq!(err.step, Step::Resolve);
        assert!(err.retryable);
        assert_eq!(orchestrator.resolver().call_count(), 1);
    }

    #[tokio::test]
    async fn test_retry_policy_recovers_transient_resolution_failure() {
        let config = OrchestratorConfig {
            resolve_retry: RetryPolicy::exponential(2, Duration::from_millis(1)),
        };
        let (_, orchestrator) = build(config);
        orchestrator.initialize().await.unwrap();
        orchestrator
            .resolver()
            .fail_next(ResolveError::NetworkUnreachable("timeout".to_string()));

        let snapshot = orchestrator.login().await.unwrap();
        assert_eq!(snapshot.status, SessionStatus::Ready);
        assert_eq!(orchestrator.resolver().call_count(), 2);
    }

    #[tokio::test]
    async fn test_profile_failure_discards_resolved_account() {
        let (_, orchestrator) = initialized().await;
        orchestrator.identity().fail_profile(true);

        let err = failure(orchestrator.login().await);
        assert_eq!(err.step, Step::Profile);
        let snapshot = orchestrator.snapshot();
        assert!(snapshot.address.is_none());
        assert!(snapshot.owner.is_none());
        assert_eq!(orchestrator.identity().disconnect_count(), 1);
    }

    #[tokio::test]
    async fn test_refresh_failure_keeps_last_known_values() {
        let (provider, orchestrator) = initialized().await;
        let ready = orchestrator.login().await.unwrap();

        provider.fail_method("eth_getBalance");
        let err = failure(orchestrator.refresh().await);
        assert_eq!(err.step, Step::Balance);
        let snapshot = orchestrator.snapshot();
        assert_eq!(snapshot.status, SessionStatus::Ready);
        assert_eq!(snapshot.address, ready.address);
        assert_eq!(snapshot.balance, ready.balance);
        assert_eq!(snapshot.last_error, Some(err));

        provider.heal_method("eth_getBalance");
        provider.set_balance(ready.address.unwrap(), "0x1bc16d674ec80000");
        let refreshed = orchestrator.refresh().await.unwrap();
        assert_eq!(refreshed.balance.as_deref(), Some("2"));
        assert!(refreshed.last_error.is_none());
    }

    #[tokio::test]
    async fn test_refresh_requires_ready_session() {
        let (_, orchestrator) = initialized().await;
        assert_eq!(
            orchestrator.refresh().await,
            Err(OrchestratorError::InvalidState {
                operation: "refresh",
                status: SessionStatus::Unauthenticated,
            })
        );
    }

    #[tokio::test]
    async fn test_logout_clears_even_when_disconnect_fails() {
        let (_, orchestrator) = initialized().await;
        orchestrator.login().await.unwrap();
        orchestrator.identity().fail_disconnect(true);

        let snapshot = orchestrator.logout().await.unwrap();
        assert_eq!(snapshot, SessionSnapshot::unauthenticated());
        assert!(orchestrator.signer().is_none());
        assert_eq!(orchestrator.identity().disconnect_count(), 1);
    }

    #[tokio::test]
    async fn test_login_on_ready_session_is_noop() {
        let (_, orchestrator) = initialized().await;
        let first = orchestrator.login().await.unwrap();
        let second = orchestrator.login().await.unwrap();
        assert_eq!(first, second);
        assert_eq!(orchestrator.identity().connect_count(), 1);
    }

    #[tokio::test]
    async fn test_login_before_initialize() {
        let (_, orchestrator) = build(OrchestratorConfig::default());
        assert_eq!(
            orchestrator.login().await,
            Err(OrchestratorError::NotInitialized)
        );
        assert_eq!(orchestrator.status(), SessionStatus::Unauthenticated);
    }

    #[tokio::test]
    async fn test_initialize_failure_is_recorded() {
        let (_, orchestrator) = build(OrchestratorConfig::default());
        orchestrator
            .identity()
            .fail_init(InitError::Backend("sdk unavailable".to_string()));

        let err = failure(orchestrator.initialize().await);
        assert_eq!(err.step, Step::Initialize);
        assert!(!err.retryable);
        assert_eq!(orchestrator.status(), SessionStatus::Error);
        assert_eq!(
            orchestrator.login().await,
            Err(OrchestratorError::NotInitialized)
        );
    }

    #[tokio::test]
    async fn test_initialize_resumes_restored_session() {
        let (_, orchestrator) = build(OrchestratorConfig::default());
        orchestrator.identity().restore_on_init();

        let snapshot = orchestrator.initialize().await.unwrap();
        assert_eq!(snapshot.status, SessionStatus::Ready);
        assert_eq!(orchestrator.identity().connect_count(), 0);

        let again = orchestrator.initialize().await.unwrap();
        assert_eq!(again, snapshot);
    }

    #[tokio::test]
    async fn test_dispose_drops_in_flight_completion() {
        let (_, orchestrator) = initialized().await;
        let gate = orchestrator.identity().gate_connect();
        let pending = tokio::spawn({
            let orchestrator = Arc::clone(&orchestrator);
            async move { orchestrator.login().await }
        });
        wait_for_status(&orchestrator, SessionStatus::Authenticating).await;

        orchestrator.dispose();
        gate.notify_one();
        assert_eq!(pending.await.unwrap(), Err(OrchestratorError::Disposed));
        assert!(!orchestrator.identity().is_connected());
        assert_eq!(orchestrator.identity().disconnect_count(), 1);

        let snapshot = orchestrator.snapshot();
        assert_ne!(snapshot.status, SessionStatus::Ready);
        assert!(snapshot.address.is_none());
        assert_eq!(
            orchestrator.events().get_history().last(),
            Some(&SessionEvent::Disposed)
        );
        assert_eq!(orchestrator.login().await, Err(OrchestratorError::Disposed));
    }

    #[tokio::test]
    async fn test_dropped_login_resets_session() {
        let (_, orchestrator) = initialized().await;
        let _gate = orchestrator.identity().gate_connect();

        let timed_out = tokio::time::timeout(Duration::from_millis(20), orchestrator.login()).await;
        assert!(timed_out.is_err());
        assert_eq!(orchestrator.status(), SessionStatus::Unauthenticated);

        let snapshot = orchestrator.login().await.unwrap();
        assert_eq!(snapshot.status, SessionStatus::Ready);
    }

    #[tokio::test]
    async fn test_dropped_login_after_connect_releases_identity() {
        let (_, orchestrator) = initialized().await;
        let _gate = orchestrator.resolver().gate_resolve();

        let timed_out = tokio::time::timeout(Duration::from_millis(20), orchestrator.login()).await;
        assert!(timed_out.is_err());
        assert_eq!(orchestrator.status(), SessionStatus::Unauthenticated);

        let mut next = Err(OrchestratorError::Busy);
        for _ in 0..1_000 {
            next = orchestrator.login().await;
            if next != Err(OrchestratorError::Busy) {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(orchestrator.identity().disconnect_count(), 1);
        assert_eq!(next.unwrap().status, SessionStatus::Ready);
        assert_eq!(orchestrator.identity().connect_count(), 2);
    }

    #[tokio::test]
    async fn test_initialize_does_not_resume_failed_login() {
        let (_, orchestrator) = initialized().await;
        orchestrator.identity().fail_profile(true);
        orchestrator.identity().fail_disconnect(true);

        let err = failure(orchestrator.login().await);
        assert_eq!(err.step, Step::Profile);
        assert!(orchestrator.identity().is_connected());
        assert_eq!(orchestrator.resolver().call_count(), 1);

        let snapshot = orchestrator.initialize().await.unwrap();
        assert_eq!(snapshot.status, SessionStatus::Error);
        assert_eq!(snapshot.last_error, Some(err));
        assert_eq!(orchestrator.resolver().call_count(), 1);
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(OrchestratorError::Busy.code(), "busy");
        assert!(OrchestratorError::Busy.is_retryable());
        assert!(!OrchestratorError::Disposed.is_retryable());
    }
}
