//! Identity provider adapter.

use std::sync::{PoisonError, RwLock};

use aa_session_core::{
    IdentityConfig, IdentityProfile,
    traits::{AuthError, IdentityProvider, InitError, ProviderHandle},
};
use async_trait::async_trait;
use tokio::sync::Mutex;

/// The external provider's own login flow.
///
/// Implement this trait to plug in a social login SDK or a development
/// stand-in. The adapter handles lifecycle rules; backends only talk to the
/// provider.
#[async_trait]
pub trait LoginBackend: Send + Sync {
    /// Construct the provider client from a validated configuration.
    async fn init(&self, config: &IdentityConfig) -> Result<(), InitError>;

    /// Provider session cached from a previous run, if any.
    async fn restore(&self) -> Option<ProviderHandle> {
        None
    }

    /// Run the interactive login.
    async fn login(&self) -> Result<ProviderHandle, AuthError>;

    /// End the provider session.
    async fn logout(&self) -> Result<(), AuthError>;

    /// Profile of the logged-in user.
    async fn user_info(&self) -> Result<IdentityProfile, AuthError>;
}

#[derive(Default)]
struct AdapterState {
    ready: bool,
    handle: Option<ProviderHandle>,
}

/// Identity provider adapter.
///
/// Holds no state beyond readiness and the last handle it returned.
pub struct IdentityProviderAdapter<B> {
    backend: B,
    state: RwLock<AdapterState>,
    init_lock: Mutex<()>,
}

impl<B: LoginBackend> IdentityProviderAdapter<B> {
    /// Wrap a login backend.
    #[must_use]
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            state: RwLock::new(AdapterState::default()),
            init_lock: Mutex::new(()),
        }
    }

    /// The wrapped backend.
    #[must_use]
    pub const fn backend(&self) -> &B {
        &self.backend
    }

    fn read<T>(&self, f: impl FnOnce(&AdapterState) -> T) -> T {
        f(&self.state.read().unwrap_or_else(PoisonError::into_inner))
    }

    fn write<T>(&self, f: impl FnOnce(&mut AdapterState) -> T) -> T {
        f(&mut self.state.write().unwrap_or_else(PoisonError::into_inner))
    }
}

#[async_trait]
impl<B: LoginBackend> IdentityProvider for IdentityProviderAdapter<B> {
    async fn initialize(&self, config: &IdentityConfig) -> Result<(), InitError> {
        let _init = self.init_lock.lock().await;
        if self.is_ready() {
            return Ok(());
        }

        config
            .validate()
            .map_err(|e| InitError::InvalidConfig(e.to_string()))?;
        self.backend.init(config).await?;

        let restored = self.backend.restore().await;
        if restored.is_some() {
            tracing::info!("Restored existing identity provider session");
        }
        self.write(|state| {
            state.ready = true;
            state.handle = restored;
        });
        Ok(())
    }

    fn is_ready(&self) -> bool {
        self.read(|state| state.ready)
    }

    async fn connect(&self) -> Result<ProviderHandle, AuthError> {
        if !self.is_ready() {
            return Err(AuthError::NotInitialized);
        }
        let handle = self.backend.login().await?;
        self.write(|state| state.handle = Some(handle.clone()));
        Ok(handle)
    }

    async fn disconnect(&self) -> Result<(), AuthError> {
        if !self.is_connected() {
            return Ok(());
        }
        let result = self.backend.logout().await;
        // The handle is forgotten even if the provider could not be reached.
        self.write(|state| state.handle = None);
        result
    }

    fn is_connected(&self) -> bool {
        self.read(|state| state.handle.is_some())
    }

    fn provider(&self) -> Option<ProviderHandle> {
        self.read(|state| state.handle.clone())
    }

    async fn fetch_profile(&self) -> Result<IdentityProfile, AuthError> {
        if !self.is_connected() {
            return Err(AuthError::NotConnected);
        }
        self.backend.user_info().await
    }
}
