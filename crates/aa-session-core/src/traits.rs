//! Collaborator traits and their error types.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::{Address, IdentityConfig, IdentityProfile, NetworkConfig};

/// JSON-RPC / EIP-1193 request error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RpcError {
    #[error("Provider is disconnected")]
    Disconnected,
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },
    #[error("Unsupported method: {0}")]
    UnsupportedMethod(String),
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// EIP-1193 style request interface.
///
/// Handles returned by identity providers, local-key providers and plain
/// HTTP JSON-RPC clients all implement this trait.
#[async_trait]
pub trait Eip1193Provider: Send + Sync {
    /// Issue a request (`{ method, params }`) and return its `result`.
    async fn request(&self, method: &str, params: Value) -> Result<Value, RpcError>;
}

/// Shared provider handle.
pub type ProviderHandle = Arc<dyn Eip1193Provider>;

/// Signer error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignerError {
    #[error("Signer has no address: {0}")]
    NoAddress(String),
    #[error("Signing rejected: {0}")]
    Rejected(String),
    #[error(transparent)]
    Rpc(#[from] RpcError),
}

/// Chain-capable signer.
#[async_trait]
pub trait Signer: Send + Sync {
    /// Address of the signing key.
    async fn address(&self) -> Result<Address, SignerError>;

    /// EIP-191 personal message signature, `0x`-prefixed hex.
    async fn sign_message(&self, message: &[u8]) -> Result<String, SignerError>;

    /// Sign a transaction request object, returning the raw signed transaction.
    async fn sign_transaction(&self, tx: &Value) -> Result<String, SignerError>;
}

/// Identity provider initialization error. Fatal.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InitError {
    #[error("Invalid provider configuration: {0}")]
    InvalidConfig(String),
    #[error("Provider construction failed: {0}")]
    Backend(String),
}

/// Authentication error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("Login cancelled by user")]
    UserCancelled,
    #[error("Identity provider unavailable: {0}")]
    ProviderUnavailable(String),
    #[error("Not connected")]
    NotConnected,
    #[error("Identity provider not initialized")]
    NotInitialized,
}

/// Trait for identity providers.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Construct the provider. Idempotent.
    async fn initialize(&self, config: &IdentityConfig) -> Result<(), InitError>;

    /// Whether `initialize` has completed successfully.
    fn is_ready(&self) -> bool;

    /// Run the interactive login and return a provider handle.
    async fn connect(&self) -> Result<ProviderHandle, AuthError>;

    /// End the provider session. Idempotent.
    async fn disconnect(&self) -> Result<(), AuthError>;

    /// Whether a provider session is active.
    fn is_connected(&self) -> bool;

    /// Last handle returned by `connect` or restored by `initialize`.
    fn provider(&self) -> Option<ProviderHandle>;

    /// Profile of the connected user.
    async fn fetch_profile(&self) -> Result<IdentityProfile, AuthError>;
}

/// Signer binding error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BindError {
    #[error("Incompatible provider: {0}")]
    IncompatibleProvider(String),
}

/// Smart account resolution error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("Network unreachable: {0}")]
    NetworkUnreachable(String),
    #[error("Invalid account configuration: {0}")]
    InvalidConfig(String),
    #[error("Signer rejected: {0}")]
    SignerRejected(String),
}

impl ResolveError {
    /// Whether a later attempt may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::NetworkUnreachable(_))
    }
}

/// Trait for smart account resolvers.
///
/// Resolution is a single attempt: implementations never retry.
#[async_trait]
pub trait AccountResolver: Send + Sync {
    /// Compute the counterfactual smart account address owned by `signer`.
    async fn resolve(
        &self,
        signer: &dyn Signer,
        network: &NetworkConfig,
    ) -> Result<Address, ResolveError>;
}

/// Chain state read error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReadError {
    #[error("Provider unavailable: {0}")]
    ProviderUnavailable(String),
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl From<RpcError> for ReadError {
    fn from(err: RpcError) -> Self {
        match err {
            RpcError::InvalidResponse(msg) => Self::InvalidResponse(msg),
            other => Self::ProviderUnavailable(other.to_string()),
        }
    }
}
