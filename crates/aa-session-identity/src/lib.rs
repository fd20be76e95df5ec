//! Identity provider integration.
//!
//! Provides:
//! - `IdentityProviderAdapter` - Enforces the provider lifecycle around a `LoginBackend`
//! - `LocalKeyBackend` / `LocalKeyProvider` - Private-key EIP-1193 provider for development
//! - `HttpRpcClient` - EIP-1193 over HTTP JSON-RPC
//! - `Eip1559Transaction` - Typed transaction encoding for local signing

pub mod adapter;
pub mod local_key;
pub mod rpc;
pub mod tx;

pub use adapter::{IdentityProviderAdapter, LoginBackend};
pub use local_key::{KeyError, LocalKeyBackend, LocalKeyProvider};
pub use rpc::HttpRpcClient;
pub use tx::Eip1559Transaction;
