//! Core abstractions for social-login smart-account sessions.
//!
//! This crate provides the fundamental building blocks:
//! - `NetworkConfig` / `IdentityConfig` - Immutable chain and provider configuration
//! - `SessionSnapshot` - Read-only view of a session handed to the UI layer
//! - `SnapshotStore` - Broadcast + history of session events
//! - `Address`, `Balance` - Chain primitives with exact unit conversion
//! - Identity provider, EIP-1193 provider, signer and resolver traits

pub mod address;
pub mod config;
pub mod session;
pub mod snapshot_store;
pub mod traits;
pub mod units;

#[cfg(feature = "testing")]
pub mod testing;

pub use address::Address;
pub use config::{IdentityConfig, NetworkConfig};
pub use session::{IdentityProfile, SessionError, SessionSnapshot, SessionStatus, Step};
pub use snapshot_store::{SessionEvent, SnapshotStore};
pub use traits::{AccountResolver, Eip1193Provider, IdentityProvider, ProviderHandle, Signer};
pub use units::Balance;
