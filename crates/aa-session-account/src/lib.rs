//! Smart account plumbing on top of a connected provider handle.
//!
//! Provides:
//! - `SignerBinder` - Wrap a provider handle into a `Signer`
//! - `BundlerAccountResolver` - Counterfactual smart account resolution through the account factory
//! - `ChainStateReader` - Balance and account reads with exact unit conversion

pub mod chain;
pub mod resolver;
pub mod signer;

pub use chain::ChainStateReader;
pub use resolver::{BundlerAccountResolver, counterfactual_calldata};
pub use signer::{ProviderSigner, SignerBinder};
