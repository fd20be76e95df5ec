//! Session orchestration for social-login smart accounts.
//!
//! Provides:
//! - `SessionOrchestrator` - Sequences login, account resolution and chain reads
//! - `SessionControl` - Object-safe surface for transports
//! - `OrchestratorConfig` - Retry policy for transient resolution failures

pub mod config;
pub mod control;
pub mod guard;
pub mod orchestrator;
mod session;

pub use config::{OrchestratorConfig, RetryPolicy};
pub use control::SessionControl;
pub use orchestrator::{OrchestratorError, SessionOrchestrator};
