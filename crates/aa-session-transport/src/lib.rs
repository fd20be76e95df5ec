//! Transport layer for session UIs.
//!
//! Provides:
//! - Wire protocol (JSON, tagged by `type`)
//! - WebSocket and HTTP routes over a `SessionControl` (feature: websocket)

pub mod protocol;

#[cfg(feature = "websocket")]
pub mod websocket;

pub use protocol::{ClientMessage, ServerMessage};
