//! Tail sessions for auditscope
//!
//! This crate hosts the per-connection tailing state machine and the
//! WebSocket server that gives every viewer its own session.

mod session;
mod ws;

pub use session::{SessionContext, SessionSettings, SessionState, TailSession};
pub use ws::{WsServer, DEFAULT_MAX_CONNECTIONS};

// Re-export types used in our public API
pub use auditscope_types::{ClientMessage, ServerMessage};
