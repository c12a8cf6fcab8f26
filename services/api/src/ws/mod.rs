//! WebSocket Session Handling
//!
//! - `protocol`: the JSON message format between the learner's client and the server.
//! - `session`: the connection lifecycle, from handshake to close, driving the orchestrator.

pub mod protocol;
pub mod session;

pub use session::ws_handler;
