//! Feynman Tutor API Library Crate
//!
//! This library contains the web surface of the tutor: application state,
//! database access, REST handlers, the WebSocket turn protocol, and routing.
//! The `api` binary is a thin wrapper around this library.

pub mod config;
pub mod db;
pub mod handlers;
pub mod models;
pub mod router;
pub mod state;
pub mod ws;
