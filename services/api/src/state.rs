//! Shared Application State
//!
//! This module defines the `AppState` struct, which holds all shared,
//! clonable resources like the database pool and the turn orchestrator.

use crate::config::Config;
use feynman_tutor_core::TurnOrchestrator;
use std::sync::Arc;

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<crate::db::Db>,
    /// Owns every session mutation; backed by the same `db`.
    pub orchestrator: Arc<TurnOrchestrator>,
    pub config: Arc<Config>,
}
