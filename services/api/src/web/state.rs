//! services/api/src/web/state.rs
//!
//! Defines the application's shared state.

use crate::config::Config;
use compliance_core::clock::Clock;
use compliance_core::lifecycle::SubscriptionManager;
use compliance_core::ports::DatabaseService;
use std::sync::Arc;

/// The shared application state, created once at startup and passed to all handlers.
///
/// There is exactly one `SubscriptionManager` per process so every route sees the
/// same in-flight guard.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<dyn DatabaseService>,
    pub manager: Arc<SubscriptionManager>,
    pub config: Arc<Config>,
    pub clock: Arc<dyn Clock>,
}
