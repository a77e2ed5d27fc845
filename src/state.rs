//! # Application state
//!
//! An explicitly-constructed dependency container, cloned cheaply (every
//! field is an `Arc`/handle) and passed to axum via `.with_state`. No
//! component reaches for ambient global state; everything is a field
//! here.

use crate::config::Settings;
use crate::correlator::Correlator;
use crate::mock::MockRegistry;
use crate::registry::ConnectionRegistry;
use crate::store::Store;
use crate::terminal::TerminalManager;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub registry: ConnectionRegistry,
    pub correlator: Correlator,
    pub store: Arc<dyn Store>,
    pub terminal: TerminalManager,
    pub mock: MockRegistry,
}

impl AppState {
    pub fn new(settings: Settings, store: Arc<dyn Store>) -> Self {
        AppState {
            settings: Arc::new(settings),
            registry: ConnectionRegistry::new(),
            correlator: Correlator::new(),
            store,
            terminal: TerminalManager::new(),
            mock: MockRegistry::new(),
        }
    }
}
