//! Application state.

use kiln_config::Settings;
use kiln_scheduler::Dispatcher;
use std::sync::Arc;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<Dispatcher>,
    pub settings: Arc<Settings>,
}

impl AppState {
    pub fn new(dispatcher: Arc<Dispatcher>, settings: Settings) -> Self {
        Self {
            dispatcher,
            settings: Arc::new(settings),
        }
    }
}
