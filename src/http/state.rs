use crate::config::Config;
use crate::supervisor::SupervisorHandle;
use std::sync::Arc;

/// Shared application state for HTTP handlers
#[derive(Clone)]
pub struct AppState {
    /// Sequencing task that owns every session
    pub supervisor: SupervisorHandle,

    /// Defaults for start requests that leave fields out
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(supervisor: SupervisorHandle, config: Config) -> Self {
        Self {
            supervisor,
            config: Arc::new(config),
        }
    }
}
