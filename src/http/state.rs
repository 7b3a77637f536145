use crate::capture::ControllerHandle;
use crate::launcher::Launcher;
use std::sync::Arc;

/// Shared application state for HTTP handlers
#[derive(Clone)]
pub struct AppState {
    /// The single capture controller
    pub controller: ControllerHandle,

    /// Resolves what to launch (and provisions the engine in binary mode)
    pub launcher: Arc<Launcher>,
}

impl AppState {
    pub fn new(controller: ControllerHandle, launcher: Arc<Launcher>) -> Self {
        Self {
            controller,
            launcher,
        }
    }
}
