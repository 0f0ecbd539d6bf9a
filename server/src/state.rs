// server/src/state.rs

use std::sync::Arc;

use crate::config::Config;
use crate::error::ServerError;
use crate::registry::TaskRegistry;
use crate::worker::DetectionService;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub registry: TaskRegistry,
    // None si el modelo no se pudo cargar al arrancar
    pub detection: Option<DetectionService>,
}

impl AppState {
    pub fn new(config: Config, registry: TaskRegistry, detection: Option<DetectionService>) -> Self {
        Self {
            config: Arc::new(config),
            registry,
            detection,
        }
    }

    pub fn detection(&self) -> Result<&DetectionService, ServerError> {
        self.detection.as_ref().ok_or(ServerError::ModelUnavailable)
    }
}
