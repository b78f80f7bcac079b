//! Application state shared across handlers.

use lanvan_core::config::AppConfig;
use lanvan_upload::UploadCoordinator;
use std::sync::Arc;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Arc<AppConfig>,
    /// Upload pipeline.
    pub coordinator: UploadCoordinator,
}

impl AppState {
    pub fn new(config: AppConfig, coordinator: UploadCoordinator) -> Self {
        Self {
            config: Arc::new(config),
            coordinator,
        }
    }
}
