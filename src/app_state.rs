use std::sync::Arc;

use crate::services::dispatcher::DispatcherHandle;
use crate::services::jobs::JobService;
use crate::services::store::JobStore;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub jobs: JobService,
}

impl AppState {
    pub fn new(store: Arc<dyn JobStore>, dispatcher: DispatcherHandle) -> Self {
        Self {
            jobs: JobService::new(store, dispatcher),
        }
    }
}
