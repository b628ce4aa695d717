//! Application state shared across request handlers.

use std::sync::Arc;

use axum::extract::FromRef;

use crate::dispatch::{Dispatcher, RenderingServices};
use crate::hub::{HubHandler, HubRegistry};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<Dispatcher>,
    pub hub: HubRegistry,
    pub handler: Arc<dyn HubHandler>,
}

impl AppState {
    /// Wire the dispatcher to a fresh hub registry.
    pub fn new(services: RenderingServices, handler: Arc<dyn HubHandler>) -> Self {
        let hub = HubRegistry::new();
        let dispatcher = Dispatcher::new(services, Arc::new(hub.clone()));

        Self {
            dispatcher: Arc::new(dispatcher),
            hub,
            handler,
        }
    }
}

impl FromRef<AppState> for RenderingServices {
    fn from_ref(state: &AppState) -> Self {
        state.dispatcher.services().clone()
    }
}
