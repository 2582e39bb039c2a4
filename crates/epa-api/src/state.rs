//! # Shared Application State
//!
//! Everything handlers need: the workflow service for reads and writes,
//! and the broadcast publisher for SSE subscriptions. The publisher held
//! here is the same instance the service publishes into, so a subscriber
//! sees every committed change.

use std::sync::Arc;

use epa_workflow::{BroadcastPublisher, WorkflowService};

/// Cloneable handler state. All fields are cheap handles.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<WorkflowService>,
    pub updates: BroadcastPublisher,
}

impl AppState {
    pub fn new(service: WorkflowService, updates: BroadcastPublisher) -> Self {
        Self {
            service: Arc::new(service),
            updates,
        }
    }
}
