use std::sync::Arc;

use crate::broadcast::ChannelBroadcaster;
use crate::engine::Engine;
use crate::scheduler::Scheduler;
use crate::storage::ResultStore;

/// Shared state injected into every API handler. The engine is the single
/// owner of lifecycle state; handlers only call into it.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
    pub store: Arc<dyn ResultStore>,
    pub scheduler: Scheduler,
    pub broadcaster: Arc<ChannelBroadcaster>,
}
