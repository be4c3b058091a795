use std::sync::Arc;

use tokio::sync::watch;

use crate::config::settings::AppConfig;
use crate::infrastructure::bus::MessageBus;
use crate::infrastructure::media::MediaTranscoder;
use crate::infrastructure::queue::JobQueue;
use crate::orchestrator::LifecycleState;

/// Handles shared by the ingest path, the worker pool and the HTTP surface.
#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub bus: Arc<dyn MessageBus>,
    pub queue: Arc<dyn JobQueue>,
    pub transcoder: Arc<dyn MediaTranscoder>,
    pub lifecycle: Arc<watch::Sender<LifecycleState>>,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        bus: Arc<dyn MessageBus>,
        queue: Arc<dyn JobQueue>,
        transcoder: Arc<dyn MediaTranscoder>,
    ) -> Self {
        let (lifecycle, _) = watch::channel(LifecycleState::Stopped);
        Self {
            config,
            bus,
            queue,
            transcoder,
            lifecycle: Arc::new(lifecycle),
        }
    }

    pub fn lifecycle(&self) -> LifecycleState {
        *self.lifecycle.borrow()
    }
}
