//! Status event publication.
//!
//! Publishing is best effort and never blocks a worker slot: events go into
//! a bounded buffer drained by one background task, which publishes them to
//! `transcode-update` in buffer order keyed by `contentId`. A single drain
//! task keeps every content id's events in emission order.
//!
//! Events are lost when the buffer is full, when the bus rejects a publish
//! even after one reconnect, or when the process dies before the buffer is
//! flushed. The job itself is unaffected in all three cases.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::events::Topic;
use super::model::StatusEvent;
use crate::infrastructure::bus::MessageBus;

#[derive(Clone)]
pub struct StatusPublisher {
    tx: mpsc::Sender<StatusEvent>,
}

impl StatusPublisher {
    /// Starts the drain task. It ends once every `StatusPublisher` clone is
    /// dropped and the buffer is empty.
    pub fn spawn(bus: Arc<dyn MessageBus>, capacity: usize) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let handle = tokio::spawn(drain(bus, rx));
        (Self { tx }, handle)
    }

    pub fn publish(&self, event: StatusEvent) {
        if let Err(e) = self.tx.try_send(event) {
            let event = match e {
                mpsc::error::TrySendError::Full(event) => event,
                mpsc::error::TrySendError::Closed(event) => event,
            };
            warn!(
                content_id = %event.content_id,
                status = ?event.status,
                "Status buffer unavailable, dropping event"
            );
        }
    }
}

async fn drain(bus: Arc<dyn MessageBus>, mut rx: mpsc::Receiver<StatusEvent>) {
    while let Some(event) = rx.recv().await {
        let payload = match serde_json::to_vec(&event) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(content_id = %event.content_id, "Failed to serialize status event: {}", e);
                continue;
            }
        };

        match bus
            .publish(Topic::TranscodeUpdate, &event.content_id, &payload)
            .await
        {
            Ok(()) => debug!(
                content_id = %event.content_id,
                status = ?event.status,
                attempt = event.attempt,
                "Published status"
            ),
            Err(e) => warn!(
                content_id = %event.content_id,
                status = ?event.status,
                "Failed to publish status event: {}", e
            ),
        }
    }
    debug!("Status publisher drained");
}
