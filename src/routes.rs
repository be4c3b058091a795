use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use axum::Router;
use tracing::debug;

use crate::modules::transcode::events::Topic;
use crate::modules::transcode::handler::TranscodeStartHandler;
use crate::state::AppState;

/// What to tell the bus once a message has been handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Ack,
    /// Hand the message back for redelivery.
    Requeue,
}

#[async_trait]
pub trait TopicHandler: Send + Sync {
    async fn handle(&self, payload: &[u8]) -> Disposition;
}

/// Topic to handler dispatch table for inbound bus messages.
#[derive(Default)]
pub struct IngestRouter {
    handlers: HashMap<Topic, Arc<dyn TopicHandler>>,
}

impl IngestRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(mut self, topic: Topic, handler: impl TopicHandler + 'static) -> Self {
        self.handlers.insert(topic, Arc::new(handler));
        self
    }

    pub fn topics(&self) -> Vec<Topic> {
        self.handlers.keys().copied().collect()
    }

    /// Messages on topics without a handler are acknowledged and dropped.
    pub async fn dispatch(&self, topic: &str, payload: &[u8]) -> Disposition {
        match Topic::parse(topic).and_then(|t| self.handlers.get(&t)) {
            Some(handler) => handler.handle(payload).await,
            None => {
                debug!("No handler for topic '{}', doing nothing", topic);
                Disposition::Ack
            }
        }
    }
}

pub fn configure_topics(state: &AppState) -> IngestRouter {
    IngestRouter::new().route(
        Topic::TranscodeStart,
        TranscodeStartHandler::new(Arc::clone(&state.queue)),
    )
}

pub fn configure_http() -> Router<AppState> {
    Router::new().nest("/api/v1", crate::modules::health::router())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting(Arc<AtomicUsize>);

    #[async_trait]
    impl TopicHandler for Counting {
        async fn handle(&self, _payload: &[u8]) -> Disposition {
            self.0.fetch_add(1, Ordering::SeqCst);
            Disposition::Requeue
        }
    }

    #[tokio::test]
    async fn dispatches_known_topics_to_their_handler() {
        let calls = Arc::new(AtomicUsize::new(0));
        let router = IngestRouter::new().route(Topic::TranscodeStart, Counting(calls.clone()));

        assert_eq!(router.dispatch("transcode-start", b"{}").await, Disposition::Requeue);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(router.topics(), vec![Topic::TranscodeStart]);
    }

    #[tokio::test]
    async fn unknown_and_unrouted_topics_are_acked_without_side_effects() {
        let calls = Arc::new(AtomicUsize::new(0));
        let router = IngestRouter::new().route(Topic::TranscodeStart, Counting(calls.clone()));

        assert_eq!(router.dispatch("transcode-cancel", b"{}").await, Disposition::Ack);
        assert_eq!(router.dispatch("transcode-update", b"{}").await, Disposition::Ack);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
