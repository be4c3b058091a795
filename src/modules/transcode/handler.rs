use std::sync::Arc;

use async_trait::async_trait;
use tracing::{error, info, warn};

use super::dto::TranscodeStartPayload;
use super::model::Job;
use crate::infrastructure::queue::JobQueue;
use crate::routes::{Disposition, TopicHandler};

/// Turns a `transcode-start` message into exactly one enqueued job.
pub struct TranscodeStartHandler {
    queue: Arc<dyn JobQueue>,
}

impl TranscodeStartHandler {
    pub fn new(queue: Arc<dyn JobQueue>) -> Self {
        Self { queue }
    }
}

#[async_trait]
impl TopicHandler for TranscodeStartHandler {
    async fn handle(&self, payload: &[u8]) -> Disposition {
        let request = match TranscodeStartPayload::parse(payload) {
            Ok(request) => request,
            Err(e) => {
                warn!(
                    "Dropping malformed transcode-start message: {} ({})",
                    e,
                    String::from_utf8_lossy(payload)
                );
                return Disposition::Ack;
            }
        };

        let job = Job::from(request);
        info!(
            content_id = %job.content_id,
            format = %job.format,
            "Transcode start: {} -> {}",
            job.input_path,
            job.output_path
        );

        let content_id = job.content_id.clone();
        match self.queue.enqueue(job).await {
            Ok(()) => Disposition::Ack,
            Err(e) => {
                error!(content_id = %content_id, "Failed to enqueue job: {}", e);
                Disposition::Requeue
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::queue::{InMemoryJobQueue, RetryPolicy};
    use crate::modules::transcode::model::MediaFormat;
    use crate::testing::FailingQueue;

    fn setup() -> (Arc<InMemoryJobQueue>, TranscodeStartHandler) {
        let queue = Arc::new(InMemoryJobQueue::new(RetryPolicy::default()));
        let handler = TranscodeStartHandler::new(queue.clone());
        (queue, handler)
    }

    #[tokio::test]
    async fn valid_message_enqueues_one_job() {
        let (queue, handler) = setup();
        let raw = br#"{"contentId":"c1","inputPath":"in.mp4","outputPath":"out/","format":"VIDEO"}"#;

        assert_eq!(handler.handle(raw).await, Disposition::Ack);
        assert_eq!(queue.depth().await.unwrap().pending, 1);

        let job = queue.dequeue().await.unwrap().unwrap();
        assert_eq!(job.content_id, "c1");
        assert_eq!(job.format, MediaFormat::Video);
        assert_eq!(job.attempt, 1);
    }

    #[tokio::test]
    async fn malformed_message_is_dropped_not_requeued() {
        let (queue, handler) = setup();

        assert_eq!(handler.handle(b"{oops").await, Disposition::Ack);
        assert_eq!(
            handler.handle(br#"{"contentId":"c1","format":"video"}"#).await,
            Disposition::Ack
        );
        assert_eq!(queue.depth().await.unwrap().pending, 0);
    }

    #[tokio::test]
    async fn enqueue_failure_asks_for_redelivery() {
        let handler = TranscodeStartHandler::new(Arc::new(FailingQueue::refusing_enqueue()));

        let raw = br#"{"contentId":"c1","inputPath":"in.mp4","outputPath":"out/","format":"audio"}"#;
        assert_eq!(handler.handle(raw).await, Disposition::Requeue);
    }
}
