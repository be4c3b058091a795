//! Worker pool.
//!
//! `concurrency` slot tasks each loop over dequeue, rate-limit and execute.
//! A slot never runs more than one job, so at most `concurrency` transcodes
//! are in flight. Job starts across the pool share one limiter that spaces
//! them `rate_window / rate_max` apart, so no window of length `rate_window`
//! holds more than `rate_max` starts.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::common::error::TranscodeError;
use crate::infrastructure::media::{MediaTranscoder, ProgressFn};
use crate::infrastructure::queue::{JobQueue, RetryDecision};
use crate::modules::transcode::model::{Job, StatusEvent};
use crate::modules::transcode::publisher::StatusPublisher;

const DEQUEUE_BACKOFF: Duration = Duration::from_secs(1);

pub struct WorkerPool {
    queue: Arc<dyn JobQueue>,
    transcoder: Arc<dyn MediaTranscoder>,
    publisher: StatusPublisher,
    limiter: DefaultDirectRateLimiter,
    concurrency: usize,
}

impl WorkerPool {
    pub fn new(
        queue: Arc<dyn JobQueue>,
        transcoder: Arc<dyn MediaTranscoder>,
        publisher: StatusPublisher,
        concurrency: usize,
        rate_max: u32,
        rate_window: Duration,
    ) -> Self {
        Self {
            queue,
            transcoder,
            publisher,
            limiter: RateLimiter::direct(start_quota(rate_max, rate_window)),
            concurrency: concurrency.max(1),
        }
    }

    pub fn spawn(self) -> WorkerPoolHandle {
        let concurrency = self.concurrency;
        let pool = Arc::new(self);
        let mut slots = JoinSet::new();
        for slot in 0..concurrency {
            slots.spawn(Arc::clone(&pool).run_slot(slot));
        }
        info!("🎥 Worker pool started with {} slots", concurrency);
        WorkerPoolHandle { slots }
    }

    async fn run_slot(self: Arc<Self>, slot: usize) {
        loop {
            let job = match self.queue.dequeue().await {
                Ok(Some(job)) => job,
                Ok(None) => break,
                Err(e) => {
                    error!(slot, "Failed to dequeue job: {}", e);
                    tokio::time::sleep(DEQUEUE_BACKOFF).await;
                    continue;
                }
            };

            self.limiter.until_ready().await;
            self.execute(slot, job).await;
        }
        debug!(slot, "Worker slot stopped");
    }

    async fn execute(&self, slot: usize, job: Job) {
        let max_attempts = self.queue.retry_policy().max_attempts();
        info!(
            slot,
            job_id = %job.id,
            content_id = %job.content_id,
            attempt = job.attempt,
            "📦 Job started processing"
        );
        self.publisher
            .publish(StatusEvent::processing(&job, max_attempts));

        match self.invoke(&job).await {
            Ok(()) => {
                info!(content_id = %job.content_id, "✅ Transcoding completed");
                self.publisher.publish(StatusEvent::success(&job, max_attempts));
                if let Err(e) = self.queue.ack(&job).await {
                    error!(job_id = %job.id, "Failed to ack job: {}", e);
                }
            }
            Err(e) => {
                error!(
                    content_id = %job.content_id,
                    attempt = job.attempt,
                    "❌ Transcoding failed: {}", e
                );
                self.publisher.publish(StatusEvent::failed(&job, max_attempts));

                let job_id = job.id;
                match self.queue.retry_or_fail(job, &e.to_string()).await {
                    Ok(RetryDecision::Retry {
                        next_attempt,
                        delay,
                    }) => info!(
                        job_id = %job_id,
                        next_attempt,
                        "Retrying in {:?}", delay
                    ),
                    Ok(RetryDecision::Exhausted { attempts }) => {
                        warn!(job_id = %job_id, attempts, "Giving up on job")
                    }
                    Err(qe) => error!(job_id = %job_id, "Failed to record job failure: {}", qe),
                }
            }
        }
    }

    /// Runs the transcode on its own task so a panic surfaces as a failure
    /// of this job only.
    async fn invoke(&self, job: &Job) -> Result<(), TranscodeError> {
        let transcoder = Arc::clone(&self.transcoder);
        let input_path = job.input_path.clone();
        let output_path = job.output_path.clone();
        let format = job.format;

        let content_id = job.content_id.clone();
        let progress: ProgressFn = Arc::new(move |percent| {
            debug!(content_id = %content_id, "Progress {:.1}%", percent);
        });

        tokio::spawn(async move {
            transcoder
                .transcode(&input_path, &output_path, format, progress)
                .await
        })
        .await
        .unwrap_or_else(|e| Err(TranscodeError::Aborted(e.to_string())))
    }
}

/// One start per `rate_window / rate_max` with a burst of one, which keeps
/// any `rate_window` at no more than `rate_max` starts.
fn start_quota(rate_max: u32, rate_window: Duration) -> Quota {
    let period = (rate_window / rate_max.max(1)).max(Duration::from_nanos(1));
    Quota::with_period(period)
        .unwrap_or_else(|| Quota::per_second(NonZeroU32::MIN))
        .allow_burst(NonZeroU32::MIN)
}

pub struct WorkerPoolHandle {
    slots: JoinSet<()>,
}

impl WorkerPoolHandle {
    /// Waits for every slot to stop. Slots stop once the queue is closed and
    /// their current job has finished.
    pub async fn join(&mut self) {
        while let Some(result) = self.slots.join_next().await {
            if let Err(e) = result {
                if e.is_panic() {
                    error!("Worker slot panicked: {}", e);
                }
            }
        }
    }

    pub fn abort(&mut self) {
        self.slots.abort_all();
    }
}
