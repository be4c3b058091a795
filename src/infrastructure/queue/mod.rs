//! Durable work queue capability.
//!
//! Delivery is at-least-once: a job instance handed out by `dequeue` that is
//! neither acked nor failed (process crash) is redelivered after restart.

use async_trait::async_trait;
use serde::Serialize;

use crate::common::error::QueueResult;
use crate::modules::transcode::model::Job;

pub mod memory;
pub mod redis_store;
pub mod retry;

pub use memory::InMemoryJobQueue;
pub use redis_store::RedisJobQueue;
pub use retry::{RetryDecision, RetryPolicy};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueDepth {
    pub pending: u64,
    pub active: u64,
    pub delayed: u64,
    pub failed: u64,
}

#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Establishes the store connection and requeues work abandoned by a
    /// previous process.
    async fn connect(&self) -> QueueResult<()>;

    async fn enqueue(&self, job: Job) -> QueueResult<()>;

    /// Suspends until a job is available. Returns `None` once the queue is
    /// closed; jobs still pending stay in the store.
    async fn dequeue(&self) -> QueueResult<Option<Job>>;

    async fn ack(&self, job: &Job) -> QueueResult<()>;

    /// Schedules the next attempt after the policy's backoff, or dead-letters
    /// the job when its budget is spent. Never waits for the backoff.
    async fn retry_or_fail(&self, job: Job, error: &str) -> QueueResult<RetryDecision>;

    async fn depth(&self) -> QueueResult<QueueDepth>;

    fn retry_policy(&self) -> &RetryPolicy;

    /// Stops handing out jobs. Idempotent.
    fn close(&self);
}
