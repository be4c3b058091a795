//! Volatile queue for local runs and tests. Same contract as the redis
//! store minus durability across restarts.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{JobQueue, QueueDepth, RetryDecision, RetryPolicy};
use crate::common::error::{QueueError, QueueResult};
use crate::modules::transcode::model::Job;

#[derive(Debug, Clone)]
pub struct DeadLetter {
    pub job: Job,
    pub error: String,
}

pub struct InMemoryJobQueue {
    policy: RetryPolicy,
    tx: async_channel::Sender<Job>,
    rx: async_channel::Receiver<Job>,
    active: Mutex<HashSet<Uuid>>,
    delayed: Arc<AtomicU64>,
    dead: Mutex<Vec<DeadLetter>>,
    closed: CancellationToken,
}

impl InMemoryJobQueue {
    pub fn new(policy: RetryPolicy) -> Self {
        let (tx, rx) = async_channel::unbounded();
        Self {
            policy,
            tx,
            rx,
            active: Mutex::new(HashSet::new()),
            delayed: Arc::new(AtomicU64::new(0)),
            dead: Mutex::new(Vec::new()),
            closed: CancellationToken::new(),
        }
    }

    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.dead.lock().map(|d| d.clone()).unwrap_or_default()
    }

    fn release(&self, id: &Uuid) -> bool {
        self.active
            .lock()
            .map(|mut active| active.remove(id))
            .unwrap_or(false)
    }
}

#[async_trait]
impl JobQueue for InMemoryJobQueue {
    async fn connect(&self) -> QueueResult<()> {
        info!("Using in-memory job queue; pending jobs do not survive restarts");
        Ok(())
    }

    async fn enqueue(&self, job: Job) -> QueueResult<()> {
        debug!(job_id = %job.id, content_id = %job.content_id, "Enqueued job");
        self.tx.send(job).await.map_err(|_| QueueError::Closed)
    }

    async fn dequeue(&self) -> QueueResult<Option<Job>> {
        tokio::select! {
            biased;
            _ = self.closed.cancelled() => Ok(None),
            received = self.rx.recv() => match received {
                Ok(job) => {
                    if let Ok(mut active) = self.active.lock() {
                        active.insert(job.id);
                    }
                    Ok(Some(job))
                }
                Err(_) => Ok(None),
            },
        }
    }

    async fn ack(&self, job: &Job) -> QueueResult<()> {
        if !self.release(&job.id) {
            warn!(job_id = %job.id, "Ack for a job that is not active");
        }
        Ok(())
    }

    async fn retry_or_fail(&self, job: Job, error: &str) -> QueueResult<RetryDecision> {
        self.release(&job.id);
        let decision = self.policy.decide(job.attempt);

        match decision {
            RetryDecision::Retry { delay, .. } => {
                let next = job.next_attempt();
                let tx = self.tx.clone();
                let delayed = Arc::clone(&self.delayed);
                delayed.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    delayed.fetch_sub(1, Ordering::SeqCst);
                    if tx.send(next).await.is_err() {
                        warn!("Queue dropped before a delayed retry became due");
                    }
                });
            }
            RetryDecision::Exhausted { .. } => {
                if let Ok(mut dead) = self.dead.lock() {
                    dead.push(DeadLetter {
                        job,
                        error: error.to_string(),
                    });
                }
            }
        }

        Ok(decision)
    }

    async fn depth(&self) -> QueueResult<QueueDepth> {
        let active = self.active.lock().map(|a| a.len()).unwrap_or(0) as u64;
        let failed = self.dead.lock().map(|d| d.len()).unwrap_or(0) as u64;
        Ok(QueueDepth {
            pending: self.rx.len() as u64,
            active,
            delayed: self.delayed.load(Ordering::SeqCst),
            failed,
        })
    }

    fn retry_policy(&self) -> &RetryPolicy {
        &self.policy
    }

    fn close(&self) {
        self.closed.cancel();
    }
}
