//! Test doubles shared across module tests.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::common::error::{QueueError, QueueResult, TranscodeError};
use crate::infrastructure::bus::InMemoryBus;
use crate::infrastructure::media::{MediaTranscoder, ProgressFn};
use crate::infrastructure::queue::{JobQueue, QueueDepth, RetryDecision, RetryPolicy};
use crate::modules::transcode::events::Topic;
use crate::modules::transcode::model::{Job, MediaFormat, StatusEvent};

/// Transcoder whose outcome per input path is scripted up front.
#[derive(Default)]
pub struct ScriptedTranscoder {
    failures_before_success: u32,
    always_fail: bool,
    panic_on: Option<String>,
    delay: Duration,
    calls: Mutex<HashMap<String, u32>>,
    starts: Mutex<Vec<Instant>>,
    running: AtomicUsize,
    max_running: AtomicUsize,
}

impl ScriptedTranscoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Each input path fails `n` times before succeeding.
    pub fn fail_first(mut self, n: u32) -> Self {
        self.failures_before_success = n;
        self
    }

    pub fn always_fail(mut self) -> Self {
        self.always_fail = true;
        self
    }

    pub fn panic_on(mut self, input_path: &str) -> Self {
        self.panic_on = Some(input_path.to_string());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self, input_path: &str) -> u32 {
        self.calls
            .lock()
            .unwrap()
            .get(input_path)
            .copied()
            .unwrap_or(0)
    }

    /// When each call began, in call order.
    pub fn starts(&self) -> Vec<Instant> {
        self.starts.lock().unwrap().clone()
    }

    pub fn max_running(&self) -> usize {
        self.max_running.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MediaTranscoder for ScriptedTranscoder {
    async fn transcode(
        &self,
        input_path: &str,
        _output_path: &str,
        _format: MediaFormat,
        progress: ProgressFn,
    ) -> Result<(), TranscodeError> {
        self.starts.lock().unwrap().push(Instant::now());
        let call = {
            let mut calls = self.calls.lock().unwrap();
            let count = calls.entry(input_path.to_string()).or_insert(0);
            *count += 1;
            *count
        };

        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(now, Ordering::SeqCst);
        progress(0.0);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.running.fetch_sub(1, Ordering::SeqCst);

        if self.panic_on.as_deref() == Some(input_path) {
            panic!("scripted panic for {input_path}");
        }
        if self.always_fail || call <= self.failures_before_success {
            return Err(TranscodeError::ToolFailed {
                tool: "ffmpeg".into(),
                status: "exit status: 1".into(),
                stderr: format!("scripted failure #{call}"),
            });
        }

        progress(100.0);
        Ok(())
    }
}

/// Queue whose store is unreachable for connects or for enqueues.
pub struct FailingQueue {
    fail_connect: bool,
    policy: RetryPolicy,
}

impl FailingQueue {
    pub fn refusing_connect() -> Self {
        Self {
            fail_connect: true,
            policy: RetryPolicy::default(),
        }
    }

    pub fn refusing_enqueue() -> Self {
        Self {
            fail_connect: false,
            policy: RetryPolicy::default(),
        }
    }
}

#[async_trait]
impl JobQueue for FailingQueue {
    async fn connect(&self) -> QueueResult<()> {
        if self.fail_connect {
            return Err(QueueError::ConnectionFailed("store unreachable".into()));
        }
        Ok(())
    }

    async fn enqueue(&self, _job: Job) -> QueueResult<()> {
        Err(QueueError::ConnectionFailed("store unreachable".into()))
    }

    async fn dequeue(&self) -> QueueResult<Option<Job>> {
        Ok(None)
    }

    async fn ack(&self, _job: &Job) -> QueueResult<()> {
        Ok(())
    }

    async fn retry_or_fail(&self, job: Job, _error: &str) -> QueueResult<RetryDecision> {
        Ok(self.policy.decide(job.attempt))
    }

    async fn depth(&self) -> QueueResult<QueueDepth> {
        Ok(QueueDepth::default())
    }

    fn retry_policy(&self) -> &RetryPolicy {
        &self.policy
    }

    fn close(&self) {}
}

/// Polls `check` until it holds or `timeout` elapses.
pub async fn wait_until(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Status events published for `content_id`, in publication order.
pub fn status_events(bus: &InMemoryBus, content_id: &str) -> Vec<StatusEvent> {
    bus.published()
        .into_iter()
        .filter(|m| m.topic == Topic::TranscodeUpdate && m.key == content_id)
        .map(|m| serde_json::from_slice(&m.payload).unwrap())
        .collect()
}
