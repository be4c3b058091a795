//! Durable job queue on Redis.
//!
//! Layout under the queue name prefix:
//! - `{name}:pending` list of job ids waiting for a worker
//! - `{name}:active` list of job ids handed to a worker
//! - `{name}:delayed` sorted set of job ids scored by due time (ms)
//! - `{name}:failed` capped list of dead-lettered job ids
//! - `{name}:job:{id}` JSON document of the job's current attempt
//!
//! Every transition moves an id between collections in one MULTI/EXEC or Lua
//! call, so a job id lives in exactly one collection at a time.

use std::time::Duration;

use async_trait::async_trait;
use redis::Script;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{JobQueue, QueueDepth, RetryDecision, RetryPolicy};
use crate::common::error::{QueueError, QueueResult};
use crate::infrastructure::redis::RedisService;
use crate::modules::transcode::model::Job;

const PROMOTE_BATCH: usize = 100;
const FAILED_HISTORY: isize = 1000;
const FAILED_TTL_SECS: u64 = 7 * 24 * 60 * 60;

const PROMOTE_DUE: &str = r#"
local ids = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1], 'LIMIT', 0, ARGV[2])
for _, id in ipairs(ids) do
  redis.call('ZREM', KEYS[1], id)
  redis.call('RPUSH', KEYS[2], id)
end
return #ids
"#;

const RECOVER_ACTIVE: &str = r#"
local moved = 0
while redis.call('LMOVE', KEYS[1], KEYS[2], 'RIGHT', 'LEFT') do
  moved = moved + 1
end
return moved
"#;

#[derive(Debug, Clone)]
pub(crate) struct QueueKeys {
    prefix: String,
    pub pending: String,
    pub active: String,
    pub delayed: String,
    pub failed: String,
}

impl QueueKeys {
    pub fn new(queue_name: &str) -> Self {
        Self {
            prefix: queue_name.to_string(),
            pending: format!("{queue_name}:pending"),
            active: format!("{queue_name}:active"),
            delayed: format!("{queue_name}:delayed"),
            failed: format!("{queue_name}:failed"),
        }
    }

    pub fn job(&self, id: &str) -> String {
        format!("{}:job:{}", self.prefix, id)
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FailedRecord {
    job: Job,
    error: String,
    #[serde(with = "time::serde::rfc3339")]
    failed_at: OffsetDateTime,
}

pub struct RedisJobQueue {
    redis: RedisService,
    keys: QueueKeys,
    policy: RetryPolicy,
    poll_interval: Duration,
    promote: Script,
    recover: Script,
    closed: CancellationToken,
}

impl RedisJobQueue {
    pub fn new(
        redis: RedisService,
        queue_name: &str,
        policy: RetryPolicy,
        poll_interval: Duration,
    ) -> Self {
        Self {
            redis,
            keys: QueueKeys::new(queue_name),
            policy,
            poll_interval,
            promote: Script::new(PROMOTE_DUE),
            recover: Script::new(RECOVER_ACTIVE),
            closed: CancellationToken::new(),
        }
    }

    async fn release(&self, id: &str) -> QueueResult<()> {
        let mut conn = self.redis.get_conn().await?;
        let _: () = redis::pipe()
            .atomic()
            .cmd("LREM")
            .arg(&self.keys.active)
            .arg(1)
            .arg(id)
            .ignore()
            .cmd("DEL")
            .arg(self.keys.job(id))
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn next_ready(&self) -> QueueResult<Option<Job>> {
        let mut conn = self.redis.get_conn().await?;

        let promoted: usize = self
            .promote
            .key(&self.keys.delayed)
            .key(&self.keys.pending)
            .arg(now_millis())
            .arg(PROMOTE_BATCH)
            .invoke_async(&mut conn)
            .await?;
        if promoted > 0 {
            debug!(promoted, "Promoted due retries to pending");
        }

        let id: Option<String> = redis::cmd("LMOVE")
            .arg(&self.keys.pending)
            .arg(&self.keys.active)
            .arg("LEFT")
            .arg("RIGHT")
            .query_async(&mut conn)
            .await?;
        let Some(id) = id else {
            return Ok(None);
        };

        let raw: Option<String> = redis::cmd("GET")
            .arg(self.keys.job(&id))
            .query_async(&mut conn)
            .await?;
        let Some(raw) = raw else {
            warn!(job_id = %id, "Dropping job id without a stored document");
            self.release(&id).await?;
            return Ok(None);
        };

        match serde_json::from_str::<Job>(&raw) {
            Ok(job) => Ok(Some(job)),
            Err(e) => {
                warn!(job_id = %id, "Dropping unreadable job document: {}", e);
                self.release(&id).await?;
                Ok(None)
            }
        }
    }
}

#[async_trait]
impl JobQueue for RedisJobQueue {
    async fn connect(&self) -> QueueResult<()> {
        self.redis
            .connect()
            .await
            .map_err(|e| QueueError::ConnectionFailed(e.to_string()))?;

        let mut conn = self.redis.get_conn().await?;
        let recovered: usize = self
            .recover
            .key(&self.keys.active)
            .key(&self.keys.pending)
            .invoke_async(&mut conn)
            .await?;
        if recovered > 0 {
            info!(recovered, "Requeued jobs abandoned by a previous run");
        }
        Ok(())
    }

    async fn enqueue(&self, job: Job) -> QueueResult<()> {
        let id = job.id.to_string();
        let payload = serde_json::to_string(&job)?;
        let mut conn = self.redis.get_conn().await?;

        let _: () = redis::pipe()
            .atomic()
            .cmd("SET")
            .arg(self.keys.job(&id))
            .arg(&payload)
            .ignore()
            .cmd("RPUSH")
            .arg(&self.keys.pending)
            .arg(&id)
            .ignore()
            .query_async(&mut conn)
            .await?;

        info!(job_id = %id, content_id = %job.content_id, "Enqueued job");
        Ok(())
    }

    async fn dequeue(&self) -> QueueResult<Option<Job>> {
        loop {
            if self.closed.is_cancelled() {
                return Ok(None);
            }

            if let Some(job) = self.next_ready().await? {
                return Ok(Some(job));
            }

            tokio::select! {
                _ = self.closed.cancelled() => return Ok(None),
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
    }

    async fn ack(&self, job: &Job) -> QueueResult<()> {
        self.release(&job.id.to_string()).await?;
        debug!(job_id = %job.id, "Acknowledged job");
        Ok(())
    }

    async fn retry_or_fail(&self, job: Job, error: &str) -> QueueResult<RetryDecision> {
        let id = job.id.to_string();
        let decision = self.policy.decide(job.attempt);
        let mut conn = self.redis.get_conn().await?;

        match decision {
            RetryDecision::Retry { delay, .. } => {
                let next = job.next_attempt();
                let due = now_millis() + delay.as_millis() as u64;
                let _: () = redis::pipe()
                    .atomic()
                    .cmd("LREM")
                    .arg(&self.keys.active)
                    .arg(1)
                    .arg(&id)
                    .ignore()
                    .cmd("SET")
                    .arg(self.keys.job(&id))
                    .arg(serde_json::to_string(&next)?)
                    .ignore()
                    .cmd("ZADD")
                    .arg(&self.keys.delayed)
                    .arg(due)
                    .arg(&id)
                    .ignore()
                    .query_async(&mut conn)
                    .await?;
            }
            RetryDecision::Exhausted { attempts } => {
                let record = FailedRecord {
                    job,
                    error: error.to_string(),
                    failed_at: OffsetDateTime::now_utc(),
                };
                let _: () = redis::pipe()
                    .atomic()
                    .cmd("LREM")
                    .arg(&self.keys.active)
                    .arg(1)
                    .arg(&id)
                    .ignore()
                    .cmd("SET")
                    .arg(self.keys.job(&id))
                    .arg(serde_json::to_string(&record)?)
                    .arg("EX")
                    .arg(FAILED_TTL_SECS)
                    .ignore()
                    .cmd("RPUSH")
                    .arg(&self.keys.failed)
                    .arg(&id)
                    .ignore()
                    .cmd("LTRIM")
                    .arg(&self.keys.failed)
                    .arg(-FAILED_HISTORY)
                    .arg(-1)
                    .ignore()
                    .query_async(&mut conn)
                    .await?;
                warn!(job_id = %id, attempts, "Job exhausted its retry budget: {}", error);
            }
        }

        Ok(decision)
    }

    async fn depth(&self) -> QueueResult<QueueDepth> {
        let mut conn = self.redis.get_conn().await?;
        let (pending, active, delayed, failed): (u64, u64, u64, u64) = redis::pipe()
            .cmd("LLEN")
            .arg(&self.keys.pending)
            .cmd("LLEN")
            .arg(&self.keys.active)
            .cmd("ZCARD")
            .arg(&self.keys.delayed)
            .cmd("LLEN")
            .arg(&self.keys.failed)
            .query_async(&mut conn)
            .await?;

        Ok(QueueDepth {
            pending,
            active,
            delayed,
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

fn now_millis() -> u64 {
    (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as u64
}
