use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use time::OffsetDateTime;
use uuid::Uuid;

use super::dto::TranscodeStartPayload;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaFormat {
    Audio,
    Video,
}

impl MediaFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaFormat::Audio => "audio",
            MediaFormat::Video => "video",
        }
    }
}

impl fmt::Display for MediaFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for MediaFormat {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        match raw.to_ascii_lowercase().as_str() {
            "audio" => Ok(MediaFormat::Audio),
            "video" => Ok(MediaFormat::Video),
            _ => Err(serde::de::Error::unknown_variant(&raw, &["audio", "video"])),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TranscodeStatus {
    Processing,
    Success,
    Failed,
}

/// One transcode request moving through the queue.
///
/// `id` identifies the enqueued instance for queue bookkeeping; `content_id`
/// identifies the logical request and is never changed after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: Uuid,
    pub content_id: String,
    pub input_path: String,
    pub output_path: String,
    pub format: MediaFormat,
    #[serde(default)]
    pub extra: Map<String, Value>,
    pub attempt: u32,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl Job {
    pub fn new(
        content_id: impl Into<String>,
        input_path: impl Into<String>,
        output_path: impl Into<String>,
        format: MediaFormat,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            content_id: content_id.into(),
            input_path: input_path.into(),
            output_path: output_path.into(),
            format,
            extra: Map::new(),
            attempt: 1,
            created_at: OffsetDateTime::now_utc(),
        }
    }

    /// The same logical job, rescheduled as its next attempt.
    pub fn next_attempt(mut self) -> Self {
        self.attempt += 1;
        self
    }
}

impl From<TranscodeStartPayload> for Job {
    fn from(payload: TranscodeStartPayload) -> Self {
        let mut job = Job::new(
            payload.content_id,
            payload.input_path,
            payload.output_path,
            payload.format,
        );
        job.extra = payload.extra;
        job
    }
}

/// Outward-facing fact about one attempt of a job, published on
/// `transcode-update`.
///
/// Echoes every job field except the queue-internal `id` (passthrough fields
/// included) and adds the attempt bookkeeping. `retryable` is only ever true on a `failed` event
/// that will be followed by another attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusEvent {
    pub content_id: String,
    pub input_path: String,
    pub output_path: String,
    pub format: MediaFormat,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
    pub status: TranscodeStatus,
    pub attempt: u32,
    pub max_attempts: u32,
    pub retryable: bool,
}

impl StatusEvent {
    pub fn new(job: &Job, status: TranscodeStatus, max_attempts: u32) -> Self {
        Self {
            content_id: job.content_id.clone(),
            input_path: job.input_path.clone(),
            output_path: job.output_path.clone(),
            format: job.format,
            created_at: job.created_at,
            extra: job.extra.clone(),
            status,
            attempt: job.attempt,
            max_attempts,
            retryable: status == TranscodeStatus::Failed && job.attempt < max_attempts,
        }
    }

    pub fn processing(job: &Job, max_attempts: u32) -> Self {
        Self::new(job, TranscodeStatus::Processing, max_attempts)
    }

    pub fn success(job: &Job, max_attempts: u32) -> Self {
        Self::new(job, TranscodeStatus::Success, max_attempts)
    }

    pub fn failed(job: &Job, max_attempts: u32) -> Self {
        Self::new(job, TranscodeStatus::Failed, max_attempts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn job_survives_storage_round_trip() {
        let mut job = Job::new("c1", "in.mp4", "out/", MediaFormat::Video);
        job.extra.insert("title".into(), json!("Intro"));
        let stored = serde_json::to_string(&job).unwrap();
        let restored: Job = serde_json::from_str(&stored).unwrap();
        assert_eq!(restored, job);
    }

    #[test]
    fn next_attempt_keeps_identity() {
        let job = Job::new("c1", "in.mp4", "out/", MediaFormat::Audio);
        let retried = job.clone().next_attempt();
        assert_eq!(retried.attempt, 2);
        assert_eq!(retried.id, job.id);
        assert_eq!(retried.content_id, job.content_id);
    }

    #[test]
    fn status_event_echoes_request_fields() {
        let mut job = Job::new("c1", "in.mp4", "out/", MediaFormat::Video);
        job.extra.insert("title".into(), json!("Intro"));
        job.created_at = OffsetDateTime::UNIX_EPOCH;

        let value = serde_json::to_value(StatusEvent::processing(&job, 3)).unwrap();
        assert_eq!(
            value,
            json!({
                "contentId": "c1",
                "inputPath": "in.mp4",
                "outputPath": "out/",
                "format": "video",
                "createdAt": "1970-01-01T00:00:00Z",
                "title": "Intro",
                "status": "processing",
                "attempt": 1,
                "maxAttempts": 3,
                "retryable": false,
            })
        );
    }

    #[test]
    fn status_event_keeps_creation_time_across_attempts() {
        let job = Job::new("c1", "in.mp4", "out/", MediaFormat::Audio);
        let first = StatusEvent::processing(&job, 3);
        let retried = StatusEvent::processing(&job.clone().next_attempt(), 3);

        assert_eq!(first.created_at, job.created_at);
        assert_eq!(retried.created_at, job.created_at);
        let restored: StatusEvent =
            serde_json::from_value(serde_json::to_value(&retried).unwrap()).unwrap();
        assert_eq!(restored.created_at, job.created_at);
        assert!(!restored.extra.contains_key("createdAt"));
    }

    #[test]
    fn failed_event_is_retryable_until_budget_is_spent() {
        let job = Job::new("c1", "in.mp4", "out/", MediaFormat::Video);
        assert!(StatusEvent::failed(&job, 2).retryable);

        let last = job.next_attempt();
        assert!(!StatusEvent::failed(&last, 2).retryable);
        assert!(!StatusEvent::success(&last, 2).retryable);
    }
}
