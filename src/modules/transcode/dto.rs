use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};
use validator::Validate;

use super::model::MediaFormat;
use crate::common::error::IngestError;

/// Keys owned by status events; stripped from passthrough fields on ingest.
pub const RESERVED_KEYS: [&str; 5] = [
    "createdAt",
    "status",
    "attempt",
    "maxAttempts",
    "retryable",
];

/// Payload of a `transcode-start` message.
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct TranscodeStartPayload {
    #[serde(deserialize_with = "string_or_number")]
    #[validate(length(min = 1))]
    pub content_id: String,
    #[validate(length(min = 1))]
    pub input_path: String,
    #[validate(length(min = 1))]
    pub output_path: String,
    pub format: MediaFormat,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl TranscodeStartPayload {
    pub fn parse(raw: &[u8]) -> Result<Self, IngestError> {
        if raw.iter().all(u8::is_ascii_whitespace) {
            return Err(IngestError::EmptyPayload);
        }

        let mut payload: Self = serde_json::from_slice(raw)?;
        payload.validate()?;
        for key in RESERVED_KEYS {
            payload.extra.remove(key);
        }
        Ok(payload)
    }
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Id {
        Text(String),
        Number(serde_json::Number),
    }

    Ok(match Id::deserialize(deserializer)? {
        Id::Text(text) => text,
        Id::Number(number) => number.to_string(),
    })
}
