use std::env;
use std::str::FromStr;

use crate::common::error::ConfigError;

#[derive(Debug, Clone, Copy)]
pub enum EnvKey {
    AmqpUrl,
    BusExchange,
    ClientId,
    QueueBackend,
    RedisUrl,
    QueueName,
    WorkerConcurrency,
    RateLimitMax,
    RateLimitWindowMs,
    RetryMaxAttempts,
    RetryBaseDelayMs,
    RetryMaxDelayMs,
    QueuePollIntervalMs,
    StatusBuffer,
    MediaRoot,
    FfmpegPath,
    FfprobePath,
    ServerPort,
    LogFormat,
}

impl EnvKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnvKey::AmqpUrl => "AMQP_URL",
            EnvKey::BusExchange => "BUS_EXCHANGE",
            EnvKey::ClientId => "CLIENT_ID",
            EnvKey::QueueBackend => "QUEUE_BACKEND",
            EnvKey::RedisUrl => "REDIS_URL",
            EnvKey::QueueName => "QUEUE_NAME",
            EnvKey::WorkerConcurrency => "WORKER_CONCURRENCY",
            EnvKey::RateLimitMax => "RATE_LIMIT_MAX",
            EnvKey::RateLimitWindowMs => "RATE_LIMIT_WINDOW_MS",
            EnvKey::RetryMaxAttempts => "RETRY_MAX_ATTEMPTS",
            EnvKey::RetryBaseDelayMs => "RETRY_BASE_DELAY_MS",
            EnvKey::RetryMaxDelayMs => "RETRY_MAX_DELAY_MS",
            EnvKey::QueuePollIntervalMs => "QUEUE_POLL_INTERVAL_MS",
            EnvKey::StatusBuffer => "STATUS_BUFFER",
            EnvKey::MediaRoot => "MEDIA_ROOT",
            EnvKey::FfmpegPath => "FFMPEG_PATH",
            EnvKey::FfprobePath => "FFPROBE_PATH",
            EnvKey::ServerPort => "APP_PORT",
            EnvKey::LogFormat => "LOG_FORMAT",
        }
    }
}

pub fn get(key: EnvKey) -> Result<String, ConfigError> {
    env::var(key.as_str()).map_err(|_| ConfigError::Missing(key.as_str()))
}

pub fn get_or(key: EnvKey, default: &str) -> String {
    env::var(key.as_str()).unwrap_or_else(|_| default.to_string())
}

/// Reads and parses `key`, falling back to `default` when it is unset.
///
/// A value that is present but unparsable is an error, not a fallback.
pub fn get_parsed<T: FromStr>(key: EnvKey, default: T) -> Result<T, ConfigError> {
    match env::var(key.as_str()) {
        Ok(val) => val.trim().parse::<T>().map_err(|_| ConfigError::Invalid {
            key: key.as_str(),
            value: val,
        }),
        Err(_) => Ok(default),
    }
}
