use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),

    #[error("invalid value for {key}: {value}")]
    Invalid { key: &'static str, value: String },
}

pub type BusResult<T> = Result<T, BusError>;

#[derive(Debug, Error)]
pub enum BusError {
    #[error("bus connection failed: {0}")]
    Connection(String),

    #[error("{0} is not connected")]
    NotConnected(&'static str),

    #[error("subscribe failed: {0}")]
    Subscribe(String),

    #[error("publish failed: {0}")]
    Publish(String),

    #[error("acknowledgement failed: {0}")]
    Ack(String),
}

pub type QueueResult<T> = Result<T, QueueError>;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue connection failed: {0}")]
    ConnectionFailed(String),

    #[error("queue is closed")]
    Closed,

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum TranscodeError {
    #[error("input file not found: {0}")]
    InputNotFound(String),

    #[error("{tool} exited with {status}: {stderr}")]
    ToolFailed {
        tool: String,
        status: String,
        stderr: String,
    },

    #[error("transcode task aborted: {0}")]
    Aborted(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Reasons a bus message is rejected before reaching the queue.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("empty payload")]
    EmptyPayload,

    #[error("malformed payload: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("invalid payload: {0}")]
    Invalid(#[from] validator::ValidationErrors),
}

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("failed to connect bus consumer: {0}")]
    ConsumerConnect(#[source] BusError),

    #[error("failed to connect bus producer: {0}")]
    ProducerConnect(#[source] BusError),

    #[error("failed to connect job queue: {0}")]
    QueueConnect(#[source] QueueError),

    #[error("failed to subscribe: {0}")]
    Subscribe(#[source] BusError),

    #[error("failed to bind status server: {0}")]
    StatusServer(#[source] std::io::Error),
}
