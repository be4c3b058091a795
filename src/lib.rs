pub mod app;
pub mod common;
pub mod config;
pub mod infrastructure;
pub mod modules;
pub mod orchestrator;
pub mod routes;
pub mod shutdown;
pub mod state;
pub mod workers;

#[cfg(test)]
pub(crate) mod testing;

use std::sync::Arc;

use crate::config::{AppConfig, QueueBackend};
use crate::infrastructure::bus::RabbitMqBus;
use crate::infrastructure::media::FfmpegTranscoder;
use crate::infrastructure::queue::{InMemoryJobQueue, JobQueue, RedisJobQueue};
use crate::infrastructure::redis::RedisService;
use crate::state::AppState;

/// Wires the production backends selected by `config`. Performs no I/O.
pub fn build_state(config: AppConfig) -> anyhow::Result<AppState> {
    let bus = Arc::new(RabbitMqBus::new(
        &config.amqp_url,
        &config.bus_exchange,
        &config.client_id,
    ));

    let queue: Arc<dyn JobQueue> = match config.queue_backend {
        QueueBackend::Redis => {
            let url = config
                .redis_url
                .as_deref()
                .ok_or_else(|| anyhow::anyhow!("REDIS_URL is required for the redis queue"))?;
            let redis = RedisService::new(url)?;
            Arc::new(RedisJobQueue::new(
                redis,
                &config.queue_name,
                config.retry_policy(),
                config.queue_poll_interval(),
            ))
        }
        QueueBackend::Memory => Arc::new(InMemoryJobQueue::new(config.retry_policy())),
    };

    let transcoder = Arc::new(FfmpegTranscoder::new(
        config.ffmpeg_path.clone(),
        config.ffprobe_path.clone(),
        config.media_root.clone(),
    ));

    Ok(AppState::new(config, bus, queue, transcoder))
}
