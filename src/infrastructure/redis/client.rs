use redis::{Client, aio::MultiplexedConnection};
use tokio::sync::OnceCell;
use tracing::info;

use crate::infrastructure::redact_url;

/// Shared handle to the queue store.
///
/// Opening the client performs no I/O; `connect` establishes the multiplexed
/// connection that every non-blocking command is pipelined over.
pub struct RedisService {
    client: Client,
    conn: OnceCell<MultiplexedConnection>,
    display_url: String,
}

impl RedisService {
    pub fn new(connection_string: &str) -> Result<Self, redis::RedisError> {
        let client = Client::open(connection_string)?;
        Ok(Self {
            client,
            conn: OnceCell::new(),
            display_url: redact_url(connection_string),
        })
    }

    pub async fn connect(&self) -> Result<(), redis::RedisError> {
        info!("Connecting to Redis at {}", self.display_url);
        let mut conn = self.get_conn().await?;

        // Test connection
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;

        info!("✅ Connected to Redis");
        Ok(())
    }

    pub async fn get_conn(&self) -> Result<MultiplexedConnection, redis::RedisError> {
        self.conn
            .get_or_try_init(|| self.client.get_multiplexed_async_connection())
            .await
            .cloned()
    }
}
