//! Message bus the dispatcher republishes outbox rows to.

use async_trait::async_trait;
use anyhow::Result;

#[async_trait]
pub trait MessageBus: Send + Sync {
    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<()>;
}

#[cfg(feature = "redis")]
pub use self::redis_bus::RedisMessageBus;

#[cfg(feature = "redis")]
mod redis_bus {
    use super::MessageBus;
    use anyhow::Result;
    use async_trait::async_trait;
    use redis::aio::ConnectionManager;
    use redis::AsyncCommands;
    use tracing::{debug, info};

    /// Publishes each message as an entry on a Redis stream named after the topic.
    pub struct RedisMessageBus {
        connection: ConnectionManager,
    }

    impl RedisMessageBus {
        pub async fn connect(url: &str) -> Result<Self> {
            let client = redis::Client::open(url)?;
            let connection = client.get_connection_manager().await?;
            info!("Connected to Redis message bus");
            Ok(Self { connection })
        }
    }

    #[async_trait]
    impl MessageBus for RedisMessageBus {
        async fn publish(&self, topic: &str, payload: &[u8]) -> Result<()> {
            let mut connection = self.connection.clone();
            let entry_id: String = connection
                .xadd(topic, "*", &[("payload", payload)])
                .await
                .map_err(|e| anyhow::anyhow!("Redis XADD to {} failed: {}", topic, e))?;
            debug!(topic = %topic, entry_id = %entry_id, "Published to Redis stream");
            Ok(())
        }
    }
}
