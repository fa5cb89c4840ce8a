//! One of the three process-wide singletons (§9): a single Redis
//! client/connection-manager handle shared by every subsystem. Cheap to
//! clone — `ConnectionManager` multiplexes internally — so each
//! subsystem gets its own `RedisHandle` clone instead of passing a raw
//! connection around.

use redis::aio::ConnectionManager;

use crate::cache::CacheWriter;
use crate::error::Result;

#[derive(Clone)]
pub struct RedisHandle {
    client: redis::Client,
    conn: ConnectionManager,
}

impl RedisHandle {
    pub async fn connect(redis_url: &str) -> anyhow::Result<Self> {
        let client = redis::Client::open(redis_url)?;
        let conn = ConnectionManager::new(client.clone()).await?;
        Ok(Self { client, conn })
    }

    pub fn writer(&self) -> CacheWriter {
        CacheWriter::new(self.conn.clone())
    }

    pub fn connection(&self) -> ConnectionManager {
        self.conn.clone()
    }

    /// A dedicated connection for pub/sub — `ConnectionManager` doesn't
    /// support SUBSCRIBE, so listeners get their own socket.
    pub async fn pubsub(&self) -> Result<redis::aio::PubSub> {
        Ok(self.client.get_async_pubsub().await?)
    }
}
