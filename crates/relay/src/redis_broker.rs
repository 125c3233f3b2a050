//! Redis backend for the broker seams.
//!
//! List reads, PUBLISH, KEYS and EXPIRE share one multiplexed connection.
//! Every subscription gets its own pub/sub connection so that closing one
//! relay's channels never disturbs another.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use redis::aio::{MultiplexedConnection, PubSub};
use redis::AsyncCommands;
use tracing::{debug, info};

use crate::broker::{ControlPublisher, ResponseLog, Subscriber, Subscription};
use crate::error::RelayError;

#[derive(Clone)]
pub struct RedisBroker {
    client: redis::Client,
    conn: MultiplexedConnection,
}

impl RedisBroker {
    /// Open the shared command connection. Fails fast if Redis is unreachable.
    pub async fn connect(url: &str) -> Result<Self, RelayError> {
        let client = redis::Client::open(url)?;
        let conn = client.get_multiplexed_async_connection().await?;
        info!("connected to redis");
        Ok(Self { client, conn })
    }

    /// PING the shared connection.
    pub async fn ping(&self) -> Result<(), RelayError> {
        let mut conn = self.conn.clone();
        redis::cmd("PING").query_async::<String>(&mut conn).await?;
        Ok(())
    }
}

#[async_trait]
impl ResponseLog for RedisBroker {
    async fn range(&self, key: &str, start: isize, end: isize) -> Result<Vec<String>, RelayError> {
        let mut conn = self.conn.clone();
        let records: Vec<String> = conn.lrange(key, start, end).await?;
        Ok(records)
    }
}

#[async_trait]
impl Subscriber for RedisBroker {
    async fn subscribe(&self, channel: &str) -> Result<Box<dyn Subscription>, RelayError> {
        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.subscribe(channel).await?;
        debug!(channel = %channel, "redis subscription opened");
        Ok(Box::new(RedisSubscription {
            channel: channel.to_string(),
            pubsub,
        }))
    }
}

#[async_trait]
impl ControlPublisher for RedisBroker {
    async fn publish(&self, channel: &str, payload: &str) -> Result<(), RelayError> {
        let mut conn = self.conn.clone();
        let receivers: i64 = conn.publish(channel, payload).await?;
        debug!(channel = %channel, receivers, "published");
        Ok(())
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>, RelayError> {
        let mut conn = self.conn.clone();
        let keys: Vec<String> = conn.keys(pattern).await?;
        Ok(keys)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), RelayError> {
        let mut conn = self.conn.clone();
        let _: bool = conn.expire(key, ttl.as_secs() as i64).await?;
        Ok(())
    }
}

struct RedisSubscription {
    channel: String,
    pubsub: PubSub,
}

#[async_trait]
impl Subscription for RedisSubscription {
    fn channel(&self) -> &str {
        &self.channel
    }

    async fn next_message(&mut self) -> Result<Option<String>, RelayError> {
        let Some(msg) = self.pubsub.on_message().next().await else {
            return Ok(None);
        };
        let payload: String = msg.get_payload()?;
        Ok(Some(payload))
    }

    async fn unsubscribe(&mut self) -> Result<(), RelayError> {
        self.pubsub.unsubscribe(&self.channel).await?;
        Ok(())
    }

    async fn close(self: Box<Self>) {
        // Dropping the pub/sub connection closes it.
        debug!(channel = %self.channel, "redis subscription closed");
    }
}
