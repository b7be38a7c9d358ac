//! Consumer-group reader over the durable event streams (component H).
//!
//! Each handler processes one stream (`clicks`, `conversions`, `postbacks`)
//! under the single consumer group `afftok-consumers`. A background
//! claimer periodically reclaims entries idle past a threshold from dead
//! consumers.

use afftok_shared::clients::RedisClient;
use afftok_shared::types::event::stream_keys::CONSUMER_GROUP;
use std::time::Duration;

#[async_trait::async_trait]
pub trait StreamHandler: Send + Sync {
    async fn handle(&self, event_type: &str, fields: &std::collections::HashMap<String, String>) -> anyhow::Result<()>;
}

pub struct StreamConsumer<H: StreamHandler> {
    redis: RedisClient,
    stream: String,
    consumer_name: String,
    handler: H,
    block_ms: usize,
    batch_size: usize,
}

impl<H: StreamHandler> StreamConsumer<H> {
    pub async fn new(redis: RedisClient, stream: &str, consumer_name: &str, handler: H) -> Result<Self, redis::RedisError> {
        redis.xgroup_create(stream, CONSUMER_GROUP).await?;
        Ok(Self {
            redis,
            stream: stream.to_string(),
            consumer_name: consumer_name.to_string(),
            handler,
            block_ms: 2_000,
            batch_size: 10,
        })
    }

    /// Reads and dispatches one batch. Acks on handler success; leaves the
    /// entry in the pending list (to be re-delivered or reclaimed) on
    /// handler failure.
    pub async fn poll_once(&self) -> anyhow::Result<usize> {
        let Some(reply) = self
            .redis
            .xreadgroup(&self.stream, CONSUMER_GROUP, &self.consumer_name, self.block_ms, self.batch_size)
            .await?
        else {
            return Ok(0);
        };

        let mut processed = 0;
        for key in reply.keys {
            for entry in key.ids {
                let fields: std::collections::HashMap<String, String> = entry
                    .map
                    .iter()
                    .filter_map(|(k, v)| redis::from_redis_value::<String>(v).ok().map(|s| (k.clone(), s)))
                    .collect();
                let event_type = fields.get("event_type").cloned().unwrap_or_default();

                match self.handler.handle(&event_type, &fields).await {
                    Ok(()) => {
                        self.redis.xack(&self.stream, CONSUMER_GROUP, &entry.id).await?;
                        processed += 1;
                        metrics::counter!("afftok_stream_processed_total", "stream" => self.stream.clone()).increment(1);
                    }
                    Err(err) => {
                        tracing::warn!(stream = %self.stream, id = %entry.id, error = %err, "stream handler failed, leaving unacked");
                    }
                }
            }
        }

        Ok(processed)
    }

    /// Runs `poll_once` in a loop until `shutdown` resolves.
    pub async fn run(&self, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
                result = self.poll_once() => {
                    if let Err(err) = result {
                        tracing::error!(stream = %self.stream, error = %err, "stream poll failed");
                        tokio::time::sleep(Duration::from_millis(500)).await;
                    }
                }
            }
        }
    }

    /// Reclaims entries idle longer than `min_idle_ms` from dead consumers.
    /// Intended to run on a periodic background tick.
    pub async fn claim_idle(&self, min_idle_ms: usize) -> Result<Vec<String>, redis::RedisError> {
        let mut cursor = "0-0".to_string();
        let mut claimed_all = Vec::new();
        loop {
            let (next_cursor, claimed) = self
                .redis
                .xautoclaim(&self.stream, CONSUMER_GROUP, &self.consumer_name, min_idle_ms, &cursor, 100)
                .await?;
            claimed_all.extend(claimed);
            if next_cursor == "0-0" || next_cursor == cursor {
                break;
            }
            cursor = next_cursor;
        }
        Ok(claimed_all)
    }

    pub async fn lag(&self) -> Result<u64, redis::RedisError> {
        self.redis.xpending_count(&self.stream, CONSUMER_GROUP).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingHandler(Arc<AtomicUsize>);

    #[async_trait::async_trait]
    impl StreamHandler for CountingHandler {
        async fn handle(&self, _event_type: &str, _fields: &HashMap<String, String>) -> anyhow::Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn handler_records_invocations() {
        let counter = Arc::new(AtomicUsize::new(0));
        let handler = CountingHandler(counter.clone());
        let mut fields = HashMap::new();
        fields.insert("event_type".to_string(), "click".to_string());

        handler.handle("click", &fields).await.unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
