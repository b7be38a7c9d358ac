use afftok_shared::clients::RedisClient;

/// Replay-nonce store. Boxed as a trait per §9's note that recovery/signing
/// should consume narrow interfaces rather than holding a concrete client.
#[async_trait::async_trait]
pub trait ReplayStore: Send + Sync {
    /// Atomically checks-and-marks a nonce as seen. Returns `true` if this
    /// call is the one that claimed it (first sighting), `false` if another
    /// caller already claimed it first.
    async fn check_and_insert(&self, nonce: &str, ttl_secs: i64) -> Result<bool, redis::RedisError>;
    async fn clear(&self) -> Result<(), redis::RedisError>;
}

pub struct RedisReplayStore {
    redis: RedisClient,
}

impl RedisReplayStore {
    pub fn new(redis: RedisClient) -> Self {
        Self { redis }
    }

    fn key(nonce: &str) -> String {
        format!("replay:{nonce}")
    }
}

#[async_trait::async_trait]
impl ReplayStore for RedisReplayStore {
    async fn check_and_insert(&self, nonce: &str, ttl_secs: i64) -> Result<bool, redis::RedisError> {
        self.redis.set_nx(&Self::key(nonce), "1", ttl_secs.max(0) as u64).await
    }

    async fn clear(&self) -> Result<(), redis::RedisError> {
        self.redis.scan_delete("replay:*").await?;
        Ok(())
    }
}
