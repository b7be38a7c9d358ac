use super::types::WebhookTask;
use afftok_shared::clients::RedisClient;

const PRIMARY_KEY: &str = "webhooks:queue:primary";
const RETRY_KEY: &str = "webhooks:queue:retry";
const FAILOVER_KEY: &str = "webhooks:queue:failover";

/// Cache-backed sorted-set queues: primary ordered by (priority DESC,
/// enqueue_time), retry ordered by `next_attempt_at`, failover for
/// downstream-backend outages.
pub struct WebhookQueues {
    redis: RedisClient,
}

impl WebhookQueues {
    pub fn new(redis: RedisClient) -> Self {
        Self { redis }
    }

    pub async fn push_primary(&self, task: &WebhookTask) -> Result<(), redis::RedisError> {
        let score = primary_score(task.priority, task.enqueue_time);
        self.redis.zadd(PRIMARY_KEY, &serde_json::to_string(task).unwrap(), score).await
    }

    pub async fn push_retry(&self, task: &WebhookTask, next_attempt_at_millis: i64) -> Result<(), redis::RedisError> {
        self.redis.zadd(RETRY_KEY, &serde_json::to_string(task).unwrap(), next_attempt_at_millis as f64).await
    }

    pub async fn push_failover(&self, task: &WebhookTask) -> Result<(), redis::RedisError> {
        self.redis.zadd(FAILOVER_KEY, &serde_json::to_string(task).unwrap(), task.enqueue_time as f64).await
    }

    /// Pop and remove are one atomic Lua call (`RedisClient::zpop_range`),
    /// so two concurrent workers draining the same queue never both walk
    /// away with the same task.
    pub async fn pop_primary(&self, limit: isize) -> Result<Vec<WebhookTask>, redis::RedisError> {
        if limit <= 0 {
            return Ok(Vec::new());
        }
        let members = self.redis.zpop_range(PRIMARY_KEY, limit).await?;
        Ok(deserialize_all(members))
    }

    pub async fn pop_due_retry(&self, now_millis: i64, limit: isize) -> Result<Vec<WebhookTask>, redis::RedisError> {
        if limit <= 0 {
            return Ok(Vec::new());
        }
        let members = self.redis.zpop_range_by_score(RETRY_KEY, now_millis as f64, limit).await?;
        Ok(deserialize_all(members))
    }

    pub async fn pop_failover(&self, limit: isize) -> Result<Vec<WebhookTask>, redis::RedisError> {
        if limit <= 0 {
            return Ok(Vec::new());
        }
        let members = self.redis.zpop_range(FAILOVER_KEY, limit).await?;
        Ok(deserialize_all(members))
    }

    pub async fn primary_depth(&self) -> Result<u64, redis::RedisError> {
        self.redis.zcard(PRIMARY_KEY).await
    }

    pub async fn retry_depth(&self) -> Result<u64, redis::RedisError> {
        self.redis.zcard(RETRY_KEY).await
    }

    pub async fn failover_depth(&self) -> Result<u64, redis::RedisError> {
        self.redis.zcard(FAILOVER_KEY).await
    }
}

fn primary_score(priority: i32, enqueue_time_millis: i64) -> f64 {
    -(priority as f64) * 1_000_000_000_000.0 + enqueue_time_millis as f64
}

fn deserialize_all(members: Vec<String>) -> Vec<WebhookTask> {
    members
        .into_iter()
        .filter_map(|m| serde_json::from_str(&m).ok())
        .collect()
}
