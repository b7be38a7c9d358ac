use afftok_shared::clients::RedisClient;

/// What to key the sliding window on: per-IP (clicks), per (ip, user_offer)
/// (also clicks, tighter scope), or per-api-key (postbacks).
#[derive(Debug, Clone)]
pub enum RateLimitKey {
    Ip(String),
    IpUserOffer(String, String),
    ApiKey(String),
}

impl RateLimitKey {
    fn bucket(&self) -> String {
        match self {
            Self::Ip(ip) => format!("ip:{ip}"),
            Self::IpUserOffer(ip, uo) => format!("ip_uo:{ip}:{uo}"),
            Self::ApiKey(key) => format!("apikey:{key}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub reason: Option<String>,
}

/// Sliding-window-by-minute rate limiter (4.B), grounded on the same
/// INCR+EXPIRE-per-minute-bucket pattern as the gateway's request limiter.
pub struct RateLimiter {
    redis: RedisClient,
    requests_per_minute: u64,
}

impl RateLimiter {
    pub fn new(redis: RedisClient, requests_per_minute: u64) -> Self {
        Self { redis, requests_per_minute }
    }

    pub async fn check(&self, key: &RateLimitKey) -> Result<RateLimitDecision, redis::RedisError> {
        let minute = chrono::Utc::now().format("%Y%m%d%H%M");
        let redis_key = format!("ratelimit:{}:{}", key.bucket(), minute);

        let count = self.redis.incr(&redis_key).await?;
        if count == 1 {
            self.redis.expire(&redis_key, 60).await?;
        }

        if count as u64 > self.requests_per_minute {
            return Ok(RateLimitDecision {
                allowed: false,
                reason: Some(format!("exceeded {} requests/minute", self.requests_per_minute)),
            });
        }

        Ok(RateLimitDecision { allowed: true, reason: None })
    }
}
