use afftok_shared::clients::RedisClient;
use sha2::{Digest, Sha256};

const FINGERPRINT_TTL_SECS: u64 = 300;

/// Deterministic hash over (user_offer, ip, ua) per 4.B. Two requests with
/// the same inputs always produce the same fingerprint, which is the point:
/// it's a dedup key, not a security token.
pub fn fingerprint_click(user_offer_id: &str, ip: &str, user_agent: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(user_offer_id.as_bytes());
    hasher.update(b"|");
    hasher.update(ip.as_bytes());
    hasher.update(b"|");
    hasher.update(user_agent.as_bytes());
    hex::encode(hasher.finalize())
}

/// Short-TTL dedup set over click fingerprints. `check_and_set` is the only
/// entry point: it atomically reports whether the fingerprint was already
/// present (duplicate) while recording it for the next 5 minutes.
pub struct FingerprintGate {
    redis: RedisClient,
}

impl FingerprintGate {
    pub fn new(redis: RedisClient) -> Self {
        Self { redis }
    }

    /// Returns `true` if this is a duplicate seen within the window.
    pub async fn check_and_set(&self, fingerprint: &str) -> Result<bool, redis::RedisError> {
        let key = format!("click_fp:{fingerprint}");
        let inserted = self.redis.set_nx(&key, "1", FINGERPRINT_TTL_SECS).await?;
        Ok(!inserted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_is_deterministic() {
        let a = fingerprint_click("uo-1", "1.2.3.4", "Mozilla/5.0");
        let b = fingerprint_click("uo-1", "1.2.3.4", "Mozilla/5.0");
        assert_eq!(a, b);
    }

    #[test]
    fn fingerprint_differs_on_any_input_change() {
        let base = fingerprint_click("uo-1", "1.2.3.4", "Mozilla/5.0");
        let diff_ip = fingerprint_click("uo-1", "5.6.7.8", "Mozilla/5.0");
        let diff_ua = fingerprint_click("uo-1", "1.2.3.4", "curl/8.0");
        assert_ne!(base, diff_ip);
        assert_ne!(base, diff_ua);
    }
}
