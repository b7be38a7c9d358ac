//! Signed tracking-link service (component A): `code.ts.nonce.sig` generation
//! and validation, with nonce-based replay suppression.

mod replay;

pub use replay::{RedisReplayStore, ReplayStore};

use std::time::{SystemTime, UNIX_EPOCH};

use hmac::{Hmac, Mac};
use rand::distributions::Alphanumeric;
use rand::Rng;
use sha2::Sha256;
use tokio::sync::RwLock;

type HmacSha256 = Hmac<Sha256>;

const NONCE_LEN: usize = 10;
const FUTURE_SKEW_SECS: i64 = 60;
const REPLAY_TTL_GRACE_SECS: i64 = 3600;

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum LinkFailure {
    #[error("malformed link")]
    MalformedLink,
    #[error("invalid signature")]
    InvalidSignature,
    #[error("link expired")]
    LinkExpired,
    #[error("future timestamp")]
    FutureTimestamp,
    #[error("replay attempt")]
    ReplayAttempt,
    #[error("legacy tracking codes not allowed")]
    LegacyNotAllowed,
}

impl LinkFailure {
    /// Metric/log indicator string, matching the names in §4.A verbatim.
    pub fn indicator(&self) -> &'static str {
        match self {
            Self::MalformedLink => "malformed_link",
            Self::InvalidSignature => "invalid_signature",
            Self::LinkExpired => "link_expired",
            Self::FutureTimestamp => "future_timestamp",
            Self::ReplayAttempt => "replay_attempt",
            Self::LegacyNotAllowed => "legacy_not_allowed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedLink {
    pub code: String,
    /// Set when the code was accepted through the legacy (unsigned) path.
    pub legacy: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum LinkServiceError {
    #[error("signing secret must be at least 32 bytes")]
    SecretTooShort,
    #[error("replay store error: {0}")]
    Store(#[from] redis::RedisError),
}

pub struct LinkSigner<S: ReplayStore> {
    secret: RwLock<Vec<u8>>,
    ttl_secs: i64,
    allow_legacy: bool,
    replay_store: S,
}

impl<S: ReplayStore> LinkSigner<S> {
    pub fn new(secret: Vec<u8>, ttl_secs: i64, allow_legacy: bool, replay_store: S) -> Self {
        Self {
            secret: RwLock::new(secret),
            ttl_secs,
            allow_legacy,
            replay_store,
        }
    }

    pub async fn sign(&self, code: &str) -> String {
        let ts = now_secs();
        let nonce = random_nonce();
        let secret = self.secret.read().await;
        let sig = compute_signature(&secret, code, ts, &nonce);
        format!("{code}.{ts}.{nonce}.{sig}")
    }

    pub async fn validate(&self, raw: &str) -> Result<ValidatedLink, LinkFailure> {
        if !raw.contains('.') {
            metrics_inc(if self.allow_legacy { None } else { Some(LinkFailure::LegacyNotAllowed) });
            return if self.allow_legacy {
                Ok(ValidatedLink { code: raw.to_string(), legacy: true })
            } else {
                Err(LinkFailure::LegacyNotAllowed)
            };
        }

        let parts: Vec<&str> = raw.split('.').collect();
        if parts.len() != 4 {
            metrics_inc(Some(LinkFailure::MalformedLink));
            return Err(LinkFailure::MalformedLink);
        }
        let [code, ts_str, nonce, sig] = [parts[0], parts[1], parts[2], parts[3]];

        let ts: i64 = ts_str.parse().map_err(|_| {
            metrics_inc(Some(LinkFailure::MalformedLink));
            LinkFailure::MalformedLink
        })?;

        let secret = self.secret.read().await;
        let expected = compute_signature(&secret, code, ts, nonce);
        drop(secret);
        if !constant_time_eq::constant_time_eq(expected.as_bytes(), sig.as_bytes()) {
            metrics_inc(Some(LinkFailure::InvalidSignature));
            return Err(LinkFailure::InvalidSignature);
        }

        let now = now_secs();
        if now - ts > self.ttl_secs {
            metrics_inc(Some(LinkFailure::LinkExpired));
            return Err(LinkFailure::LinkExpired);
        }
        if ts - now > FUTURE_SKEW_SECS {
            metrics_inc(Some(LinkFailure::FutureTimestamp));
            return Err(LinkFailure::FutureTimestamp);
        }

        let claimed = self
            .replay_store
            .check_and_insert(nonce, self.ttl_secs + REPLAY_TTL_GRACE_SECS)
            .await
            .unwrap_or(true);
        if !claimed {
            metrics_inc(Some(LinkFailure::ReplayAttempt));
            return Err(LinkFailure::ReplayAttempt);
        }

        Ok(ValidatedLink { code: code.to_string(), legacy: false })
    }

    pub async fn rotate_secret(&self, new_secret: Vec<u8>) -> Result<(), LinkServiceError> {
        if new_secret.len() < 32 {
            return Err(LinkServiceError::SecretTooShort);
        }
        let mut secret = self.secret.write().await;
        *secret = new_secret;
        drop(secret);
        self.replay_store.clear().await?;
        Ok(())
    }
}

fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before epoch")
        .as_secs() as i64
}

fn random_nonce() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(NONCE_LEN)
        .map(char::from)
        .collect()
}

fn compute_signature(secret: &[u8], code: &str, ts: i64, nonce: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC accepts any key length");
    mac.update(code.as_bytes());
    mac.update(b".");
    mac.update(ts.to_string().as_bytes());
    mac.update(b".");
    mac.update(nonce.as_bytes());
    let full = mac.finalize().into_bytes();
    hex::encode(&full[..8]) // hex16: 8 bytes -> 16 hex chars
}

fn metrics_inc(failure: Option<LinkFailure>) {
    match failure {
        Some(f) => metrics::counter!("link_validation_failures_total", &[("kind", f.indicator())]).increment(1),
        None => metrics::counter!("link_validation_legacy_total", &[("indicator", "legacy_code")]).increment(1),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Mutex;

    struct InMemoryReplayStore {
        seen: Mutex<HashSet<String>>,
    }

    impl InMemoryReplayStore {
        fn new() -> Self {
            Self { seen: Mutex::new(HashSet::new()) }
        }
    }

    #[async_trait::async_trait]
    impl ReplayStore for InMemoryReplayStore {
        async fn check_and_insert(&self, nonce: &str, _ttl_secs: i64) -> Result<bool, redis::RedisError> {
            Ok(self.seen.lock().unwrap().insert(nonce.to_string()))
        }

        async fn clear(&self) -> Result<(), redis::RedisError> {
            self.seen.lock().unwrap().clear();
            Ok(())
        }
    }

    fn signer() -> LinkSigner<InMemoryReplayStore> {
        LinkSigner::new(vec![b'x'; 32], 86_400, true, InMemoryReplayStore::new())
    }

    #[tokio::test]
    async fn sign_then_validate_round_trips() {
        let signer = signer();
        let signed = signer.sign("uo-123").await;
        let outcome = signer.validate(&signed).await.expect("should validate");
        assert_eq!(outcome.code, "uo-123");
        assert!(!outcome.legacy);
    }

    #[tokio::test]
    async fn replayed_nonce_is_rejected() {
        let signer = signer();
        let signed = signer.sign("uo-123").await;
        signer.validate(&signed).await.expect("first use is valid");
        let err = signer.validate(&signed).await.unwrap_err();
        assert_eq!(err, LinkFailure::ReplayAttempt);
    }

    #[tokio::test]
    async fn expired_link_is_rejected() {
        let signer = LinkSigner::new(vec![b'x'; 32], 86_400, true, InMemoryReplayStore::new());
        let ts = now_secs() - 86_400 - 1;
        let nonce = "abcdefghij";
        let secret = signer.secret.read().await;
        let sig = compute_signature(&secret, "uo-123", ts, nonce);
        drop(secret);
        let raw = format!("uo-123.{ts}.{nonce}.{sig}");
        let err = signer.validate(&raw).await.unwrap_err();
        assert_eq!(err, LinkFailure::LinkExpired);
    }

    #[tokio::test]
    async fn boundary_ttl_exact_is_expired_one_less_is_valid() {
        let ttl = 86_400;
        let signer = LinkSigner::new(vec![b'x'; 32], ttl, true, InMemoryReplayStore::new());
        let nonce = "abcdefghij";

        let exact_ts = now_secs() - ttl;
        let secret = signer.secret.read().await;
        let sig_exact = compute_signature(&secret, "uo-1", exact_ts, nonce);
        drop(secret);
        let raw_exact = format!("uo-1.{exact_ts}.{nonce}.{sig_exact}");
        assert_eq!(signer.validate(&raw_exact).await.unwrap_err(), LinkFailure::LinkExpired);

        let just_inside_ts = now_secs() - ttl + 1;
        let secret = signer.secret.read().await;
        let sig_inside = compute_signature(&secret, "uo-1", just_inside_ts, "klmnopqrst");
        drop(secret);
        let raw_inside = format!("uo-1.{just_inside_ts}.klmnopqrst.{sig_inside}");
        assert!(signer.validate(&raw_inside).await.is_ok());
    }

    #[tokio::test]
    async fn legacy_code_rejected_when_disallowed() {
        let signer = LinkSigner::new(vec![b'x'; 32], 86_400, false, InMemoryReplayStore::new());
        let err = signer.validate("plain-offer-id").await.unwrap_err();
        assert_eq!(err, LinkFailure::LegacyNotAllowed);
    }

    #[tokio::test]
    async fn rotate_secret_rejects_short_keys() {
        let signer = signer();
        let err = signer.rotate_secret(vec![0u8; 16]).await.unwrap_err();
        assert!(matches!(err, LinkServiceError::SecretTooShort));
    }

    #[tokio::test]
    async fn rotate_secret_invalidates_previously_signed_links() {
        let signer = signer();
        let signed = signer.sign("uo-123").await;
        signer.rotate_secret(vec![b'y'; 32]).await.unwrap();
        let err = signer.validate(&signed).await.unwrap_err();
        assert_eq!(err, LinkFailure::InvalidSignature);
    }
}
