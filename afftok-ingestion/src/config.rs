use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_database_url")]
    pub database_url: String,
    #[serde(default = "default_redis_url")]
    pub redis_url: String,

    #[serde(default = "default_link_signing_secret")]
    pub link_signing_secret: String,
    #[serde(default = "default_link_ttl_seconds")]
    pub link_ttl_seconds: i64,
    #[serde(default = "default_allow_legacy_tracking_codes")]
    pub allow_legacy_tracking_codes: bool,

    #[serde(default = "default_webhook_signing_secret")]
    pub webhook_signing_secret: String,
    #[serde(default = "default_webhook_jwt_secret")]
    pub webhook_jwt_secret: String,
    #[serde(default = "default_webhook_jwt_issuer")]
    pub webhook_jwt_issuer: String,

    #[serde(default = "default_geo_enforce_on_postback")]
    pub geo_enforce_on_postback: bool,
    #[serde(default = "default_fallback_redirect_url")]
    pub fallback_redirect_url: String,

    #[serde(default = "default_wal_dir")]
    pub wal_dir: String,
    #[serde(default = "default_wal_segment_cap_bytes")]
    pub wal_segment_cap_bytes: u64,
    #[serde(default = "default_wal_durable")]
    pub wal_durable: bool,

    #[serde(default = "default_failover_capacity")]
    pub failover_capacity: usize,
    #[serde(default = "default_zero_drop_mode")]
    pub zero_drop_mode: bool,

    #[serde(default = "default_webhook_worker_count")]
    pub webhook_worker_count: usize,
    #[serde(default = "default_webhook_queue_poll_interval_ms")]
    pub webhook_queue_poll_interval_ms: u64,

    #[serde(default = "default_requests_per_minute")]
    pub requests_per_minute: u64,
}

fn default_port() -> u16 { 8080 }
fn default_database_url() -> String { "postgres://localhost/afftok".into() }
fn default_redis_url() -> String { "redis://localhost:6379".into() }
fn default_link_signing_secret() -> String { "development-secret-change-in-production-32b".into() }
fn default_link_ttl_seconds() -> i64 { 86_400 }
fn default_allow_legacy_tracking_codes() -> bool { true }
fn default_webhook_signing_secret() -> String { "development-webhook-secret-change-me".into() }
fn default_webhook_jwt_secret() -> String { "development-webhook-jwt-secret-change-me".into() }
fn default_webhook_jwt_issuer() -> String { "afftok-webhooks".into() }
fn default_geo_enforce_on_postback() -> bool { false }
fn default_fallback_redirect_url() -> String { "https://example.com".into() }
fn default_wal_dir() -> String { "./data/wal".into() }
fn default_wal_segment_cap_bytes() -> u64 { 64 * 1024 * 1024 }
fn default_wal_durable() -> bool { true }
fn default_failover_capacity() -> usize { 10_000 }
fn default_zero_drop_mode() -> bool { false }
fn default_webhook_worker_count() -> usize { 4 }
fn default_webhook_queue_poll_interval_ms() -> u64 { 250 }
fn default_requests_per_minute() -> u64 { 600 }

impl AppConfig {
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            .add_source(config::Environment::with_prefix("AFFTOK_INGESTION").separator("__"))
            .build()?;

        Ok(config.try_deserialize().unwrap_or_else(|_| Self {
            port: default_port(),
            database_url: default_database_url(),
            redis_url: default_redis_url(),
            link_signing_secret: default_link_signing_secret(),
            link_ttl_seconds: default_link_ttl_seconds(),
            allow_legacy_tracking_codes: default_allow_legacy_tracking_codes(),
            webhook_signing_secret: default_webhook_signing_secret(),
            webhook_jwt_secret: default_webhook_jwt_secret(),
            webhook_jwt_issuer: default_webhook_jwt_issuer(),
            geo_enforce_on_postback: default_geo_enforce_on_postback(),
            fallback_redirect_url: default_fallback_redirect_url(),
            wal_dir: default_wal_dir(),
            wal_segment_cap_bytes: default_wal_segment_cap_bytes(),
            wal_durable: default_wal_durable(),
            failover_capacity: default_failover_capacity(),
            zero_drop_mode: default_zero_drop_mode(),
            webhook_worker_count: default_webhook_worker_count(),
            webhook_queue_poll_interval_ms: default_webhook_queue_poll_interval_ms(),
            requests_per_minute: default_requests_per_minute(),
        }))
    }
}
