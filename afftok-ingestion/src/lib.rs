pub mod adapters;
pub mod config;
pub mod models;
pub mod models_webhooks;
pub mod routes;
pub mod schema;
pub mod services;

use std::sync::Arc;

use afftok_geo::GeoEngine;
use afftok_linking::{LinkSigner, RedisReplayStore};
use afftok_recovery::RecoveryEngine;
use afftok_security::RateLimiter;
use afftok_shared::clients::{DbPool, RedisClient};
use afftok_wal::Wal;
use afftok_webhooks::{WebhookQueues, WebhookWorker};

use adapters::{
    DieselConsistencyStore, DieselExecutionStore, DieselGeoRuleProvider, DieselPipelineProvider,
    FailoverDrainQueue, RedisDlqStore, RedisStreamSender, WalReplayer,
};
use config::AppConfig;

pub type AppGeoEngine = GeoEngine<DieselGeoRuleProvider>;
pub type AppWebhookWorker = WebhookWorker<DieselPipelineProvider, DieselExecutionStore, RedisDlqStore>;
pub type AppRecoveryEngine = RecoveryEngine<WalReplayer, FailoverDrainQueue, DieselConsistencyStore>;

/// Everything a request handler or background worker needs, wired once at
/// startup and shared behind an `Arc`.
pub struct AppState {
    pub config: AppConfig,
    pub db: DbPool,
    pub redis: RedisClient,
    pub link_signer: LinkSigner<RedisReplayStore>,
    pub rate_limiter: RateLimiter,
    pub geo_engine: AppGeoEngine,
    pub wal: Arc<Wal>,
    pub failover: Arc<afftok_failover::FailoverQueue>,
    pub webhook_worker: Arc<AppWebhookWorker>,
    pub pipelines: DieselPipelineProvider,
    pub recovery: AppRecoveryEngine,
    pub metrics_handle: metrics_exporter_prometheus::PrometheusHandle,
}

impl AppState {
    pub async fn build(config: AppConfig, metrics_handle: metrics_exporter_prometheus::PrometheusHandle) -> anyhow::Result<Arc<Self>> {
        let db = afftok_shared::clients::create_pool(&config.database_url);
        let redis = RedisClient::connect(&config.redis_url).await?;

        let link_signer = LinkSigner::new(
            config.link_signing_secret.as_bytes().to_vec(),
            config.link_ttl_seconds,
            config.allow_legacy_tracking_codes,
            RedisReplayStore::new(redis.clone()),
        );

        let rate_limiter = RateLimiter::new(redis.clone(), config.requests_per_minute);

        let geo_provider = DieselGeoRuleProvider { db: db.clone() };
        let geo_engine = GeoEngine::new(redis.clone(), geo_provider);

        let wal_config = afftok_wal::WalConfig {
            dir: config.wal_dir.clone().into(),
            durable: config.wal_durable,
            segment_cap_bytes: config.wal_segment_cap_bytes,
            ..Default::default()
        };
        let wal = Arc::new(Wal::open(wal_config)?);

        let failover = Arc::new(afftok_failover::FailoverQueue::new(config.failover_capacity, config.zero_drop_mode));

        let queues = WebhookQueues::new(redis.clone());
        let pipelines = DieselPipelineProvider { db: db.clone() };
        let pipelines_admin = DieselPipelineProvider { db: db.clone() };
        let executions = DieselExecutionStore { db: db.clone() };
        let dlq = RedisDlqStore { redis: redis.clone() };
        let webhook_worker = Arc::new(WebhookWorker::new(queues, pipelines, executions, dlq));

        let sender: Arc<dyn afftok_failover::DownstreamSender> =
            Arc::new(RedisStreamSender { wal: wal.clone(), redis: redis.clone() });
        let recovery = RecoveryEngine::new(
            WalReplayer { wal: wal.clone() },
            FailoverDrainQueue { queue: failover.clone(), sender },
            DieselConsistencyStore { db: db.clone() },
        );

        Ok(Arc::new(Self {
            config,
            db,
            redis,
            link_signer,
            rate_limiter,
            geo_engine,
            wal,
            failover,
            webhook_worker,
            pipelines: pipelines_admin,
            recovery,
            metrics_handle,
        }))
    }
}
