//! Concrete implementations of the narrow provider/store traits that
//! `afftok-geo`, `afftok-webhooks`, and `afftok-recovery` consume, backed
//! by diesel and the shared Redis client.

use afftok_shared::clients::{DbPool, RedisClient};
use anyhow::Context;
use diesel::prelude::*;
use diesel::sql_types::BigInt;
use diesel::QueryableByName;
use uuid::Uuid;

use crate::schema::{geo_rules, webhook_executions, webhook_pipelines, webhook_steps};
use crate::models_webhooks::{
    GeoRuleRow, NewWebhookExecution, NewWebhookPipeline, NewWebhookStep, NewWebhookStepResult, WebhookPipelineRow,
    WebhookStepRow,
};

// -- Geo rule provider --

pub struct DieselGeoRuleProvider {
    pub db: DbPool,
}

#[async_trait::async_trait]
impl afftok_geo::GeoRuleProvider for DieselGeoRuleProvider {
    async fn rules_for_scope(&self, scope_type: afftok_geo::ScopeType, scope_id: Option<Uuid>) -> anyhow::Result<Vec<afftok_geo::GeoRule>> {
        let db = self.db.clone();
        let scope_label = match scope_type {
            afftok_geo::ScopeType::Offer => "offer",
            afftok_geo::ScopeType::Advertiser => "advertiser",
            afftok_geo::ScopeType::Global => "global",
        };

        tokio::task::spawn_blocking(move || -> anyhow::Result<Vec<afftok_geo::GeoRule>> {
            let mut conn = db.get().context("checkout db connection")?;
            let rows: Vec<GeoRuleRow> = geo_rules::table
                .filter(geo_rules::scope_type.eq(scope_label))
                .filter(geo_rules::scope_id.is_not_distinct_from(scope_id))
                .load(&mut conn)?;

            Ok(rows
                .into_iter()
                .map(|r| afftok_geo::GeoRule {
                    scope_type,
                    scope_id: r.scope_id,
                    mode: if r.mode == "allow" { afftok_geo::RuleMode::Allow } else { afftok_geo::RuleMode::Block },
                    countries: r.countries,
                    priority: r.priority,
                    active: r.active,
                })
                .collect())
        })
        .await?
    }
}

// -- Webhook pipeline provider / execution store --

pub struct DieselPipelineProvider {
    pub db: DbPool,
}

fn trigger_label(trigger_type: afftok_webhooks::TriggerType) -> &'static str {
    match trigger_type {
        afftok_webhooks::TriggerType::Click => "click",
        afftok_webhooks::TriggerType::Conversion => "conversion",
        afftok_webhooks::TriggerType::Postback => "postback",
    }
}

fn row_to_pipeline(row: WebhookPipelineRow, steps: Vec<WebhookStepRow>) -> afftok_webhooks::WebhookPipeline {
    let mut steps: Vec<_> = steps;
    steps.sort_by_key(|s| s.step_index);

    afftok_webhooks::WebhookPipeline {
        id: row.id,
        trigger_type: match row.trigger_type.as_str() {
            "conversion" => afftok_webhooks::TriggerType::Conversion,
            "postback" => afftok_webhooks::TriggerType::Postback,
            _ => afftok_webhooks::TriggerType::Click,
        },
        offer_id: row.offer_id,
        advertiser_id: row.advertiser_id,
        active: row.active,
        max_retries: row.max_retries as u32,
        priority: row.priority,
        steps: steps
            .into_iter()
            .map(|s| afftok_webhooks::WebhookStep {
                url_template: s.url_template,
                headers_template: serde_json::from_value(s.headers_template).unwrap_or_default(),
                body_template: s.body_template,
                signing_mode: if s.signing_mode == "jwt" { afftok_webhooks::SigningMode::Jwt } else { afftok_webhooks::SigningMode::Hmac },
                secret: s.secret,
                timeout_ms: s.timeout_ms as u64,
                continue_on_fail: s.continue_on_fail,
            })
            .collect(),
    }
}

#[async_trait::async_trait]
impl afftok_webhooks::PipelineProvider for DieselPipelineProvider {
    async fn get(&self, pipeline_id: Uuid) -> anyhow::Result<Option<afftok_webhooks::WebhookPipeline>> {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || -> anyhow::Result<Option<afftok_webhooks::WebhookPipeline>> {
            let mut conn = db.get().context("checkout db connection")?;
            let row: Option<WebhookPipelineRow> = webhook_pipelines::table.find(pipeline_id).first(&mut conn).optional()?;
            let Some(row) = row else { return Ok(None) };
            let steps: Vec<WebhookStepRow> = webhook_steps::table.filter(webhook_steps::pipeline_id.eq(pipeline_id)).load(&mut conn)?;
            Ok(Some(row_to_pipeline(row, steps)))
        })
        .await?
    }

    async fn matching(&self, trigger_type: afftok_webhooks::TriggerType) -> anyhow::Result<Vec<afftok_webhooks::WebhookPipeline>> {
        let db = self.db.clone();
        let label = trigger_label(trigger_type);
        tokio::task::spawn_blocking(move || -> anyhow::Result<Vec<afftok_webhooks::WebhookPipeline>> {
            let mut conn = db.get().context("checkout db connection")?;
            let rows: Vec<WebhookPipelineRow> = webhook_pipelines::table
                .filter(webhook_pipelines::trigger_type.eq(label))
                .filter(webhook_pipelines::active.eq(true))
                .load(&mut conn)?;

            let mut pipelines = Vec::with_capacity(rows.len());
            for row in rows {
                let steps: Vec<WebhookStepRow> = webhook_steps::table.filter(webhook_steps::pipeline_id.eq(row.id)).load(&mut conn)?;
                pipelines.push(row_to_pipeline(row, steps));
            }
            Ok(pipelines)
        })
        .await?
    }
}

/// Admin-facing CRUD over pipelines/steps, used by `routes::admin`. Kept
/// separate from the `PipelineProvider` trait impl above, which only needs
/// read access for trigger resolution.
pub struct StepDraft {
    pub url_template: String,
    pub headers_template: std::collections::HashMap<String, String>,
    pub body_template: String,
    pub signing_mode: afftok_webhooks::SigningMode,
    pub secret: String,
    pub timeout_ms: u64,
    pub continue_on_fail: bool,
}

pub struct PipelineDraft {
    pub trigger_type: afftok_webhooks::TriggerType,
    pub offer_id: Option<Uuid>,
    pub advertiser_id: Option<Uuid>,
    pub active: bool,
    pub max_retries: u32,
    pub priority: i32,
    pub steps: Vec<StepDraft>,
}

impl DieselPipelineProvider {
    pub async fn list(&self) -> anyhow::Result<Vec<afftok_webhooks::WebhookPipeline>> {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || -> anyhow::Result<Vec<afftok_webhooks::WebhookPipeline>> {
            let mut conn = db.get().context("checkout db connection")?;
            let rows: Vec<WebhookPipelineRow> = webhook_pipelines::table.load(&mut conn)?;
            let mut pipelines = Vec::with_capacity(rows.len());
            for row in rows {
                let steps: Vec<WebhookStepRow> = webhook_steps::table.filter(webhook_steps::pipeline_id.eq(row.id)).load(&mut conn)?;
                pipelines.push(row_to_pipeline(row, steps));
            }
            Ok(pipelines)
        })
        .await?
    }

    pub async fn create(&self, draft: PipelineDraft) -> anyhow::Result<afftok_webhooks::WebhookPipeline> {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || -> anyhow::Result<afftok_webhooks::WebhookPipeline> {
            let mut conn = db.get().context("checkout db connection")?;
            let new_pipeline = NewWebhookPipeline {
                trigger_type: trigger_label(draft.trigger_type).to_string(),
                offer_id: draft.offer_id,
                advertiser_id: draft.advertiser_id,
                active: draft.active,
                max_retries: draft.max_retries as i32,
                priority: draft.priority,
            };
            let row: WebhookPipelineRow = diesel::insert_into(webhook_pipelines::table).values(&new_pipeline).get_result(&mut conn)?;

            let mut steps = Vec::with_capacity(draft.steps.len());
            for (index, step) in draft.steps.into_iter().enumerate() {
                let new_step = NewWebhookStep {
                    pipeline_id: row.id,
                    step_index: index as i32,
                    url_template: step.url_template,
                    headers_template: serde_json::to_value(&step.headers_template)?,
                    body_template: step.body_template,
                    signing_mode: match step.signing_mode {
                        afftok_webhooks::SigningMode::Jwt => "jwt".to_string(),
                        afftok_webhooks::SigningMode::Hmac => "hmac".to_string(),
                    },
                    secret: step.secret,
                    timeout_ms: step.timeout_ms as i64,
                    continue_on_fail: step.continue_on_fail,
                };
                steps.push(diesel::insert_into(webhook_steps::table).values(&new_step).get_result::<WebhookStepRow>(&mut conn)?);
            }

            Ok(row_to_pipeline(row, steps))
        })
        .await?
    }

    pub async fn set_active(&self, pipeline_id: Uuid, active: bool) -> anyhow::Result<bool> {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || -> anyhow::Result<bool> {
            let mut conn = db.get().context("checkout db connection")?;
            let updated = diesel::update(webhook_pipelines::table.find(pipeline_id))
                .set(webhook_pipelines::active.eq(active))
                .execute(&mut conn)?;
            Ok(updated > 0)
        })
        .await?
    }

    pub async fn delete(&self, pipeline_id: Uuid) -> anyhow::Result<bool> {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || -> anyhow::Result<bool> {
            let mut conn = db.get().context("checkout db connection")?;
            diesel::delete(webhook_steps::table.filter(webhook_steps::pipeline_id.eq(pipeline_id))).execute(&mut conn)?;
            let deleted = diesel::delete(webhook_pipelines::table.find(pipeline_id)).execute(&mut conn)?;
            Ok(deleted > 0)
        })
        .await?
    }
}

pub struct DieselExecutionStore {
    pub db: DbPool,
}

#[async_trait::async_trait]
impl afftok_webhooks::ExecutionStore for DieselExecutionStore {
    async fn create(&self, execution_id: Uuid, pipeline_id: Uuid) -> anyhow::Result<()> {
        let db = self.db.clone();
        let new_execution = NewWebhookExecution { id: execution_id, pipeline_id, status: "running".to_string() };
        tokio::task::spawn_blocking(move || -> anyhow::Result<()> {
            let mut conn = db.get().context("checkout db connection")?;
            diesel::insert_into(webhook_executions::table).values(&new_execution).execute(&mut conn)?;
            Ok(())
        })
        .await?
    }

    async fn record_step(&self, execution_id: Uuid, step_index: u32, result: &afftok_webhooks::StepExecutionResult) -> anyhow::Result<()> {
        let db = self.db.clone();
        let new_result = NewWebhookStepResult {
            execution_id,
            step_index: step_index as i32,
            status_code: result.status_code.map(|c| c as i32),
            response_body: result.response_body.clone(),
            error: result.error.clone(),
            duration_ms: result.duration_ms as i64,
        };
        tokio::task::spawn_blocking(move || -> anyhow::Result<()> {
            let mut conn = db.get().context("checkout db connection")?;
            diesel::insert_into(crate::schema::webhook_step_results::table)
                .values(&new_result)
                .execute(&mut conn)?;
            Ok(())
        })
        .await?
    }

    async fn mark_succeeded(&self, execution_id: Uuid) -> anyhow::Result<()> {
        self.set_status(execution_id, "succeeded", None).await
    }

    async fn mark_failed(&self, execution_id: Uuid, error: &str) -> anyhow::Result<()> {
        self.set_status(execution_id, "failed", Some(error.to_string())).await
    }
}

impl DieselExecutionStore {
    async fn set_status(&self, execution_id: Uuid, status: &str, error: Option<String>) -> anyhow::Result<()> {
        let db = self.db.clone();
        let status = status.to_string();
        tokio::task::spawn_blocking(move || -> anyhow::Result<()> {
            let mut conn = db.get().context("checkout db connection")?;
            diesel::update(webhook_executions::table.find(execution_id))
                .set((
                    webhook_executions::status.eq(status),
                    webhook_executions::last_error.eq(error),
                    webhook_executions::updated_at.eq(chrono::Utc::now()),
                ))
                .execute(&mut conn)?;
            Ok(())
        })
        .await?
    }
}

// -- DLQ store (Redis-backed: DLQ volume is low, no need for a table) --

pub struct RedisDlqStore {
    pub redis: RedisClient,
}

const DLQ_KEY: &str = "webhooks:dlq";

#[async_trait::async_trait]
impl afftok_webhooks::DlqStore for RedisDlqStore {
    async fn add(&self, task: afftok_webhooks::WebhookTask, last_error: Option<String>) -> anyhow::Result<afftok_webhooks::DlqItem> {
        let item = afftok_webhooks::DlqItem { id: Uuid::new_v4(), task, last_error, created_at: chrono::Utc::now() };
        self.redis.zadd(DLQ_KEY, &serde_json::to_string(&item)?, item.created_at.timestamp_millis() as f64).await?;
        Ok(item)
    }

    async fn list(&self) -> anyhow::Result<Vec<afftok_webhooks::DlqItem>> {
        let members = self.redis.zrange(DLQ_KEY, 0, -1).await?;
        Ok(members.into_iter().filter_map(|m| serde_json::from_str(&m).ok()).collect())
    }

    async fn delete(&self, id: Uuid) -> anyhow::Result<bool> {
        let items = self.list().await?;
        let Some(item) = items.iter().find(|i| i.id == id) else { return Ok(false) };
        self.redis.zrem(DLQ_KEY, &serde_json::to_string(item)?).await?;
        Ok(true)
    }

    async fn take_for_retry(&self, id: Uuid) -> anyhow::Result<Option<afftok_webhooks::WebhookTask>> {
        let items = self.list().await?;
        let Some(item) = items.into_iter().find(|i| i.id == id) else { return Ok(None) };
        self.redis.zrem(DLQ_KEY, &serde_json::to_string(&item)?).await?;
        Ok(Some(afftok_webhooks::pipeline::prepare_retry(item.task)))
    }
}

// -- Failover downstream sender --

/// What the failover queue redelivers to once a WAL append or stream publish
/// failed the first time: try the WAL again, then the matching stream.
pub struct RedisStreamSender {
    pub wal: std::sync::Arc<afftok_wal::Wal>,
    pub redis: RedisClient,
}

#[async_trait::async_trait]
impl afftok_failover::DownstreamSender for RedisStreamSender {
    async fn send(&self, item: &afftok_failover::FailoverItem) -> anyhow::Result<()> {
        let stream = match item.event_type.as_str() {
            "click" => afftok_shared::types::event::stream_keys::STREAM_CLICKS,
            "conversion" => afftok_shared::types::event::stream_keys::STREAM_CONVERSIONS,
            "postback" => afftok_shared::types::event::stream_keys::STREAM_POSTBACKS,
            other => anyhow::bail!("unknown failover event type: {other}"),
        };
        self.wal.append(&item.event_type, item.payload.clone()).await?;
        let fields = [("event_type", item.event_type.as_str()), ("payload", &item.payload.to_string())];
        self.redis.xadd(stream, &fields).await?;
        Ok(())
    }
}

// -- Stream consumer handler (4.H) --

/// Dispatches stream entries to their pipeline trigger. Clicks are triggered
/// here because step 7 of click ingestion only publishes to the stream;
/// conversions/postbacks already trigger synchronously in `postback_service`,
/// so this stream exists only to keep their `XPENDING` backlog drained.
pub struct StreamTriggerHandler {
    pub db: DbPool,
    pub webhook_worker: std::sync::Arc<crate::AppWebhookWorker>,
}

#[async_trait::async_trait]
impl afftok_stream::StreamHandler for StreamTriggerHandler {
    async fn handle(&self, event_type: &str, fields: &std::collections::HashMap<String, String>) -> anyhow::Result<()> {
        if event_type != "click" {
            return Ok(());
        }

        let payload: serde_json::Value = fields
            .get("payload")
            .map(|p| serde_json::from_str(p))
            .transpose()?
            .unwrap_or(serde_json::Value::Null);

        let user_offer_id = payload
            .get("user_offer_id")
            .and_then(|v| v.as_str())
            .and_then(|s| Uuid::parse_str(s).ok())
            .context("click event missing user_offer_id")?;

        let db = self.db.clone();
        let offer_id = tokio::task::spawn_blocking(move || -> anyhow::Result<Uuid> {
            let mut conn = db.get().context("checkout db connection")?;
            let row: crate::models::UserOffer = crate::schema::user_offers::table.find(user_offer_id).first(&mut conn)?;
            Ok(row.offer_id)
        })
        .await??;

        self.webhook_worker
            .trigger(afftok_webhooks::TriggerType::Click, Some(offer_id), None, payload)
            .await?;
        Ok(())
    }
}

/// WAL replay handler (4.I, invoked through `Replayer::replay_pending`).
///
/// By the time an entry reaches the WAL it has already been committed to
/// Postgres (WAL append is step 7 of click/postback ingestion, after the DB
/// transaction). Replaying a pending entry therefore does not re-insert —
/// it re-publishes to the durable stream, which is what a crash between the
/// WAL append and the stream publish would have skipped. The dedup check
/// against the row's natural key (fingerprint / external_id) guards against
/// replaying an entry whose row was rolled back by something else entirely.
pub fn replay_event(db: DbPool, redis: RedisClient, event_type: &str, payload: &serde_json::Value) -> anyhow::Result<()> {
    use afftok_shared::types::event::stream_keys;

    // `recover_inner` calls the replayer (and through it, this function) directly
    // on the async task's worker thread, not via `spawn_blocking`. Both the diesel
    // dedup check and the redis publish below do blocking/async work respectively,
    // so the whole body runs under one `block_in_place` to keep the runtime honest.
    tokio::task::block_in_place(|| {
        let stream = match event_type {
            "click" => {
                let fingerprint = payload.get("fingerprint").and_then(|v| v.as_str()).context("click payload missing fingerprint")?;
                if !row_exists_by(&db, "clicks", "fingerprint", fingerprint)? {
                    anyhow::bail!("replayed click not found in database, skipping republish");
                }
                stream_keys::STREAM_CLICKS
            }
            "conversion" => {
                let external_id = payload.get("external_id").and_then(|v| v.as_str()).context("conversion payload missing external_id")?;
                if !row_exists_by(&db, "conversions", "external_id", external_id)? {
                    anyhow::bail!("replayed conversion not found in database, skipping republish");
                }
                stream_keys::STREAM_CONVERSIONS
            }
            "postback" => stream_keys::STREAM_POSTBACKS,
            other => anyhow::bail!("unknown wal event type: {other}"),
        };

        let fields = [("event_type", event_type), ("payload", &payload.to_string())];
        tokio::runtime::Handle::current().block_on(redis.xadd(stream, &fields))?;
        Ok(())
    })
}

fn row_exists_by(db: &DbPool, table: &str, column: &str, value: &str) -> anyhow::Result<bool> {
    let mut conn = db.get().context("checkout db connection")?;
    let sql = format!("SELECT COUNT(*) AS count FROM {table} WHERE {column} = $1");
    let rows: Vec<CountRow> = diesel::sql_query(sql).bind::<diesel::sql_types::Text, _>(value).load(&mut conn)?;
    Ok(rows.first().map(|r| r.count).unwrap_or(0) > 0)
}

// -- Recovery engine adapters --

pub struct WalReplayer {
    pub wal: std::sync::Arc<afftok_wal::Wal>,
}

impl afftok_recovery::Replayer for WalReplayer {
    fn replay_pending(&self, handler: &mut dyn FnMut(&str, &serde_json::Value) -> anyhow::Result<()>) -> anyhow::Result<u64> {
        let mut count = 0u64;
        self.wal.replay(|record| {
            let outcome = handler(&record.event_type, &record.payload);
            if outcome.is_ok() {
                count += 1;
            }
            outcome
        })?;
        Ok(count)
    }
}

pub struct FailoverDrainQueue {
    pub queue: std::sync::Arc<afftok_failover::FailoverQueue>,
    pub sender: std::sync::Arc<dyn afftok_failover::DownstreamSender>,
}

#[async_trait::async_trait]
impl afftok_recovery::Queue for FailoverDrainQueue {
    async fn drain_once(&self) -> anyhow::Result<(u64, u64)> {
        let before = self.queue.stats();
        self.queue.process_queue(self.sender.as_ref()).await;
        let after = self.queue.stats();
        Ok((after.total_sent - before.total_sent, after.total_failed - before.total_failed))
    }
}

pub struct DieselConsistencyStore {
    pub db: DbPool,
}

#[derive(QueryableByName)]
struct CountRow {
    #[diesel(sql_type = BigInt)]
    count: i64,
}

#[async_trait::async_trait]
impl afftok_recovery::ConsistencyStore for DieselConsistencyStore {
    async fn orphan_clicks(&self) -> anyhow::Result<i64> {
        self.scalar_count("SELECT COUNT(*) AS count FROM clicks c LEFT JOIN user_offers uo ON uo.id = c.user_offer_id WHERE uo.id IS NULL").await
    }

    async fn orphan_conversions(&self) -> anyhow::Result<i64> {
        self.scalar_count("SELECT COUNT(*) AS count FROM conversions c LEFT JOIN user_offers uo ON uo.id = c.user_offer_id WHERE uo.id IS NULL").await
    }

    async fn click_count_mismatches(&self) -> anyhow::Result<i64> {
        self.scalar_count(
            "SELECT COUNT(*) AS count FROM user_offers uo \
             WHERE uo.total_clicks <> (SELECT COUNT(*) FROM clicks c WHERE c.user_offer_id = uo.id)",
        )
        .await
    }

    async fn conversion_count_mismatches(&self) -> anyhow::Result<i64> {
        self.scalar_count(
            "SELECT COUNT(*) AS count FROM user_offers uo \
             WHERE uo.total_conversions <> (SELECT COUNT(*) FROM conversions c WHERE c.user_offer_id = uo.id)",
        )
        .await
    }

    async fn fix_inconsistencies(&self) -> anyhow::Result<u64> {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || -> anyhow::Result<u64> {
            let mut conn = db.get().context("checkout db connection")?;
            let clicks_fixed = diesel::sql_query(
                "UPDATE user_offers uo SET total_clicks = (SELECT COUNT(*) FROM clicks c WHERE c.user_offer_id = uo.id) \
                 WHERE uo.total_clicks <> (SELECT COUNT(*) FROM clicks c WHERE c.user_offer_id = uo.id)",
            )
            .execute(&mut conn)?;
            let conversions_fixed = diesel::sql_query(
                "UPDATE user_offers uo SET total_conversions = (SELECT COUNT(*) FROM conversions c WHERE c.user_offer_id = uo.id) \
                 WHERE uo.total_conversions <> (SELECT COUNT(*) FROM conversions c WHERE c.user_offer_id = uo.id)",
            )
            .execute(&mut conn)?;
            Ok((clicks_fixed + conversions_fixed) as u64)
        })
        .await?
    }
}

impl DieselConsistencyStore {
    async fn scalar_count(&self, sql: &'static str) -> anyhow::Result<i64> {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || -> anyhow::Result<i64> {
            let mut conn = db.get().context("checkout db connection")?;
            let rows: Vec<CountRow> = diesel::sql_query(sql).load(&mut conn)?;
            Ok(rows.first().map(|r| r.count).unwrap_or(0))
        })
        .await?
    }
}
