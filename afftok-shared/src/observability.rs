use std::collections::VecDeque;
use std::sync::{Mutex, OnceLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::field::{Field, Visit};
use tracing::Subscriber;
use tracing_subscriber::layer::Context;
use tracing_subscriber::Layer;
use uuid::Uuid;

use crate::clients::RedisClient;

const RING_CAPACITY: usize = 10_000;
const CACHE_LIST_CAPACITY: usize = 1_000;
const CACHE_LIST_TTL_SECS: i64 = 24 * 3600;
const FRAUD_DAILY_TTL_SECS: i64 = 7 * 24 * 3600;

/// A structured observability event (§4.M). Every subsystem that reports
/// fraud, delivery, or recovery activity emits one of these in addition to
/// its plain `tracing` call; the two are not redundant, the `tracing` call
/// goes to stdout/log aggregation, this one feeds the admin-facing ring
/// buffer and per-category cache lists.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEvent {
    pub timestamp: DateTime<Utc>,
    pub level: String,
    pub category: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<Uuid>,
    #[serde(skip_serializing_if = "serde_json::Map::is_empty", default)]
    pub entity_ids: serde_json::Map<String, serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub risk_score: Option<u8>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub indicators: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "serde_json::Map::is_empty", default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl LogEvent {
    pub fn new(level: impl Into<String>, category: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            level: level.into(),
            category: category.into(),
            message: message.into(),
            correlation_id: None,
            entity_ids: serde_json::Map::new(),
            ip: None,
            user_agent: None,
            risk_score: None,
            indicators: Vec::new(),
            duration_ms: None,
            error: None,
            metadata: serde_json::Map::new(),
        }
    }

    pub fn with_ip(mut self, ip: impl Into<String>) -> Self {
        self.ip = Some(ip.into());
        self
    }

    pub fn with_user_agent(mut self, ua: impl Into<String>) -> Self {
        self.user_agent = Some(ua.into());
        self
    }

    pub fn with_risk_score(mut self, score: u8) -> Self {
        self.risk_score = Some(score);
        self
    }

    pub fn with_indicator(mut self, indicator: impl Into<String>) -> Self {
        self.indicators.push(indicator.into());
        self
    }

    pub fn with_correlation_id(mut self, id: Uuid) -> Self {
        self.correlation_id = Some(id);
        self
    }

    pub fn with_entity(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.entity_ids.insert(key.into(), v);
        }
        self
    }

    pub fn is_fraud(&self) -> bool {
        self.category == "fraud"
    }
}

fn ring() -> &'static Mutex<VecDeque<LogEvent>> {
    static RING: OnceLock<Mutex<VecDeque<LogEvent>>> = OnceLock::new();
    RING.get_or_init(|| Mutex::new(VecDeque::with_capacity(RING_CAPACITY)))
}

/// Push an event into the process-wide ring buffer, dropping the oldest 10%
/// once capacity is reached rather than evicting one at a time.
pub fn push_event(event: LogEvent) {
    let mut buf = ring().lock().unwrap_or_else(|e| e.into_inner());
    if buf.len() >= RING_CAPACITY {
        let drop_count = RING_CAPACITY / 10;
        for _ in 0..drop_count {
            buf.pop_front();
        }
    }
    buf.push_back(event);
}

pub fn ring_snapshot(category: Option<&str>, limit: usize) -> Vec<LogEvent> {
    let buf = ring().lock().unwrap_or_else(|e| e.into_inner());
    buf.iter()
        .rev()
        .filter(|e| category.map(|c| e.category == c).unwrap_or(true))
        .take(limit)
        .cloned()
        .collect()
}

/// Mirror an event into the cache's per-category list (last 1000, 24h TTL);
/// fraud-category events additionally persist under a per-day key for 7 days
/// so operators can pull a day's fraud events even after the rolling list
/// has cycled past them.
pub async fn persist_to_cache(redis: &RedisClient, event: &LogEvent) {
    let Ok(serialized) = serde_json::to_string(event) else {
        return;
    };

    let list_key = format!("logs:{}", event.category);
    if let Err(e) = redis.zadd(&list_key, &serialized, event.timestamp.timestamp_millis() as f64).await {
        tracing::warn!(error = %e, "failed to persist log event to cache list");
        return;
    }
    let _ = redis.expire(&list_key, CACHE_LIST_TTL_SECS).await;
    trim_cache_list(redis, &list_key).await;

    if event.is_fraud() {
        let day_key = format!("logs:fraud:{}", event.timestamp.format("%Y-%m-%d"));
        if redis.zadd(&day_key, &serialized, event.timestamp.timestamp_millis() as f64).await.is_ok() {
            let _ = redis.expire(&day_key, FRAUD_DAILY_TTL_SECS).await;
        }
    }
}

async fn trim_cache_list(redis: &RedisClient, key: &str) {
    if let Ok(count) = redis.zcard(key).await {
        if count > CACHE_LIST_CAPACITY as u64 {
            let overflow = (count - CACHE_LIST_CAPACITY as u64) as isize;
            if let Ok(oldest) = redis.zrange(key, 0, overflow - 1).await {
                for member in oldest {
                    let _ = redis.zrem(key, &member).await;
                }
            }
        }
    }
}

/// A `tracing_subscriber::Layer` that captures events carrying a `category`
/// field and mirrors them into the ring buffer automatically, so call sites
/// only need `tracing::warn!(category = "fraud", indicator = "geo_block", ...)`
/// rather than a second manual `push_event` call for every log line.
pub struct ObservabilityLayer {
    _private: (),
}

impl ObservabilityLayer {
    pub fn new() -> Self {
        Self { _private: () }
    }
}

impl Default for ObservabilityLayer {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: Subscriber> Layer<S> for ObservabilityLayer {
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = FieldVisitor::default();
        event.record(&mut visitor);

        let Some(category) = visitor.category else {
            return;
        };

        let mut log_event = LogEvent::new(event.metadata().level().to_string(), category, visitor.message);
        log_event.ip = visitor.ip;
        log_event.user_agent = visitor.user_agent;
        log_event.risk_score = visitor.risk_score;
        log_event.error = visitor.error;
        if let Some(indicator) = visitor.indicator {
            log_event = log_event.with_indicator(indicator);
        }
        push_event(log_event);
    }
}

#[derive(Default)]
struct FieldVisitor {
    message: String,
    category: Option<String>,
    ip: Option<String>,
    user_agent: Option<String>,
    indicator: Option<String>,
    risk_score: Option<u8>,
    error: Option<String>,
}

impl Visit for FieldVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        self.record_field(field.name(), format!("{value:?}"));
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.record_field(field.name(), value.to_string());
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        if field.name() == "risk_score" {
            self.risk_score = Some(value.min(100) as u8);
        }
    }
}

impl FieldVisitor {
    fn record_field(&mut self, name: &str, value: String) {
        match name {
            "message" => self.message = value,
            "category" => self.category = Some(value),
            "ip" => self.ip = Some(value),
            "user_agent" | "ua" => self.user_agent = Some(value),
            "indicator" => self.indicator = Some(value),
            "error" => self.error = Some(value),
            _ => {}
        }
    }
}
