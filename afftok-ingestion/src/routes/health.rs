use afftok_shared::{HealthCheck, HealthResponse, HealthStatus};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use std::sync::Arc;

use crate::AppState;

pub async fn health_check(State(state): State<Arc<AppState>>) -> Response {
    let db_check = match state.db.get() {
        Ok(_) => HealthCheck { name: "postgres".into(), status: HealthStatus::Healthy, message: None },
        Err(e) => HealthCheck { name: "postgres".into(), status: HealthStatus::Unhealthy, message: Some(e.to_string()) },
    };

    let redis_check = match state.redis.get("healthcheck:probe").await {
        Ok(_) => HealthCheck { name: "redis".into(), status: HealthStatus::Healthy, message: None },
        Err(e) => HealthCheck { name: "redis".into(), status: HealthStatus::Unhealthy, message: Some(e.to_string()) },
    };

    let wal_metrics = state.wal.metrics();
    let wal_check = HealthCheck {
        name: "wal".into(),
        status: if wal_metrics.is_running { HealthStatus::Healthy } else { HealthStatus::Degraded },
        message: Some(format!("pending={} failed={} corrupted={}", wal_metrics.pending, wal_metrics.failed, wal_metrics.corrupted)),
    };

    let response = HealthResponse::healthy("afftok-ingestion", env!("CARGO_PKG_VERSION"))
        .with_checks(vec![db_check, redis_check, wal_check]);

    let status = match response.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status, Json(response)).into_response()
}

pub async fn metrics(State(state): State<Arc<AppState>>) -> String {
    state.metrics_handle.render()
}
