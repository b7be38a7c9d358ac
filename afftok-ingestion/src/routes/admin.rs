use afftok_shared::errors::AppError;
use afftok_shared::middleware::AdminPrincipal;
use afftok_shared::types::ApiResponse;
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::adapters;
use crate::services::postback_service;
use crate::AppState;

/// `GET /api/admin/status` — zero-drop / durability-plane snapshot.
pub async fn status(_admin: AdminPrincipal, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let wal = state.wal.metrics();
    let failover = state.failover.stats();
    Json(ApiResponse::ok(serde_json::json!({
        "zero_drop_mode": state.config.zero_drop_mode,
        "wal": wal,
        "failover": failover,
    })))
}

/// `POST /api/admin/recover` — on-demand re-run of the boot recovery sequence.
pub async fn recover(_admin: AdminPrincipal, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let db = state.db.clone();
    let redis = state.redis.clone();
    let mut handler = move |event_type: &str, payload: &serde_json::Value| {
        adapters::replay_event(db.clone(), redis.clone(), event_type, payload)
    };

    match state.recovery.recover(&mut handler).await {
        Ok(report) => Json(ApiResponse::ok(report)).into_response(),
        Err(afftok_recovery::RecoveryError::AlreadyRunning) => {
            AppError::new(afftok_shared::errors::ErrorCode::ServiceUnavailable, "a recovery pass is already running").into_response()
        }
        Err(afftok_recovery::RecoveryError::Other(e)) => AppError::internal(e.to_string()).into_response(),
    }
}

/// `POST /api/admin/fix-inconsistencies`
pub async fn fix_inconsistencies(_admin: AdminPrincipal, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.recovery.fix_inconsistencies().await {
        Ok(report) => Json(ApiResponse::ok(report)).into_response(),
        Err(e) => AppError::internal(e.to_string()).into_response(),
    }
}

/// `POST /api/admin/wal-compact`
pub async fn wal_compact(_admin: AdminPrincipal, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.wal.compact() {
        Ok(removed) => Json(ApiResponse::ok(serde_json::json!({ "segments_removed": removed }))).into_response(),
        Err(e) => AppError::internal(e.to_string()).into_response(),
    }
}

/// `GET /api/admin/dlq`
pub async fn dlq_list(
    _admin: AdminPrincipal,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let dlq = crate::adapters::RedisDlqStore { redis: state.redis.clone() };
    match afftok_webhooks::DlqStore::list(&dlq).await {
        Ok(items) => Json(ApiResponse::ok(items)).into_response(),
        Err(e) => AppError::internal(e.to_string()).into_response(),
    }
}

/// `DELETE /api/admin/dlq/:id`
pub async fn dlq_delete(
    _admin: AdminPrincipal,
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    let dlq = crate::adapters::RedisDlqStore { redis: state.redis.clone() };
    match afftok_webhooks::DlqStore::delete(&dlq, id).await {
        Ok(found) => Json(ApiResponse::ok(serde_json::json!({ "deleted": found }))).into_response(),
        Err(e) => AppError::internal(e.to_string()).into_response(),
    }
}

/// `POST /api/admin/dlq/:id/retry` — re-enqueues one DLQ item onto the
/// primary queue with its attempt count reset.
pub async fn dlq_retry(
    _admin: AdminPrincipal,
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    let dlq = crate::adapters::RedisDlqStore { redis: state.redis.clone() };
    match afftok_webhooks::DlqStore::take_for_retry(&dlq, id).await {
        Ok(Some(task)) => {
            let queues = afftok_webhooks::WebhookQueues::new(state.redis.clone());
            match queues.push_primary(&task).await {
                Ok(_) => Json(ApiResponse::ok(serde_json::json!({ "requeued": true }))).into_response(),
                Err(e) => AppError::internal(e.to_string()).into_response(),
            }
        }
        Ok(None) => AppError::not_found("dlq item not found").into_response(),
        Err(e) => AppError::internal(e.to_string()).into_response(),
    }
}

/// `GET /api/admin/signature-modes` — operator reference for 4.K.
pub async fn signature_modes() -> impl IntoResponse {
    Json(ApiResponse::ok(serde_json::json!({
        "modes": [
            {
                "mode": "hmac",
                "headers": ["X-Signature", "X-Timestamp", "X-Signature-Algorithm"],
                "algorithm": "HMAC-SHA256 over \"{timestamp}.{body}\"",
            },
            {
                "mode": "jwt",
                "header": "Authorization: Bearer <token>",
                "algorithm": "HS256",
                "claims": ["task_id", "advertiser_id", "pipeline_id", "execution_id", "step_index", "timestamp", "iss", "sub", "iat", "exp", "nbf", "jti"],
            },
        ],
    })))
}

#[derive(Debug, Deserialize)]
pub struct StepBody {
    pub url_template: String,
    pub headers_template: std::collections::HashMap<String, String>,
    pub body_template: String,
    pub signing_mode: afftok_webhooks::SigningMode,
    pub secret: String,
    pub timeout_ms: u64,
    #[serde(default)]
    pub continue_on_fail: bool,
}

#[derive(Debug, Deserialize)]
pub struct PipelineBody {
    pub trigger_type: afftok_webhooks::TriggerType,
    pub offer_id: Option<Uuid>,
    pub advertiser_id: Option<Uuid>,
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(default)]
    pub max_retries: u32,
    #[serde(default)]
    pub priority: i32,
    pub steps: Vec<StepBody>,
}

fn default_active() -> bool {
    true
}

#[derive(Debug, Deserialize)]
pub struct SetActiveBody {
    pub active: bool,
}

/// `GET /api/admin/webhooks/pipelines`
pub async fn list_pipelines(_admin: AdminPrincipal, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.pipelines.list().await {
        Ok(pipelines) => Json(ApiResponse::ok(pipelines)).into_response(),
        Err(e) => AppError::internal(e.to_string()).into_response(),
    }
}

/// `GET /api/admin/webhooks/pipelines/:id`
pub async fn get_pipeline(_admin: AdminPrincipal, State(state): State<Arc<AppState>>, Path(id): Path<Uuid>) -> impl IntoResponse {
    match afftok_webhooks::PipelineProvider::get(&state.pipelines, id).await {
        Ok(Some(pipeline)) => Json(ApiResponse::ok(pipeline)).into_response(),
        Ok(None) => AppError::not_found("pipeline not found").into_response(),
        Err(e) => AppError::internal(e.to_string()).into_response(),
    }
}

/// `POST /api/admin/webhooks/pipelines`
pub async fn create_pipeline(_admin: AdminPrincipal, State(state): State<Arc<AppState>>, Json(body): Json<PipelineBody>) -> impl IntoResponse {
    let draft = adapters::PipelineDraft {
        trigger_type: body.trigger_type,
        offer_id: body.offer_id,
        advertiser_id: body.advertiser_id,
        active: body.active,
        max_retries: body.max_retries,
        priority: body.priority,
        steps: body
            .steps
            .into_iter()
            .map(|s| adapters::StepDraft {
                url_template: s.url_template,
                headers_template: s.headers_template,
                body_template: s.body_template,
                signing_mode: s.signing_mode,
                secret: s.secret,
                timeout_ms: s.timeout_ms,
                continue_on_fail: s.continue_on_fail,
            })
            .collect(),
    };
    match state.pipelines.create(draft).await {
        Ok(pipeline) => Json(ApiResponse::ok(pipeline)).into_response(),
        Err(e) => AppError::internal(e.to_string()).into_response(),
    }
}

/// `PUT /api/admin/webhooks/pipelines/:id` — toggles active/inactive; steps
/// are immutable once created, recreate the pipeline to change them.
pub async fn update_pipeline(
    _admin: AdminPrincipal,
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(body): Json<SetActiveBody>,
) -> impl IntoResponse {
    match state.pipelines.set_active(id, body.active).await {
        Ok(true) => Json(ApiResponse::ok(serde_json::json!({ "updated": true }))).into_response(),
        Ok(false) => AppError::not_found("pipeline not found").into_response(),
        Err(e) => AppError::internal(e.to_string()).into_response(),
    }
}

/// `DELETE /api/admin/webhooks/pipelines/:id`
pub async fn delete_pipeline(_admin: AdminPrincipal, State(state): State<Arc<AppState>>, Path(id): Path<Uuid>) -> impl IntoResponse {
    match state.pipelines.delete(id).await {
        Ok(true) => Json(ApiResponse::ok(serde_json::json!({ "deleted": true }))).into_response(),
        Ok(false) => AppError::not_found("pipeline not found").into_response(),
        Err(e) => AppError::internal(e.to_string()).into_response(),
    }
}

#[derive(Debug, Deserialize)]
pub struct RejectBody {
    pub reason: String,
}

/// `POST /api/admin/conversions/:id/approve`
pub async fn approve_conversion(
    _admin: AdminPrincipal,
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    match postback_service::approve(&state, id).await {
        Ok(conversion) => Json(ApiResponse::ok(conversion)).into_response(),
        Err(e) => e.into_response(),
    }
}

/// `POST /api/admin/conversions/:id/reject`
pub async fn reject_conversion(
    _admin: AdminPrincipal,
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(body): Json<RejectBody>,
) -> impl IntoResponse {
    match postback_service::reject(&state, id, body.reason).await {
        Ok(conversion) => Json(ApiResponse::ok(conversion)).into_response(),
        Err(e) => e.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pipeline_body_defaults_active_true_when_omitted() {
        let body: PipelineBody = serde_json::from_str(r#"{"trigger_type":"click","steps":[]}"#).unwrap();
        assert!(body.active);
        assert_eq!(body.max_retries, 0);
        assert_eq!(body.priority, 0);
    }

    #[test]
    fn pipeline_body_honors_explicit_active_false() {
        let body: PipelineBody = serde_json::from_str(r#"{"trigger_type":"postback","active":false,"steps":[]}"#).unwrap();
        assert!(!body.active);
    }

    #[test]
    fn step_body_defaults_continue_on_fail_false() {
        let body: StepBody = serde_json::from_str(
            r#"{"url_template":"https://x","headers_template":{},"body_template":"{}","signing_mode":"hmac","secret":"s","timeout_ms":1000}"#,
        )
        .unwrap();
        assert!(!body.continue_on_fail);
    }
}
