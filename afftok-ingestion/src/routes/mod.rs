pub mod admin;
pub mod click;
pub mod edge_click;
pub mod health;
pub mod postback;

use axum::routing::{delete, get, post};
use axum::Router;
use std::sync::Arc;

use crate::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/health", get(health::health_check))
        .route("/metrics", get(health::metrics))
        .route("/api/c/:code", get(click::click_redirect))
        .route("/api/postback", post(postback::receive_postback))
        .route("/api/internal/edge-click", post(edge_click::ingest))
        .route("/api/admin/zero-drop/status", get(admin::status))
        .route("/api/admin/zero-drop/replay", post(admin::recover))
        .route("/api/admin/zero-drop/fix-inconsistencies", post(admin::fix_inconsistencies))
        .route("/api/admin/zero-drop/wal/compact", post(admin::wal_compact))
        .route("/api/admin/webhooks/pipelines", get(admin::list_pipelines).post(admin::create_pipeline))
        .route(
            "/api/admin/webhooks/pipelines/:id",
            get(admin::get_pipeline).put(admin::update_pipeline).delete(admin::delete_pipeline),
        )
        .route("/api/admin/webhooks/dlq", get(admin::dlq_list))
        .route("/api/admin/webhooks/dlq/:id", delete(admin::dlq_delete))
        .route("/api/admin/webhooks/dlq/:id/retry", post(admin::dlq_retry))
        .route("/api/admin/webhooks/signature-modes", get(admin::signature_modes))
        .route("/api/admin/conversions/:id/approve", post(admin::approve_conversion))
        .route("/api/admin/conversions/:id/reject", post(admin::reject_conversion))
}
