use chrono::{DateTime, Utc};
use diesel::prelude::*;
use uuid::Uuid;

use crate::schema::{geo_rules, webhook_executions, webhook_pipelines, webhook_step_results, webhook_steps};

#[derive(Debug, Queryable, Identifiable, Clone)]
#[diesel(table_name = geo_rules)]
pub struct GeoRuleRow {
    pub id: Uuid,
    pub scope_type: String,
    pub scope_id: Option<Uuid>,
    pub mode: String,
    pub countries: Vec<String>,
    pub priority: i32,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Queryable, Identifiable, Clone)]
#[diesel(table_name = webhook_pipelines)]
pub struct WebhookPipelineRow {
    pub id: Uuid,
    pub trigger_type: String,
    pub offer_id: Option<Uuid>,
    pub advertiser_id: Option<Uuid>,
    pub active: bool,
    pub max_retries: i32,
    pub priority: i32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Queryable, Identifiable, Clone)]
#[diesel(table_name = webhook_steps)]
pub struct WebhookStepRow {
    pub id: Uuid,
    pub pipeline_id: Uuid,
    pub step_index: i32,
    pub url_template: String,
    pub headers_template: serde_json::Value,
    pub body_template: String,
    pub signing_mode: String,
    pub secret: String,
    pub timeout_ms: i64,
    pub continue_on_fail: bool,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = webhook_pipelines)]
pub struct NewWebhookPipeline {
    pub trigger_type: String,
    pub offer_id: Option<Uuid>,
    pub advertiser_id: Option<Uuid>,
    pub active: bool,
    pub max_retries: i32,
    pub priority: i32,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = webhook_steps)]
pub struct NewWebhookStep {
    pub pipeline_id: Uuid,
    pub step_index: i32,
    pub url_template: String,
    pub headers_template: serde_json::Value,
    pub body_template: String,
    pub signing_mode: String,
    pub secret: String,
    pub timeout_ms: i64,
    pub continue_on_fail: bool,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = webhook_executions)]
pub struct NewWebhookExecution {
    pub id: Uuid,
    pub pipeline_id: Uuid,
    pub status: String,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = webhook_step_results)]
pub struct NewWebhookStepResult {
    pub execution_id: Uuid,
    pub step_index: i32,
    pub status_code: Option<i32>,
    pub response_body: String,
    pub error: Option<String>,
    pub duration_ms: i64,
}
