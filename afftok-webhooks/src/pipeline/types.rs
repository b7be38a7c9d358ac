use crate::signing::SigningMode;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    Click,
    Conversion,
    Postback,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineScope {
    Offer(Uuid),
    Advertiser(Uuid),
    Global,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookStep {
    pub url_template: String,
    pub headers_template: std::collections::HashMap<String, String>,
    pub body_template: String,
    pub signing_mode: SigningMode,
    pub secret: String,
    pub timeout_ms: u64,
    pub continue_on_fail: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookPipeline {
    pub id: Uuid,
    pub trigger_type: TriggerType,
    pub offer_id: Option<Uuid>,
    pub advertiser_id: Option<Uuid>,
    pub active: bool,
    pub steps: Vec<WebhookStep>,
    pub max_retries: u32,
    pub priority: i32,
}

impl WebhookPipeline {
    pub fn scope(&self) -> PipelineScope {
        match (self.offer_id, self.advertiser_id) {
            (Some(offer_id), _) => PipelineScope::Offer(offer_id),
            (None, Some(advertiser_id)) => PipelineScope::Advertiser(advertiser_id),
            (None, None) => PipelineScope::Global,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookTask {
    pub execution_id: Uuid,
    pub pipeline_id: Uuid,
    pub step_index: u32,
    pub payload: serde_json::Value,
    pub attempts: u32,
    pub max_retries: u32,
    pub priority: i32,
    pub enqueue_time: i64,
    pub last_error: Option<String>,
}

impl WebhookTask {
    pub fn new(pipeline: &WebhookPipeline, payload: serde_json::Value) -> Self {
        Self {
            execution_id: Uuid::new_v4(),
            pipeline_id: pipeline.id,
            step_index: 0,
            payload,
            attempts: 0,
            max_retries: pipeline.max_retries,
            priority: pipeline.priority,
            enqueue_time: chrono::Utc::now().timestamp_millis(),
            last_error: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepExecutionResult {
    pub status_code: Option<u16>,
    pub response_body: String,
    pub error: Option<String>,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Running,
    Succeeded,
    Failed,
}

const MAX_RESPONSE_BODY_LEN: usize = 4096;

pub fn truncate_body(body: &str) -> String {
    if body.len() <= MAX_RESPONSE_BODY_LEN {
        return body.to_string();
    }
    let mut end = MAX_RESPONSE_BODY_LEN;
    while end > 0 && !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}... [truncated]", &body[..end])
}
