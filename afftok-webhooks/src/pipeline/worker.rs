use super::dlq::DlqStore;
use super::queue::WebhookQueues;
use super::types::{truncate_body, StepExecutionResult, TriggerType, WebhookPipeline, WebhookTask};
use crate::signing::{sign_hmac, sign_jwt, SigningError, SigningMode};
use crate::template::{render, TemplateContext, TemplateError};
use rand::Rng;
use std::time::Duration;
use uuid::Uuid;

#[async_trait::async_trait]
pub trait PipelineProvider: Send + Sync {
    async fn get(&self, pipeline_id: Uuid) -> anyhow::Result<Option<WebhookPipeline>>;
    async fn matching(&self, trigger_type: TriggerType) -> anyhow::Result<Vec<WebhookPipeline>>;
}

#[async_trait::async_trait]
pub trait ExecutionStore: Send + Sync {
    async fn create(&self, execution_id: Uuid, pipeline_id: Uuid) -> anyhow::Result<()>;
    async fn record_step(&self, execution_id: Uuid, step_index: u32, result: &StepExecutionResult) -> anyhow::Result<()>;
    async fn mark_succeeded(&self, execution_id: Uuid) -> anyhow::Result<()>;
    async fn mark_failed(&self, execution_id: Uuid, error: &str) -> anyhow::Result<()>;
}

pub enum StepOutcome {
    Succeeded,
    ContinuedAfterFailure,
    Retrying,
    /// No retry left; execution moved to the DLQ.
    ExhaustedToDlq,
    /// Fatal, non-retryable configuration error (missing pipeline/step,
    /// bad URL template, signing failure).
    Fatal(String),
    /// Retries exhausted with no HTTP response at all (connection refused,
    /// DNS failure, timeout) — routed to the failover queue instead of the
    /// DLQ, since the failure looks like a downstream backend outage rather
    /// than a bad task.
    RoutedToFailover,
}

pub struct WebhookWorker<P, E, D> {
    queues: WebhookQueues,
    pipelines: P,
    executions: E,
    dlq: D,
    http: reqwest::Client,
}

impl<P, E, D> WebhookWorker<P, E, D>
where
    P: PipelineProvider,
    E: ExecutionStore,
    D: DlqStore,
{
    pub fn new(queues: WebhookQueues, pipelines: P, executions: E, dlq: D) -> Self {
        Self { queues, pipelines, executions, dlq, http: reqwest::Client::new() }
    }

    pub async fn trigger(
        &self,
        trigger_type: TriggerType,
        offer_id: Option<Uuid>,
        advertiser_id: Option<Uuid>,
        payload: serde_json::Value,
    ) -> anyhow::Result<u32> {
        let candidates = self.pipelines.matching(trigger_type).await?;
        let matched = super::resolve::resolve_pipelines(&candidates, offer_id, advertiser_id);

        let mut enqueued = 0;
        for pipeline in matched {
            let task = WebhookTask::new(pipeline, payload.clone());
            self.executions.create(task.execution_id, task.pipeline_id).await?;
            self.queues.push_primary(&task).await?;
            enqueued += 1;
        }
        Ok(enqueued)
    }

    pub async fn process_one(&self, task: WebhookTask) -> anyhow::Result<StepOutcome> {
        let Some(pipeline) = self.pipelines.get(task.pipeline_id).await? else {
            self.executions.mark_failed(task.execution_id, "pipeline missing").await?;
            return Ok(StepOutcome::Fatal("pipeline missing".to_string()));
        };

        let Some(step) = pipeline.steps.get(task.step_index as usize) else {
            self.executions.mark_failed(task.execution_id, "step missing").await?;
            return Ok(StepOutcome::Fatal("step missing".to_string()));
        };

        let mut ctx = TemplateContext::new();
        if let serde_json::Value::Object(map) = &task.payload {
            for (k, v) in map {
                ctx.set(k, v.clone());
            }
        }
        ctx.scalars(chrono::Utc::now(), "", &task.execution_id.to_string());

        let url = match render(&step.url_template, &ctx) {
            Ok(url) => url,
            Err(err) => return self.fail_fatal(&task, &format!("url template: {err}")).await,
        };
        let body = match render(&step.body_template, &ctx) {
            Ok(body) => body,
            Err(err) => return self.fail_fatal(&task, &format!("body template: {err}")).await,
        };

        let mut headers = reqwest::header::HeaderMap::new();
        for (k, v_template) in &step.headers_template {
            let rendered = match render(v_template, &ctx) {
                Ok(v) => v,
                Err(err) => return self.fail_fatal(&task, &format!("header template: {err}")).await,
            };
            if let (Ok(name), Ok(value)) = (
                reqwest::header::HeaderName::from_bytes(k.as_bytes()),
                reqwest::header::HeaderValue::from_str(&rendered),
            ) {
                headers.insert(name, value);
            }
        }

        if let Err(err) = self.apply_signature(&mut headers, &step.signing_mode, &step.secret, &body, &task, &pipeline) {
            return self.fail_fatal(&task, &format!("signing failed: {err}")).await;
        }

        let start = std::time::Instant::now();
        let response = self
            .http
            .post(&url)
            .headers(headers)
            .timeout(Duration::from_millis(step.timeout_ms))
            .body(body)
            .send()
            .await;
        let duration_ms = start.elapsed().as_millis() as u64;

        let result = match response {
            Ok(resp) => {
                let status = resp.status();
                let body_text = resp.text().await.unwrap_or_default();
                StepExecutionResult {
                    status_code: Some(status.as_u16()),
                    response_body: truncate_body(&body_text),
                    error: if status.is_success() { None } else { Some(format!("status {status}")) },
                    duration_ms,
                }
            }
            Err(err) => StepExecutionResult { status_code: None, response_body: String::new(), error: Some(err.to_string()), duration_ms },
        };

        self.executions.record_step(task.execution_id, task.step_index, &result).await?;
        metrics::counter!("afftok_webhook_steps_total").increment(1);

        if result.error.is_none() {
            self.on_step_success(task, &pipeline, &result).await
        } else {
            let transient = is_transient_status(result.status_code);
            let is_outage = result.status_code.is_none();
            self.on_step_failure(task, step.continue_on_fail, &pipeline, result.error.unwrap_or_default(), transient, is_outage).await
        }
    }

    async fn fail_fatal(&self, task: &WebhookTask, reason: &str) -> anyhow::Result<StepOutcome> {
        self.executions.mark_failed(task.execution_id, reason).await?;
        Ok(StepOutcome::Fatal(reason.to_string()))
    }

    fn apply_signature(
        &self,
        headers: &mut reqwest::header::HeaderMap,
        mode: &SigningMode,
        secret: &str,
        body: &str,
        task: &WebhookTask,
        pipeline: &WebhookPipeline,
    ) -> Result<(), SigningError> {
        match mode {
            SigningMode::Hmac => {
                let signed = sign_hmac(secret, body)?;
                headers.insert("X-Afftok-Signature", signed.signature.parse().unwrap());
                headers.insert("X-Afftok-Timestamp", signed.timestamp.parse().unwrap());
                headers.insert("X-Afftok-Algorithm", signed.algorithm.parse().unwrap());
            }
            SigningMode::Jwt => {
                let token = sign_jwt(
                    secret,
                    &task.execution_id.to_string(),
                    pipeline.advertiser_id.map(|id| id.to_string()).as_deref(),
                    &pipeline.id.to_string(),
                    &task.execution_id.to_string(),
                    task.step_index,
                )?;
                let value = format!("Bearer {token}");
                headers.insert(reqwest::header::AUTHORIZATION, value.parse().unwrap());
            }
        }
        Ok(())
    }

    async fn on_step_success(&self, task: WebhookTask, pipeline: &WebhookPipeline, result: &StepExecutionResult) -> anyhow::Result<StepOutcome> {
        let has_next = (task.step_index as usize + 1) < pipeline.steps.len();
        if has_next {
            let mut next_payload = task.payload.clone();
            if let serde_json::Value::Object(map) = &mut next_payload {
                let custom = map.entry("custom").or_insert_with(|| serde_json::json!({}));
                if let serde_json::Value::Object(custom_map) = custom {
                    custom_map.insert("prev_step".to_string(), serde_json::Value::String(result.response_body.clone()));
                }
            }
            let next_task = WebhookTask {
                step_index: task.step_index + 1,
                payload: next_payload,
                attempts: 0,
                last_error: None,
                enqueue_time: chrono::Utc::now().timestamp_millis(),
                ..task
            };
            self.queues.push_primary(&next_task).await?;
        } else {
            self.executions.mark_succeeded(task.execution_id).await?;
        }
        Ok(StepOutcome::Succeeded)
    }

    async fn on_step_failure(
        &self,
        mut task: WebhookTask,
        continue_on_fail: bool,
        pipeline: &WebhookPipeline,
        error: String,
        transient: bool,
        is_outage: bool,
    ) -> anyhow::Result<StepOutcome> {
        if transient && task.attempts < task.max_retries {
            task.attempts += 1;
            task.last_error = Some(error);
            let next_attempt_at = chrono::Utc::now().timestamp_millis() + backoff_with_jitter(task.attempts).as_millis() as i64;
            self.queues.push_retry(&task, next_attempt_at).await?;
            return Ok(StepOutcome::Retrying);
        }

        if is_outage {
            task.last_error = Some(error);
            self.queues.push_failover(&task).await?;
            return Ok(StepOutcome::RoutedToFailover);
        }

        if continue_on_fail {
            let fake_result = StepExecutionResult { status_code: None, response_body: String::new(), error: Some(error), duration_ms: 0 };
            return self.on_step_success(task, pipeline, &fake_result).await.map(|_| StepOutcome::ContinuedAfterFailure);
        }

        self.executions.mark_failed(task.execution_id, &error).await?;
        self.dlq.add(task, Some(error)).await?;
        Ok(StepOutcome::ExhaustedToDlq)
    }

    /// Retries tasks parked on the failover queue. Separate from
    /// `drain_due_retries` so an extended downstream outage doesn't starve
    /// ordinary per-task retries out of the shared retry key.
    pub async fn drain_failover(&self, limit: isize) -> anyhow::Result<usize> {
        let tasks = self.queues.pop_failover(limit).await?;
        Ok(self.process_batch(tasks).await)
    }

    pub async fn drain_primary(&self, limit: isize) -> anyhow::Result<usize> {
        let tasks = self.queues.pop_primary(limit).await?;
        Ok(self.process_batch(tasks).await)
    }

    pub async fn drain_due_retries(&self, limit: isize) -> anyhow::Result<usize> {
        let now = chrono::Utc::now().timestamp_millis();
        let tasks = self.queues.pop_due_retry(now, limit).await?;
        Ok(self.process_batch(tasks).await)
    }

    /// Tasks here were already popped off their Redis queue, so a failure on
    /// one must not abandon the rest of the batch — each task gets its own
    /// `process_one` outcome (retry/DLQ/failover as appropriate), and a
    /// `process_one` error itself (e.g. a DB error recording the attempt)
    /// is logged and skipped rather than dropping every task after it.
    async fn process_batch(&self, tasks: Vec<WebhookTask>) -> usize {
        let count = tasks.len();
        for task in tasks {
            let execution_id = task.execution_id;
            if let Err(err) = self.process_one(task).await {
                tracing::error!(execution_id = %execution_id, error = %err, "webhook task processing failed");
            }
        }
        count
    }
}

/// Transient downstream failures (network errors, 5xx, and the retry-worthy
/// 4xx codes 408/425/429) get retried with backoff; every other 4xx is a
/// permanent failure that marks the step failed immediately.
fn is_transient_status(status_code: Option<u16>) -> bool {
    match status_code {
        None => true,
        Some(code) => code >= 500 || matches!(code, 408 | 425 | 429),
    }
}

fn backoff_with_jitter(attempts: u32) -> Duration {
    let base_secs = 2u64.saturating_pow(attempts.min(10));
    let capped = base_secs.min(300);
    let jitter_frac: f64 = rand::thread_rng().gen_range(0.0..0.2);
    Duration::from_secs_f64(capped as f64 * (1.0 + jitter_frac))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_and_caps() {
        let small = backoff_with_jitter(1);
        let large = backoff_with_jitter(9);
        assert!(small.as_secs() < large.as_secs());
        assert!(backoff_with_jitter(20).as_secs() <= 300 * 2);
    }

    #[test]
    fn network_errors_are_transient() {
        assert!(is_transient_status(None));
    }

    #[test]
    fn server_errors_are_transient() {
        assert!(is_transient_status(Some(500)));
        assert!(is_transient_status(Some(503)));
    }

    #[test]
    fn retry_worthy_4xx_codes_are_transient() {
        assert!(is_transient_status(Some(408)));
        assert!(is_transient_status(Some(425)));
        assert!(is_transient_status(Some(429)));
    }

    #[test]
    fn ordinary_4xx_codes_are_permanent() {
        assert!(!is_transient_status(Some(400)));
        assert!(!is_transient_status(Some(404)));
        assert!(!is_transient_status(Some(422)));
    }
}
