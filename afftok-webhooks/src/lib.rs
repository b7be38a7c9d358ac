pub mod pipeline;
pub mod signing;
pub mod template;

pub use pipeline::{resolve_pipelines, DlqItem, DlqStore, ExecutionStore, PipelineProvider, StepOutcome, TriggerType, WebhookPipeline, WebhookQueues, WebhookStep, WebhookTask, WebhookWorker};
pub use signing::{sign_hmac, sign_jwt, verify_hmac, verify_jwt, SigningError, SigningMode};
pub use template::{render, TemplateContext, TemplateError};
