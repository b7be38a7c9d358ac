pub mod dlq;
pub mod queue;
pub mod resolve;
pub mod types;
pub mod worker;

pub use dlq::{prepare_retry, DlqItem, DlqStore};
pub use queue::WebhookQueues;
pub use resolve::resolve_pipelines;
pub use types::{ExecutionStatus, PipelineScope, StepExecutionResult, TriggerType, WebhookPipeline, WebhookStep, WebhookTask};
pub use worker::{ExecutionStore, PipelineProvider, StepOutcome, WebhookWorker};
