pub mod types;
pub mod errors;
pub mod middleware;
pub mod clients;
pub mod observability;

pub use types::*;
pub use errors::{AppError, ErrorCode, AppResult};
pub use observability::LogEvent;
