//! Security gate (component B): bot scoring, sliding-window rate limiting,
//! and click fingerprint dedup.

mod bot;
mod fingerprint;
mod rate_limit;

pub use bot::{detect_bot, BotVerdict};
pub use fingerprint::{fingerprint_click, FingerprintGate};
pub use rate_limit::{RateLimitKey, RateLimiter};
