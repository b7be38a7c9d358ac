use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Envelope wrapping a tagged event payload on its way through the WAL,
/// the failover queue, and the durable stream. `event_type` discriminates
/// which payload variant the WAL replayer and stream consumer should expect;
/// kept as a string (rather than folding payload into an enum) because a
/// WAL record is decoded before its payload type is known.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event<T: Serialize> {
    pub id: Uuid,
    pub source: String,
    pub event_type: String,
    pub timestamp: DateTime<Utc>,
    pub correlation_id: Option<Uuid>,
    pub data: T,
}

impl<T: Serialize> Event<T> {
    pub fn new(source: impl Into<String>, event_type: impl Into<String>, data: T) -> Self {
        Self {
            id: Uuid::now_v7(),
            source: source.into(),
            event_type: event_type.into(),
            timestamp: Utc::now(),
            correlation_id: None,
            data,
        }
    }

    pub fn with_correlation(mut self, correlation_id: Uuid) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }
}

/// Names of the durable streams component H consumes, and the WAL event_type
/// tags component F stores. The three stay in lockstep: a click is always
/// `event_type == EVENT_TYPE_CLICK` in the WAL and published to `STREAM_CLICKS`.
pub mod stream_keys {
    pub const STREAM_CLICKS: &str = "clicks";
    pub const STREAM_CONVERSIONS: &str = "conversions";
    pub const STREAM_POSTBACKS: &str = "postbacks";

    pub const EVENT_TYPE_CLICK: &str = "click";
    pub const EVENT_TYPE_CONVERSION: &str = "conversion";
    pub const EVENT_TYPE_POSTBACK: &str = "postback";

    pub const CONSUMER_GROUP: &str = "afftok-consumers";
}

/// Tagged payload variants (§9 design note): dynamic `map[string]any` payloads
/// from the source are kept as typed structs wherever the shape is known ahead
/// of time. Only the template engine (4.J) and the WAL's on-disk payload map
/// fall back to a untyped `serde_json::Value` tree.
pub mod payloads {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Serialize};
    use uuid::Uuid;

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct ClickPayload {
        pub click_id: Uuid,
        pub user_offer_id: Uuid,
        pub ip: String,
        pub user_agent: String,
        pub country: Option<String>,
        pub referrer: Option<String>,
        pub fingerprint: String,
        pub clicked_at: DateTime<Utc>,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct ConversionPayload {
        pub conversion_id: Uuid,
        pub user_offer_id: Uuid,
        pub click_id: Option<Uuid>,
        pub external_id: String,
        pub amount: f64,
        pub commission: f64,
        pub currency: String,
        pub status: String,
        pub created_at: DateTime<Utc>,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct PostbackPayload {
        pub conversion_id: Uuid,
        pub raw: serde_json::Value,
        pub received_at: DateTime<Utc>,
    }

    /// The WAL-replay boundary: given an `event_type` string, the caller
    /// decides which payload variant to deserialize `payload` into.
    #[derive(Debug, Clone, Serialize, Deserialize)]
    #[serde(tag = "event_type", rename_all = "snake_case")]
    pub enum WalPayload {
        Click(ClickPayload),
        Conversion(ConversionPayload),
        Postback(PostbackPayload),
    }
}
