/// file: src/types.rs
/// description: Wire envelope and payload models for the push-update protocol
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Control topic used to register interest in a topic with the server.
pub const CONTROL_SUBSCRIBE: &str = "subscribe";
/// Control topic used to drop interest in a topic.
pub const CONTROL_UNSUBSCRIBE: &str = "unsubscribe";

/// Every frame on the wire, inbound or outbound, is a JSON envelope tagging a
/// payload with the topic it belongs to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub channel: String,
    pub data: Value,
}

impl Envelope {
    pub fn new(channel: impl Into<String>, data: Value) -> Self {
        Self {
            channel: channel.into(),
            data,
        }
    }

    /// Builds the payload for a subscribe/unsubscribe control frame.
    pub fn control_payload(topic: &str) -> Value {
        serde_json::json!({ "topic": topic })
    }
}

/// Streaming quote update as the dashboard backend publishes it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceTick {
    pub symbol: String,
    pub price: f64,
    #[serde(default)]
    pub change_percent: f64,
    pub ts: DateTime<Utc>,
}
