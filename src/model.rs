use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// A single stored chat message, denormalized with its channel and guild names
/// so query results can be rendered without a mapping lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub author: String,
    pub author_id: String,
    pub content: String,
    /// Creation time in epoch milliseconds.
    pub timestamp: i64,
    pub channel: String,
    pub channel_id: String,
    pub guild: String,
    pub guild_id: String,
    /// Source message id, used to skip records that were already stored.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
}

/// Entry of the channel mapping document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelEntry {
    pub channel_name: String,
    pub guild_id: String,
    pub guild_name: String,
}

/// One time window of an aggregation query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Bucket {
    /// Bucket start as an ISO-8601 UTC instant.
    pub timestamp: String,
    pub messages: Vec<MessageRecord>,
}

impl Bucket {
    pub fn starting_at(start_ms: i64) -> Self {
        Self {
            timestamp: format_instant(start_ms),
            messages: Vec::new(),
        }
    }
}

/// Renders epoch millis as `YYYY-MM-DDTHH:MM:SS.sssZ`. Out-of-range values
/// fall back to the raw number so a label is always produced.
pub fn format_instant(ms: i64) -> String {
    match DateTime::<Utc>::from_timestamp_millis(ms) {
        Some(dt) => dt.to_rfc3339_opts(SecondsFormat::Millis, true),
        None => ms.to_string(),
    }
}
