use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub(crate) mod fields {
    pub const EVENT_NAME: &str = "eventName";
    pub const EVENT_KEY: &str = "eventKey";
    pub const EVENT_TIME: &str = "eventTime";
    pub const IS_PROCESSED: &str = "isProcessed";
}

/// An inbound event awaiting delivery to subscribed workflows
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    /// Empty until assigned by the caller or on create
    #[serde(default)]
    pub id: String,
    pub event_name: String,
    pub event_key: String,
    #[serde(default)]
    pub data: serde_json::Value,
    #[serde(with = "chrono::serde::ts_nanoseconds")]
    pub event_time: DateTime<Utc>,
    #[serde(default)]
    pub is_processed: bool,
}

impl Event {
    pub fn new(
        event_name: impl Into<String>,
        event_key: impl Into<String>,
        data: serde_json::Value,
        event_time: DateTime<Utc>,
    ) -> Self {
        Self {
            id: String::new(),
            event_name: event_name.into(),
            event_key: event_key.into(),
            data,
            event_time,
            is_processed: false,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }
}
