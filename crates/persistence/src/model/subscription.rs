use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub(crate) mod fields {
    pub const EVENT_NAME: &str = "eventName";
    pub const EVENT_KEY: &str = "eventKey";
    pub const WORKFLOW_ID: &str = "workflowId";
    pub const SUBSCRIBE_AS_OF: &str = "subscribeAsOf";
    pub const EXTERNAL_TOKEN: &str = "externalToken";
    pub const EXTERNAL_TOKEN_EXPIRY: &str = "externalTokenExpiry";
    pub const EXTERNAL_WORKER_ID: &str = "externalWorkerId";
}

/// A workflow step waiting for an external event
///
/// While a worker delivers a matching event it holds the subscription's
/// token until `external_token_expiry`. At most one unexpired token exists at
/// a time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventSubscription {
    /// Empty until assigned by the caller or on create
    #[serde(default)]
    pub id: String,
    pub workflow_id: String,
    #[serde(default)]
    pub step_id: Option<i32>,
    #[serde(default)]
    pub execution_pointer_id: Option<String>,
    pub event_name: String,
    pub event_key: String,
    #[serde(with = "chrono::serde::ts_nanoseconds")]
    pub subscribe_as_of: DateTime<Utc>,
    #[serde(default)]
    pub subscription_data: serde_json::Value,
    #[serde(default)]
    pub external_token: Option<String>,
    #[serde(default, with = "chrono::serde::ts_nanoseconds_option")]
    pub external_token_expiry: Option<DateTime<Utc>>,
    #[serde(default)]
    pub external_worker_id: Option<String>,
}

impl EventSubscription {
    pub fn new(
        workflow_id: impl Into<String>,
        event_name: impl Into<String>,
        event_key: impl Into<String>,
        subscribe_as_of: DateTime<Utc>,
    ) -> Self {
        Self {
            id: String::new(),
            workflow_id: workflow_id.into(),
            step_id: None,
            execution_pointer_id: None,
            event_name: event_name.into(),
            event_key: event_key.into(),
            subscribe_as_of,
            subscription_data: serde_json::Value::Null,
            external_token: None,
            external_token_expiry: None,
            external_worker_id: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Attach the waiting step
    pub fn with_step(mut self, step_id: i32, execution_pointer_id: impl Into<String>) -> Self {
        self.step_id = Some(step_id);
        self.execution_pointer_id = Some(execution_pointer_id.into());
        self
    }

    /// Whether a worker holds an unexpired token at `now`
    pub fn is_claimed_at(&self, now: DateTime<Utc>) -> bool {
        self.external_token.is_some()
            && self.external_token_expiry.map_or(true, |expiry| expiry >= now)
    }
}
