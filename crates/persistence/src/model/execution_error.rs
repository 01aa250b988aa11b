use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Failure raised while executing a workflow step
///
/// Write-once; records carry no identity beyond their storage order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionError {
    pub workflow_id: String,
    /// The step that failed
    pub execution_pointer_id: String,
    #[serde(with = "chrono::serde::ts_nanoseconds")]
    pub error_time: DateTime<Utc>,
    pub message: String,
}

impl ExecutionError {
    pub fn new(
        workflow_id: impl Into<String>,
        execution_pointer_id: impl Into<String>,
        message: impl Into<String>,
        error_time: DateTime<Utc>,
    ) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            execution_pointer_id: execution_pointer_id.into(),
            error_time,
            message: message.into(),
        }
    }
}
